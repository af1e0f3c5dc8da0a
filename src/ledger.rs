//! Quota ledger: usage counting, grant activation, renewal, and the legacy grant backfill.

// self
use crate::{
	_prelude::*,
	auth::{ModuleId, UserId},
	catalog::ModuleCatalogEntry,
	grant::{AccessLevel, ModuleGrant, RenewalPolicy, TierQuotas},
	obs::{self, OperationKind, OperationSpan, Outcome},
	store::{CredentialStore, IncrementOutcome},
};

/// Outcome of [`QuotaLedger::verify_renewal_reset`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalCheck {
	/// Fixed quota the tier resets to, when the grant kind resets at all.
	pub expected_quota: Option<u64>,
	/// Current usage counter.
	pub usage_count: u64,
	/// Current ceiling.
	pub max_usage: Option<u64>,
	/// `true` when the remaining allowance never exceeds the fixed quota.
	pub consistent: bool,
}

/// Summary of a [`QuotaLedger::migrate_legacy_grants`] run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
	/// Grants rewritten to a catalog id.
	pub migrated: usize,
	/// Grants rewritten but deactivated because the pair already had an active grant.
	pub deactivated: usize,
	/// Legacy keys that matched more than one catalog title.
	pub ambiguous: Vec<String>,
	/// Legacy keys that matched no catalog title.
	pub unresolved: Vec<String>,
}

/// Records accesses against grants and manages grant lifecycles.
#[derive(Clone)]
pub struct QuotaLedger {
	store: Arc<dyn CredentialStore>,
	quotas: TierQuotas,
	free_period: Duration,
}
impl QuotaLedger {
	const DEFAULT_FREE_PERIOD: Duration = Duration::days(90);

	/// Creates a ledger over `store` using `quotas` for activation and renewal.
	pub fn new(store: Arc<dyn CredentialStore>, quotas: TierQuotas) -> Self {
		Self { store, quotas, free_period: Self::DEFAULT_FREE_PERIOD }
	}

	/// Overrides the validity window granted by free self-activation (defaults to 90 days).
	pub fn with_free_period(mut self, period: Duration) -> Self {
		self.free_period = if period.is_positive() { period } else { Self::DEFAULT_FREE_PERIOD };

		self
	}

	/// Tier quotas in effect.
	pub fn quotas(&self) -> &TierQuotas {
		&self.quotas
	}

	/// Records one access; returns `true` when the counter moved.
	pub async fn increment_usage(&self, user_id: &UserId, module_id: &ModuleId) -> Result<bool> {
		Ok(self.record_usage(user_id, module_id, OffsetDateTime::now_utc()).await?.is_updated())
	}

	/// Records one access at `now` and reports exactly what happened.
	///
	/// The increment is conditional: a grant already at its ceiling is left untouched and
	/// reported as [`IncrementOutcome::QuotaExhausted`].
	pub async fn record_usage(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
		now: OffsetDateTime,
	) -> Result<IncrementOutcome> {
		const KIND: OperationKind = OperationKind::IncrementUsage;

		let span = OperationSpan::new(KIND, "record_usage");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span
			.instrument(<dyn CredentialStore>::increment_usage(
				self.store.as_ref(),
				user_id,
				module_id,
				now,
			))
			.await
			.map_err(Error::from);

		match &result {
			Ok(IncrementOutcome::Updated(_)) => obs::record_outcome(KIND, Outcome::Success),
			Ok(_) => obs::record_outcome(KIND, Outcome::Denied),
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	/// Creates the active grant for a purchase, admin force-activation, or free self-activation.
	///
	/// Any previous active grant for the pair is deactivated. The ceiling is the tier quota.
	pub async fn activate(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
		level: AccessLevel,
		valid_for: Option<Duration>,
		now: OffsetDateTime,
	) -> Result<ModuleGrant> {
		let mut builder = ModuleGrant::builder(user_id.clone(), module_id.clone())
			.access_level(level)
			.max_usage(self.quotas.quota_for(level))
			.created_at(now);

		if let Some(period) = valid_for {
			builder = builder.expires_at(now + period);
		}

		let grant =
			<dyn CredentialStore>::activate_grant(self.store.as_ref(), builder.build()).await?;

		#[cfg(feature = "tracing")]
		tracing::info!(
			user = %user_id,
			module = %module_id,
			level = level.as_str(),
			"Module grant activated."
		);

		Ok(grant)
	}

	/// Self-activation for free modules. Paid, hidden, or unknown modules are refused.
	pub async fn activate_free(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
		now: OffsetDateTime,
	) -> Result<ModuleGrant> {
		let entry: ModuleCatalogEntry =
			<dyn CredentialStore>::fetch_module(self.store.as_ref(), module_id)
				.await?
				.filter(|entry| entry.is_visible)
				.ok_or_else(|| Error::invalid_request(format!("module `{module_id}` is unknown")))?;

		if !entry.is_free() {
			return Err(Error::invalid_request(format!(
				"module `{module_id}` requires a purchase"
			)));
		}

		self.activate(user_id, &entry.id, AccessLevel::Basic, Some(self.free_period), now).await
	}

	/// Extends the active grant by `extension` and applies the grant kind's renewal policy.
	///
	/// The extension starts from the later of `now` and the current expiry, so renewing early
	/// never loses paid time. Returns `None` when the pair holds no active grant.
	pub async fn renew(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
		extension: Duration,
		now: OffsetDateTime,
	) -> Result<Option<ModuleGrant>> {
		const KIND: OperationKind = OperationKind::RenewGrant;

		let span = OperationSpan::new(KIND, "renew");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span
			.instrument(async move {
				let Some(current) =
					<dyn CredentialStore>::fetch_active_grant(self.store.as_ref(), user_id, module_id)
						.await?
				else {
					return Ok(None);
				};
				let base = current.expires_at.map_or(now, |expires_at| expires_at.max(now));
				let policy = current.access_level.renewal_policy(&self.quotas);

				<dyn CredentialStore>::renew_grant(
					self.store.as_ref(),
					user_id,
					module_id,
					base + extension,
					policy,
					now,
				)
				.await
				.map_err(Error::from)
			})
			.await;

		match &result {
			Ok(Some(_)) => obs::record_outcome(KIND, Outcome::Success),
			Ok(None) => obs::record_outcome(KIND, Outcome::Denied),
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	/// Consistency check: a reset-policy grant must hold at most its fixed tier quota.
	///
	/// Returns `None` when the pair holds no active grant.
	pub async fn verify_renewal_reset(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
	) -> Result<Option<RenewalCheck>> {
		let Some(grant) =
			<dyn CredentialStore>::fetch_active_grant(self.store.as_ref(), user_id, module_id)
				.await?
		else {
			return Ok(None);
		};
		let expected_quota = match grant.access_level.renewal_policy(&self.quotas) {
			RenewalPolicy::ResetTo(quota) => Some(quota),
			RenewalPolicy::TopUp(_) => None,
		};
		let consistent = match expected_quota {
			Some(0) => grant.max_usage.is_none(),
			Some(quota) =>
				grant.max_usage == Some(quota) && grant.quota().remaining().unwrap_or(0) <= quota,
			None => true,
		};

		if !consistent {
			#[cfg(feature = "tracing")]
			tracing::warn!(
				user = %user_id,
				module = %module_id,
				usage = grant.usage_count,
				max = ?grant.max_usage,
				"Grant allowance exceeds its fixed tier quota."
			);
		}

		Ok(Some(RenewalCheck {
			expected_quota,
			usage_count: grant.usage_count,
			max_usage: grant.max_usage,
			consistent,
		}))
	}

	/// One-time backfill that rewrites grants keyed by a catalog title to the catalog id.
	///
	/// A legacy key resolves when it equals or is contained in exactly one catalog title
	/// (case-insensitive). Rewritten grants that would collide with an existing active grant for
	/// the same pair are deactivated. Running it again is a no-op.
	pub async fn migrate_legacy_grants(&self) -> Result<MigrationReport> {
		let modules = <dyn CredentialStore>::list_modules(self.store.as_ref()).await?;
		let mut grants = <dyn CredentialStore>::list_grants(self.store.as_ref()).await?;
		let mut report = MigrationReport::default();
		let known = modules.iter().map(|entry| entry.id.clone()).collect::<Vec<_>>();

		for idx in 0..grants.len() {
			if known.contains(&grants[idx].module_id) {
				continue;
			}

			let legacy = grants[idx].module_id.to_lowercase();
			let matches = modules
				.iter()
				.filter(|entry| entry.title.to_lowercase().contains(&legacy))
				.collect::<Vec<_>>();
			let target = match matches.as_slice() {
				[entry] => entry.id.clone(),
				[] => {
					report.unresolved.push(grants[idx].module_id.to_string());

					continue;
				},
				_ => {
					report.ambiguous.push(grants[idx].module_id.to_string());

					continue;
				},
			};
			let collides = grants[idx].is_active
				&& grants.iter().enumerate().any(|(other, grant)| {
					other != idx
						&& grant.is_active && grant.matches(&grants[idx].user_id, &target)
				});
			let grant = &mut grants[idx];

			grant.module_id = target;

			if collides {
				grant.is_active = false;
				report.deactivated += 1;
			}

			<dyn CredentialStore>::save_grant(self.store.as_ref(), grant.clone()).await?;

			report.migrated += 1;
		}

		#[cfg(feature = "tracing")]
		tracing::info!(
			migrated = report.migrated,
			deactivated = report.deactivated,
			ambiguous = report.ambiguous.len(),
			unresolved = report.unresolved.len(),
			"Legacy grant migration finished."
		);

		Ok(report)
	}
}
impl Debug for QuotaLedger {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("QuotaLedger")
			.field("quotas", &self.quotas)
			.field("free_period", &self.free_period)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn user() -> UserId {
		UserId::new("u-1").expect("User fixture should be valid.")
	}

	fn module() -> ModuleId {
		ModuleId::new("metube").expect("Module fixture should be valid.")
	}

	fn ledger() -> (Arc<MemoryStore>, QuotaLedger) {
		let store = Arc::new(MemoryStore::default());

		(store.clone(), QuotaLedger::new(store, TierQuotas::default()))
	}

	#[tokio::test]
	async fn renewal_extends_from_the_later_of_now_and_expiry() {
		let (_, ledger) = ledger();
		let now = macros::datetime!(2025-06-01 00:00 UTC);

		ledger
			.activate(&user(), &module(), AccessLevel::Premium, Some(Duration::days(10)), now)
			.await
			.expect("Activation should succeed.");

		let renewed = ledger
			.renew(&user(), &module(), Duration::days(30), now)
			.await
			.expect("Renewal should succeed.")
			.expect("Active grant should be renewed.");

		assert_eq!(renewed.expires_at, Some(now + Duration::days(40)));

		let late = now + Duration::days(100);
		let renewed = ledger
			.renew(&user(), &module(), Duration::days(30), late)
			.await
			.expect("Renewal should succeed.")
			.expect("Active grant should be renewed.");

		assert_eq!(renewed.expires_at, Some(late + Duration::days(30)));
	}

	#[tokio::test]
	async fn activate_free_refuses_paid_modules() {
		let (store, ledger) = ledger();
		let now = OffsetDateTime::now_utc();

		store
			.save_module(ModuleCatalogEntry::new(module(), "MeTube").with_price(990))
			.await
			.expect("Saving the catalog fixture should succeed.");

		let err = ledger
			.activate_free(&user(), &module(), now)
			.await
			.expect_err("Paid modules must not be self-activated.");

		assert!(matches!(err, Error::InvalidRequest { .. }));

		store
			.save_module(ModuleCatalogEntry::new(module(), "MeTube"))
			.await
			.expect("Saving the catalog fixture should succeed.");

		let grant =
			ledger.activate_free(&user(), &module(), now).await.expect("Free activation should work.");

		assert_eq!(grant.max_usage, Some(50));
		assert_eq!(grant.expires_at, Some(now + Duration::days(90)));
	}

	#[tokio::test]
	async fn legacy_title_keyed_grants_are_rewritten_once() {
		let (store, ledger) = ledger();
		let legacy = ModuleId::new("LibreSpeed").expect("Legacy key fixture should be valid.");
		let target = ModuleId::new("librespeed").expect("Module fixture should be valid.");

		store
			.save_module(ModuleCatalogEntry::new(target.clone(), "LibreSpeed Test"))
			.await
			.expect("Saving the catalog fixture should succeed.");
		store
			.activate_grant(ModuleGrant::builder(user(), legacy).build())
			.await
			.expect("Saving the legacy grant should succeed.");
		store
			.activate_grant(
				ModuleGrant::builder(
					user(),
					ModuleId::new("ghost").expect("Ghost fixture should be valid."),
				)
				.build(),
			)
			.await
			.expect("Saving the orphan grant should succeed.");

		let report = ledger.migrate_legacy_grants().await.expect("Migration should succeed.");

		assert_eq!(report.migrated, 1);
		assert_eq!(report.unresolved, vec!["ghost".to_owned()]);
		assert!(
			store
				.fetch_active_grant(&user(), &target)
				.await
				.expect("Lookup should succeed.")
				.is_some()
		);

		let again = ledger.migrate_legacy_grants().await.expect("Second run should succeed.");

		assert_eq!(again.migrated, 0);
	}
}
