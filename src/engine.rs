//! Authorization engine: the read-only decision that composes catalog visibility, grant
//! existence, grant expiry, and quota state into one verdict.
//!
//! A verdict is a value, never an error. [`AuthorizationEngine::check_access`] only fails when
//! the credential store itself fails; every "no" is an [`AuthorizationResult`] carrying a
//! [`Denial`] whose [`Display`] output is the user-facing (French) reason.

// self
use crate::{
	_prelude::*,
	auth::{ModuleId, UserIdentity},
	catalog::ModuleCatalogEntry,
	grant::{ModuleGrant, QuotaSnapshot},
	obs::{self, OperationKind, OperationSpan, Outcome},
	store::CredentialStore,
};

/// Inputs to one authorization decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRequest {
	/// Authenticated caller; `None` when the session carried no identity.
	pub user: Option<UserIdentity>,
	/// Catalog id of the requested module.
	pub module_id: ModuleId,
	/// Display title supplied by the caller, if any. Informational only; lookups use the id.
	pub module_title: Option<String>,
}
impl AccessRequest {
	/// Creates a request for an authenticated user.
	pub fn new(user: UserIdentity, module_id: ModuleId) -> Self {
		Self { user: Some(user), module_id, module_title: None }
	}

	/// Creates a request that carries no identity.
	pub fn anonymous(module_id: ModuleId) -> Self {
		Self { user: None, module_id, module_title: None }
	}

	/// Attaches the caller-supplied module title.
	pub fn with_module_title(mut self, title: impl Into<String>) -> Self {
		self.module_title = Some(title.into());

		self
	}
}

/// Reason an access attempt was refused, in evaluation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum Denial {
	/// No user id or e-mail was supplied.
	NotAuthenticated,
	/// No catalog entry has the requested id.
	ModuleNotFound,
	/// The catalog entry exists but is hidden.
	ModuleUnavailable,
	/// The user holds no active grant for the module.
	#[serde(rename = "no_access")]
	NoGrant,
	/// The active grant is past its expiry.
	#[serde(rename = "access_expired")]
	Expired,
	/// The active grant reached its usage ceiling.
	QuotaExhausted {
		/// Accesses recorded so far.
		usage_count: u64,
		/// Usage ceiling.
		max_usage: u64,
	},
}
impl Denial {
	/// Stable machine-readable code.
	pub const fn code(&self) -> &'static str {
		match self {
			Denial::NotAuthenticated => "not_authenticated",
			Denial::ModuleNotFound => "module_not_found",
			Denial::ModuleUnavailable => "module_unavailable",
			Denial::NoGrant => "no_access",
			Denial::Expired => "access_expired",
			Denial::QuotaExhausted { .. } => "quota_exhausted",
		}
	}

	/// Returns `true` for failures of identity rather than entitlement.
	pub fn is_authentication(&self) -> bool {
		matches!(self, Denial::NotAuthenticated)
	}
}
impl Display for Denial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Denial::NotAuthenticated => f.write_str("Utilisateur non authentifié"),
			Denial::ModuleNotFound => f.write_str("Module non trouvé"),
			Denial::ModuleUnavailable => f.write_str("Module non disponible"),
			Denial::NoGrant => f.write_str("Aucun accès trouvé pour ce module"),
			Denial::Expired => f.write_str("Accès au module expiré"),
			Denial::QuotaExhausted { usage_count, max_usage } =>
				write!(f, "Quota d'utilisation épuisé ({usage_count}/{max_usage})"),
		}
	}
}

/// Verdict produced by [`AuthorizationEngine::check_access`].
///
/// Expired and over-quota verdicts still carry the catalog entry and grant so the caller can
/// offer a renewal path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationResult {
	/// Refusal reason; `None` means authorized.
	pub denial: Option<Denial>,
	/// Resolved catalog entry.
	pub catalog_entry: Option<ModuleCatalogEntry>,
	/// Resolved active grant.
	pub grant: Option<ModuleGrant>,
	/// Quota snapshot derived from the grant.
	pub quota: Option<QuotaSnapshot>,
}
impl AuthorizationResult {
	/// Builds a denial that carries no context.
	pub fn denied(denial: Denial) -> Self {
		Self { denial: Some(denial), catalog_entry: None, grant: None, quota: None }
	}

	/// Returns `true` when access is allowed.
	pub fn is_authorized(&self) -> bool {
		self.denial.is_none()
	}

	/// User-facing reason, present on denials only.
	pub fn reason(&self) -> Option<String> {
		self.denial.as_ref().map(ToString::to_string)
	}

	/// Machine-readable denial code, present on denials only.
	pub fn code(&self) -> Option<&'static str> {
		self.denial.as_ref().map(Denial::code)
	}

	fn with_entry(mut self, entry: ModuleCatalogEntry) -> Self {
		self.catalog_entry = Some(entry);

		self
	}

	fn with_grant(mut self, grant: ModuleGrant) -> Self {
		self.quota = Some(grant.quota());
		self.grant = Some(grant);

		self
	}
}

/// Decision function over the credential store. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct AuthorizationEngine {
	store: Arc<dyn CredentialStore>,
}
impl AuthorizationEngine {
	/// Creates an engine backed by `store`.
	pub fn new(store: Arc<dyn CredentialStore>) -> Self {
		Self { store }
	}

	/// Shared handle to the backing store.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Evaluates `request` against the current wall clock.
	pub async fn check_access(&self, request: &AccessRequest) -> Result<AuthorizationResult> {
		self.check_access_at(request, OffsetDateTime::now_utc()).await
	}

	/// Evaluates `request` at `now`. Performs reads only.
	pub async fn check_access_at(
		&self,
		request: &AccessRequest,
		now: OffsetDateTime,
	) -> Result<AuthorizationResult> {
		const KIND: OperationKind = OperationKind::CheckAccess;

		let span = OperationSpan::new(KIND, "check_access");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span.instrument(self.evaluate(request, now)).await;

		match &result {
			Ok(verdict) if verdict.is_authorized() => obs::record_outcome(KIND, Outcome::Success),
			Ok(_) => obs::record_outcome(KIND, Outcome::Denied),
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	async fn evaluate(
		&self,
		request: &AccessRequest,
		now: OffsetDateTime,
	) -> Result<AuthorizationResult> {
		let Some(user) = request.user.as_ref() else {
			return Ok(AuthorizationResult::denied(Denial::NotAuthenticated));
		};
		let Some(entry) =
			<dyn CredentialStore>::fetch_module(self.store.as_ref(), &request.module_id).await?
		else {
			return Ok(AuthorizationResult::denied(Denial::ModuleNotFound));
		};

		if !entry.is_visible {
			return Ok(AuthorizationResult::denied(Denial::ModuleUnavailable).with_entry(entry));
		}

		let Some(grant) =
			<dyn CredentialStore>::fetch_active_grant(self.store.as_ref(), &user.user_id, &entry.id)
				.await?
		else {
			return Ok(AuthorizationResult::denied(Denial::NoGrant).with_entry(entry));
		};

		if grant.is_expired_at(now) {
			return Ok(AuthorizationResult::denied(Denial::Expired)
				.with_entry(entry)
				.with_grant(grant));
		}

		let quota = grant.quota();

		if quota.is_quota_exceeded {
			let denial = Denial::QuotaExhausted {
				usage_count: quota.usage_count,
				max_usage: quota.max_usage.unwrap_or_default(),
			};

			return Ok(AuthorizationResult::denied(denial).with_entry(entry).with_grant(grant));
		}

		Ok(AuthorizationResult { denial: None, catalog_entry: None, grant: None, quota: None }
			.with_entry(entry)
			.with_grant(grant))
	}
}
impl Debug for AuthorizationEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AuthorizationEngine(..)")
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{auth::UserId, store::MemoryStore};

	fn user() -> UserIdentity {
		UserIdentity::new(UserId::new("u-1").expect("User fixture should be valid."), "u@iahome.fr")
			.expect("Identity fixture should be valid.")
	}

	fn module() -> ModuleId {
		ModuleId::new("librespeed").expect("Module fixture should be valid.")
	}

	#[test]
	fn denial_messages_and_codes_are_stable() {
		let quota = Denial::QuotaExhausted { usage_count: 50, max_usage: 50 };

		assert_eq!(quota.to_string(), "Quota d'utilisation épuisé (50/50)");
		assert_eq!(quota.code(), "quota_exhausted");
		assert_eq!(Denial::Expired.to_string(), "Accès au module expiré");
		assert_eq!(Denial::NoGrant.code(), "no_access");
		assert!(Denial::NotAuthenticated.is_authentication());
	}

	#[tokio::test]
	async fn checks_run_in_order_and_stop_at_first_failure() {
		let store = Arc::new(MemoryStore::default());
		let engine = AuthorizationEngine::new(store.clone());
		let now = macros::datetime!(2025-06-01 12:00 UTC);
		let verdict = engine
			.check_access_at(&AccessRequest::anonymous(module()), now)
			.await
			.expect("Anonymous check should not fail.");

		assert_eq!(verdict.denial, Some(Denial::NotAuthenticated));

		let request = AccessRequest::new(user(), module());
		let verdict =
			engine.check_access_at(&request, now).await.expect("Unknown module check should not fail.");

		assert_eq!(verdict.denial, Some(Denial::ModuleNotFound));

		store
			.save_module(ModuleCatalogEntry::new(module(), "LibreSpeed"))
			.await
			.expect("Saving the catalog fixture should succeed.");

		let verdict =
			engine.check_access_at(&request, now).await.expect("Missing grant check should not fail.");

		assert_eq!(verdict.denial, Some(Denial::NoGrant));
		assert!(verdict.catalog_entry.is_some());

		store
			.activate_grant(
				ModuleGrant::builder(user().user_id, module())
					.usage_count(3)
					.max_usage(3)
					.expires_at(now - Duration::days(1))
					.build(),
			)
			.await
			.expect("Activating the grant fixture should succeed.");

		let verdict =
			engine.check_access_at(&request, now).await.expect("Expired grant check should not fail.");

		assert_eq!(verdict.denial, Some(Denial::Expired));
		assert!(verdict.grant.is_some());
	}
}
