//! Credential store contract and built-in backends for catalog entries, grants, tokens, and the
//! access audit log.
//!
//! Every mutation that enforces an invariant (single active grant, quota ceiling, single-use
//! tokens) happens inside one store call so the check and the write cannot interleave with a
//! concurrent request.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessTokenRecord, ModuleId, UserId, UserIdentity},
	catalog::ModuleCatalogEntry,
	grant::{ModuleGrant, RenewalPolicy},
};

/// Boxed future returned by every [`CredentialStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for the gate's persisted state.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches a catalog entry by its exact id.
	fn fetch_module<'a>(
		&'a self,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleCatalogEntry>>;

	/// Inserts or replaces a catalog entry.
	fn save_module(&self, entry: ModuleCatalogEntry) -> StoreFuture<'_, ()>;

	/// Lists every catalog entry, visible or not.
	fn list_modules(&self) -> StoreFuture<'_, Vec<ModuleCatalogEntry>>;

	/// Fetches the single active grant for the (user, module) pair, if any.
	fn fetch_active_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleGrant>>;

	/// Lists every grant row, active or not.
	fn list_grants(&self) -> StoreFuture<'_, Vec<ModuleGrant>>;

	/// Inserts or replaces a grant row by its id without touching other rows.
	fn save_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ()>;

	/// Inserts `grant` as the active grant for its pair, deactivating any previous active grant.
	fn activate_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ModuleGrant>;

	/// Conditionally increments the usage counter of the active grant.
	///
	/// The increment only happens while the grant is under quota; the check and the write are a
	/// single atomic step.
	fn increment_usage<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, IncrementOutcome>;

	/// Extends the active grant to `expires_at` and applies the renewal policy.
	fn renew_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		expires_at: OffsetDateTime,
		policy: RenewalPolicy,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<ModuleGrant>>;

	/// Persists a freshly minted opaque token.
	fn insert_token(&self, record: AccessTokenRecord) -> StoreFuture<'_, ()>;

	/// Looks up an opaque token by its exact value and, if still valid for `module_id`, marks it
	/// used in the same step.
	fn consume_token<'a>(
		&'a self,
		token: &'a str,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, ConsumeOutcome>;

	/// Marks an opaque token used without validating it. Returns `false` if it does not exist.
	fn revoke_token<'a>(&'a self, token: &'a str, instant: OffsetDateTime) -> StoreFuture<'a, bool>;

	/// Deletes every opaque token whose expiry is at or before `instant`; returns the count.
	fn sweep_tokens(&self, instant: OffsetDateTime) -> StoreFuture<'_, usize>;

	/// Appends one row to the access audit log.
	fn append_access_log(&self, entry: AccessLogEntry) -> StoreFuture<'_, ()>;

	/// Returns the access audit log in insertion order.
	fn list_access_logs(&self) -> StoreFuture<'_, Vec<AccessLogEntry>>;
}

/// Result of a conditional usage increment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrementOutcome {
	/// The counter was incremented; carries the updated grant.
	Updated(ModuleGrant),
	/// The grant was already at or above its quota; nothing changed.
	QuotaExhausted(ModuleGrant),
	/// No active grant exists for the pair.
	Missing,
}
impl IncrementOutcome {
	/// Returns `true` when the write happened.
	pub fn is_updated(&self) -> bool {
		matches!(self, Self::Updated(_))
	}
}

/// Result of an atomic read-then-invalidate on an opaque token.
#[derive(Clone, Debug)]
pub enum ConsumeOutcome {
	/// The token was valid and is now marked used; carries the record as consumed.
	Consumed(AccessTokenRecord),
	/// No token with this value exists.
	NotFound,
	/// The token was consumed earlier.
	AlreadyUsed,
	/// The token expired before this attempt.
	Expired,
	/// The token belongs to a different module and was left untouched.
	ModuleMismatch,
}

/// Append-only audit record of one successful module access.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
	/// User who accessed the module.
	pub user: UserIdentity,
	/// Module that was accessed.
	pub module_id: ModuleId,
	/// Delivery label (`redirect`, `reverse_proxy`).
	pub access_type: String,
	/// Grant usage counter after the access.
	pub access_count: u64,
	/// Audit instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// In-memory tables shared by the built-in backends.
///
/// Both [`MemoryStore`] and [`FileStore`] hold one of these behind a lock and delegate every
/// operation to it, so their semantics cannot drift apart.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
	#[serde(default)]
	modules: BTreeMap<ModuleId, ModuleCatalogEntry>,
	#[serde(default)]
	grants: Vec<ModuleGrant>,
	#[serde(default)]
	tokens: HashMap<String, AccessTokenRecord>,
	#[serde(default)]
	access_logs: Vec<AccessLogEntry>,
}
impl Tables {
	fn active_grant_mut(
		&mut self,
		user_id: &UserId,
		module_id: &ModuleId,
	) -> Option<&mut ModuleGrant> {
		self.grants.iter_mut().find(|grant| grant.is_active && grant.matches(user_id, module_id))
	}

	pub(crate) fn fetch_module(&self, module_id: &ModuleId) -> Option<ModuleCatalogEntry> {
		self.modules.get(module_id).cloned()
	}

	pub(crate) fn save_module(&mut self, entry: ModuleCatalogEntry) {
		self.modules.insert(entry.id.clone(), entry);
	}

	pub(crate) fn list_modules(&self) -> Vec<ModuleCatalogEntry> {
		self.modules.values().cloned().collect()
	}

	pub(crate) fn fetch_active_grant(
		&self,
		user_id: &UserId,
		module_id: &ModuleId,
	) -> Option<ModuleGrant> {
		self.grants.iter().find(|grant| grant.is_active && grant.matches(user_id, module_id)).cloned()
	}

	pub(crate) fn list_grants(&self) -> Vec<ModuleGrant> {
		self.grants.clone()
	}

	pub(crate) fn save_grant(&mut self, grant: ModuleGrant) {
		match self.grants.iter_mut().find(|existing| existing.id == grant.id) {
			Some(existing) => *existing = grant,
			None => self.grants.push(grant),
		}
	}

	pub(crate) fn activate_grant(&mut self, mut grant: ModuleGrant) -> ModuleGrant {
		let instant = grant.updated_at;

		for existing in self.grants.iter_mut().filter(|existing| {
			existing.is_active
				&& existing.id != grant.id
				&& existing.matches(&grant.user_id, &grant.module_id)
		}) {
			existing.is_active = false;
			existing.updated_at = instant;
		}

		grant.is_active = true;

		self.save_grant(grant.clone());

		grant
	}

	pub(crate) fn increment_usage(
		&mut self,
		user_id: &UserId,
		module_id: &ModuleId,
		instant: OffsetDateTime,
	) -> IncrementOutcome {
		let Some(grant) = self.active_grant_mut(user_id, module_id) else {
			return IncrementOutcome::Missing;
		};

		if grant.quota().is_quota_exceeded {
			return IncrementOutcome::QuotaExhausted(grant.clone());
		}

		grant.usage_count = grant.usage_count.saturating_add(1);
		grant.updated_at = instant;

		IncrementOutcome::Updated(grant.clone())
	}

	pub(crate) fn renew_grant(
		&mut self,
		user_id: &UserId,
		module_id: &ModuleId,
		expires_at: OffsetDateTime,
		policy: RenewalPolicy,
		instant: OffsetDateTime,
	) -> Option<ModuleGrant> {
		let grant = self.active_grant_mut(user_id, module_id)?;

		policy.apply(grant);

		grant.expires_at = Some(expires_at);
		grant.updated_at = instant;

		Some(grant.clone())
	}

	pub(crate) fn insert_token(&mut self, record: AccessTokenRecord) {
		self.tokens.insert(record.token.expose().to_owned(), record);
	}

	pub(crate) fn consume_token(
		&mut self,
		token: &str,
		module_id: &ModuleId,
		instant: OffsetDateTime,
	) -> ConsumeOutcome {
		let Some(record) = self.tokens.get_mut(token) else {
			return ConsumeOutcome::NotFound;
		};

		if record.is_used() {
			return ConsumeOutcome::AlreadyUsed;
		}
		if record.is_expired_at(instant) {
			return ConsumeOutcome::Expired;
		}
		if &record.module_id != module_id {
			return ConsumeOutcome::ModuleMismatch;
		}

		record.mark_used(instant);

		ConsumeOutcome::Consumed(record.clone())
	}

	pub(crate) fn revoke_token(&mut self, token: &str, instant: OffsetDateTime) -> bool {
		match self.tokens.get_mut(token) {
			Some(record) => {
				if !record.is_used() {
					record.mark_used(instant);
				}

				true
			},
			None => false,
		}
	}

	pub(crate) fn sweep_tokens(&mut self, instant: OffsetDateTime) -> usize {
		let before = self.tokens.len();

		self.tokens.retain(|_, record| !record.is_expired_at(instant));

		before - self.tokens.len()
	}

	pub(crate) fn append_access_log(&mut self, entry: AccessLogEntry) {
		self.access_logs.push(entry);
	}

	pub(crate) fn list_access_logs(&self) -> Vec<AccessLogEntry> {
		self.access_logs.clone()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::grant::ModuleGrant;

	fn user() -> UserId {
		UserId::new("u-1").expect("User fixture should be valid.")
	}

	fn module() -> ModuleId {
		ModuleId::new("librespeed").expect("Module fixture should be valid.")
	}

	#[test]
	fn activation_keeps_a_single_active_grant_per_pair() {
		let mut tables = Tables::default();
		let first = ModuleGrant::builder(user(), module()).build();
		let second = ModuleGrant::builder(user(), module()).build();

		tables.activate_grant(first.clone());
		tables.activate_grant(second.clone());

		let active: Vec<_> = tables.grants.iter().filter(|grant| grant.is_active).collect();

		assert_eq!(active.len(), 1);
		assert_eq!(active[0].id, second.id);
		assert_eq!(tables.grants.len(), 2);
	}

	#[test]
	fn increment_stops_at_the_quota() {
		let mut tables = Tables::default();
		let instant = macros::datetime!(2025-06-01 12:00 UTC);

		tables.activate_grant(ModuleGrant::builder(user(), module()).usage_count(1).max_usage(2).build());

		assert!(tables.increment_usage(&user(), &module(), instant).is_updated());
		assert!(matches!(
			tables.increment_usage(&user(), &module(), instant),
			IncrementOutcome::QuotaExhausted(grant) if grant.usage_count == 2
		));
		assert_eq!(
			tables
				.fetch_active_grant(&user(), &module())
				.expect("Grant should remain active.")
				.updated_at,
			instant
		);
	}

	#[test]
	fn increment_reports_missing_grants() {
		let mut tables = Tables::default();

		assert_eq!(
			tables.increment_usage(&user(), &module(), OffsetDateTime::now_utc()),
			IncrementOutcome::Missing
		);
	}

	#[test]
	fn store_error_serializes_for_transport() {
		let payload = serde_json::to_string(&StoreError::Backend { message: "down".into() })
			.expect("StoreError should serialize to JSON.");

		assert!(payload.contains("down"));
	}
}
