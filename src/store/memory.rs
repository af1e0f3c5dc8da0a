//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{AccessTokenRecord, ModuleId, UserId},
	catalog::ModuleCatalogEntry,
	grant::{ModuleGrant, RenewalPolicy},
	store::{
		AccessLogEntry, ConsumeOutcome, CredentialStore, IncrementOutcome, StoreFuture, Tables,
	},
};

type StoreMap = Arc<RwLock<Tables>>;

/// Thread-safe storage backend that keeps every table in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
		f(&self.0.read())
	}

	fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
		f(&mut self.0.write())
	}
}
impl CredentialStore for MemoryStore {
	fn fetch_module<'a>(
		&'a self,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleCatalogEntry>> {
		let found = self.read(|tables| tables.fetch_module(module_id));

		Box::pin(async move { Ok(found) })
	}

	fn save_module(&self, entry: ModuleCatalogEntry) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().save_module(entry);

			Ok(())
		})
	}

	fn list_modules(&self) -> StoreFuture<'_, Vec<ModuleCatalogEntry>> {
		let modules = self.read(Tables::list_modules);

		Box::pin(async move { Ok(modules) })
	}

	fn fetch_active_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleGrant>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().fetch_active_grant(user_id, module_id)) })
	}

	fn list_grants(&self) -> StoreFuture<'_, Vec<ModuleGrant>> {
		let grants = self.read(Tables::list_grants);

		Box::pin(async move { Ok(grants) })
	}

	fn save_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().save_grant(grant);

			Ok(())
		})
	}

	fn activate_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ModuleGrant> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().activate_grant(grant)) })
	}

	fn increment_usage<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, IncrementOutcome> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().increment_usage(user_id, module_id, instant)) })
	}

	fn renew_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		expires_at: OffsetDateTime,
		policy: RenewalPolicy,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<ModuleGrant>> {
		let map = self.0.clone();

		Box::pin(async move {
			Ok(map.write().renew_grant(user_id, module_id, expires_at, policy, instant))
		})
	}

	fn insert_token(&self, record: AccessTokenRecord) -> StoreFuture<'_, ()> {
		self.write(|tables| tables.insert_token(record));

		Box::pin(async move { Ok(()) })
	}

	fn consume_token<'a>(
		&'a self,
		token: &'a str,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, ConsumeOutcome> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().consume_token(token, module_id, instant)) })
	}

	fn revoke_token<'a>(&'a self, token: &'a str, instant: OffsetDateTime) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().revoke_token(token, instant)) })
	}

	fn sweep_tokens(&self, instant: OffsetDateTime) -> StoreFuture<'_, usize> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().sweep_tokens(instant)) })
	}

	fn append_access_log(&self, entry: AccessLogEntry) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().append_access_log(entry);

			Ok(())
		})
	}

	fn list_access_logs(&self) -> StoreFuture<'_, Vec<AccessLogEntry>> {
		let logs = self.read(Tables::list_access_logs);

		Box::pin(async move { Ok(logs) })
	}
}
