//! Simple file-backed [`CredentialStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessTokenRecord, ModuleId, UserId},
	catalog::ModuleCatalogEntry,
	grant::{ModuleGrant, RenewalPolicy},
	store::{
		AccessLogEntry, ConsumeOutcome, CredentialStore, IncrementOutcome, StoreError,
		StoreFuture, Tables,
	},
};

/// Persists every table to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Tables>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the JSON snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
		if !path.exists() {
			return Ok(Tables::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Tables::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}
		Ok(())
	}

	fn persist_locked(&self, contents: &Tables) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	/// Applies `f` to a copy of the tables under the write lock; the copy replaces the live
	/// tables only once it is on disk, so a failed write leaves memory and file in agreement.
	fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let mut staged = guard.clone();
		let result = f(&mut staged);

		self.persist_locked(&staged)?;

		*guard = staged;

		Ok(result)
	}
}
impl CredentialStore for FileStore {
	fn fetch_module<'a>(
		&'a self,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleCatalogEntry>> {
		Box::pin(async move { Ok(self.inner.read().fetch_module(module_id)) })
	}

	fn save_module(&self, entry: ModuleCatalogEntry) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|tables| tables.save_module(entry)) })
	}

	fn list_modules(&self) -> StoreFuture<'_, Vec<ModuleCatalogEntry>> {
		Box::pin(async move { Ok(self.inner.read().list_modules()) })
	}

	fn fetch_active_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
	) -> StoreFuture<'a, Option<ModuleGrant>> {
		Box::pin(async move { Ok(self.inner.read().fetch_active_grant(user_id, module_id)) })
	}

	fn list_grants(&self) -> StoreFuture<'_, Vec<ModuleGrant>> {
		Box::pin(async move { Ok(self.inner.read().list_grants()) })
	}

	fn save_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|tables| tables.save_grant(grant)) })
	}

	fn activate_grant(&self, grant: ModuleGrant) -> StoreFuture<'_, ModuleGrant> {
		Box::pin(async move { self.mutate(|tables| tables.activate_grant(grant)) })
	}

	fn increment_usage<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, IncrementOutcome> {
		Box::pin(async move {
			self.mutate(|tables| tables.increment_usage(user_id, module_id, instant))
		})
	}

	fn renew_grant<'a>(
		&'a self,
		user_id: &'a UserId,
		module_id: &'a ModuleId,
		expires_at: OffsetDateTime,
		policy: RenewalPolicy,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<ModuleGrant>> {
		Box::pin(async move {
			self.mutate(|tables| tables.renew_grant(user_id, module_id, expires_at, policy, instant))
		})
	}

	fn insert_token(&self, record: AccessTokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|tables| tables.insert_token(record)) })
	}

	fn consume_token<'a>(
		&'a self,
		token: &'a str,
		module_id: &'a ModuleId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, ConsumeOutcome> {
		Box::pin(async move { self.mutate(|tables| tables.consume_token(token, module_id, instant)) })
	}

	fn revoke_token<'a>(&'a self, token: &'a str, instant: OffsetDateTime) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.mutate(|tables| tables.revoke_token(token, instant)) })
	}

	fn sweep_tokens(&self, instant: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.mutate(|tables| tables.sweep_tokens(instant)) })
	}

	fn append_access_log(&self, entry: AccessLogEntry) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|tables| tables.append_access_log(entry)) })
	}

	fn list_access_logs(&self) -> StoreFuture<'_, Vec<AccessLogEntry>> {
		Box::pin(async move { Ok(self.inner.read().list_access_logs()) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::auth::{UserIdentity, UserId};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"module_gate_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let user = UserId::new("u-1").expect("User fixture should be valid.");
		let module = ModuleId::new("metube").expect("Module fixture should be valid.");
		let identity = UserIdentity::new(user.clone(), "u@iahome.fr")
			.expect("Identity fixture should be valid.");
		let token = AccessTokenRecord::builder(identity, module.clone())
			.token("persisted-token")
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Token fixture should build.");

		rt.block_on(store.save_module(ModuleCatalogEntry::new(module.clone(), "MeTube")))
			.expect("Failed to save catalog entry to file store.");
		rt.block_on(store.activate_grant(
			ModuleGrant::builder(user.clone(), module.clone()).max_usage(10).build(),
		))
		.expect("Failed to activate grant in file store.");
		rt.block_on(store.insert_token(token)).expect("Failed to insert token into file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let entry = rt
			.block_on(reopened.fetch_module(&module))
			.expect("Failed to fetch catalog entry from file store.")
			.expect("File store lost catalog entry after reopen.");
		let grant = rt
			.block_on(reopened.fetch_active_grant(&user, &module))
			.expect("Failed to fetch grant from file store.")
			.expect("File store lost grant after reopen.");
		let consumed = rt
			.block_on(reopened.consume_token("persisted-token", &module, OffsetDateTime::now_utc()))
			.expect("Failed to consume token from file store.");

		assert_eq!(entry.title, "MeTube");
		assert_eq!(grant.max_usage, Some(10));
		assert!(matches!(consumed, ConsumeOutcome::Consumed(_)));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[tokio::test]
	async fn failed_writes_leave_memory_untouched() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let user = UserId::new("u-1").expect("User fixture should be valid.");
		let module = ModuleId::new("metube").expect("Module fixture should be valid.");

		store
			.activate_grant(ModuleGrant::builder(user.clone(), module.clone()).max_usage(10).build())
			.await
			.expect("Failed to activate grant in file store.");

		// A directory squatting on the temp path makes the next write fail.
		let blocker = path.with_extension("tmp");

		fs::create_dir(&blocker).expect("Failed to create the blocking directory.");

		let now = OffsetDateTime::now_utc();

		store
			.increment_usage(&user, &module, now)
			.await
			.expect_err("Increment should fail while the snapshot cannot be written.");

		let grant = store
			.fetch_active_grant(&user, &module)
			.await
			.expect("Failed to fetch grant from file store.")
			.expect("Grant should stay active.");

		assert_eq!(grant.usage_count, 0);

		fs::remove_dir(&blocker).expect("Failed to remove the blocking directory.");

		assert!(matches!(
			store.increment_usage(&user, &module, now).await,
			Ok(IncrementOutcome::Updated(grant)) if grant.usage_count == 1
		));

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let grant = reopened
			.fetch_active_grant(&user, &module)
			.await
			.expect("Failed to fetch grant from file store.")
			.expect("File store lost grant after reopen.");

		assert_eq!(grant.usage_count, 1);

		let _ = fs::remove_file(&path);
	}
}
