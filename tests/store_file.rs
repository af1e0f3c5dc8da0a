mod common;

// std
use std::{env, fs, process, sync::Arc};
// crates.io
use time::OffsetDateTime;
// self
use common::*;
use module_gate::{
	bridge::{AccessBridge, AccessOutcome, RouteTable},
	catalog::ModuleCatalogEntry,
	engine::AuthorizationEngine,
	grant::TierQuotas,
	issuer::TokenIssuer,
	ledger::QuotaLedger,
	store::{CredentialStore, FileStore},
};

fn temp_path(label: &str) -> std::path::PathBuf {
	env::temp_dir().join(format!(
		"module_gate_{label}_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	))
}

fn file_bridge(store: &Arc<FileStore>) -> AccessBridge {
	let routes = RouteTable::from_routes([redirect_route("librespeed")])
		.expect("Route table fixture should build.");

	AccessBridge::new(
		TokenIssuer::new(AuthorizationEngine::new(store.clone())),
		QuotaLedger::new(store.clone(), TierQuotas::default()),
		routes,
	)
}

#[tokio::test]
async fn delivered_accesses_survive_a_restart() {
	let path = temp_path("restart");
	let store = Arc::new(FileStore::open(&path).expect("File store should open."));

	store
		.save_module(ModuleCatalogEntry::new(module("librespeed"), "LibreSpeed"))
		.await
		.expect("Saving the catalog fixture should succeed.");
	store
		.activate_grant(grant("u-1", "librespeed").max_usage(2).build())
		.await
		.expect("Activating the grant fixture should succeed.");

	let bridge = file_bridge(&store);
	let request = request("u-1", "librespeed");

	for _ in 0..2 {
		let outcome = bridge.access_at(&request, t0()).await.expect("Access should not fail.");

		assert!(matches!(outcome, AccessOutcome::Delivered { .. }));
	}

	drop(bridge);
	drop(store);

	let reopened = Arc::new(FileStore::open(&path).expect("File store should reopen."));
	let grant = reopened
		.fetch_active_grant(&user("u-1").user_id, &module("librespeed"))
		.await
		.expect("Grant lookup should succeed.")
		.expect("Grant should survive the restart.");

	assert_eq!(grant.usage_count, 2);
	assert_eq!(reopened.list_access_logs().await.expect("Audit log should load.").len(), 2);

	let outcome = file_bridge(&reopened)
		.access_at(&request, t0())
		.await
		.expect("Access should not fail.");

	assert!(matches!(outcome, AccessOutcome::Denied(denial) if denial.code() == "quota_exhausted"));

	let _ = fs::remove_file(&path);
}
