#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use time::{Duration, OffsetDateTime, macros};
// self
use module_gate::{
	auth::{ModuleId, UserId, UserIdentity},
	bridge::{AccessBridge, ModuleRoute, RouteTable},
	catalog::ModuleCatalogEntry,
	engine::{AccessRequest, AuthorizationEngine},
	grant::{ModuleGrant, TierQuotas},
	issuer::{JwtSigner, TokenIssuer},
	ledger::QuotaLedger,
	store::{CredentialStore, MemoryStore},
};

pub const JWT_SECRET: &str = "integration-jwt-secret";

pub fn t0() -> OffsetDateTime {
	macros::datetime!(2025-11-10 12:00 UTC)
}

pub fn module(id: &str) -> ModuleId {
	ModuleId::new(id).expect("Module identifier fixture should be valid.")
}

pub fn user(id: &str) -> UserIdentity {
	UserIdentity::new(
		UserId::new(id).expect("User identifier fixture should be valid."),
		format!("{id}@iahome.fr"),
	)
	.expect("User identity fixture should be valid.")
}

pub fn request(user_id: &str, module_id: &str) -> AccessRequest {
	AccessRequest::new(user(user_id), module(module_id))
}

/// Grant owned by `user_id` for `module_id`, valid for ten days after [`t0`].
pub fn grant(user_id: &str, module_id: &str) -> module_gate::grant::ModuleGrantBuilder {
	ModuleGrant::builder(user(user_id).user_id, module(module_id))
		.created_at(t0())
		.expires_at(t0() + Duration::days(10))
}

/// Grant with no expiry, for flows that run against the wall clock.
pub fn open_grant(user_id: &str, module_id: &str) -> module_gate::grant::ModuleGrantBuilder {
	ModuleGrant::builder(user(user_id).user_id, module(module_id))
}

pub async fn seed_module(store: &MemoryStore, id: &str, visible: bool) {
	store
		.save_module(ModuleCatalogEntry::new(module(id), id).with_visibility(visible))
		.await
		.expect("Saving the catalog fixture should succeed.");
}

pub async fn seed_grant(store: &MemoryStore, grant: ModuleGrant) {
	store.activate_grant(grant).await.expect("Activating the grant fixture should succeed.");
}

pub fn engine(store: &Arc<MemoryStore>) -> AuthorizationEngine {
	AuthorizationEngine::new(store.clone())
}

pub fn issuer(store: &Arc<MemoryStore>) -> TokenIssuer {
	TokenIssuer::new(engine(store)).with_signer(JwtSigner::new(JWT_SECRET))
}

pub fn ledger(store: &Arc<MemoryStore>) -> QuotaLedger {
	QuotaLedger::new(store.clone(), TierQuotas::default())
}

pub fn redirect_route(id: &str) -> ModuleRoute {
	ModuleRoute::builder(module(id))
		.subdomain(id, "iahome.fr")
		.expect("Subdomain fixture should parse.")
		.build()
		.expect("Redirect route fixture should build.")
}

pub fn bridge(store: &Arc<MemoryStore>, routes: Vec<ModuleRoute>) -> AccessBridge {
	let routes = RouteTable::from_routes(routes).expect("Route table fixture should build.");

	AccessBridge::new(issuer(store), ledger(store), routes)
}
