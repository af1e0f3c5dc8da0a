//! axum HTTP surface: the authorization API, the per-module access and validation endpoints,
//! the reverse proxy, and the background token sweeper.

mod api;
mod gateway;
mod reply;

// std
use std::net::SocketAddr;
// crates.io
use axum::{
	Json, Router,
	routing::{any, get, post},
};
use tokio::{net::TcpListener, task::JoinHandle, time::MissedTickBehavior};
// self
use crate::{
	_prelude::*,
	bridge::{AccessBridge, ReverseProxy},
	config::GateConfig,
	engine::AuthorizationEngine,
	error::ConfigError,
	http::ReqwestUpstreamClient,
	issuer::{CredentialKind, TokenIssuer},
	ledger::QuotaLedger,
	store::{CredentialStore, FileStore, MemoryStore},
};

/// State shared by every handler.
#[derive(Debug)]
pub struct GateState {
	bridge: AccessBridge,
	opaque_lifetime: Duration,
	jwt_lifetime: Duration,
}
impl GateState {
	/// Wraps a fully wired bridge; credential lifetimes default to 5 minutes and 12 hours.
	pub fn new(bridge: AccessBridge) -> Self {
		Self {
			bridge,
			opaque_lifetime: TokenIssuer::DEFAULT_OPAQUE_LIFETIME,
			jwt_lifetime: TokenIssuer::MAX_LIFETIME,
		}
	}

	/// Overrides the lifetimes used when a request names no route-specific lifetime.
	pub fn with_lifetimes(mut self, opaque: Duration, jwt: Duration) -> Self {
		self.opaque_lifetime = opaque;
		self.jwt_lifetime = jwt;

		self
	}

	/// Wires the store, engine, issuer, ledger, routes, and proxy described by `config`, and
	/// seeds the catalog from its `[[modules]]` entries.
	pub async fn from_config(config: &GateConfig) -> Result<Self> {
		let store: Arc<dyn CredentialStore> = match &config.store.path {
			Some(path) => Arc::new(FileStore::open(path)?),
			None => Arc::new(MemoryStore::default()),
		};

		for entry in config.catalog()? {
			<dyn CredentialStore>::save_module(store.as_ref(), entry).await?;
		}

		let mut issuer = TokenIssuer::new(AuthorizationEngine::new(store.clone()))
			.with_opaque_length(config.tokens.opaque_length)?;

		if let Some(signer) = config.jwt_signer()? {
			issuer = issuer.with_signer(signer);
		}

		let ledger = QuotaLedger::new(store, config.tiers.quotas)
			.with_free_period(config.tiers.free_period()?);
		let client = ReqwestUpstreamClient::new(config.proxy.timeout())?;
		let proxy = ReverseProxy::new(Arc::new(client), config.primary_domain())
			.with_banner(config.proxy.banner);
		let bridge = AccessBridge::new(issuer, ledger, config.routes()?)
			.with_proxy(proxy, config.origin_policy());

		Ok(Self::new(bridge).with_lifetimes(
			config.tokens.lifetime_for(CredentialKind::Opaque)?,
			config.tokens.lifetime_for(CredentialKind::Jwt)?,
		))
	}

	/// The access bridge and everything it wires.
	pub fn bridge(&self) -> &AccessBridge {
		&self.bridge
	}

	fn default_lifetime(&self, kind: CredentialKind) -> Duration {
		match kind {
			CredentialKind::Opaque => self.opaque_lifetime,
			CredentialKind::Jwt => self.jwt_lifetime,
		}
	}
}

/// Builds the gate router over `state`.
pub fn router(state: Arc<GateState>) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route("/authorize-module-access", post(api::authorize))
		.route("/modules/{module}/access", post(gateway::access))
		.route("/modules/{module}/validate-token", post(gateway::validate_token))
		.route("/modules/{module}/proxy", any(gateway::proxy_root))
		.route("/modules/{module}/proxy/{*path}", any(gateway::proxy_path))
		.with_state(state)
}

/// Runs `sweep_expired` on `interval` until the runtime shuts down.
pub fn spawn_sweeper(state: Arc<GateState>, interval: std::time::Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			ticker.tick().await;

			match state.bridge.issuer().sweep_expired().await {
				Ok(_deleted) => {
					#[cfg(feature = "tracing")]
					tracing::debug!(deleted = _deleted, "Expired access tokens swept.");
				},
				Err(_e) => {
					#[cfg(feature = "tracing")]
					tracing::warn!(error = %_e, "Expired token sweep failed.");
				},
			}
		}
	})
}

/// Serves the gate described by `config` until Ctrl-C.
pub async fn serve(config: GateConfig, bind: Option<SocketAddr>) -> Result<()> {
	let addr = bind.unwrap_or(config.server.bind);
	let state = Arc::new(GateState::from_config(&config).await?);
	let sweeper = spawn_sweeper(state.clone(), config.tokens.sweep_interval());
	let listener = TcpListener::bind(addr)
		.await
		.map_err(|source| ConfigError::Bind { addr: addr.to_string(), source })?;

	tracing::info!(
		%addr,
		modules = state.bridge.routes().len(),
		"Module gate listening."
	);

	let served = axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal()).await;

	sweeper.abort();

	Ok(served?)
}

async fn healthz() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;

	tracing::info!("Shutdown signal received.");
}
