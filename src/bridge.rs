//! Proxy/redirect bridge: the one parameterized access flow every module goes through.
//!
//! A single access attempt runs `check → mint → count → deliver`; each step can stop the flow
//! with an [`AccessDenial`]. Attempts for the same (user, module) pair are serialized in-process,
//! and the usage increment itself is conditional in the store, so concurrent attempts cannot push
//! a grant past its ceiling.

pub mod origin;
pub mod proxy;
pub mod rewrite;
pub mod route;

pub use origin::OriginPolicy;
pub use proxy::{ProxyRequest, ProxyResponse, ReverseProxy};
pub use rewrite::HtmlRewriter;
pub use route::{
	BasicAuth, DeliveryStrategy, ModuleRoute, ModuleRouteBuilder, RouteError, RouteTable,
};

// self
use crate::{
	_prelude::*,
	auth::{ModuleId, UserId, UserIdentity},
	engine::{AccessRequest, Denial},
	grant::{ModuleGrant, QuotaSnapshot},
	issuer::{CredentialKind, IssuedToken, Minted, TokenIssuer},
	ledger::QuotaLedger,
	obs::{self, OperationKind, OperationSpan, Outcome},
	store::{AccessLogEntry, CredentialStore, IncrementOutcome},
};

type GuardKey = (UserId, ModuleId);
type GuardMap = Mutex<HashMap<GuardKey, Arc<AsyncMutex<()>>>>;

// Holds one pair's serialization lock; the map entry goes away with its last lease, so the map
// only ever holds pairs with an attempt in flight.
struct FlowLease<'a> {
	guards: &'a GuardMap,
	key: GuardKey,
	lock: Arc<AsyncMutex<()>>,
}
impl Drop for FlowLease<'_> {
	fn drop(&mut self) {
		let mut guards = self.guards.lock();

		// Clones are only taken under the map lock, so two owners means the map and this lease.
		if Arc::strong_count(&self.lock) == 2 {
			guards.remove(&self.key);
		}
	}
}

/// Why the bridge stopped an access attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDenial {
	/// The authorization decision (or the conditional increment) refused access.
	Authorization(Denial),
	/// No credential could be minted.
	TokenError,
	/// The module has no configured route.
	UnknownRoute,
}
impl AccessDenial {
	/// Stable machine-readable code.
	pub const fn code(&self) -> &'static str {
		match self {
			AccessDenial::Authorization(denial) => denial.code(),
			AccessDenial::TokenError => "token_error",
			AccessDenial::UnknownRoute => "unknown_route",
		}
	}
}
impl Display for AccessDenial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			AccessDenial::Authorization(denial) => Display::fmt(denial, f),
			AccessDenial::TokenError => f.write_str("Impossible de générer l'accès au module"),
			AccessDenial::UnknownRoute => f.write_str("Module non configuré"),
		}
	}
}

/// Where the browser goes once access is granted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
	/// Redirect to the module's own origin with the credential attached.
	Redirect {
		/// Absolute redirect target.
		location: Url,
	},
	/// Redirect into the gate's proxy path with the credential attached.
	Proxy {
		/// Gate-relative entry path.
		entry: String,
	},
}
impl Delivery {
	/// Value for the `Location` header.
	pub fn location(&self) -> String {
		match self {
			Delivery::Redirect { location } => location.to_string(),
			Delivery::Proxy { entry } => entry.clone(),
		}
	}
}

/// Terminal state of one access attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
	/// The attempt stopped before delivery.
	Denied(AccessDenial),
	/// Credential minted, usage counted, delivery ready.
	Delivered {
		/// Where to send the browser.
		delivery: Delivery,
		/// Quota state after this access was counted.
		quota: QuotaSnapshot,
	},
}

/// Result of [`AccessBridge::proxy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyOutcome {
	/// The module is not served through the proxy.
	UnknownRoute,
	/// Neither a valid credential nor a trusted origin was presented.
	Forbidden,
	/// The upstream answered; status preserved.
	Forwarded(ProxyResponse),
}

/// Runs module access attempts and serves proxied modules.
#[derive(Clone)]
pub struct AccessBridge {
	issuer: TokenIssuer,
	ledger: QuotaLedger,
	routes: Arc<RouteTable>,
	proxy: Option<ReverseProxy>,
	origins: OriginPolicy,
	flow_guards: Arc<GuardMap>,
}
impl AccessBridge {
	/// Creates a bridge over the issuer, ledger, and route table.
	pub fn new(issuer: TokenIssuer, ledger: QuotaLedger, routes: RouteTable) -> Self {
		Self {
			issuer,
			ledger,
			routes: Arc::new(routes),
			proxy: None,
			origins: OriginPolicy::default(),
			flow_guards: Default::default(),
		}
	}

	/// Enables the reverse-proxy strategy with the given origin allow-list.
	pub fn with_proxy(mut self, proxy: ReverseProxy, origins: OriginPolicy) -> Self {
		self.proxy = Some(proxy);
		self.origins = origins;

		self
	}

	/// Configured routes.
	pub fn routes(&self) -> &RouteTable {
		&self.routes
	}

	/// Issuer used for minting and validation.
	pub fn issuer(&self) -> &TokenIssuer {
		&self.issuer
	}

	/// Ledger used for usage counting.
	pub fn ledger(&self) -> &QuotaLedger {
		&self.ledger
	}

	fn store(&self) -> &dyn CredentialStore {
		self.issuer.engine().store().as_ref()
	}

	fn flow_guard(&self, user_id: &UserId, module_id: &ModuleId) -> FlowLease<'_> {
		let key = (user_id.clone(), module_id.clone());
		let lock = self
			.flow_guards
			.lock()
			.entry(key.clone())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone();

		FlowLease { guards: &self.flow_guards, key, lock }
	}

	/// Runs one access attempt against the current wall clock.
	pub async fn access(&self, request: &AccessRequest) -> Result<AccessOutcome> {
		self.access_at(request, OffsetDateTime::now_utc()).await
	}

	/// Runs one access attempt at `now`.
	pub async fn access_at(
		&self,
		request: &AccessRequest,
		now: OffsetDateTime,
	) -> Result<AccessOutcome> {
		const KIND: OperationKind = OperationKind::Deliver;

		let span = OperationSpan::new(KIND, "access");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span.instrument(self.run(request, now)).await;

		match &result {
			Ok(AccessOutcome::Delivered { .. }) => obs::record_outcome(KIND, Outcome::Success),
			Ok(AccessOutcome::Denied(_denial)) => {
				#[cfg(feature = "tracing")]
				tracing::info!(
					module = %request.module_id,
					code = _denial.code(),
					"Module access denied."
				);

				obs::record_outcome(KIND, Outcome::Denied)
			},
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	async fn run(&self, request: &AccessRequest, now: OffsetDateTime) -> Result<AccessOutcome> {
		let Some(route) = self.routes.get(&request.module_id) else {
			return Ok(AccessOutcome::Denied(AccessDenial::UnknownRoute));
		};
		let Some(user) = request.user.as_ref() else {
			return Ok(AccessOutcome::Denied(AccessDenial::Authorization(Denial::NotAuthenticated)));
		};
		let lease = self.flow_guard(&user.user_id, &request.module_id);
		let _serialized = lease.lock.lock().await;
		let issued = match self
			.issuer
			.mint_at(request, route.credential, route.token_lifetime, now)
			.await
		{
			Ok(Minted::Issued(issued)) => issued,
			Ok(Minted::Denied(verdict)) =>
				return Ok(AccessOutcome::Denied(
					verdict.denial.map_or(AccessDenial::TokenError, AccessDenial::Authorization),
				)),
			Err(_e) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(module = %request.module_id, error = %_e, "Token mint failed.");

				return Ok(AccessOutcome::Denied(AccessDenial::TokenError));
			},
		};
		let counted = match self.ledger.record_usage(&user.user_id, &request.module_id, now).await {
			Ok(counted) => counted,
			Err(e) => {
				self.revoke_unused(&issued).await;

				return Err(e);
			},
		};
		let grant = match counted {
			IncrementOutcome::Updated(grant) => grant,
			IncrementOutcome::QuotaExhausted(grant) => {
				self.revoke_unused(&issued).await;

				return Ok(AccessOutcome::Denied(AccessDenial::Authorization(
					Denial::QuotaExhausted {
						usage_count: grant.usage_count,
						max_usage: grant.max_usage.unwrap_or_default(),
					},
				)));
			},
			IncrementOutcome::Missing => {
				self.revoke_unused(&issued).await;

				return Ok(AccessOutcome::Denied(AccessDenial::Authorization(Denial::NoGrant)));
			},
		};
		let delivery = match &route.strategy {
			DeliveryStrategy::Redirect { token_param } =>
				Delivery::Redirect { location: route.redirect_location(token_param, &issued.token) },
			DeliveryStrategy::ReverseProxy { .. } =>
				Delivery::Proxy { entry: route.proxy_entry(&issued.token) },
		};

		self.audit(user, route, &grant, now).await;

		Ok(AccessOutcome::Delivered { delivery, quota: grant.quota() })
	}

	async fn revoke_unused(&self, issued: &IssuedToken) {
		if issued.kind != CredentialKind::Opaque {
			return;
		}
		if let Err(_e) = self.issuer.revoke(&issued.token).await {
			#[cfg(feature = "tracing")]
			tracing::warn!(
				token = %issued.token.fingerprint(),
				error = %_e,
				"Failed to revoke an undelivered access token."
			);
		}
	}

	// Audit rows are best-effort; a failed append never fails the access.
	async fn audit(
		&self,
		user: &UserIdentity,
		route: &ModuleRoute,
		grant: &ModuleGrant,
		now: OffsetDateTime,
	) {
		let entry = AccessLogEntry {
			user: user.clone(),
			module_id: route.module_id.clone(),
			access_type: route.strategy.as_str().into(),
			access_count: grant.usage_count,
			created_at: now,
		};

		if let Err(_e) = self.store().append_access_log(entry).await {
			#[cfg(feature = "tracing")]
			tracing::warn!(module = %route.module_id, error = %_e, "Access log append failed.");
		}
	}

	/// Serves one proxied request for `module_id`.
	///
	/// The request is admitted when it carries a valid credential for this module (consuming an
	/// opaque one) or when its `Origin`/`Referer` is trusted.
	pub async fn proxy(&self, module_id: &ModuleId, request: ProxyRequest) -> Result<ProxyOutcome> {
		let (Some(route), Some(proxy)) = (
			self.routes
				.get(module_id)
				.filter(|route| matches!(route.strategy, DeliveryStrategy::ReverseProxy { .. })),
			self.proxy.as_ref(),
		) else {
			return Ok(ProxyOutcome::UnknownRoute);
		};
		let token_valid = match request.token() {
			Some(token) => self.issuer.validate(&token, module_id).await?.is_valid(),
			None => false,
		};
		let admitted =
			token_valid || self.origins.allows(request.header("origin"), request.header("referer"));

		if !admitted {
			#[cfg(feature = "tracing")]
			tracing::info!(module = %module_id, "Proxied request refused.");

			return Ok(ProxyOutcome::Forbidden);
		}

		Ok(ProxyOutcome::Forwarded(proxy.forward(route, request).await?))
	}
}
impl Debug for AccessBridge {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessBridge")
			.field("routes", &self.routes.len())
			.field("proxy_enabled", &self.proxy.is_some())
			.field("origins", &self.origins)
			.finish()
	}
}
