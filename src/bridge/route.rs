//! Per-module delivery configuration and the route table that replaces per-module code copies.

// std
use std::net::IpAddr;
// self
use crate::{_prelude::*, auth::ModuleId, auth::TokenSecret, issuer::CredentialKind};

/// Errors raised while constructing or validating module routes.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RouteError {
	/// No browser-facing URL was configured.
	#[error("Missing production URL.")]
	MissingProductionUrl,
	/// Browser-facing URLs must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} URL must use HTTPS: {url}.")]
	InsecureUrl {
		/// Which URL failed validation.
		endpoint: &'static str,
		/// URL that failed validation.
		url: String,
	},
	/// The reverse-proxy strategy was selected without an upstream.
	#[error("Missing upstream URL for the reverse-proxy strategy.")]
	MissingUpstream,
	/// The upstream URL must be a bare origin (scheme, host, optional port).
	#[error("The upstream URL must be a bare origin: {url}.")]
	InvalidUpstream {
		/// URL that failed validation.
		url: String,
	},
	/// Token query parameter names must be non-empty and URL-safe.
	#[error("Token parameter `{param}` is invalid.")]
	InvalidTokenParam {
		/// Offending parameter name.
		param: String,
	},
	/// Token lifetime is outside the window the issuer accepts.
	#[error("Token lifetime of {minutes} minutes is outside the supported range.")]
	InvalidLifetime {
		/// Requested lifetime in whole minutes.
		minutes: i64,
	},
}

/// Server-side credentials injected into every proxied upstream request.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
	/// Upstream user name.
	pub username: String,
	/// Upstream password; never forwarded to the browser.
	pub password: TokenSecret,
}
impl BasicAuth {
	/// Pairs a user name with its password.
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self { username: username.into(), password: TokenSecret::new(password) }
	}
}
impl Debug for BasicAuth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BasicAuth")
			.field("username", &self.username)
			.field("password", &self.password)
			.finish()
	}
}

/// How an authorized session reaches the module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStrategy {
	/// 302 to the module's production URL with the credential in the query string.
	Redirect {
		/// Query parameter carrying the credential.
		token_param: String,
	},
	/// Serve the module through the gate, injecting credentials and rewriting HTML.
	ReverseProxy {
		/// Internal base URL of the module.
		upstream: Url,
		/// Credentials injected server-side, if the module requires them.
		basic_auth: Option<BasicAuth>,
	},
}
impl DeliveryStrategy {
	/// Returns a stable label suitable for span fields and the access log.
	pub const fn as_str(&self) -> &'static str {
		match self {
			DeliveryStrategy::Redirect { .. } => "redirect",
			DeliveryStrategy::ReverseProxy { .. } => "reverse_proxy",
		}
	}
}

/// Delivery configuration for one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRoute {
	/// Catalog id the route serves.
	pub module_id: ModuleId,
	/// Browser-facing URL of the module.
	pub production_url: Url,
	/// Delivery strategy.
	pub strategy: DeliveryStrategy,
	/// Credential shape minted for the hand-off.
	pub credential: CredentialKind,
	/// Lifetime of minted credentials.
	pub token_lifetime: Duration,
}
impl ModuleRoute {
	/// Returns a builder seeded with the module id.
	pub fn builder(module_id: ModuleId) -> ModuleRouteBuilder {
		ModuleRouteBuilder::new(module_id)
	}

	/// Path prefix under which the gate proxies this module.
	pub fn proxy_prefix(&self) -> String {
		format!("/modules/{}/proxy", self.module_id)
	}

	/// Redirect target carrying `token`.
	pub fn redirect_location(&self, token_param: &str, token: &TokenSecret) -> Url {
		let mut location = self.production_url.clone();

		location.query_pairs_mut().append_pair(token_param, token.expose());

		location
	}

	/// Proxy entry path carrying `token`.
	pub fn proxy_entry(&self, token: &TokenSecret) -> String {
		let mut query = url::form_urlencoded::Serializer::new(String::new());

		query.append_pair("token", token.expose());

		format!("{}/?{}", self.proxy_prefix(), query.finish())
	}
}

/// Builder for [`ModuleRoute`] values.
#[derive(Debug)]
pub struct ModuleRouteBuilder {
	module_id: ModuleId,
	production_url: Option<Url>,
	upstream: Option<Url>,
	basic_auth: Option<BasicAuth>,
	credential: CredentialKind,
	token_param: Option<String>,
	token_lifetime: Option<Duration>,
}
impl ModuleRouteBuilder {
	const DEFAULT_LIFETIME: Duration = Duration::minutes(5);
	const MAX_LIFETIME: Duration = Duration::hours(12);

	fn new(module_id: ModuleId) -> Self {
		Self {
			module_id,
			production_url: None,
			upstream: None,
			basic_auth: None,
			credential: CredentialKind::default(),
			token_param: None,
			token_lifetime: None,
		}
	}

	/// Sets the browser-facing URL.
	pub fn production_url(mut self, url: Url) -> Self {
		self.production_url = Some(url);

		self
	}

	/// Derives the browser-facing URL as `https://{subdomain}.{base_domain}/`.
	pub fn subdomain(mut self, subdomain: &str, base_domain: &str) -> Result<Self, RouteError> {
		let raw = format!("https://{subdomain}.{base_domain}/");
		let url = Url::parse(&raw).map_err(|_| RouteError::InsecureUrl {
			endpoint: "production",
			url: raw.clone(),
		})?;

		self.production_url = Some(url);

		Ok(self)
	}

	/// Switches delivery to the reverse-proxy strategy against `upstream`.
	pub fn reverse_proxy(mut self, upstream: Url) -> Self {
		self.upstream = Some(upstream);

		self
	}

	/// Injects Basic credentials into proxied requests.
	pub fn basic_auth(mut self, auth: BasicAuth) -> Self {
		self.basic_auth = Some(auth);

		self
	}

	/// Sets the credential shape.
	pub fn credential(mut self, kind: CredentialKind) -> Self {
		self.credential = kind;

		self
	}

	/// Overrides the redirect query parameter (defaults to `token`, or `auth_token` for JWTs).
	pub fn token_param(mut self, param: impl Into<String>) -> Self {
		self.token_param = Some(param.into());

		self
	}

	/// Overrides the credential lifetime (defaults to five minutes).
	pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
		self.token_lifetime = Some(lifetime);

		self
	}

	/// Consumes the builder and validates the resulting route.
	pub fn build(self) -> Result<ModuleRoute, RouteError> {
		let production_url = self.production_url.ok_or(RouteError::MissingProductionUrl)?;

		validate_browser_url("production", &production_url)?;

		let token_lifetime = self.token_lifetime.unwrap_or(Self::DEFAULT_LIFETIME);

		if !token_lifetime.is_positive() || token_lifetime > Self::MAX_LIFETIME {
			return Err(RouteError::InvalidLifetime { minutes: token_lifetime.whole_minutes() });
		}

		let strategy = match self.upstream {
			Some(upstream) => {
				if upstream.cannot_be_a_base()
					|| upstream.host_str().is_none()
					|| upstream.path() != "/"
					|| upstream.query().is_some()
				{
					return Err(RouteError::InvalidUpstream { url: upstream.to_string() });
				}

				DeliveryStrategy::ReverseProxy { upstream, basic_auth: self.basic_auth }
			},
			None => {
				let token_param = self.token_param.unwrap_or_else(|| match self.credential {
					CredentialKind::Opaque => "token".into(),
					CredentialKind::Jwt => "auth_token".into(),
				});

				validate_token_param(&token_param)?;

				DeliveryStrategy::Redirect { token_param }
			},
		};

		Ok(ModuleRoute {
			module_id: self.module_id,
			production_url,
			strategy,
			credential: self.credential,
			token_lifetime,
		})
	}
}

/// Every configured route, keyed by module id.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
	routes: BTreeMap<ModuleId, ModuleRoute>,
}
impl RouteTable {
	/// Builds a table; a module id may appear only once.
	pub fn from_routes<I>(routes: I) -> Result<Self, ModuleId>
	where
		I: IntoIterator<Item = ModuleRoute>,
	{
		let mut table = Self::default();

		for route in routes {
			if table.routes.contains_key(&route.module_id) {
				return Err(route.module_id);
			}

			table.routes.insert(route.module_id.clone(), route);
		}

		Ok(table)
	}

	/// Route for `module_id`, if configured.
	pub fn get(&self, module_id: &ModuleId) -> Option<&ModuleRoute> {
		self.routes.get(module_id)
	}

	/// Iterates routes in module id order.
	pub fn iter(&self) -> impl Iterator<Item = &ModuleRoute> {
		self.routes.values()
	}

	/// Number of configured routes.
	pub fn len(&self) -> usize {
		self.routes.len()
	}

	/// Returns `true` when no route is configured.
	pub fn is_empty(&self) -> bool {
		self.routes.is_empty()
	}
}

fn validate_browser_url(endpoint: &'static str, url: &Url) -> Result<(), RouteError> {
	let loopback = match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
		Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
		None => false,
	};

	if url.scheme() == "https" || (loopback && url.scheme() == "http") {
		Ok(())
	} else {
		Err(RouteError::InsecureUrl { endpoint, url: url.to_string() })
	}
}

fn validate_token_param(param: &str) -> Result<(), RouteError> {
	if !param.is_empty() && param.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
	{
		Ok(())
	} else {
		Err(RouteError::InvalidTokenParam { param: param.to_owned() })
	}
}
