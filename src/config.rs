//! Gate configuration: a single TOML document describing domains, token lifetimes, storage,
//! proxy policy, tier quotas, and the per-module route table.
//!
//! ```toml
//! [domains]
//! base = "iahome.fr"
//!
//! [tokens]
//! jwt_secret_env = "GATE_JWT_SECRET"
//!
//! [[modules]]
//! id = "librespeed"
//! title = "LibreSpeed"
//!
//! [[modules]]
//! id = "metube"
//! strategy = "reverse_proxy"
//! upstream = "http://127.0.0.1:8081/"
//! basic_auth = { username = "admin", password_env = "METUBE_PASSWORD" }
//! ```

// std
use std::{
	net::{Ipv4Addr, SocketAddr},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::ModuleId,
	bridge::{BasicAuth, ModuleRoute, OriginPolicy, RouteError, RouteTable},
	catalog::ModuleCatalogEntry,
	error::ConfigError,
	grant::TierQuotas,
	issuer::{CredentialKind, DEFAULT_OPAQUE_LENGTH, JwtSigner, TokenIssuer},
};

/// Root of the TOML configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
	/// Listener settings.
	#[serde(default)]
	pub server: ServerConfig,
	/// Domain layout.
	pub domains: DomainsConfig,
	/// Credential settings.
	#[serde(default)]
	pub tokens: TokensConfig,
	/// Persistence settings.
	#[serde(default)]
	pub store: StoreConfig,
	/// Reverse-proxy settings.
	#[serde(default)]
	pub proxy: ProxyConfig,
	/// Fixed tier quotas.
	#[serde(default)]
	pub tiers: TiersConfig,
	/// Per-module routes and catalog seeds.
	#[serde(default)]
	pub modules: Vec<ModuleConfig>,
}
impl GateConfig {
	/// Reads and parses the configuration file at `path`.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;

		Self::from_toml_str(&raw)
	}

	/// Parses a configuration document, reporting the failing key path on error.
	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		serde_path_to_error::deserialize(toml::Deserializer::new(raw)).map_err(|e| {
			ConfigError::Parse { path: e.path().to_string(), message: e.inner().message().into() }
		})
	}

	/// Domain that hosts the dashboard; defaults to the base domain.
	pub fn primary_domain(&self) -> &str {
		self.domains.primary.as_deref().unwrap_or(&self.domains.base)
	}

	/// Origin allow-list for credential-less proxied requests.
	pub fn origin_policy(&self) -> OriginPolicy {
		match &self.proxy.trusted_origins {
			Some(hosts) => OriginPolicy::new(hosts),
			None => OriginPolicy::default()
				.trust(self.primary_domain())
				.trust(format!("*.{}", self.domains.base)),
		}
	}

	/// Catalog entries seeded into the store at startup.
	pub fn catalog(&self) -> Result<Vec<ModuleCatalogEntry>, ConfigError> {
		self.modules.iter().map(ModuleConfig::catalog_entry).collect()
	}

	/// Builds the route table, resolving secrets from the process environment.
	pub fn routes(&self) -> Result<RouteTable, ConfigError> {
		self.routes_with_env(|name| std::env::var(name).ok())
	}

	/// Builds the route table, resolving secrets through `env`.
	pub fn routes_with_env<F>(&self, env: F) -> Result<RouteTable, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let routes = self
			.modules
			.iter()
			.map(|module| module.route(&self.domains.base, &self.tokens, &env))
			.collect::<Result<Vec<_>, _>>()?;

		RouteTable::from_routes(routes)
			.map_err(|module| ConfigError::DuplicateRoute { module: module.to_string() })
	}

	/// JWT signer, when a secret is configured.
	pub fn jwt_signer(&self) -> Result<Option<JwtSigner>, ConfigError> {
		self.jwt_signer_with_env(|name| std::env::var(name).ok())
	}

	/// JWT signer, resolving the secret through `env`.
	pub fn jwt_signer_with_env<F>(&self, env: F) -> Result<Option<JwtSigner>, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let secret = match (&self.tokens.jwt_secret, &self.tokens.jwt_secret_env) {
			(Some(secret), _) => Some(secret.clone()),
			(None, Some(name)) =>
				Some(env(name).ok_or_else(|| ConfigError::MissingEnv { name: name.clone() })?),
			(None, None) => None,
		};

		Ok(secret.map(JwtSigner::new))
	}
}

/// `[server]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	/// Listen address.
	pub bind: SocketAddr,
	/// Fallback log filter when `RUST_LOG` is unset.
	pub log_level: String,
}
impl Default for ServerConfig {
	fn default() -> Self {
		Self { bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)), log_level: "info".into() }
	}
}

/// `[domains]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainsConfig {
	/// Apex under which every module has its subdomain.
	pub base: String,
	/// Dashboard domain; defaults to `base`.
	#[serde(default)]
	pub primary: Option<String>,
}

/// `[tokens]` section.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokensConfig {
	/// Default opaque credential lifetime.
	pub opaque_lifetime_minutes: i64,
	/// Default JWT lifetime.
	pub jwt_lifetime_minutes: i64,
	/// Opaque token length; at least 32.
	pub opaque_length: usize,
	/// Inline HS256 secret.
	pub jwt_secret: Option<String>,
	/// Environment variable holding the HS256 secret.
	pub jwt_secret_env: Option<String>,
	/// Interval between expired-token sweeps.
	pub sweep_interval_seconds: u64,
}
impl TokensConfig {
	/// Default lifetime for `kind`; must lie in `(0, 12h]`.
	pub fn lifetime_for(&self, kind: CredentialKind) -> Result<Duration, ConfigError> {
		match kind {
			CredentialKind::Opaque =>
				lifetime_minutes("tokens.opaque_lifetime_minutes", self.opaque_lifetime_minutes),
			CredentialKind::Jwt =>
				lifetime_minutes("tokens.jwt_lifetime_minutes", self.jwt_lifetime_minutes),
		}
	}

	/// Interval between expired-token sweeps; never zero.
	pub fn sweep_interval(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.sweep_interval_seconds.max(1))
	}
}
impl Default for TokensConfig {
	fn default() -> Self {
		Self {
			opaque_lifetime_minutes: 5,
			jwt_lifetime_minutes: 720,
			opaque_length: DEFAULT_OPAQUE_LENGTH,
			jwt_secret: None,
			jwt_secret_env: None,
			sweep_interval_seconds: 300,
		}
	}
}
impl Debug for TokensConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokensConfig")
			.field("opaque_lifetime_minutes", &self.opaque_lifetime_minutes)
			.field("jwt_lifetime_minutes", &self.jwt_lifetime_minutes)
			.field("opaque_length", &self.opaque_length)
			.field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
			.field("jwt_secret_env", &self.jwt_secret_env)
			.field("sweep_interval_seconds", &self.sweep_interval_seconds)
			.finish()
	}
}

/// `[store]` section. No path selects the in-memory store.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
	/// JSON snapshot file.
	pub path: Option<PathBuf>,
}

/// `[proxy]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
	/// Hosts allowed to load proxied content without a credential.
	pub trusted_origins: Option<Vec<String>>,
	/// Inject the dashboard banner into proxied HTML.
	pub banner: bool,
	/// Upstream exchange timeout.
	pub timeout_seconds: u64,
}
impl ProxyConfig {
	/// Upstream exchange timeout.
	pub fn timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.timeout_seconds.max(1))
	}
}
impl Default for ProxyConfig {
	fn default() -> Self {
		Self { trusted_origins: None, banner: true, timeout_seconds: 30 }
	}
}

/// `[tiers]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
	/// Fixed per-tier quotas.
	#[serde(flatten)]
	pub quotas: TierQuotas,
	/// Validity of a free self-activation.
	pub free_period_days: i64,
}
impl TiersConfig {
	/// Validity of a free self-activation; between one day and a century.
	pub fn free_period(&self) -> Result<Duration, ConfigError> {
		const MAX_DAYS: i64 = 36_500;

		if !(1..=MAX_DAYS).contains(&self.free_period_days) {
			return Err(ConfigError::InvalidDuration {
				field: "tiers.free_period_days".into(),
				value: self.free_period_days,
			});
		}

		Ok(Duration::days(self.free_period_days))
	}
}
impl Default for TiersConfig {
	fn default() -> Self {
		Self { quotas: TierQuotas::default(), free_period_days: 90 }
	}
}

/// How a module is delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
	/// Redirect to the module's own origin.
	#[default]
	Redirect,
	/// Serve through the gate.
	ReverseProxy,
}

/// Upstream Basic credentials; the password comes inline or from the environment.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthConfig {
	/// Upstream user name.
	pub username: String,
	/// Inline password.
	#[serde(default)]
	pub password: Option<String>,
	/// Environment variable holding the password.
	#[serde(default)]
	pub password_env: Option<String>,
}
impl Debug for BasicAuthConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BasicAuthConfig")
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("password_env", &self.password_env)
			.finish()
	}
}

/// One `[[modules]]` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
	/// Module slug.
	pub id: String,
	/// Display name; defaults to the slug.
	#[serde(default)]
	pub title: Option<String>,
	/// Catalog category.
	#[serde(default)]
	pub category: Option<String>,
	/// Price in euro cents.
	#[serde(default)]
	pub price: u64,
	/// Catalog visibility.
	#[serde(default = "visible_by_default")]
	pub visible: bool,
	/// Subdomain under the base domain; defaults to the slug.
	#[serde(default)]
	pub subdomain: Option<String>,
	/// Explicit browser-facing URL; overrides `subdomain`.
	#[serde(default)]
	pub production_url: Option<String>,
	/// Delivery strategy.
	#[serde(default)]
	pub strategy: StrategyKind,
	/// Credential shape.
	#[serde(default)]
	pub credential: CredentialKind,
	/// Redirect query parameter.
	#[serde(default)]
	pub token_param: Option<String>,
	/// Credential lifetime override.
	#[serde(default)]
	pub token_lifetime_minutes: Option<i64>,
	/// Upstream origin for the reverse-proxy strategy.
	#[serde(default)]
	pub upstream: Option<String>,
	/// Upstream Basic credentials.
	#[serde(default)]
	pub basic_auth: Option<BasicAuthConfig>,
}
impl ModuleConfig {
	fn module_id(&self) -> Result<ModuleId, ConfigError> {
		Ok(ModuleId::new(&self.id)?)
	}

	fn catalog_entry(&self) -> Result<ModuleCatalogEntry, ConfigError> {
		let mut entry =
			ModuleCatalogEntry::new(self.module_id()?, self.title.as_deref().unwrap_or(&self.id))
				.with_price(self.price)
				.with_visibility(self.visible);

		if let Some(category) = &self.category {
			entry = entry.with_category(category);
		}
		if let Some(url) = &self.production_url {
			entry = entry.with_url(parse_url(url)?);
		}

		Ok(entry)
	}

	fn route<F>(
		&self,
		base_domain: &str,
		tokens: &TokensConfig,
		env: &F,
	) -> Result<ModuleRoute, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let module_id = self.module_id()?;
		let invalid =
			|source: RouteError| ConfigError::InvalidRoute { module: self.id.clone(), source };
		let lifetime = match self.token_lifetime_minutes {
			Some(minutes) => {
				let field = format!("modules.{}.token_lifetime_minutes", self.id);

				lifetime_minutes(&field, minutes)?
			},
			None => tokens.lifetime_for(self.credential)?,
		};
		let mut builder =
			ModuleRoute::builder(module_id).credential(self.credential).token_lifetime(lifetime);

		builder = match &self.production_url {
			Some(url) => builder.production_url(parse_url(url)?),
			None => builder
				.subdomain(self.subdomain.as_deref().unwrap_or(&self.id), base_domain)
				.map_err(invalid)?,
		};

		if let Some(param) = &self.token_param {
			builder = builder.token_param(param);
		}
		if self.strategy == StrategyKind::ReverseProxy {
			let upstream = self
				.upstream
				.as_deref()
				.ok_or_else(|| invalid(RouteError::MissingUpstream))?;

			builder = builder.reverse_proxy(parse_url(upstream)?);

			if let Some(auth) = &self.basic_auth {
				builder = builder.basic_auth(auth.resolve(&self.id, env)?);
			}
		}

		builder.build().map_err(invalid)
	}
}

impl BasicAuthConfig {
	fn resolve<F>(&self, module: &str, env: &F) -> Result<BasicAuth, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let password = match (&self.password, &self.password_env) {
			(Some(password), _) => password.clone(),
			(None, Some(name)) =>
				env(name).ok_or_else(|| ConfigError::MissingEnv { name: name.clone() })?,
			(None, None) =>
				return Err(ConfigError::MissingSecret {
					field: format!("modules.{module}.basic_auth.password"),
				}),
		};

		Ok(BasicAuth::new(&self.username, password))
	}
}

/// Command-line arguments of the `module-gate` binary.
#[cfg(feature = "server")]
#[derive(Clone, Debug, clap::Parser)]
#[command(version, about = "Module-access gate server.")]
pub struct Cli {
	/// Path to the TOML configuration file.
	#[arg(short, long, env = "MODULE_GATE_CONFIG", default_value = "module-gate.toml")]
	pub config: PathBuf,
	/// Overrides `[server].bind`.
	#[arg(long)]
	pub bind: Option<SocketAddr>,
}

fn visible_by_default() -> bool {
	true
}

fn lifetime_minutes(field: &str, minutes: i64) -> Result<Duration, ConfigError> {
	TokenIssuer::lifetime_from_minutes(minutes)
		.map_err(|_| ConfigError::InvalidDuration { field: field.into(), value: minutes })
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
	Url::parse(value).map_err(|source| ConfigError::InvalidUrl { value: value.into(), source })
}
