//! Gate-level error types shared across the engine, issuer, ledger, and bridge.
//!
//! Authorization verdicts are deliberately absent from this taxonomy: a missing grant or an
//! exhausted quota is an ordinary [`crate::engine::Denial`] value. Only infrastructure failures
//! and malformed requests become [`Error`]s.

// self
use crate::_prelude::*;

/// Gate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gate error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token mint or signing failure.
	#[error(transparent)]
	Token(#[from] TokenError),
	/// Downstream module failure while proxying.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	/// Listener or socket failure while serving.
	#[error("I/O failure: {0}.")]
	Io(#[from] std::io::Error),

	/// Request is missing parameters or carries malformed ones.
	#[error("Invalid request: {reason}.")]
	InvalidRequest {
		/// Human-readable description of the offending parameter.
		reason: String,
	},
}
impl Error {
	/// Builds an [`Error::InvalidRequest`] from any displayable reason.
	pub fn invalid_request(reason: impl Display) -> Self {
		Self::InvalidRequest { reason: reason.to_string() }
	}
}
impl From<crate::auth::IdentifierError> for Error {
	fn from(e: crate::auth::IdentifierError) -> Self {
		Self::invalid_request(e)
	}
}

/// Configuration and validation failures raised while loading the gate.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration file could not be read.
	#[error("Failed to read configuration file {path}.")]
	Read {
		/// Path that failed to load.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// Configuration file is not valid TOML for the expected schema.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Dotted key path where parsing failed.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Identifier in the configuration failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Module route could not be built.
	#[error("Route for module `{module}` is invalid.")]
	InvalidRoute {
		/// Module identifier.
		module: String,
		/// Underlying builder failure.
		#[source]
		source: crate::bridge::RouteError,
	},
	/// Module identifier appears more than once in the route table.
	#[error("Module `{module}` is configured more than once.")]
	DuplicateRoute {
		/// Module identifier.
		module: String,
	},
	/// A secret was referenced through an environment variable that is not set.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnv {
		/// Environment variable name.
		name: String,
	},
	/// A secret has neither an inline value nor an environment variable.
	#[error("No value configured for secret `{field}`.")]
	MissingSecret {
		/// Configuration key of the secret.
		field: String,
	},
	/// A URL in the configuration cannot be parsed.
	#[error("Configured URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending value.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Opaque token length is below the enforced minimum.
	#[error("Opaque tokens must be at least {min} characters, got {actual}.")]
	TokenLengthTooShort {
		/// Enforced minimum.
		min: usize,
		/// Configured value.
		actual: usize,
	},
	/// A duration setting is outside its accepted range.
	#[error("Setting `{field}` is out of range, got {value}.")]
	InvalidDuration {
		/// Configuration key.
		field: String,
		/// Configured value.
		value: i64,
	},
	/// The listen address could not be bound.
	#[error("Failed to bind {addr}.")]
	Bind {
		/// Requested listen address.
		addr: String,
		/// Underlying socket failure.
		#[source]
		source: std::io::Error,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures raised while minting or signing access credentials.
#[derive(Debug, ThisError)]
pub enum TokenError {
	/// A JWT was requested but no signing secret is configured.
	#[error("No JWT signing secret is configured.")]
	SignerUnavailable,
	/// Claims could not be encoded.
	#[error("Token claims could not be encoded.")]
	Encoding {
		/// Underlying serializer failure.
		#[source]
		source: serde_json::Error,
	},
	/// Requested lifetime is zero, negative, or beyond the supported ceiling.
	#[error("Token lifetime of {minutes} minutes is outside the supported range.")]
	InvalidLifetime {
		/// Requested lifetime in whole minutes.
		minutes: i64,
	},
}

/// Downstream failures surfaced while reverse-proxying a module.
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// Downstream module could not be reached.
	#[error("Upstream module is unreachable.")]
	Unreachable {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Downstream response body could not be read.
	#[error("Upstream response body could not be read.")]
	Body {
		/// HTTP status already received, when available.
		status: Option<u16>,
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Proxy target could not be derived from the route and request path.
	#[error("Upstream target `{target}` is invalid.")]
	InvalidTarget {
		/// The path or URL that failed to resolve.
		target: String,
	},
}
impl UpstreamError {
	/// Wraps a transport-specific network error.
	pub fn unreachable(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Unreachable { source: Box::new(src) }
	}

	/// Upstream HTTP status associated with the failure, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Body { status, .. } => *status,
			_ => None,
		}
	}
}
