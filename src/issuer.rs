//! Access token issuer: mints and validates the short-lived credentials that carry one
//! authorized session across the origin boundary to a module.
//!
//! Minting always re-runs the authorization decision first; there is no path that produces a
//! credential for a denied request. Two credential shapes live side by side:
//!
//! - opaque tokens, stored server-side and consumed exactly once;
//! - HS256 JWTs, verified statelessly and never revocable.

pub mod jwt;
pub mod opaque;

pub use jwt::{JwtClaims, JwtSigner};
pub use opaque::{DEFAULT_OPAQUE_LENGTH, MIN_OPAQUE_LENGTH};

// self
use crate::{
	_prelude::*,
	auth::{AccessTokenRecord, ModuleId, TokenSecret, UserId, UserIdentity},
	engine::{AccessRequest, AuthorizationEngine, AuthorizationResult},
	error::{ConfigError, TokenError},
	obs::{self, OperationKind, OperationSpan, Outcome},
	store::{ConsumeOutcome, CredentialStore},
};

/// Shape of a minted credential.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
	/// Random string stored server-side; single use.
	#[default]
	Opaque,
	/// Self-contained HS256 JWT.
	Jwt,
}
impl CredentialKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialKind::Opaque => "opaque",
			CredentialKind::Jwt => "jwt",
		}
	}
}
impl Display for CredentialKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A freshly minted credential together with the verdict that allowed it.
#[derive(Clone, Debug)]
pub struct IssuedToken {
	/// Credential value; callers must avoid logging it.
	pub token: TokenSecret,
	/// Credential shape.
	pub kind: CredentialKind,
	/// Expiry instant.
	pub expires_at: OffsetDateTime,
	/// Authorized verdict produced right before minting.
	pub authorization: AuthorizationResult,
}

/// Result of [`TokenIssuer::mint`].
#[derive(Clone, Debug)]
pub enum Minted {
	/// Authorization passed and a credential was minted.
	Issued(IssuedToken),
	/// Authorization failed; no credential exists.
	Denied(AuthorizationResult),
}

/// Why a presented credential was refused.
///
/// Callers surface the generic [`TokenRejection::PUBLIC_REASON`]; the kind is kept for logs and
/// tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
	/// No opaque token with this value exists.
	NotFound,
	/// The opaque token was consumed earlier.
	AlreadyUsed,
	/// The credential is past its expiry.
	Expired,
	/// The credential belongs to another module.
	ModuleMismatch,
	/// JWT signature or algorithm did not verify.
	BadSignature,
	/// The credential could not be parsed.
	Malformed,
}
impl TokenRejection {
	/// Reason exposed to callers for every rejection kind.
	pub const PUBLIC_REASON: &'static str = "invalid or expired";

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenRejection::NotFound => "not_found",
			TokenRejection::AlreadyUsed => "already_used",
			TokenRejection::Expired => "expired",
			TokenRejection::ModuleMismatch => "module_mismatch",
			TokenRejection::BadSignature => "bad_signature",
			TokenRejection::Malformed => "malformed",
		}
	}
}
impl Display for TokenRejection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Identity bound to a credential that passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedToken {
	/// Bound user.
	pub user: UserIdentity,
	/// Bound module.
	pub module_id: ModuleId,
	/// Module title captured at mint time.
	pub module_title: String,
	/// Credential shape.
	pub kind: CredentialKind,
}

/// Result of [`TokenIssuer::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
	/// The credential is valid (and, for opaque tokens, now consumed).
	Valid(ValidatedToken),
	/// The credential was refused.
	Rejected(TokenRejection),
}
impl Validation {
	/// Returns `true` for [`Validation::Valid`].
	pub fn is_valid(&self) -> bool {
		matches!(self, Validation::Valid(_))
	}

	/// Public reason for rejections.
	pub fn reason(&self) -> Option<&'static str> {
		match self {
			Validation::Valid(_) => None,
			Validation::Rejected(_) => Some(TokenRejection::PUBLIC_REASON),
		}
	}

	/// Rejection kind, if any.
	pub fn rejection(&self) -> Option<TokenRejection> {
		match self {
			Validation::Valid(_) => None,
			Validation::Rejected(kind) => Some(*kind),
		}
	}
}

/// Mints and validates module access credentials.
#[derive(Clone)]
pub struct TokenIssuer {
	engine: AuthorizationEngine,
	signer: Option<Arc<JwtSigner>>,
	opaque_length: usize,
}
impl TokenIssuer {
	/// Opaque token lifetime used by the redirect hand-off.
	pub const DEFAULT_OPAQUE_LIFETIME: Duration = Duration::minutes(5);
	/// Longest lifetime any credential may carry.
	pub const MAX_LIFETIME: Duration = Duration::hours(12);

	/// Creates an issuer that authorizes through `engine` and stores opaque tokens in the
	/// engine's store.
	pub fn new(engine: AuthorizationEngine) -> Self {
		Self { engine, signer: None, opaque_length: DEFAULT_OPAQUE_LENGTH }
	}

	/// Converts a caller-supplied lifetime in minutes, refusing values outside `(0, 12h]`.
	pub fn lifetime_from_minutes(minutes: i64) -> Result<Duration, TokenError> {
		if minutes <= 0 || minutes > Self::MAX_LIFETIME.whole_minutes() {
			return Err(TokenError::InvalidLifetime { minutes });
		}

		Ok(Duration::minutes(minutes))
	}

	/// Enables JWT minting and validation.
	pub fn with_signer(mut self, signer: JwtSigner) -> Self {
		self.signer = Some(Arc::new(signer));

		self
	}

	/// Overrides the opaque token length; values below [`MIN_OPAQUE_LENGTH`] are refused.
	pub fn with_opaque_length(mut self, length: usize) -> Result<Self, ConfigError> {
		if length < MIN_OPAQUE_LENGTH {
			return Err(ConfigError::TokenLengthTooShort { min: MIN_OPAQUE_LENGTH, actual: length });
		}

		self.opaque_length = length;

		Ok(self)
	}

	/// The engine this issuer authorizes through.
	pub fn engine(&self) -> &AuthorizationEngine {
		&self.engine
	}

	fn store(&self) -> &dyn CredentialStore {
		self.engine.store().as_ref()
	}

	/// Mints a credential of `kind` valid for `lifetime`, after re-checking authorization.
	pub async fn mint(
		&self,
		request: &AccessRequest,
		kind: CredentialKind,
		lifetime: Duration,
	) -> Result<Minted> {
		self.mint_at(request, kind, lifetime, OffsetDateTime::now_utc()).await
	}

	/// Mints at `now`. See [`TokenIssuer::mint`].
	pub async fn mint_at(
		&self,
		request: &AccessRequest,
		kind: CredentialKind,
		lifetime: Duration,
		now: OffsetDateTime,
	) -> Result<Minted> {
		const KIND: OperationKind = OperationKind::MintToken;

		let span = OperationSpan::new(KIND, "mint");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span.instrument(self.mint_inner(request, kind, lifetime, now)).await;

		match &result {
			Ok(Minted::Issued(_)) => obs::record_outcome(KIND, Outcome::Success),
			Ok(Minted::Denied(_)) => obs::record_outcome(KIND, Outcome::Denied),
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	async fn mint_inner(
		&self,
		request: &AccessRequest,
		kind: CredentialKind,
		lifetime: Duration,
		now: OffsetDateTime,
	) -> Result<Minted> {
		if !lifetime.is_positive() || lifetime > Self::MAX_LIFETIME {
			return Err(TokenError::InvalidLifetime { minutes: lifetime.whole_minutes() }.into());
		}

		let authorization = self.engine.check_access_at(request, now).await?;

		if !authorization.is_authorized() {
			return Ok(Minted::Denied(authorization));
		}

		let (Some(user), Some(entry)) = (request.user.clone(), authorization.catalog_entry.clone())
		else {
			return Ok(Minted::Denied(authorization));
		};
		let expires_at = now + lifetime;
		let token = match kind {
			CredentialKind::Opaque => {
				let record = AccessTokenRecord::builder(user, entry.id.clone())
					.token(opaque::generate(self.opaque_length))
					.module_title(entry.title.clone())
					.issued_at(now)
					.expires_at(expires_at)
					.build()
					.map_err(Error::invalid_request)?;
				let token = record.token.clone();

				self.store().insert_token(record).await?;

				token
			},
			CredentialKind::Jwt => {
				let signer = self.signer.as_ref().ok_or(TokenError::SignerUnavailable)?;
				let claims = JwtClaims {
					user_id: user.user_id.to_string(),
					user_email: user.user_email.clone(),
					module_id: entry.id.to_string(),
					module_title: entry.title.clone(),
					iat: now.unix_timestamp(),
					exp: expires_at.unix_timestamp(),
				};

				TokenSecret::new(signer.sign(&claims)?)
			},
		};

		#[cfg(feature = "tracing")]
		tracing::debug!(
			token = %token.fingerprint(),
			kind = kind.as_str(),
			module = %entry.id,
			%expires_at,
			"Access credential minted."
		);

		Ok(Minted::Issued(IssuedToken { token, kind, expires_at, authorization }))
	}

	/// Validates `token` for `module_id`. Opaque tokens are consumed on success.
	pub async fn validate(&self, token: &str, module_id: &ModuleId) -> Result<Validation> {
		self.validate_at(token, module_id, OffsetDateTime::now_utc()).await
	}

	/// Validates at `now`. See [`TokenIssuer::validate`].
	pub async fn validate_at(
		&self,
		token: &str,
		module_id: &ModuleId,
		now: OffsetDateTime,
	) -> Result<Validation> {
		const KIND: OperationKind = OperationKind::ValidateToken;

		let span = OperationSpan::new(KIND, "validate");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span
			.instrument(async move {
				let token = token.trim();

				if token.is_empty() {
					return Ok(Validation::Rejected(TokenRejection::Malformed));
				}
				if jwt::looks_like_jwt(token) {
					return Ok(self.validate_jwt(token, module_id, now));
				}

				self.validate_opaque(token, module_id, now).await
			})
			.await;

		match &result {
			Ok(Validation::Valid(_)) => obs::record_outcome(KIND, Outcome::Success),
			Ok(Validation::Rejected(_rejection)) => {
				#[cfg(feature = "tracing")]
				tracing::info!(
					token = %crate::auth::fingerprint(token),
					module = %module_id,
					rejection = _rejection.as_str(),
					"Access credential rejected."
				);

				obs::record_outcome(KIND, Outcome::Denied)
			},
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}

	async fn validate_opaque(
		&self,
		token: &str,
		module_id: &ModuleId,
		now: OffsetDateTime,
	) -> Result<Validation> {
		let outcome = self.store().consume_token(token, module_id, now).await?;

		Ok(match outcome {
			ConsumeOutcome::Consumed(record) => Validation::Valid(ValidatedToken {
				user: record.user,
				module_id: record.module_id,
				module_title: record.module_title,
				kind: CredentialKind::Opaque,
			}),
			ConsumeOutcome::NotFound => Validation::Rejected(TokenRejection::NotFound),
			ConsumeOutcome::AlreadyUsed => Validation::Rejected(TokenRejection::AlreadyUsed),
			ConsumeOutcome::Expired => Validation::Rejected(TokenRejection::Expired),
			ConsumeOutcome::ModuleMismatch => Validation::Rejected(TokenRejection::ModuleMismatch),
		})
	}

	fn validate_jwt(&self, token: &str, module_id: &ModuleId, now: OffsetDateTime) -> Validation {
		let Some(signer) = self.signer.as_ref() else {
			return Validation::Rejected(TokenRejection::Malformed);
		};
		let claims = match signer.verify(token, now) {
			Ok(claims) => claims,
			Err(rejection) => return Validation::Rejected(rejection),
		};

		if claims.module_id != module_id.as_ref() {
			return Validation::Rejected(TokenRejection::ModuleMismatch);
		}

		let user = UserId::new(&claims.user_id)
			.ok()
			.and_then(|user_id| UserIdentity::new(user_id, claims.user_email).ok());

		match user {
			Some(user) => Validation::Valid(ValidatedToken {
				user,
				module_id: module_id.clone(),
				module_title: claims.module_title,
				kind: CredentialKind::Jwt,
			}),
			None => Validation::Rejected(TokenRejection::Malformed),
		}
	}

	/// Marks an opaque token used without validating it. Returns `false` if it does not exist.
	pub async fn revoke(&self, token: &TokenSecret) -> Result<bool> {
		Ok(self.store().revoke_token(token.expose(), OffsetDateTime::now_utc()).await?)
	}

	/// Deletes every opaque token already past its expiry; returns how many were removed.
	pub async fn sweep_expired(&self) -> Result<usize> {
		self.sweep_expired_at(OffsetDateTime::now_utc()).await
	}

	/// Sweeps at `now`. Idempotent.
	pub async fn sweep_expired_at(&self, now: OffsetDateTime) -> Result<usize> {
		const KIND: OperationKind = OperationKind::SweepTokens;

		let span = OperationSpan::new(KIND, "sweep");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span.instrument(self.store().sweep_tokens(now)).await.map_err(Error::from);

		match &result {
			Ok(_deleted) => {
				#[cfg(feature = "tracing")]
				tracing::debug!(deleted = *_deleted, "Expired access tokens swept.");

				obs::record_outcome(KIND, Outcome::Success)
			},
			Err(_) => obs::record_outcome(KIND, Outcome::Failure),
		}

		result
	}
}
impl Debug for TokenIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenIssuer")
			.field("jwt_enabled", &self.signer.is_some())
			.field("opaque_length", &self.opaque_length)
			.finish()
	}
}
