//! Persisted opaque access token records, lifecycle helpers, and builders.

// self
use crate::{
	_prelude::*,
	auth::{ModuleId, UserIdentity, token::secret::TokenSecret},
};

/// Current lifecycle status for an opaque access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token can still be consumed.
	Active,
	/// Token reached its expiry instant.
	Expired,
	/// Token was already consumed (or revoked) and must not be honored again.
	Used,
}

/// Errors produced by [`AccessTokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum AccessTokenRecordBuilderError {
	/// Issued when no token value was provided.
	#[error("Token value is required.")]
	MissingToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Server-side record of an opaque, single-use access token.
///
/// The record binds one user to exactly one module. It is valid only while
/// `now < expires_at` and `used_at` is unset.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
	/// Opaque token value; callers must avoid logging it.
	pub token: TokenSecret,
	/// User the token was minted for.
	pub user: UserIdentity,
	/// Module the token is scoped to.
	pub module_id: ModuleId,
	/// Display title of the module at mint time.
	pub module_title: String,
	/// Mint instant.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Expiry instant.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Consumption (or revocation) instant.
	#[serde(with = "time::serde::rfc3339::option")]
	pub used_at: Option<OffsetDateTime>,
}
impl AccessTokenRecord {
	/// Returns a builder for a token bound to `user` and `module_id`.
	pub fn builder(user: UserIdentity, module_id: ModuleId) -> AccessTokenRecordBuilder {
		AccessTokenRecordBuilder::new(user, module_id)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if self.used_at.is_some() {
			return TokenStatus::Used;
		}
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the token can be consumed at the provided instant.
	pub fn is_active_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Active)
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` once the token has been consumed or revoked.
	pub fn is_used(&self) -> bool {
		self.used_at.is_some()
	}

	/// Marks the token as consumed.
	pub fn mark_used(&mut self, instant: OffsetDateTime) {
		self.used_at = Some(instant);
	}
}
impl Debug for AccessTokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessTokenRecord")
			.field("token", &self.token.fingerprint())
			.field("user", &self.user)
			.field("module_id", &self.module_id)
			.field("module_title", &self.module_title)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("used_at", &self.used_at)
			.finish()
	}
}

/// Builder for [`AccessTokenRecord`].
#[derive(Clone, Debug)]
pub struct AccessTokenRecordBuilder {
	user: UserIdentity,
	module_id: ModuleId,
	module_title: Option<String>,
	token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl AccessTokenRecordBuilder {
	fn new(user: UserIdentity, module_id: ModuleId) -> Self {
		Self {
			user,
			module_id,
			module_title: None,
			token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Provides the opaque token value.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the module display title (defaults to the module id).
	pub fn module_title(mut self, title: impl Into<String>) -> Self {
		self.module_title = Some(title.into());

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`AccessTokenRecord`].
	pub fn build(self) -> Result<AccessTokenRecord, AccessTokenRecordBuilderError> {
		let token = self.token.ok_or(AccessTokenRecordBuilderError::MissingToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(AccessTokenRecordBuilderError::MissingExpiry),
		};
		let module_title = self.module_title.unwrap_or_else(|| self.module_id.to_string());

		Ok(AccessTokenRecord {
			token,
			user: self.user,
			module_id: self.module_id,
			module_title,
			issued_at,
			expires_at,
			used_at: None,
		})
	}
}
