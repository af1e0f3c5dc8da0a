//! Authenticated user identity carried through every access decision.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, UserId},
};

/// Authenticated user identity: a validated id paired with the account e-mail.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
	/// Platform user identifier.
	pub user_id: UserId,
	/// Account e-mail address.
	pub user_email: String,
}
impl UserIdentity {
	/// Validates and pairs a user id with an e-mail address.
	pub fn new(user_id: UserId, user_email: impl Into<String>) -> Result<Self, IdentifierError> {
		let user_email = user_email.into();

		validate_email(&user_email)?;

		Ok(Self { user_id, user_email })
	}

	/// Builds an identity from loosely typed request fields.
	///
	/// Returns `None` when either field is absent or blank so the caller can report the request
	/// as unauthenticated instead of malformed.
	pub fn from_parts(user_id: Option<&str>, user_email: Option<&str>) -> Option<Self> {
		let user_id = user_id.map(str::trim).filter(|v| !v.is_empty())?;
		let user_email = user_email.map(str::trim).filter(|v| !v.is_empty())?;

		Self::new(UserId::new(user_id).ok()?, user_email).ok()
	}
}

fn validate_email(value: &str) -> Result<(), IdentifierError> {
	let valid = match value.split_once('@') {
		Some((local, domain)) =>
			!local.is_empty() && !domain.is_empty() && !value.chars().any(char::is_whitespace),
		None => false,
	};

	if valid { Ok(()) } else { Err(IdentifierError::InvalidEmail { value: value.to_owned() }) }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn from_parts_requires_both_fields() {
		assert!(UserIdentity::from_parts(Some("u-1"), Some("a@iahome.fr")).is_some());
		assert!(UserIdentity::from_parts(None, Some("a@iahome.fr")).is_none());
		assert!(UserIdentity::from_parts(Some("u-1"), None).is_none());
		assert!(UserIdentity::from_parts(Some("  "), Some("a@iahome.fr")).is_none());
		assert!(UserIdentity::from_parts(Some("u-1"), Some("not-an-email")).is_none());
	}

	#[test]
	fn serializes_with_camel_case_keys() {
		let identity = UserIdentity::new(
			UserId::new("u-1").expect("User fixture should be valid."),
			"a@iahome.fr",
		)
		.expect("Identity fixture should be valid.");
		let json = serde_json::to_value(&identity).expect("Identity should serialize.");

		assert_eq!(json["userId"], "u-1");
		assert_eq!(json["userEmail"], "a@iahome.fr");
	}
}
