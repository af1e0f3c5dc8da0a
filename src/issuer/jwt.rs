//! Stateless HS256 credentials for modules that validate without a store round-trip.
//!
//! JWTs cannot be revoked server-side; only signature, algorithm, expiry, and module scope
//! are checked.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ring::hmac::{self, HMAC_SHA256, Key};
// self
use crate::{_prelude::*, error::TokenError, issuer::TokenRejection};

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
	alg: String,
	typ: String,
}

/// Claims carried by a gate-issued JWT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaims {
	/// Platform user identifier.
	pub user_id: String,
	/// Account e-mail address.
	pub user_email: String,
	/// Module the credential is scoped to.
	pub module_id: String,
	/// Module display title at mint time.
	pub module_title: String,
	/// Issued-at, seconds since the Unix epoch.
	pub iat: i64,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
}

/// HMAC-SHA256 signer and verifier for gate JWTs.
pub struct JwtSigner {
	key: Key,
}
impl JwtSigner {
	/// Builds a signer from the shared server secret.
	pub fn new(secret: impl AsRef<[u8]>) -> Self {
		Self { key: Key::new(HMAC_SHA256, secret.as_ref()) }
	}

	/// Encodes and signs `claims`.
	pub fn sign(&self, claims: &JwtClaims) -> Result<String, TokenError> {
		let header = Header { alg: ALGORITHM.into(), typ: "JWT".into() };
		let header = serde_json::to_vec(&header).map_err(|source| TokenError::Encoding { source })?;
		let payload =
			serde_json::to_vec(claims).map_err(|source| TokenError::Encoding { source })?;
		let signing_input =
			format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(payload));
		let signature = hmac::sign(&self.key, signing_input.as_bytes());

		Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.as_ref())))
	}

	/// Verifies signature, algorithm, and expiry; returns the claims on success.
	pub fn verify(&self, token: &str, now: OffsetDateTime) -> Result<JwtClaims, TokenRejection> {
		let mut segments = token.split('.');
		let (Some(header), Some(payload), Some(signature), None) =
			(segments.next(), segments.next(), segments.next(), segments.next())
		else {
			return Err(TokenRejection::Malformed);
		};
		let header: Header = decode_segment(header)?;

		if header.alg != ALGORITHM {
			return Err(TokenRejection::BadSignature);
		}

		let signature =
			URL_SAFE_NO_PAD.decode(signature).map_err(|_| TokenRejection::Malformed)?;
		let signing_input = token.rsplit_once('.').map_or(token, |(input, _)| input);

		hmac::verify(&self.key, signing_input.as_bytes(), &signature)
			.map_err(|_| TokenRejection::BadSignature)?;

		let claims: JwtClaims = decode_segment(payload)?;

		if now.unix_timestamp() >= claims.exp {
			return Err(TokenRejection::Expired);
		}

		Ok(claims)
	}
}
impl Debug for JwtSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("JwtSigner(HS256)")
	}
}

/// Returns `true` when `token` has the three-segment compact JWS shape.
pub fn looks_like_jwt(token: &str) -> bool {
	token.split('.').count() == 3
}

fn decode_segment<T>(segment: &str) -> Result<T, TokenRejection>
where
	T: for<'de> Deserialize<'de>,
{
	let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| TokenRejection::Malformed)?;

	serde_json::from_slice(&bytes).map_err(|_| TokenRejection::Malformed)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn claims(exp: i64) -> JwtClaims {
		JwtClaims {
			user_id: "u-1".into(),
			user_email: "u@iahome.fr".into(),
			module_id: "qrcodes".into(),
			module_title: "QR Codes".into(),
			iat: exp - 300,
			exp,
		}
	}

	#[test]
	fn signed_tokens_verify_until_expiry() {
		let signer = JwtSigner::new("server-secret");
		let now = macros::datetime!(2025-06-01 12:00 UTC);
		let token = signer
			.sign(&claims(now.unix_timestamp() + 300))
			.expect("Signing should succeed for valid claims.");

		assert!(looks_like_jwt(&token));
		assert_eq!(
			signer.verify(&token, now).expect("Fresh token should verify.").module_id,
			"qrcodes"
		);
		assert_eq!(
			signer.verify(&token, now + Duration::minutes(5)),
			Err(TokenRejection::Expired)
		);
	}

	#[test]
	fn tampering_and_foreign_keys_are_rejected() {
		let signer = JwtSigner::new("server-secret");
		let now = macros::datetime!(2025-06-01 12:00 UTC);
		let token = signer
			.sign(&claims(now.unix_timestamp() + 300))
			.expect("Signing should succeed for valid claims.");
		let foreign = JwtSigner::new("other-secret");

		assert_eq!(foreign.verify(&token, now), Err(TokenRejection::BadSignature));

		let forged_payload = URL_SAFE_NO_PAD.encode(
			serde_json::to_vec(&claims(now.unix_timestamp() + 86_400))
				.expect("Claims should serialize."),
		);
		let mut parts = token.split('.').map(str::to_owned).collect::<Vec<_>>();

		parts[1] = forged_payload;

		assert_eq!(signer.verify(&parts.join("."), now), Err(TokenRejection::BadSignature));
		assert_eq!(signer.verify("not-a-jwt", now), Err(TokenRejection::Malformed));
	}
}
