// crates.io
use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
// self
use crate::{_prelude::*, error::TokenError};

pub(super) const INTERNAL: &str = "Internal Server Error";

pub(super) fn json<T>(status: StatusCode, body: T) -> Response
where
	T: Serialize,
{
	(status, Json(body)).into_response()
}

pub(super) fn bad_request(reason: impl Display) -> Response {
	json(
		StatusCode::BAD_REQUEST,
		serde_json::json!({ "success": false, "error": reason.to_string() }),
	)
}

pub(super) fn not_found() -> Response {
	json(StatusCode::NOT_FOUND, serde_json::json!({ "success": false, "error": "not found" }))
}

pub(super) fn internal_error(e: &Error) -> Response {
	tracing::error!(error = %e, "Request failed.");

	json(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "success": false, "error": INTERNAL }))
}

// Malformed input is the caller's fault; everything else is ours.
pub(super) fn from_error(e: Error) -> Response {
	match &e {
		Error::InvalidRequest { reason } => bad_request(reason),
		Error::Token(TokenError::InvalidLifetime { .. }) => bad_request(&e),
		_ => internal_error(&e),
	}
}
