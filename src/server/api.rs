//! `POST /authorize-module-access`: the action-multiplexed authorization API.

// crates.io
use axum::{
	Json,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::Response,
};
// self
use super::{GateState, reply};
use crate::{
	_prelude::*,
	auth::{ModuleId, UserId, UserIdentity},
	engine::AccessRequest,
	grant::QuotaSnapshot,
	issuer::{CredentialKind, Minted, TokenIssuer, TokenRejection, Validation},
	store::IncrementOutcome,
};

/// Request body shared by every action.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AuthorizeBody {
	action: Option<String>,
	module_id: Option<String>,
	module_title: Option<String>,
	user_id: Option<String>,
	user_email: Option<String>,
	token: Option<String>,
	duration_minutes: Option<i64>,
	credential: Option<CredentialKind>,
}
impl AuthorizeBody {
	fn module_id(&self) -> Result<ModuleId, Response> {
		let raw = self
			.module_id
			.as_deref()
			.map(str::trim)
			.filter(|v| !v.is_empty())
			.ok_or_else(|| reply::bad_request("moduleId is required"))?;

		ModuleId::new(raw).map_err(reply::bad_request)
	}

	fn user_id(&self) -> Result<UserId, Response> {
		let raw = self
			.user_id
			.as_deref()
			.map(str::trim)
			.filter(|v| !v.is_empty())
			.ok_or_else(|| reply::bad_request("userId is required"))?;

		UserId::new(raw).map_err(reply::bad_request)
	}

	fn identity(&self) -> Option<UserIdentity> {
		UserIdentity::from_parts(self.user_id.as_deref(), self.user_email.as_deref())
	}

	fn access_request(&self, module_id: ModuleId) -> AccessRequest {
		let request = match self.identity() {
			Some(user) => AccessRequest::new(user, module_id),
			None => AccessRequest::anonymous(module_id),
		};

		match &self.module_title {
			Some(title) => request.with_module_title(title),
			None => request,
		}
	}
}

/// Response body shared by every action; absent fields are omitted.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AuthorizeReply {
	success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	authorized: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	code: Option<&'static str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	token: Option<String>,
	#[serde(
		skip_serializing_if = "Option::is_none",
		with = "time::serde::rfc3339::option"
	)]
	expires_at: Option<OffsetDateTime>,
	#[serde(skip_serializing_if = "Option::is_none")]
	quota_info: Option<QuotaSnapshot>,
	#[serde(skip_serializing_if = "Option::is_none")]
	user_info: Option<UserIdentity>,
	#[serde(skip_serializing_if = "Option::is_none")]
	deleted: Option<usize>,
}

pub(super) async fn authorize(
	State(state): State<Arc<GateState>>,
	body: Result<Json<AuthorizeBody>, JsonRejection>,
) -> Response {
	let Json(body) = match body {
		Ok(body) => body,
		Err(rejection) => return reply::bad_request(rejection.body_text()),
	};
	let outcome = match body.action.as_deref() {
		Some("check_access") => check_access(&state, &body).await,
		Some("generate_token") => generate_token(&state, &body).await,
		Some("increment_usage") => increment_usage(&state, &body).await,
		Some("validate_token") => validate_token(&state, &body).await,
		Some("cleanup_tokens") => cleanup_tokens(&state).await,
		Some("activate_module") => activate_module(&state, &body).await,
		Some(other) => Err(reply::bad_request(format!("unknown action `{other}`"))),
		None => Err(reply::bad_request("action is required")),
	};

	match outcome {
		Ok(reply) => reply::json(StatusCode::OK, reply),
		Err(response) => response,
	}
}

type ActionResult = Result<AuthorizeReply, Response>;

async fn check_access(state: &GateState, body: &AuthorizeBody) -> ActionResult {
	let request = body.access_request(body.module_id()?);
	let verdict = state
		.bridge
		.issuer()
		.engine()
		.check_access(&request)
		.await
		.map_err(reply::from_error)?;
	let authorized = verdict.is_authorized();

	Ok(AuthorizeReply {
		success: true,
		authorized: Some(authorized),
		reason: verdict.reason(),
		code: verdict.code(),
		quota_info: verdict.quota,
		user_info: request.user.filter(|_| authorized),
		..Default::default()
	})
}

async fn generate_token(state: &GateState, body: &AuthorizeBody) -> ActionResult {
	let module_id = body.module_id()?;
	let route = state.bridge.routes().get(&module_id);
	let kind = body.credential.or(route.map(|route| route.credential)).unwrap_or_default();
	let lifetime = match (body.duration_minutes, route) {
		(Some(minutes), _) => TokenIssuer::lifetime_from_minutes(minutes)
			.map_err(|e| reply::from_error(e.into()))?,
		(None, Some(route)) if route.credential == kind => route.token_lifetime,
		(None, _) => state.default_lifetime(kind),
	};
	let request = body.access_request(module_id);
	let minted = state
		.bridge
		.issuer()
		.mint(&request, kind, lifetime)
		.await
		.map_err(reply::from_error)?;

	Ok(match minted {
		Minted::Issued(issued) => AuthorizeReply {
			success: true,
			authorized: Some(true),
			token: Some(issued.token.expose().to_owned()),
			expires_at: Some(issued.expires_at),
			quota_info: issued.authorization.quota,
			user_info: request.user,
			..Default::default()
		},
		Minted::Denied(verdict) => AuthorizeReply {
			success: false,
			authorized: Some(false),
			reason: verdict.reason(),
			code: verdict.code(),
			quota_info: verdict.quota,
			..Default::default()
		},
	})
}

async fn increment_usage(state: &GateState, body: &AuthorizeBody) -> ActionResult {
	let module_id = body.module_id()?;
	let user_id = body.user_id()?;
	let outcome = state
		.bridge
		.ledger()
		.record_usage(&user_id, &module_id, OffsetDateTime::now_utc())
		.await
		.map_err(reply::from_error)?;

	Ok(match outcome {
		IncrementOutcome::Updated(grant) =>
			AuthorizeReply { success: true, quota_info: Some(grant.quota()), ..Default::default() },
		IncrementOutcome::QuotaExhausted(grant) => AuthorizeReply {
			success: false,
			code: Some("quota_exhausted"),
			quota_info: Some(grant.quota()),
			..Default::default()
		},
		IncrementOutcome::Missing =>
			AuthorizeReply { success: false, code: Some("no_access"), ..Default::default() },
	})
}

async fn validate_token(state: &GateState, body: &AuthorizeBody) -> ActionResult {
	let module_id = body.module_id()?;
	let token = body
		.token
		.as_deref()
		.filter(|v| !v.is_empty())
		.ok_or_else(|| reply::bad_request("token is required"))?;
	let validation =
		state.bridge.issuer().validate(token, &module_id).await.map_err(reply::from_error)?;

	Ok(match validation {
		Validation::Valid(validated) => AuthorizeReply {
			success: true,
			authorized: Some(true),
			user_info: Some(validated.user),
			..Default::default()
		},
		Validation::Rejected(_) => AuthorizeReply {
			success: false,
			authorized: Some(false),
			reason: Some(TokenRejection::PUBLIC_REASON.into()),
			..Default::default()
		},
	})
}

async fn cleanup_tokens(state: &GateState) -> ActionResult {
	let deleted = state.bridge.issuer().sweep_expired().await.map_err(reply::from_error)?;

	Ok(AuthorizeReply { success: true, deleted: Some(deleted), ..Default::default() })
}

async fn activate_module(state: &GateState, body: &AuthorizeBody) -> ActionResult {
	let module_id = body.module_id()?;
	let user_id = body.user_id()?;
	let grant = state
		.bridge
		.ledger()
		.activate_free(&user_id, &module_id, OffsetDateTime::now_utc())
		.await
		.map_err(reply::from_error)?;

	Ok(AuthorizeReply {
		success: true,
		authorized: Some(true),
		expires_at: grant.expires_at,
		quota_info: Some(grant.quota()),
		..Default::default()
	})
}
