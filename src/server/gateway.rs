//! Per-module endpoints: browser access, downstream token validation, and the reverse proxy.

// crates.io
use axum::{
	Json,
	body::{Body, Bytes},
	extract::{Path, State, rejection::JsonRejection},
	http::{
		HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
		header::{CONTENT_TYPE, LOCATION},
	},
	response::{IntoResponse, Response},
};
// self
use super::{GateState, reply};
use crate::{
	_prelude::*,
	auth::{ModuleId, UserIdentity},
	bridge::{AccessDenial, AccessOutcome, ProxyOutcome, ProxyRequest, ProxyResponse},
	engine::AccessRequest,
	issuer::{TokenRejection, Validation},
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccessBody {
	user_id: Option<String>,
	user_email: Option<String>,
	module_title: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ValidateBody {
	token: String,
}

/// Downstream modules read these keys in snake case.
#[derive(Clone, Debug, Serialize)]
pub(super) struct ValidatedReply {
	success: bool,
	user_id: String,
	user_email: String,
	module_id: String,
}

pub(super) async fn access(
	State(state): State<Arc<GateState>>,
	Path(module): Path<String>,
	body: Result<Json<AccessBody>, JsonRejection>,
) -> Response {
	let Ok(module_id) = ModuleId::new(&module) else {
		return reply::not_found();
	};
	let Json(body) = match body {
		Ok(body) => body,
		Err(rejection) => return reply::bad_request(rejection.body_text()),
	};
	let mut request =
		match UserIdentity::from_parts(body.user_id.as_deref(), body.user_email.as_deref()) {
			Some(user) => AccessRequest::new(user, module_id),
			None => AccessRequest::anonymous(module_id),
		};

	if let Some(title) = body.module_title {
		request = request.with_module_title(title);
	}

	match state.bridge.access(&request).await {
		Ok(AccessOutcome::Delivered { delivery, .. }) =>
			(StatusCode::FOUND, [(LOCATION, delivery.location())]).into_response(),
		Ok(AccessOutcome::Denied(AccessDenial::UnknownRoute)) => reply::not_found(),
		Ok(AccessOutcome::Denied(denial)) => reply::json(
			StatusCode::FORBIDDEN,
			serde_json::json!({
				"success": false,
				"reason": denial.to_string(),
				"code": denial.code(),
			}),
		),
		Err(e) => reply::internal_error(&e),
	}
}

pub(super) async fn validate_token(
	State(state): State<Arc<GateState>>,
	Path(module): Path<String>,
	body: Result<Json<ValidateBody>, JsonRejection>,
) -> Response {
	let Ok(module_id) = ModuleId::new(&module) else {
		return reply::not_found();
	};
	let Json(body) = match body {
		Ok(body) => body,
		Err(rejection) => return reply::bad_request(rejection.body_text()),
	};

	match state.bridge.issuer().validate(&body.token, &module_id).await {
		Ok(Validation::Valid(validated)) => reply::json(
			StatusCode::OK,
			ValidatedReply {
				success: true,
				user_id: validated.user.user_id.to_string(),
				user_email: validated.user.user_email,
				module_id: validated.module_id.to_string(),
			},
		),
		Ok(Validation::Rejected(_)) => reply::json(
			StatusCode::UNAUTHORIZED,
			serde_json::json!({ "success": false, "reason": TokenRejection::PUBLIC_REASON }),
		),
		Err(e) => reply::internal_error(&e),
	}
}

pub(super) async fn proxy_root(
	State(state): State<Arc<GateState>>,
	Path(module): Path<String>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	forward(&state, &module, String::from("/"), method, uri, headers, body).await
}

pub(super) async fn proxy_path(
	State(state): State<Arc<GateState>>,
	Path((module, path)): Path<(String, String)>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	forward(&state, &module, format!("/{path}"), method, uri, headers, body).await
}

async fn forward(
	state: &GateState,
	module: &str,
	path: String,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let Ok(module_id) = ModuleId::new(module) else {
		return reply::not_found();
	};
	let request = ProxyRequest {
		method: method.as_str().to_owned(),
		path,
		query: uri.query().map(str::to_owned),
		headers: headers
			.iter()
			.filter_map(|(name, value)| {
				value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
			})
			.collect(),
		body: body.to_vec(),
	};

	match state.bridge.proxy(&module_id, request).await {
		Ok(ProxyOutcome::Forwarded(response)) => into_response(response),
		Ok(ProxyOutcome::UnknownRoute) => reply::not_found(),
		Ok(ProxyOutcome::Forbidden) => reply::json(
			StatusCode::FORBIDDEN,
			serde_json::json!({ "success": false, "error": "forbidden" }),
		),
		Err(_e) => {
			#[cfg(feature = "tracing")]
			tracing::warn!(module, error = %_e, "Proxy request failed.");

			(StatusCode::INTERNAL_SERVER_ERROR, [(CONTENT_TYPE, "text/plain")], reply::INTERNAL)
				.into_response()
		},
	}
}

fn into_response(proxied: ProxyResponse) -> Response {
	let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
	let mut response = Response::new(Body::from(proxied.body));

	*response.status_mut() = status;

	let headers = response.headers_mut();

	for (name, value) in proxied.headers {
		if let (Ok(name), Ok(value)) =
			(HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value))
		{
			headers.append(name, value);
		}
	}

	response
}
