#![cfg(feature = "server")]

mod common;

// std
use std::{net::TcpListener, sync::Arc, time::Duration as StdDuration};
// crates.io
use axum::{
	Router,
	body::{Body, to_bytes},
	http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
// self
use common::*;
use module_gate::{
	bridge::{ModuleRoute, OriginPolicy, ReverseProxy},
	catalog::ModuleCatalogEntry,
	http::ReqwestUpstreamClient,
	server::{self, GateState},
	store::{CredentialStore, MemoryStore},
};

async fn app() -> (Arc<MemoryStore>, Router) {
	let store = Arc::new(MemoryStore::default());

	seed_module(&store, "librespeed", true).await;
	seed_module(&store, "metube", true).await;
	store
		.save_module(ModuleCatalogEntry::new(module("stablediffusion"), "SD").with_price(990))
		.await
		.expect("Saving the paid catalog fixture should succeed.");
	seed_grant(&store, open_grant("u-1", "librespeed").max_usage(50).build()).await;

	let state = GateState::new(bridge(&store, vec![redirect_route("librespeed")]));

	(store, server::router(Arc::new(state)))
}

async fn call(app: &Router, uri: &str, body: Value) -> (StatusCode, Option<String>, Value) {
	let request = Request::builder()
		.method("POST")
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.expect("Request fixture should build.");
	let response = app.clone().oneshot(request).await.expect("Router should not fail.");
	let status = response.status();
	let location = response
		.headers()
		.get(header::LOCATION)
		.and_then(|value| value.to_str().ok())
		.map(str::to_owned);
	let bytes =
		to_bytes(response.into_body(), usize::MAX).await.expect("Response body should be readable.");
	let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

	(status, location, json)
}

fn action(action: &str, module: &str) -> Value {
	json!({
		"action": action,
		"moduleId": module,
		"userId": "u-1",
		"userEmail": "u-1@iahome.fr",
	})
}

#[tokio::test]
async fn check_access_reports_denials_in_body() {
	let (_, app) = app().await;
	let (status, _, body) =
		call(&app, "/authorize-module-access", action("check_access", "librespeed")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["authorized"], true);
	assert_eq!(body["quotaInfo"]["maxUsage"], 50);
	assert_eq!(body["quotaInfo"]["isQuotaExceeded"], false);
	assert_eq!(body["userInfo"]["userEmail"], "u-1@iahome.fr");

	let (status, _, body) =
		call(&app, "/authorize-module-access", action("check_access", "metube")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["authorized"], false);
	assert_eq!(body["code"], "no_access");
	assert_eq!(body["reason"], "Aucun accès trouvé pour ce module");
}

#[tokio::test]
async fn generated_tokens_validate_exactly_once() {
	let (_, app) = app().await;
	let (status, _, body) =
		call(&app, "/authorize-module-access", action("generate_token", "librespeed")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["success"], true);

	let token = body["token"].as_str().expect("Token should be present.").to_owned();

	assert!(body["expiresAt"].is_string());

	let (status, _, body) =
		call(&app, "/modules/librespeed/validate-token", json!({ "token": token })).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["user_id"], "u-1");
	assert_eq!(body["module_id"], "librespeed");

	let (status, _, body) =
		call(&app, "/modules/librespeed/validate-token", json!({ "token": token })).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["reason"], "invalid or expired");
}

#[tokio::test]
async fn access_redirects_and_counts_usage() {
	let (store, app) = app().await;
	let user = json!({ "userId": "u-1", "userEmail": "u-1@iahome.fr" });
	let (status, location, _) = call(&app, "/modules/librespeed/access", user.clone()).await;

	assert_eq!(status, StatusCode::FOUND);
	assert!(
		location
			.expect("Redirect should carry a location.")
			.starts_with("https://librespeed.iahome.fr/?token=")
	);

	let grant = store
		.fetch_active_grant(&common::user("u-1").user_id, &module("librespeed"))
		.await
		.expect("Grant lookup should succeed.")
		.expect("Grant should stay active.");

	assert_eq!(grant.usage_count, 1);

	let (status, _, body) =
		call(&app, "/modules/librespeed/access", json!({ "userId": "u-1" })).await;

	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(body["code"], "not_authenticated");

	let (status, _, _) = call(&app, "/modules/metube/access", user).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
	let (_, app) = app().await;
	let (status, _, _) = call(&app, "/authorize-module-access", action("delete_everything", "x")).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _, body) =
		call(&app, "/authorize-module-access", json!({ "action": "check_access" })).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"], "moduleId is required");

	let (status, _, _) = call(
		&app,
		"/authorize-module-access",
		json!({ "action": "generate_token", "moduleId": "librespeed", "userId": "u-1",
			"userEmail": "u-1@iahome.fr", "durationMinutes": 0 }),
	)
	.await;

	assert_eq!(status, StatusCode::BAD_REQUEST);

	for minutes in [i64::MAX, i64::MIN, 721] {
		let (status, _, body) = call(
			&app,
			"/authorize-module-access",
			json!({ "action": "generate_token", "moduleId": "librespeed", "userId": "u-1",
				"userEmail": "u-1@iahome.fr", "durationMinutes": minutes }),
		)
		.await;

		assert_eq!(status, StatusCode::BAD_REQUEST, "durationMinutes = {minutes}");
		assert_eq!(body["success"], false);
	}
}

#[tokio::test]
async fn free_modules_can_be_self_activated() {
	let (_, app) = app().await;
	let (status, _, body) =
		call(&app, "/authorize-module-access", action("activate_module", "metube")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["success"], true);
	assert_eq!(body["quotaInfo"]["usageCount"], 0);

	let (_, _, body) = call(&app, "/authorize-module-access", action("check_access", "metube")).await;

	assert_eq!(body["authorized"], true);

	let (status, _, _) =
		call(&app, "/authorize-module-access", action("activate_module", "stablediffusion")).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _, body) =
		call(&app, "/authorize-module-access", json!({ "action": "cleanup_tokens" })).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["deleted"], 0);
}

#[tokio::test]
async fn healthz_answers() {
	let (_, app) = app().await;
	let response = app
		.oneshot(
			Request::builder()
				.uri("/healthz")
				.body(Body::empty())
				.expect("Request fixture should build."),
		)
		.await
		.expect("Router should not fail.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_upstreams_answer_with_a_plain_500() {
	let store = Arc::new(MemoryStore::default());
	// Bind then release a loopback port so nothing listens on it.
	let port = TcpListener::bind("127.0.0.1:0")
		.and_then(|listener| listener.local_addr())
		.expect("Loopback port should be available.")
		.port();
	let upstream =
		Url::parse(&format!("http://127.0.0.1:{port}/")).expect("Upstream fixture should parse.");
	let metube = ModuleRoute::builder(module("metube"))
		.subdomain("metube", "iahome.fr")
		.expect("Subdomain fixture should parse.")
		.reverse_proxy(upstream)
		.build()
		.expect("Proxy route fixture should build.");
	let client = ReqwestUpstreamClient::new(StdDuration::from_secs(5))
		.expect("Upstream client should build.");
	let gate = bridge(&store, vec![metube]).with_proxy(
		ReverseProxy::new(Arc::new(client), "iahome.fr"),
		OriginPolicy::new(["iahome.fr", "*.iahome.fr"]),
	);
	let app = server::router(Arc::new(GateState::new(gate)));

	seed_module(&store, "metube", true).await;

	let response = app
		.oneshot(
			Request::builder()
				.uri("/modules/metube/proxy/static/app.js")
				.header(header::REFERER, "https://iahome.fr/modules/metube/proxy/")
				.body(Body::empty())
				.expect("Request fixture should build."),
		)
		.await
		.expect("Router should not fail.");

	assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

	let body =
		to_bytes(response.into_body(), usize::MAX).await.expect("Response body should be readable.");

	assert_eq!(&body[..], b"Internal Server Error");
}
