#![cfg(feature = "reqwest")]

mod common;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use url::Url;
// self
use common::*;
use module_gate::{
	bridge::{
		AccessBridge, AccessOutcome, BasicAuth, Delivery, ModuleRoute, OriginPolicy,
		ProxyOutcome, ProxyRequest, ProxyResponse, ReverseProxy,
	},
	http::ReqwestUpstreamClient,
	store::MemoryStore,
};

const PAGE: &str = r#"<html><body><a href="/page">next</a><img src="/logo.png"></body></html>"#;

async fn proxied_gate(server: &MockServer) -> AccessBridge {
	let store = Arc::new(MemoryStore::default());

	for id in ["metube", "librespeed"] {
		seed_module(&store, id, true).await;
		seed_grant(&store, open_grant("u-1", id).max_usage(10).build()).await;
	}

	let upstream = Url::parse(&server.base_url()).expect("Mock server URL should parse.");
	let metube = ModuleRoute::builder(module("metube"))
		.subdomain("metube", "iahome.fr")
		.expect("Subdomain fixture should parse.")
		.reverse_proxy(upstream)
		.basic_auth(BasicAuth::new("admin", "secret"))
		.build()
		.expect("Proxy route fixture should build.");
	let client = ReqwestUpstreamClient::new(StdDuration::from_secs(5))
		.expect("Upstream client should build.");
	let proxy = ReverseProxy::new(Arc::new(client), "iahome.fr");

	bridge(&store, vec![metube, redirect_route("librespeed")])
		.with_proxy(proxy, OriginPolicy::new(["iahome.fr", "*.iahome.fr"]))
}

fn get(path: &str, query: Option<String>, headers: &[(&str, &str)]) -> ProxyRequest {
	ProxyRequest {
		method: "GET".into(),
		path: path.into(),
		query,
		headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
		body: Vec::new(),
	}
}

fn forwarded(outcome: ProxyOutcome) -> ProxyResponse {
	match outcome {
		ProxyOutcome::Forwarded(response) => response,
		other => panic!("Request should be forwarded, got {other:?}."),
	}
}

#[tokio::test]
async fn proxy_entry_is_admitted_once_and_rewritten() {
	let server = MockServer::start_async().await;
	let page = server
		.mock_async(|when, then| {
			when.method(GET).path("/").header("authorization", "Basic YWRtaW46c2VjcmV0");
			then.status(200)
				.header("content-type", "text/html; charset=utf-8")
				.header("x-frame-options", "DENY")
				.body(PAGE);
		})
		.await;
	let gate = proxied_gate(&server).await;
	let outcome = gate
		.access(&request("u-1", "metube"))
		.await
		.expect("Access attempt should not fail.");
	let AccessOutcome::Delivered { delivery: Delivery::Proxy { entry }, quota } = outcome else {
		panic!("Proxied module should deliver a proxy entry, got {outcome:?}.");
	};

	assert_eq!(quota.usage_count, 1);

	let token = entry
		.strip_prefix("/modules/metube/proxy/?token=")
		.expect("Entry should point into the proxy prefix.")
		.to_owned();
	let response = forwarded(
		gate.proxy(&module("metube"), get("/", Some(format!("token={token}")), &[]))
			.await
			.expect("Proxy request should not fail."),
	);
	let body = String::from_utf8(response.body.clone()).expect("Rewritten body should be UTF-8.");

	page.assert_async().await;
	assert_eq!(response.status, 200);
	assert!(body.contains(r#"href="/modules/metube/proxy/page""#));
	assert!(body.contains(r#"src="/modules/metube/proxy/logo.png""#));
	assert!(body.contains("https://iahome.fr/dashboard"));
	assert_eq!(response.header("x-frame-options"), Some("SAMEORIGIN"));
	assert_eq!(
		response.header("content-security-policy"),
		Some("frame-ancestors 'self' https://iahome.fr")
	);

	let replay = gate
		.proxy(&module("metube"), get("/", Some(format!("token={token}")), &[]))
		.await
		.expect("Proxy request should not fail.");

	assert_eq!(replay, ProxyOutcome::Forbidden);
}

#[tokio::test]
async fn trusted_referers_reach_assets_and_statuses_are_preserved() {
	let server = MockServer::start_async().await;
	let script = server
		.mock_async(|when, then| {
			when.method(GET).path("/static/app.js");
			then.status(200).header("content-type", "application/javascript").body("let a = 1;");
		})
		.await;
	let missing = server
		.mock_async(|when, then| {
			when.method(GET).path("/missing");
			then.status(404).body("nope");
		})
		.await;
	let moved = server
		.mock_async(|when, then| {
			when.method(GET).path("/old");
			then.status(302).header("location", "/new");
		})
		.await;
	let gate = proxied_gate(&server).await;
	let referer = [("referer", "https://iahome.fr/modules/metube/proxy/")];
	let asset = forwarded(
		gate.proxy(&module("metube"), get("/static/app.js", None, &referer))
			.await
			.expect("Proxy request should not fail."),
	);

	script.assert_async().await;
	assert_eq!(asset.body, b"let a = 1;");
	assert_eq!(asset.header("x-frame-options"), Some("SAMEORIGIN"));

	let not_found = forwarded(
		gate.proxy(&module("metube"), get("/missing", None, &referer))
			.await
			.expect("Proxy request should not fail."),
	);

	missing.assert_async().await;
	assert_eq!(not_found.status, 404);

	let redirect = forwarded(
		gate.proxy(&module("metube"), get("/old", None, &referer))
			.await
			.expect("Proxy request should not fail."),
	);

	moved.assert_async().await;
	assert_eq!(redirect.status, 302);
	assert_eq!(redirect.header("location"), Some("/modules/metube/proxy/new"));

	let foreign = gate
		.proxy(&module("metube"), get("/static/app.js", None, &[("origin", "https://evil.example")]))
		.await
		.expect("Proxy request should not fail.");

	assert_eq!(foreign, ProxyOutcome::Forbidden);

	let borrowed = gate
		.proxy(
			&module("metube"),
			get(
				"/static/app.js",
				None,
				&[("origin", "https://evil.example"), ("referer", "https://iahome.fr/")],
			),
		)
		.await
		.expect("Proxy request should not fail.");

	assert_eq!(borrowed, ProxyOutcome::Forbidden);
}

#[tokio::test]
async fn redirect_routes_are_not_proxied() {
	let server = MockServer::start_async().await;
	let gate = proxied_gate(&server).await;
	let outcome = gate
		.proxy(&module("librespeed"), get("/", None, &[("referer", "https://iahome.fr/")]))
		.await
		.expect("Proxy request should not fail.");

	assert_eq!(outcome, ProxyOutcome::UnknownRoute);

	let delivered = gate
		.access(&request("u-1", "librespeed"))
		.await
		.expect("Access attempt should not fail.");
	let AccessOutcome::Delivered { delivery: Delivery::Redirect { location }, .. } = delivered
	else {
		panic!("Redirect module should deliver a redirect, got {delivered:?}.");
	};

	assert_eq!(location.host_str(), Some("librespeed.iahome.fr"));
	assert!(location.query().is_some_and(|query| query.starts_with("token=")));
}
