//! Reverse-proxy forwarding for modules served through the gate.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	bridge::{
		rewrite::HtmlRewriter,
		route::{BasicAuth, DeliveryStrategy, ModuleRoute},
	},
	error::UpstreamError,
	http::{UpstreamClient, UpstreamRequest},
	obs::{self, OperationKind, OperationSpan, Outcome},
};

// Connection-scoped headers that must not cross the proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];
// Request headers the gate owns.
const STRIPPED_REQUEST: [&str; 5] =
	["host", "authorization", "cookie", "accept-encoding", "content-length"];
// Response headers the gate recomputes or overrides.
const STRIPPED_RESPONSE: [&str; 4] =
	["content-length", "content-encoding", "x-frame-options", "content-security-policy"];

/// Browser request as seen by the gate, already stripped of the proxy prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyRequest {
	/// HTTP method, upper-case.
	pub method: String,
	/// Path below the proxy prefix, starting with `/`.
	pub path: String,
	/// Raw query string without the leading `?`.
	pub query: Option<String>,
	/// Header pairs as received.
	pub headers: Vec<(String, String)>,
	/// Request body.
	pub body: Vec<u8>,
}
impl ProxyRequest {
	/// Returns the first header value matching `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Value of the `token` query parameter, if present.
	pub fn token(&self) -> Option<String> {
		let query = self.query.as_deref()?;

		url::form_urlencoded::parse(query.as_bytes())
			.find(|(key, _)| key == "token")
			.map(|(_, value)| value.into_owned())
	}

	/// Query string with any `token` parameter removed.
	fn forwarded_query(&self) -> Option<String> {
		let query = self.query.as_deref()?;
		let kept = url::form_urlencoded::parse(query.as_bytes())
			.filter(|(key, _)| key != "token")
			.collect::<Vec<_>>();

		if kept.is_empty() {
			return None;
		}

		let mut serializer = url::form_urlencoded::Serializer::new(String::new());

		serializer.extend_pairs(kept);

		Some(serializer.finish())
	}
}

/// Response handed back to the browser.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyResponse {
	/// Upstream status, preserved as-is.
	pub status: u16,
	/// Headers after filtering, rewriting, and framing policy.
	pub headers: Vec<(String, String)>,
	/// Body, rewritten when it is HTML.
	pub body: Vec<u8>,
}
impl ProxyResponse {
	/// Returns the first header value matching `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Forwards proxied requests to module upstreams.
#[derive(Clone)]
pub struct ReverseProxy {
	client: Arc<dyn UpstreamClient>,
	primary_domain: String,
	banner: bool,
}
impl ReverseProxy {
	/// Creates a proxy over `client`; framing is restricted to `primary_domain`.
	pub fn new(client: Arc<dyn UpstreamClient>, primary_domain: impl Into<String>) -> Self {
		Self { client, primary_domain: primary_domain.into(), banner: true }
	}

	/// Toggles the navigation banner (enabled by default).
	pub fn with_banner(mut self, enabled: bool) -> Self {
		self.banner = enabled;

		self
	}

	/// Framing headers attached to every proxied response.
	pub fn security_headers(&self) -> [(String, String); 2] {
		[
			("x-frame-options".into(), "SAMEORIGIN".into()),
			(
				"content-security-policy".into(),
				format!("frame-ancestors 'self' https://{}", self.primary_domain),
			),
		]
	}

	/// Forwards `request` to the route's upstream and post-processes the response.
	pub async fn forward(&self, route: &ModuleRoute, request: ProxyRequest) -> Result<ProxyResponse> {
		const KIND: OperationKind = OperationKind::Proxy;

		let DeliveryStrategy::ReverseProxy { upstream, basic_auth } = &route.strategy else {
			return Err(UpstreamError::InvalidTarget { target: route.production_url.to_string() }
				.into());
		};
		let span = OperationSpan::new(KIND, "forward");

		obs::record_outcome(KIND, Outcome::Attempt);

		let result = span
			.instrument(async move {
				let url = target_url(upstream, &request)?;
				let outbound = UpstreamRequest {
					method: request.method.to_ascii_uppercase(),
					url,
					headers: outbound_headers(&request.headers, basic_auth.as_ref()),
					body: request.body,
				};
				let response = self.client.send(outbound).await?;
				let mut rewriter = HtmlRewriter::new(route.proxy_prefix(), upstream);

				if self.banner {
					rewriter = rewriter.with_banner(&self.primary_domain);
				}

				let is_html = response.header("content-type").is_some_and(|value| {
					value.trim_start().to_ascii_lowercase().starts_with("text/html")
				});
				let body = if is_html {
					rewriter.rewrite(&String::from_utf8_lossy(&response.body)).into_bytes()
				} else {
					response.body
				};
				let mut headers = response
					.headers
					.into_iter()
					.filter(|(name, _)| {
						let name = name.to_ascii_lowercase();

						!HOP_BY_HOP.contains(&name.as_str())
							&& !STRIPPED_RESPONSE.contains(&name.as_str())
					})
					.map(|(name, value)| {
						let value = if name.eq_ignore_ascii_case("location") {
							rewriter.rewrite_url(&value).unwrap_or(value)
						} else {
							value
						};

						(name, value)
					})
					.collect::<Vec<_>>();

				headers.extend(self.security_headers());

				Ok(ProxyResponse { status: response.status, headers, body })
			})
			.await;

		match &result {
			Ok(_) => obs::record_outcome(KIND, Outcome::Success),
			Err(_e) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					module = %route.module_id,
					error = %_e,
					"Upstream module request failed."
				);

				obs::record_outcome(KIND, Outcome::Failure)
			},
		}

		result
	}
}
impl Debug for ReverseProxy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReverseProxy")
			.field("primary_domain", &self.primary_domain)
			.field("banner", &self.banner)
			.finish()
	}
}

fn target_url(upstream: &Url, request: &ProxyRequest) -> Result<Url, UpstreamError> {
	let relative = request.path.trim_start_matches('/');
	let mut url = upstream
		.join(relative)
		.map_err(|_| UpstreamError::InvalidTarget { target: request.path.clone() })?;

	if url.origin() != upstream.origin() {
		return Err(UpstreamError::InvalidTarget { target: request.path.clone() });
	}

	url.set_query(request.forwarded_query().as_deref());

	Ok(url)
}

fn outbound_headers(
	headers: &[(String, String)],
	basic_auth: Option<&BasicAuth>,
) -> Vec<(String, String)> {
	let mut out = headers
		.iter()
		.filter(|(name, _)| {
			let name = name.to_ascii_lowercase();

			!HOP_BY_HOP.contains(&name.as_str()) && !STRIPPED_REQUEST.contains(&name.as_str())
		})
		.cloned()
		.collect::<Vec<_>>();

	if let Some(auth) = basic_auth {
		let encoded = STANDARD.encode(format!("{}:{}", auth.username, auth.password.expose()));

		out.push(("authorization".into(), format!("Basic {encoded}")));
	}

	out
}
