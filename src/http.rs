//! Transport primitives for reverse-proxying module traffic.
//!
//! The bridge depends only on [`UpstreamClient`]; requests and responses are plain owned values
//! so the proxy logic stays independent of the HTTP stack that serves the gate. The default
//! implementation, [`ReqwestUpstreamClient`], is available behind the `reqwest` feature.

// self
use crate::{_prelude::*, error::UpstreamError};

/// Boxed future returned by [`UpstreamClient::send`].
pub type UpstreamFuture<'a> =
	Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + 'a + Send>>;

/// Outbound request to a module's upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamRequest {
	/// HTTP method, upper-case.
	pub method: String,
	/// Absolute target URL.
	pub url: Url,
	/// Header pairs forwarded as-is.
	pub headers: Vec<(String, String)>,
	/// Request body.
	pub body: Vec<u8>,
}

/// Response received from a module's upstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamResponse {
	/// HTTP status code.
	pub status: u16,
	/// Header pairs, in the order received.
	pub headers: Vec<(String, String)>,
	/// Fully buffered body.
	pub body: Vec<u8>,
}
impl UpstreamResponse {
	/// Returns the first header value matching `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Abstraction over HTTP transports able to reach module upstreams.
///
/// Implementations must not follow redirects: a `3xx` from the module is handed back to the
/// browser so its `Location` can be rewritten through the proxy.
pub trait UpstreamClient
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and buffers the full response.
	fn send(&self, request: UpstreamRequest) -> UpstreamFuture<'_>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestUpstreamClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestUpstreamClient {
	/// Builds a client that never follows redirects and bounds each exchange by `timeout`.
	pub fn new(timeout: std::time::Duration) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.timeout(timeout)
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestUpstreamClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl UpstreamClient for ReqwestUpstreamClient {
	fn send(&self, request: UpstreamRequest) -> UpstreamFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = reqwest::Method::from_bytes(request.method.as_bytes())
				.map_err(|_| UpstreamError::InvalidTarget { target: request.method.clone() })?;
			let mut builder = client.request(method, request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}

			let response =
				builder.body(request.body).send().await.map_err(UpstreamError::unreachable)?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect();
			let body = response
				.bytes()
				.await
				.map_err(|e| UpstreamError::Body { status: Some(status), source: Box::new(e) })?
				.to_vec();

			Ok(UpstreamResponse { status, headers, body })
		})
	}
}
