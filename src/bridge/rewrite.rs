//! HTML rewriting for proxied module pages.
//!
//! Only `src`, `href`, and `action` attribute values are touched. Root-relative paths and
//! absolute URLs pointing at the upstream are re-rooted under the proxy prefix; everything else
//! (relative paths, fragments, foreign hosts, `data:` URIs) is left alone.

// self
use crate::_prelude::*;

const ATTRIBUTES: [&str; 3] = ["src", "href", "action"];

/// Rewrites one module's HTML so every navigation stays inside the proxy.
#[derive(Clone, Debug)]
pub struct HtmlRewriter {
	proxy_prefix: String,
	upstream_origin: String,
	banner: Option<String>,
}
impl HtmlRewriter {
	/// Creates a rewriter for pages fetched from `upstream` and served under `proxy_prefix`.
	pub fn new(proxy_prefix: impl Into<String>, upstream: &Url) -> Self {
		let proxy_prefix = proxy_prefix.into().trim_end_matches('/').to_owned();

		Self {
			proxy_prefix,
			upstream_origin: upstream.origin().ascii_serialization(),
			banner: None,
		}
	}

	/// Injects the navigation banner linking back to `https://{primary_domain}/dashboard`.
	pub fn with_banner(mut self, primary_domain: &str) -> Self {
		self.banner = Some(banner_html(primary_domain));

		self
	}

	/// Maps one attribute value; `None` means leave it untouched.
	pub fn rewrite_url(&self, value: &str) -> Option<String> {
		let path = if let Some(rest) = value.strip_prefix(&self.upstream_origin) {
			if !rest.is_empty() && !rest.starts_with('/') {
				return None;
			}

			if rest.is_empty() { "/" } else { rest }
		} else if value.starts_with('/') && !value.starts_with("//") {
			value
		} else {
			return None;
		};

		if path == self.proxy_prefix || path.starts_with(&format!("{}/", self.proxy_prefix)) {
			return None;
		}

		Some(format!("{}{path}", self.proxy_prefix))
	}

	/// Rewrites a full HTML document.
	pub fn rewrite(&self, html: &str) -> String {
		let rewritten = self.rewrite_attributes(html);

		match &self.banner {
			Some(banner) => inject_after_body(&rewritten, banner),
			None => rewritten,
		}
	}

	fn rewrite_attributes(&self, html: &str) -> String {
		let lower = html.to_ascii_lowercase();
		let bytes = html.as_bytes();
		let mut out = String::with_capacity(html.len() + 256);
		let mut cursor = 0;
		let mut idx = 0;

		while idx < bytes.len() {
			let Some((value_start, quote)) = match_attribute(&lower, bytes, idx) else {
				idx += 1;

				continue;
			};
			let Some(value_len) = html[value_start..].find(quote) else {
				break;
			};
			let value_end = value_start + value_len;

			if let Some(mapped) = self.rewrite_url(&html[value_start..value_end]) {
				out.push_str(&html[cursor..value_start]);
				out.push_str(&mapped);

				cursor = value_end;
			}

			idx = value_end + 1;
		}

		out.push_str(&html[cursor..]);

		out
	}
}

// Matches `<ws>name=` followed by a quote at `idx`; returns the value start and the quote.
fn match_attribute(lower: &str, bytes: &[u8], idx: usize) -> Option<(usize, char)> {
	if idx == 0 || !bytes[idx - 1].is_ascii_whitespace() {
		return None;
	}

	let name = ATTRIBUTES.iter().find(|name| lower[idx..].starts_with(*name))?;
	let mut pos = idx + name.len();

	while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
		pos += 1;
	}
	if bytes.get(pos) != Some(&b'=') {
		return None;
	}

	pos += 1;

	while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
		pos += 1;
	}

	match bytes.get(pos) {
		Some(b'"') => Some((pos + 1, '"')),
		Some(b'\'') => Some((pos + 1, '\'')),
		_ => None,
	}
}

fn inject_after_body(html: &str, banner: &str) -> String {
	let lower = html.to_ascii_lowercase();
	let insert_at = lower
		.find("<body")
		.and_then(|start| lower[start..].find('>').map(|end| start + end + 1))
		.unwrap_or(0);
	let mut out = String::with_capacity(html.len() + banner.len());

	out.push_str(&html[..insert_at]);
	out.push_str(banner);
	out.push_str(&html[insert_at..]);

	out
}

fn banner_html(primary_domain: &str) -> String {
	format!(
		"<div id=\"iahome-banner\" style=\"position:fixed;top:0;left:0;right:0;z-index:2147483647;\
		 padding:6px 12px;background:#1e293b;color:#f8fafc;font:14px sans-serif\">\
		 <a href=\"https://{primary_domain}/dashboard\" target=\"_top\" \
		 style=\"color:#f8fafc;text-decoration:none\">&larr; Retour au tableau de bord IAHome</a></div>"
	)
}
