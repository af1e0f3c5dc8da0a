//! Origin allow-list for proxied requests that arrive without a credential.

// self
use crate::_prelude::*;

/// Hosts whose pages may load proxied module content (iframes, assets, form posts).
///
/// An entry is either an exact host (`iahome.fr`) or a wildcard over its subdomains
/// (`*.iahome.fr`, which does not match the apex itself).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginPolicy {
	trusted: Vec<String>,
}
impl OriginPolicy {
	/// Builds a policy from host patterns; entries are lower-cased and trimmed.
	pub fn new<I, S>(hosts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let trusted = hosts
			.into_iter()
			.map(|host| host.as_ref().trim().to_ascii_lowercase())
			.filter(|host| !host.is_empty())
			.collect();

		Self { trusted }
	}

	/// Adds one more host pattern.
	pub fn trust(mut self, host: impl AsRef<str>) -> Self {
		let host = host.as_ref().trim().to_ascii_lowercase();

		if !host.is_empty() && !self.trusted.contains(&host) {
			self.trusted.push(host);
		}

		self
	}

	/// Returns `true` when `host` matches an entry.
	pub fn trusts_host(&self, host: &str) -> bool {
		let host = host.to_ascii_lowercase();

		self.trusted.iter().any(|pattern| match pattern.strip_prefix("*.") {
			Some(apex) => host.strip_suffix(apex).is_some_and(|rest| rest.ends_with('.')),
			None => *pattern == host,
		})
	}

	/// Admission check over the `Origin` header; `Referer` is consulted only when no `Origin`
	/// was sent, so an untrusted origin cannot borrow a trusted referer.
	pub fn allows(&self, origin: Option<&str>, referer: Option<&str>) -> bool {
		origin.or(referer).is_some_and(|value| self.trusts_url(value))
	}

	fn trusts_url(&self, value: &str) -> bool {
		Url::parse(value)
			.ok()
			.filter(|url| url.scheme() == "https" || url.scheme() == "http")
			.is_some_and(|url| url.host_str().is_some_and(|host| self.trusts_host(host)))
	}
}
