//! Module catalog entries: the purchasable third-party tools behind the gate.

// self
use crate::{_prelude::*, auth::ModuleId};

/// One resold third-party tool, reachable at its own subdomain.
///
/// Hidden entries (`is_visible == false`) are unreachable even for users holding a valid grant,
/// and an operator may toggle visibility at any time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCatalogEntry {
	/// Stable slug, e.g. `librespeed`.
	pub id: ModuleId,
	/// Display name.
	pub title: String,
	/// Catalog category label.
	#[serde(default)]
	pub category: String,
	/// Price in euro cents; `0` marks a free module.
	#[serde(default)]
	pub price: u64,
	/// Operator-controlled visibility switch.
	pub is_visible: bool,
	/// Downstream base URL, when known.
	#[serde(default)]
	pub url: Option<Url>,
}
impl ModuleCatalogEntry {
	/// Creates a visible, free entry with the provided id and title.
	pub fn new(id: ModuleId, title: impl Into<String>) -> Self {
		Self {
			id,
			title: title.into(),
			category: String::new(),
			price: 0,
			is_visible: true,
			url: None,
		}
	}

	/// Sets the catalog category.
	pub fn with_category(mut self, category: impl Into<String>) -> Self {
		self.category = category.into();

		self
	}

	/// Sets the price in euro cents.
	pub fn with_price(mut self, price: u64) -> Self {
		self.price = price;

		self
	}

	/// Sets the visibility flag.
	pub fn with_visibility(mut self, visible: bool) -> Self {
		self.is_visible = visible;

		self
	}

	/// Sets the downstream base URL.
	pub fn with_url(mut self, url: Url) -> Self {
		self.url = Some(url);

		self
	}

	/// Returns `true` for modules that can be self-activated without payment.
	pub fn is_free(&self) -> bool {
		self.price == 0
	}
}
