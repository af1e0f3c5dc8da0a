//! Per-user module grants, quota snapshots, and renewal policies.

// self
use crate::{
	_prelude::*,
	auth::{GrantId, ModuleId, UserId},
};

/// Entitlement tier attached to a grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
	/// Entry tier (free modules and the basic subscription).
	#[default]
	Basic,
	/// Premium subscription.
	Premium,
	/// One-off credit pack purchase.
	Paid,
}
impl AccessLevel {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AccessLevel::Basic => "basic",
			AccessLevel::Premium => "premium",
			AccessLevel::Paid => "paid",
		}
	}

	/// Renewal semantics for this grant kind.
	///
	/// Subscriptions reset to their fixed quota; credit packs accumulate.
	pub fn renewal_policy(self, quotas: &TierQuotas) -> RenewalPolicy {
		match self {
			AccessLevel::Basic | AccessLevel::Premium =>
				RenewalPolicy::ResetTo(quotas.quota_for(self)),
			AccessLevel::Paid => RenewalPolicy::TopUp(quotas.quota_for(self)),
		}
	}
}
impl Display for AccessLevel {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Fixed per-tier usage quotas. `0` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierQuotas {
	/// Quota of the basic tier.
	pub basic: u64,
	/// Quota of the premium tier.
	pub premium: u64,
	/// Size of one paid credit pack.
	pub paid: u64,
}
impl TierQuotas {
	/// Returns the fixed quota configured for `level`.
	pub fn quota_for(&self, level: AccessLevel) -> u64 {
		match level {
			AccessLevel::Basic => self.basic,
			AccessLevel::Premium => self.premium,
			AccessLevel::Paid => self.paid,
		}
	}
}
impl Default for TierQuotas {
	fn default() -> Self {
		Self { basic: 50, premium: 3000, paid: 100 }
	}
}

/// How a renewal changes the usage allowance of a grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "quota")]
pub enum RenewalPolicy {
	/// Reset usage and pin the allowance to exactly this quota; nothing carries over.
	ResetTo(u64),
	/// Keep usage and add this many uses to the allowance.
	TopUp(u64),
}
impl RenewalPolicy {
	/// Applies the policy to `grant` in place.
	pub fn apply(self, grant: &mut ModuleGrant) {
		match self {
			RenewalPolicy::ResetTo(quota) => {
				grant.usage_count = 0;
				grant.max_usage = (quota > 0).then_some(quota);
			},
			RenewalPolicy::TopUp(amount) =>
				if let Some(max) = grant.max_usage.filter(|max| *max > 0) {
					grant.max_usage = Some(max.saturating_add(amount));
				},
		}
	}
}

/// Usage state derived from a grant on every authorization check; never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
	/// Accesses recorded so far.
	pub usage_count: u64,
	/// Usage ceiling; `None` means unlimited.
	pub max_usage: Option<u64>,
	/// `max_usage > 0 && usage_count >= max_usage`.
	pub is_quota_exceeded: bool,
}
impl QuotaSnapshot {
	/// Computes the snapshot for the provided counters.
	pub fn new(usage_count: u64, max_usage: Option<u64>) -> Self {
		let is_quota_exceeded = matches!(max_usage, Some(max) if max > 0 && usage_count >= max);

		Self { usage_count, max_usage, is_quota_exceeded }
	}

	/// Remaining accesses, or `None` when unlimited.
	pub fn remaining(&self) -> Option<u64> {
		self.max_usage.filter(|max| *max > 0).map(|max| max.saturating_sub(self.usage_count))
	}
}

/// One user's entitlement to one module (a `user_applications` row).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleGrant {
	/// Synthetic row identifier.
	pub id: GrantId,
	/// Owner of the grant.
	pub user_id: UserId,
	/// Module the grant applies to.
	pub module_id: ModuleId,
	/// Soft revocation flag.
	pub is_active: bool,
	/// Entitlement tier.
	pub access_level: AccessLevel,
	/// Monotonic access counter.
	pub usage_count: u64,
	/// Usage ceiling; `None` or `0` means unlimited.
	pub max_usage: Option<u64>,
	/// Expiry instant; `None` never expires.
	#[serde(with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Creation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// Last mutation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl ModuleGrant {
	/// Returns a builder for an active grant owned by `user_id` for `module_id`.
	pub fn builder(user_id: UserId, module_id: ModuleId) -> ModuleGrantBuilder {
		ModuleGrantBuilder::new(user_id, module_id)
	}

	/// Current usage snapshot.
	pub fn quota(&self) -> QuotaSnapshot {
		QuotaSnapshot::new(self.usage_count, self.max_usage)
	}

	/// Returns `true` if the grant carries an expiry that is at or before `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at <= instant)
	}

	/// Returns `true` when this grant belongs to the provided (user, module) pair.
	pub fn matches(&self, user_id: &UserId, module_id: &ModuleId) -> bool {
		&self.user_id == user_id && &self.module_id == module_id
	}
}

/// Builder for [`ModuleGrant`].
#[derive(Clone, Debug)]
pub struct ModuleGrantBuilder {
	user_id: UserId,
	module_id: ModuleId,
	id: Option<GrantId>,
	access_level: AccessLevel,
	usage_count: u64,
	max_usage: Option<u64>,
	expires_at: Option<OffsetDateTime>,
	created_at: Option<OffsetDateTime>,
	is_active: bool,
}
impl ModuleGrantBuilder {
	fn new(user_id: UserId, module_id: ModuleId) -> Self {
		Self {
			user_id,
			module_id,
			id: None,
			access_level: AccessLevel::default(),
			usage_count: 0,
			max_usage: None,
			expires_at: None,
			created_at: None,
			is_active: true,
		}
	}

	/// Overrides the generated row identifier.
	pub fn id(mut self, id: GrantId) -> Self {
		self.id = Some(id);

		self
	}

	/// Sets the entitlement tier.
	pub fn access_level(mut self, level: AccessLevel) -> Self {
		self.access_level = level;

		self
	}

	/// Sets the initial usage counter.
	pub fn usage_count(mut self, count: u64) -> Self {
		self.usage_count = count;

		self
	}

	/// Sets the usage ceiling (`0` is stored as unlimited).
	pub fn max_usage(mut self, max: u64) -> Self {
		self.max_usage = (max > 0).then_some(max);

		self
	}

	/// Sets the expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the creation instant (defaults to now).
	pub fn created_at(mut self, instant: OffsetDateTime) -> Self {
		self.created_at = Some(instant);

		self
	}

	/// Sets the soft revocation flag.
	pub fn active(mut self, active: bool) -> Self {
		self.is_active = active;

		self
	}

	/// Consumes the builder and produces a [`ModuleGrant`].
	pub fn build(self) -> ModuleGrant {
		let created_at = self.created_at.unwrap_or_else(OffsetDateTime::now_utc);

		ModuleGrant {
			id: self.id.unwrap_or_else(GrantId::generate),
			user_id: self.user_id,
			module_id: self.module_id,
			is_active: self.is_active,
			access_level: self.access_level,
			usage_count: self.usage_count,
			max_usage: self.max_usage,
			expires_at: self.expires_at,
			created_at,
			updated_at: created_at,
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn grant() -> ModuleGrant {
		ModuleGrant::builder(
			UserId::new("u-1").expect("User fixture should be valid."),
			ModuleId::new("librespeed").expect("Module fixture should be valid."),
		)
		.created_at(macros::datetime!(2025-01-01 00:00 UTC))
		.build()
	}

	#[test]
	fn quota_snapshot_treats_zero_and_none_as_unlimited() {
		assert!(!QuotaSnapshot::new(10_000, None).is_quota_exceeded);
		assert!(!QuotaSnapshot::new(10_000, Some(0)).is_quota_exceeded);
		assert!(!QuotaSnapshot::new(49, Some(50)).is_quota_exceeded);
		assert!(QuotaSnapshot::new(50, Some(50)).is_quota_exceeded);
		assert!(QuotaSnapshot::new(51, Some(50)).is_quota_exceeded);
		assert_eq!(QuotaSnapshot::new(49, Some(50)).remaining(), Some(1));
		assert_eq!(QuotaSnapshot::new(49, None).remaining(), None);
	}

	#[test]
	fn reset_policy_pins_allowance_without_accumulating() {
		let mut grant = grant();

		grant.usage_count = 37;
		grant.max_usage = Some(3000);

		RenewalPolicy::ResetTo(3000).apply(&mut grant);

		assert_eq!(grant.usage_count, 0);
		assert_eq!(grant.max_usage, Some(3000));
		assert_eq!(grant.quota().remaining(), Some(3000));
	}

	#[test]
	fn top_up_policy_accumulates_allowance() {
		let mut grant = grant();

		grant.usage_count = 37;
		grant.max_usage = Some(100);

		RenewalPolicy::TopUp(100).apply(&mut grant);

		assert_eq!(grant.usage_count, 37);
		assert_eq!(grant.max_usage, Some(200));
	}

	#[test]
	fn access_levels_map_to_renewal_policies() {
		let quotas = TierQuotas::default();

		assert_eq!(AccessLevel::Premium.renewal_policy(&quotas), RenewalPolicy::ResetTo(3000));
		assert_eq!(AccessLevel::Paid.renewal_policy(&quotas), RenewalPolicy::TopUp(100));
	}

	#[test]
	fn expiry_is_inclusive_of_the_boundary() {
		let mut grant = grant();
		let boundary = macros::datetime!(2025-02-01 00:00 UTC);

		assert!(!grant.is_expired_at(boundary));

		grant.expires_at = Some(boundary);

		assert!(grant.is_expired_at(boundary));
		assert!(!grant.is_expired_at(boundary - Duration::seconds(1)));
	}

	#[test]
	fn generated_ids_are_unique() {
		assert_ne!(grant().id, grant().id);
	}
}
