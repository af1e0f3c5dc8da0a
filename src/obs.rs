//! Optional observability helpers for gate operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `module_gate.operation` with the
//!   `operation` and `stage` (call site) fields.
//! - Enable `metrics` to increment the `module_gate_operation_total` counter for every
//!   attempt/success/denial/failure, labeled by `operation` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operation kinds observed by the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// Authorization decision.
	CheckAccess,
	/// Access credential minting.
	MintToken,
	/// Access credential validation.
	ValidateToken,
	/// Conditional usage increment.
	IncrementUsage,
	/// Grant renewal.
	RenewGrant,
	/// Expired token cleanup.
	SweepTokens,
	/// End-to-end delivery through the bridge.
	Deliver,
	/// Reverse-proxied request.
	Proxy,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::CheckAccess => "check_access",
			OperationKind::MintToken => "mint_token",
			OperationKind::ValidateToken => "validate_token",
			OperationKind::IncrementUsage => "increment_usage",
			OperationKind::RenewGrant => "renew_grant",
			OperationKind::SweepTokens => "sweep_tokens",
			OperationKind::Deliver => "deliver",
			OperationKind::Proxy => "proxy",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a gate operation.
	Attempt,
	/// Successful completion.
	Success,
	/// The operation completed with a negative verdict (denial or rejection).
	Denied,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Denied => "denied",
			Outcome::Failure => "failure",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
