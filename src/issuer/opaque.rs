//! Opaque single-use token generation.

// crates.io
use rand::{Rng, distr::Alphanumeric};

/// Shortest opaque token the gate will mint.
pub const MIN_OPAQUE_LENGTH: usize = 32;
/// Opaque token length used when none is configured.
pub const DEFAULT_OPAQUE_LENGTH: usize = 48;

/// Generates a mixed-case alphanumeric token of exactly `length` characters.
pub fn generate(length: usize) -> String {
	rand::rng().sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}
