//! Access token secrets and their persisted records.

pub mod record;
pub mod secret;
