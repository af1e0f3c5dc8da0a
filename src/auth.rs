//! Auth-domain identifiers, user identities, and access token models.

pub mod id;
pub mod identity;
pub mod token;

pub use id::*;
pub use identity::*;
pub use token::{record::*, secret::*};
