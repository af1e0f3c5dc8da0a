//! Module-access gate: decide whether a user may enter a resold third-party module, mint a
//! short-lived credential for the hand-off, count the access against the grant quota, and deliver
//! the session by redirect or reverse proxy.
//!
//! The crate is organized leaves first:
//!
//! - [`store`]: the credential store contract plus in-memory and JSON-file backends.
//! - [`engine`]: the read-only authorization decision.
//! - [`ledger`]: usage counting, activation, renewal.
//! - [`issuer`]: opaque single-use tokens and HS256 JWTs.
//! - [`bridge`]: the per-module route table and the access state machine.
//! - `server`: the axum HTTP surface (feature `server`).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod grant;
pub mod http;
pub mod issuer;
pub mod ledger;
pub mod obs;
#[cfg(feature = "server")] pub mod server;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, tokio as _, tower as _};
