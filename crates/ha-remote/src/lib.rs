//! Remote state access for the Home Assistant REST API
//!
//! This crate defines the [`RemoteStateSource`] contract the cache and the
//! controllers are written against, together with two implementations:
//!
//! - [`HttpStateSource`] talks to a real instance over HTTP with a bearer
//!   token, validated once at construction.
//! - [`InMemoryStateSource`] keeps the states in memory.

mod error;
mod http;
mod memory;
mod source;

pub use error::{RemoteError, RemoteResult};
pub use http::{normalize_base_url, HttpStateSource, DEFAULT_TIMEOUT};
pub use memory::{InMemoryStateSource, RecordedCommand};
pub use source::{CommandResponse, RemoteStateSource};

/// Thread-safe handle to a remote state source
pub type SharedStateSource = std::sync::Arc<dyn RemoteStateSource>;
