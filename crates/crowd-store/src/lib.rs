//! Document store adapter for crowd data.
//!
//! Documents are JSON objects grouped in named collections inside a
//! database. Every document carries its store-assigned identity in the
//! [`ID_FIELD`] field as a hex-encoded [`crowd_types::EntityId`].
//!
//! # Layers
//!
//! - [`Connector`] -- opens a database handle from a [`ConnectionConfig`]
//! - [`DocumentStore`] -- database handle: lookups, writes, cursors
//! - [`DocumentCursor`] -- pull-based cursor; hands out at most the number
//!   of documents asked for
//! - [`StoreAdapter`] / [`Collection`] -- cached collection handles and the
//!   cursor-to-stream bridge ([`Collection::query`])
//!
//! # Backends
//!
//! - [`InMemoryServer`] / [`InMemoryDatabase`] -- `BTreeMap`-based store for
//!   tests and embedding, with fault injection and access counters
//!
//! # Design Rules
//!
//! 1. Cursors yield documents in ascending `_id` order.
//! 2. A query never fetches more documents than its consumer requested,
//!    up to the configured fetch size.
//! 3. All faults are propagated, never silently ignored.

pub mod adapter;
pub mod config;
pub mod error;
pub mod filter;
pub mod memory;
pub mod traits;

pub use adapter::{Collection, DocumentStream, StoreAdapter};
pub use config::{ConnectionConfig, Credentials, StoreSettings};
pub use error::{StoreError, StoreResult};
pub use filter::Filter;
pub use memory::{InMemoryDatabase, InMemoryServer};
pub use traits::{Connector, DocumentCursor, DocumentStore};

/// A raw stored document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Name of the identity field in every stored document.
pub const ID_FIELD: &str = "_id";
