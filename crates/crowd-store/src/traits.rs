use std::sync::Arc;

use async_trait::async_trait;
use crowd_types::EntityId;

use crate::config::ConnectionConfig;
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::Document;

/// Opens database handles on a store server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `config.database`.
    ///
    /// Fails with a connection or authentication error when no listed
    /// address is reachable or the credentials are rejected. Never retried.
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn DocumentStore>>;
}

/// A handle on one database.
///
/// All implementations must satisfy these invariants:
/// - Collections come into existence on first use.
/// - Cursors yield documents in ascending `_id` order.
/// - A stored document always carries its `_id`.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this handle is bound to.
    fn database(&self) -> &str;

    /// First document (in `_id` order) matching `filter`, if any.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Open a cursor over the documents matching `filter` (all documents
    /// when `None`). Opening does not fetch anything.
    async fn find(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> StoreResult<Box<dyn DocumentCursor>>;

    /// Insert or replace a document by `_id`, assigning a fresh id when the
    /// document has none. Returns the id it was stored under.
    async fn save(&self, collection: &str, document: Document) -> StoreResult<EntityId>;

    /// Declare `field` unique within `collection`. Idempotent.
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> StoreResult<()>;

    /// Number of documents in `collection`.
    async fn count(&self, collection: &str) -> StoreResult<u64>;
}

/// A server-side cursor over query results.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Fetch up to `max` further documents.
    ///
    /// An empty batch means the cursor is exhausted. A `max` of zero is
    /// treated as one so that an empty batch stays unambiguous.
    async fn next_batch(&mut self, max: usize) -> StoreResult<Vec<Document>>;
}
