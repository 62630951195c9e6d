use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crowd_types::EntityId;

use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::traits::{Connector, DocumentCursor, DocumentStore};
use crate::Document;

/// A lazy, demand-driven sequence of raw documents.
pub type DocumentStream = BoxStream<'static, StoreResult<Document>>;

/// Connected database handle with cached collection handles.
pub struct StoreAdapter {
    store: Arc<dyn DocumentStore>,
    collections: Mutex<HashMap<String, Collection>>,
}

impl StoreAdapter {
    /// Connect through `connector`.
    ///
    /// Parameters with no address or an empty database name are rejected
    /// before the connector is consulted.
    pub async fn connect(connector: &dyn Connector, config: &ConnectionConfig) -> StoreResult<Self> {
        if config.addresses.is_empty() {
            return Err(StoreError::Connection("no server address configured".into()));
        }
        if config.database.trim().is_empty() {
            return Err(StoreError::Connection("database name is empty".into()));
        }
        let store = connector.connect(config).await?;
        info!(database = %config.database, addresses = ?config.addresses, "store connected");
        Ok(Self::new(store))
    }

    /// Wrap an already-open database handle.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the connected database.
    pub fn database(&self) -> &str {
        self.store.database()
    }

    /// Handle on the named collection, created on first use and cached.
    pub fn collection(&self, name: &str) -> Collection {
        let mut cache = self.collections.lock().expect("lock poisoned");
        cache
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = %self.store.database(), collection = %name, "collection handle created");
                Collection {
                    name: Arc::from(name),
                    store: Arc::clone(&self.store),
                }
            })
            .clone()
    }
}

impl fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.collections.lock().expect("lock poisoned").len();
        f.debug_struct("StoreAdapter")
            .field("database", &self.database())
            .field("cached_collections", &cached)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Handle on one named collection. Cheap to clone.
#[derive(Clone)]
pub struct Collection {
    name: Arc<str>,
    store: Arc<dyn DocumentStore>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        self.store.find_one(&self.name, filter).await
    }

    pub async fn save(&self, document: Document) -> StoreResult<EntityId> {
        self.store.save(&self.name, document).await
    }

    pub async fn ensure_unique_index(&self, field: &str) -> StoreResult<()> {
        self.store.ensure_unique_index(&self.name, field).await
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.store.count(&self.name).await
    }

    /// Stream the documents matching `filter`.
    ///
    /// Nothing happens until the stream is first polled; the cursor is
    /// opened then. Afterwards each poll that finds the local buffer empty
    /// pulls at most `fetch_size` documents from the cursor. A fault
    /// (opening or fetching) is yielded once and ends the stream. Dropping
    /// the stream drops the cursor, so no further documents are pulled.
    pub fn query(&self, filter: Option<Filter>, fetch_size: NonZeroUsize) -> DocumentStream {
        let state = QueryState::Pending {
            store: Arc::clone(&self.store),
            collection: Arc::clone(&self.name),
            filter,
        };
        stream::unfold(state, move |state| advance(state, fetch_size.get())).boxed()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.store.database())
            .field("name", &self.name)
            .finish()
    }
}

enum QueryState {
    Pending {
        store: Arc<dyn DocumentStore>,
        collection: Arc<str>,
        filter: Option<Filter>,
    },
    Open {
        collection: Arc<str>,
        cursor: Box<dyn DocumentCursor>,
        buffer: VecDeque<Document>,
    },
    Done,
}

async fn advance(
    mut state: QueryState,
    fetch_size: usize,
) -> Option<(StoreResult<Document>, QueryState)> {
    loop {
        match state {
            QueryState::Pending {
                store,
                collection,
                filter,
            } => match store.find(&collection, filter).await {
                Ok(cursor) => {
                    debug!(collection = %collection, fetch_size, "cursor opened");
                    state = QueryState::Open {
                        collection,
                        cursor,
                        buffer: VecDeque::new(),
                    };
                }
                Err(e) => return Some((Err(e), QueryState::Done)),
            },
            QueryState::Open {
                collection,
                mut cursor,
                mut buffer,
            } => {
                if let Some(document) = buffer.pop_front() {
                    return Some((
                        Ok(document),
                        QueryState::Open {
                            collection,
                            cursor,
                            buffer,
                        },
                    ));
                }
                match cursor.next_batch(fetch_size).await {
                    Ok(batch) if batch.is_empty() => {
                        debug!(collection = %collection, "cursor exhausted");
                        return None;
                    }
                    Ok(batch) => {
                        buffer.extend(batch);
                        state = QueryState::Open {
                            collection,
                            cursor,
                            buffer,
                        };
                    }
                    Err(e) => return Some((Err(e), QueryState::Done)),
                }
            }
            QueryState::Done => return None,
        }
    }
}
