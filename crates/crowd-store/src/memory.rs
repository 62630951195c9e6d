use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crowd_types::{EntityId, IdGenerator};

use crate::config::{ConnectionConfig, Credentials};
use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::traits::{Connector, DocumentCursor, DocumentStore};
use crate::{Document, ID_FIELD};

/// In-memory store server.
///
/// Intended for tests and embedding. Databases live as long as the server,
/// so every connection to the same database name sees the same documents.
/// The server answers only on its own address and, if configured with
/// credentials, only to clients presenting them.
pub struct InMemoryServer {
    address: String,
    credentials: Option<Credentials>,
    reachable: AtomicBool,
    databases: RwLock<HashMap<String, InMemoryDatabase>>,
    ids: Arc<IdGenerator>,
}

impl InMemoryServer {
    /// Create a reachable server answering on `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: None,
            reachable: AtomicBool::new(true),
            databases: RwLock::new(HashMap::new()),
            ids: Arc::new(IdGenerator::new()),
        }
    }

    /// Require clients to present `credentials`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Simulate the server going down (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Connection parameters that reach `database` on this server.
    pub fn connection_config(&self, database: &str) -> ConnectionConfig {
        let config = ConnectionConfig::new(self.address.clone(), database);
        match &self.credentials {
            Some(creds) => config.with_credentials(creds.clone()),
            None => config,
        }
    }

    /// Direct handle on a database, created if absent.
    pub fn database(&self, name: &str) -> InMemoryDatabase {
        if let Some(db) = self.databases.read().expect("lock poisoned").get(name) {
            return db.clone();
        }
        self.databases
            .write()
            .expect("lock poisoned")
            .entry(name.to_string())
            .or_insert_with(|| InMemoryDatabase::new(name, Arc::clone(&self.ids)))
            .clone()
    }

    /// Names of all databases created so far, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let map = self.databases.read().expect("lock poisoned");
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    fn authenticate(&self, presented: Option<&Credentials>) -> StoreResult<()> {
        let Some(required) = &self.credentials else {
            return Ok(());
        };
        match presented {
            Some(c) if c.username == required.username && c.password == required.password => {
                Ok(())
            }
            Some(c) => Err(StoreError::Authentication {
                user: c.username.clone(),
            }),
            None => Err(StoreError::Authentication {
                user: String::new(),
            }),
        }
    }
}

#[async_trait]
impl Connector for InMemoryServer {
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<Arc<dyn DocumentStore>> {
        let listed = config.addresses.iter().any(|a| a == &self.address);
        if !listed || !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "no reachable server among {:?}",
                config.addresses
            )));
        }
        self.authenticate(config.credentials.as_ref())?;
        Ok(Arc::new(self.database(&config.database)))
    }
}

impl fmt::Debug for InMemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryServer")
            .field("address", &self.address)
            .field("databases", &self.database_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// InMemoryDatabase
// ---------------------------------------------------------------------------

/// One in-memory database. Cheap to clone; clones share their documents.
///
/// Collections are `BTreeMap`s keyed by [`EntityId`], so iteration order is
/// ascending identity order. Besides the [`DocumentStore`] operations it
/// exposes fault injection and access counters for tests.
#[derive(Clone)]
pub struct InMemoryDatabase {
    name: Arc<str>,
    state: Arc<DatabaseState>,
}

struct DatabaseState {
    collections: RwLock<HashMap<String, CollectionData>>,
    ids: Arc<IdGenerator>,
    faults: Mutex<Faults>,
    documents_fetched: AtomicUsize,
    cursors_opened: AtomicUsize,
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

#[derive(Default)]
struct CollectionData {
    documents: BTreeMap<EntityId, Document>,
    unique_fields: Vec<String>,
}

#[derive(Clone, Default)]
struct Faults {
    write: Option<String>,
    query_after: Option<(usize, String)>,
}

impl InMemoryDatabase {
    fn new(name: &str, ids: Arc<IdGenerator>) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(DatabaseState {
                collections: RwLock::new(HashMap::new()),
                ids,
                faults: Mutex::new(Faults::default()),
                documents_fetched: AtomicUsize::new(0),
                cursors_opened: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `document` as-is, bypassing unique indexes and faults.
    ///
    /// A missing or unparsable `_id` is replaced by a fresh one. Useful for
    /// seeding collections, including with documents that will not decode.
    pub fn insert_raw(&self, collection: &str, mut document: Document) -> EntityId {
        let id = document
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| EntityId::from_hex(s).ok())
            .unwrap_or_else(|| self.state.ids.next_id());
        document.insert(ID_FIELD.into(), Value::String(id.to_hex()));
        let mut collections = self.state.collections.write().expect("lock poisoned");
        collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .insert(id, document);
        id
    }

    /// All documents of `collection` in ascending id order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.state.collections.read().expect("lock poisoned");
        collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.state.collections.read().expect("lock poisoned");
        collections.get(collection).map_or(0, |c| c.documents.len())
    }

    /// Fields declared unique on `collection`.
    pub fn unique_fields(&self, collection: &str) -> Vec<String> {
        let collections = self.state.collections.read().expect("lock poisoned");
        collections
            .get(collection)
            .map(|c| c.unique_fields.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent write fail with `reason`.
    pub fn inject_write_fault(&self, reason: impl Into<String>) {
        self.state.faults.lock().expect("lock poisoned").write = Some(reason.into());
    }

    /// Make every cursor opened from now on fail after handing out `after`
    /// documents.
    pub fn inject_query_fault_after(&self, after: usize, reason: impl Into<String>) {
        self.state.faults.lock().expect("lock poisoned").query_after = Some((after, reason.into()));
    }

    pub fn clear_faults(&self) {
        *self.state.faults.lock().expect("lock poisoned") = Faults::default();
    }

    /// Documents handed out by cursors so far.
    pub fn documents_fetched(&self) -> usize {
        self.state.documents_fetched.load(Ordering::SeqCst)
    }

    /// Cursors opened so far.
    pub fn cursors_opened(&self) -> usize {
        self.state.cursors_opened.load(Ordering::SeqCst)
    }

    /// `find_one` calls so far.
    pub fn lookups(&self) -> usize {
        self.state.lookups.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Any read at all: cursors opened plus lookups.
    pub fn read_operations(&self) -> usize {
        self.cursors_opened() + self.lookups()
    }
}

impl fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.state.collections.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryDatabase")
            .field("name", &self.name)
            .field("collection_count", &count)
            .finish()
    }
}

fn parse_id(collection: &str, document: &Document) -> StoreResult<Option<EntityId>> {
    match document.get(ID_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => EntityId::from_hex(s)
            .map(Some)
            .map_err(|e| StoreError::InvalidDocument(format!("{collection}: bad {ID_FIELD}: {e}"))),
        Some(other) => Err(StoreError::InvalidDocument(format!(
            "{collection}: {ID_FIELD} must be a hex string, got {other}"
        ))),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDatabase {
    fn database(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        self.state.lookups.fetch_add(1, Ordering::SeqCst);
        let collections = self.state.collections.read().expect("lock poisoned");
        Ok(collections.get(collection).and_then(|c| {
            c.documents
                .values()
                .find(|d| filter.matches(d))
                .cloned()
        }))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> StoreResult<Box<dyn DocumentCursor>> {
        self.state.cursors_opened.fetch_add(1, Ordering::SeqCst);
        let fault = self.state.faults.lock().expect("lock poisoned").query_after.clone();
        Ok(Box::new(InMemoryCursor {
            state: Arc::clone(&self.state),
            collection: collection.to_string(),
            filter,
            after: None,
            returned: 0,
            fault,
        }))
    }

    async fn save(&self, collection: &str, mut document: Document) -> StoreResult<EntityId> {
        if let Some(reason) = self.state.faults.lock().expect("lock poisoned").write.clone() {
            return Err(StoreError::Write {
                collection: collection.to_string(),
                reason,
            });
        }
        let id = match parse_id(collection, &document)? {
            Some(id) => id,
            None => self.state.ids.next_id(),
        };
        // Stored ids are always lowercase hex; string filters rely on it.
        document.insert(ID_FIELD.into(), Value::String(id.to_hex()));

        let mut collections = self.state.collections.write().expect("lock poisoned");
        let data = collections.entry(collection.to_string()).or_default();
        for field in &data.unique_fields {
            let Some(value) = document.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = data
                .documents
                .iter()
                .any(|(other, d)| *other != id && d.get(field) == Some(value));
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    field: field.clone(),
                    value: value.to_string(),
                });
            }
        }
        data.documents.insert(id, document);
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        debug!(database = %self.name, collection, id = %id, "document saved");
        Ok(id)
    }

    async fn ensure_unique_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        let mut collections = self.state.collections.write().expect("lock poisoned");
        let data = collections.entry(collection.to_string()).or_default();
        if !data.unique_fields.iter().any(|f| f == field) {
            data.unique_fields.push(field.to_string());
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        Ok(self.len(collection) as u64)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCursor
// ---------------------------------------------------------------------------

/// Resumable cursor: remembers the last id handed out and re-enters the
/// collection after it on every batch, so nothing is buffered between
/// batches.
struct InMemoryCursor {
    state: Arc<DatabaseState>,
    collection: String,
    filter: Option<Filter>,
    after: Option<EntityId>,
    returned: usize,
    fault: Option<(usize, String)>,
}

#[async_trait]
impl DocumentCursor for InMemoryCursor {
    async fn next_batch(&mut self, max: usize) -> StoreResult<Vec<Document>> {
        let mut limit = max.max(1);
        if let Some((after, reason)) = &self.fault {
            if self.returned >= *after {
                return Err(StoreError::Query {
                    collection: self.collection.clone(),
                    reason: reason.clone(),
                });
            }
            limit = limit.min(after - self.returned);
        }

        let collections = self.state.collections.read().expect("lock poisoned");
        let Some(data) = collections.get(&self.collection) else {
            return Ok(Vec::new());
        };
        let lower = match self.after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let batch: Vec<(EntityId, Document)> = data
            .documents
            .range((lower, Bound::Unbounded))
            .filter(|(_, d)| self.filter.as_ref().map_or(true, |f| f.matches(d)))
            .take(limit)
            .map(|(id, d)| (*id, d.clone()))
            .collect();
        drop(collections);

        if let Some((id, _)) = batch.last() {
            self.after = Some(*id);
        }
        self.returned += batch.len();
        self.state
            .documents_fetched
            .fetch_add(batch.len(), Ordering::SeqCst);
        Ok(batch.into_iter().map(|(_, d)| d).collect())
    }
}
