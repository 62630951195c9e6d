use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, error};

use crowd_store::{Collection, Connector, DocumentStream, Filter, StoreAdapter, StoreSettings};
use crowd_types::EntityId;

use crate::error::{RepositoryError, RepositoryResult};
use crate::mapping::{EntityDescriptor, NaturalKey};

/// A lazy, demand-driven sequence of entities that ends after its first
/// error.
pub type EntityStream<T> = BoxStream<'static, RepositoryResult<T>>;

/// Generic repository for one entity kind, described by `D`.
///
/// Owns its store connection; build one per unit of work.
pub struct Repository<D: EntityDescriptor> {
    adapter: StoreAdapter,
    collection: Collection,
    fetch_size: NonZeroUsize,
    _descriptor: PhantomData<fn() -> D>,
}

impl<D: EntityDescriptor> Repository<D> {
    /// Connect using `settings`, with `database` overriding the configured
    /// database when given, and ensure the descriptor's unique indexes.
    pub async fn connect(
        connector: &dyn Connector,
        settings: &StoreSettings,
        database: Option<&str>,
    ) -> RepositoryResult<Self> {
        let config = settings.connection.for_database(database);
        let adapter = StoreAdapter::connect(connector, &config)
            .await
            .map_err(RepositoryError::Connection)?;
        Self::with_adapter(adapter, settings.fetch_size).await
    }

    /// Build on an already-connected adapter.
    pub async fn with_adapter(adapter: StoreAdapter, fetch_size: NonZeroUsize) -> RepositoryResult<Self> {
        let collection = adapter.collection(D::COLLECTION);
        for field in D::UNIQUE_FIELDS {
            collection
                .ensure_unique_index(field)
                .await
                .map_err(RepositoryError::Connection)?;
        }
        Ok(Self {
            adapter,
            collection,
            fetch_size,
            _descriptor: PhantomData,
        })
    }

    pub fn database(&self) -> &str {
        self.adapter.database()
    }

    pub fn collection_name(&self) -> &'static str {
        D::COLLECTION
    }

    /// Look up one entity by id.
    pub async fn find_by_id(&self, id: &EntityId) -> RepositoryResult<Option<D::Entity>> {
        self.find_one(&Filter::id(id)).await
    }

    /// First entity (in id order) matching `filter`.
    pub async fn find_one(&self, filter: &Filter) -> RepositoryResult<Option<D::Entity>> {
        let document = self
            .collection
            .find_one(filter)
            .await
            .map_err(RepositoryError::Query)?;
        document.map(decode::<D>).transpose()
    }

    /// Stream the entities with ids in `from..=to`, ascending by id. An
    /// absent bound is open.
    pub fn find_between_keys(
        &self,
        from: Option<&EntityId>,
        to: Option<&EntityId>,
    ) -> EntityStream<D::Entity> {
        self.stream_all(Filter::id_range(from, to))
    }

    /// Collect the entities with ids in `from..=to`, fetching up to the
    /// configured fetch size per cursor round trip.
    pub async fn get_between_keys(
        &self,
        from: Option<&EntityId>,
        to: Option<&EntityId>,
    ) -> RepositoryResult<Vec<D::Entity>> {
        self.query(Filter::id_range(from, to), self.fetch_size)
            .try_collect()
            .await
    }

    /// Collect the whole collection in memory. Only for small collections;
    /// use [`Self::stream_all`] otherwise.
    pub async fn get_all(&self) -> RepositoryResult<Vec<D::Entity>> {
        self.get_between_keys(None, None).await
    }

    /// Stream the entities matching `filter` (all when `None`).
    ///
    /// Every call opens a fresh cursor, on first poll. Each poll pulls at
    /// most one document, so a consumer that has received `k` entities has
    /// caused at most `k` documents to be fetched, whatever the configured
    /// fetch size. Store and decode faults are logged and yielded as the
    /// final item. Dropping the stream releases the cursor.
    pub fn stream_all(&self, filter: Option<Filter>) -> EntityStream<D::Entity> {
        self.query(filter, NonZeroUsize::MIN)
    }

    fn query(&self, filter: Option<Filter>, fetch_size: NonZeroUsize) -> EntityStream<D::Entity> {
        debug!(
            collection = D::COLLECTION,
            filtered = filter.is_some(),
            fetch_size = fetch_size.get(),
            "streaming query"
        );
        let documents = self.collection.query(filter, fetch_size);
        stream::unfold(Some(documents), |state: Option<DocumentStream>| async move {
            let mut documents = match state {
                Some(documents) => documents,
                None => return None,
            };
            let item = match documents.next().await {
                Some(Ok(document)) => decode::<D>(document),
                Some(Err(e)) => {
                    error!(collection = D::COLLECTION, error = %e, "streaming query failed");
                    Err(RepositoryError::Query(e))
                }
                None => return None,
            };
            // The first error is the last item; the cursor is dropped with it.
            let next = if item.is_ok() { Some(documents) } else { None };
            Some((item, next))
        })
        .boxed()
    }

    /// Insert or replace `entity`, returning it with its store id set.
    pub async fn save(&self, mut entity: D::Entity) -> RepositoryResult<D::Entity> {
        let document = D::encode(&entity).map_err(|e| RepositoryError::Encode {
            collection: D::COLLECTION,
            reason: e.to_string(),
        })?;
        let id = self
            .collection
            .save(document)
            .await
            .map_err(RepositoryError::Write)?;
        D::set_id(&mut entity, id);
        Ok(entity)
    }

    /// Number of stored entities.
    pub async fn count(&self) -> RepositoryResult<u64> {
        self.collection.count().await.map_err(RepositoryError::Query)
    }
}

impl<D: NaturalKey> Repository<D> {
    /// The stored entity sharing `entity`'s natural key, if any.
    pub async fn find_by_natural_key(&self, entity: &D::Entity) -> RepositoryResult<Option<D::Entity>> {
        let key: Value = D::natural_key(entity);
        self.find_one(&Filter::eq(D::KEY_FIELD, key)).await
    }
}

impl<D: EntityDescriptor> fmt::Debug for Repository<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("database", &self.database())
            .field("collection", &D::COLLECTION)
            .field("fetch_size", &self.fetch_size)
            .finish()
    }
}

fn decode<D: EntityDescriptor>(document: crowd_store::Document) -> RepositoryResult<D::Entity> {
    D::decode(document).map_err(|e| {
        error!(collection = D::COLLECTION, error = %e, "document decode failed");
        RepositoryError::Decode {
            collection: D::COLLECTION,
            reason: e.to_string(),
        }
    })
}
