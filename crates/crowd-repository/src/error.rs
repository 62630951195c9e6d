use crowd_store::StoreError;

/// Errors produced by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The store could not be reached, or the collection could not be
    /// prepared, while building the repository.
    #[error("connection error: {0}")]
    Connection(#[source] StoreError),

    /// A stored document does not map to the entity type.
    #[error("cannot decode {collection} document: {reason}")]
    Decode {
        collection: &'static str,
        reason: String,
    },

    /// An entity could not be turned into a document.
    #[error("cannot encode {collection} entity: {reason}")]
    Encode {
        collection: &'static str,
        reason: String,
    },

    /// A read failed.
    #[error("query error: {0}")]
    Query(#[source] StoreError),

    /// A write failed.
    #[error("write error: {0}")]
    Write(#[source] StoreError),
}

impl RepositoryError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_) | Self::Encode { .. })
    }
}

/// Result alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
