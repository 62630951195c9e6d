/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The server could not be reached or the connection parameters are
    /// unusable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed for user '{user}'")]
    Authentication { user: String },

    /// A read on a collection failed.
    #[error("query on '{collection}' failed: {reason}")]
    Query { collection: String, reason: String },

    /// A write to a collection failed.
    #[error("write to '{collection}' failed: {reason}")]
    Write { collection: String, reason: String },

    /// A write would store two documents with the same value in a unique
    /// field.
    #[error("duplicate key in '{collection}': {field} = {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    /// The document is malformed (e.g. an unparsable `_id`).
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    /// Returns `true` for errors raised while establishing a connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Authentication { .. })
    }

    /// Returns `true` for errors raised by a write.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Write { .. } | Self::DuplicateKey { .. } | Self::InvalidDocument(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
