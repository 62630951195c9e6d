use std::fmt;

use crowd_repository::RepositoryError;

/// Errors carried by pipeline streams.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The stage configuration value could not be parsed.
    #[error("invalid options for stage '{stage}': {reason}")]
    Options { stage: String, reason: String },

    /// A repository operation failed: connecting, decoding, or writing.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// An error raised by a pipeline source outside any stage.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl PipelineError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_connection())
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_decode())
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_write())
    }
}

impl PartialEq for PipelineError {
    fn eq(&self, other: &Self) -> bool {
        // Compare by display representation for test convenience.
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

impl Eq for PipelineError {}

/// Result alias for pipeline operations and stream items.
pub type PipelineResult<T> = Result<T, PipelineError>;
