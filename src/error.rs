//! Error taxonomy for the retrieval pipeline.
//!
//! Errors fall into four classes with different caller contracts:
//! configuration errors are fatal and surface at construction or first
//! use; backend errors (embedding service, database, search timeout) are
//! retryable by the caller, and this crate never loop-retries them
//! internally; not-found errors are a distinct class and must not be
//! conflated with backend failures; generation errors abort turn
//! recording but are not retried automatically.

use std::time::Duration;

/// What kind of entity a [`RagError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Document,
    Chunk,
    Chat,
}

impl NotFoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotFoundKind::Document => "document",
            NotFoundKind::Chunk => "chunk",
            NotFoundKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by the retrieval and context-assembly pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Invalid deployment configuration. Fatal; never coerced.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The embedding backend failed, returned malformed output, or timed
    /// out. Retryable by the caller; never retried internally.
    #[error("embedding backend: {0}")]
    EmbeddingBackend(String),

    /// A similarity search exceeded its deadline. Retryable.
    #[error("similarity search timed out after {0:?}")]
    SearchTimeout(Duration),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    /// A database operation failed. Retryable backend class.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The generator stream failed mid-flight. The turn is not recorded;
    /// retry policy belongs to the caller.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl RagError {
    pub fn not_found(kind: NotFoundKind, id: impl ToString) -> Self {
        RagError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingBackend(_) | RagError::SearchTimeout(_) | RagError::Database(_)
        )
    }
}

/// Result alias used across the crate.
pub type RagResult<T> = Result<T, RagError>;
