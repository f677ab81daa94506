//! Error types for the tackle analysis hub.

use thiserror::Error;

/// Result type alias using the hub's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tackle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Owning analysis not found
    #[error("Analysis not found: {0}")]
    AnalysisNotFound(i64),

    /// Run (execution) not found
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    /// Graph merge failed; the whole merge transaction was aborted
    #[error("Merge error: {0}")]
    Merge(String),

    /// Message queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two kind declarations claim the same type tag
    #[error("Type tag '{tag}' declared by '{duplicate}' is already registered by '{existing}'")]
    DuplicateTypeTag {
        tag: String,
        existing: String,
        duplicate: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored state does not allow the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error signals a missing resource rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::AnalysisNotFound(_) | Error::RunNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
