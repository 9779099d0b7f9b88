//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (local snapshot cache).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data read back from a store.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The remote store could not be reached or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A background storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("storage connection lock poisoned")]
    LockPoisoned,
}
