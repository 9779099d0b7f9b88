//! Error types for blob storage.

use thiserror::Error;

/// Result type for blob store operations.
pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// Why an upload was refused before reaching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("asset is empty")]
    Empty,

    #[error("asset is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("content type {0:?} is not an allowed image type")]
    DisallowedType(String),

    #[error("content does not look like a {0} image")]
    ContentMismatch(String),
}

/// Errors that can occur in blob store operations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// Upload refused by validation.
    #[error("invalid asset: {0}")]
    Invalid(#[from] ValidationError),

    /// Path is absolute, empty, or escapes the store.
    #[error("invalid blob path: {0:?}")]
    InvalidPath(String),

    /// URL does not belong to this store.
    #[error("foreign blob url: {0}")]
    ForeignUrl(String),

    /// Blob not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// IO error (filesystem store).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend refused the request.
    #[error("storage error: {0}")]
    Storage(String),
}
