//! Error types for the sync engine.

use livecopy_blobstore::{BlobStoreError, ValidationError};
use livecopy_storage::StorageError;
use thiserror::Error;

/// Result type for session operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for publishing.
pub type PublishResult<T> = Result<T, PublishError>;

/// Errors surfaced by an [`EditSession`](crate::EditSession).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The persistence store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Publishing failed before a snapshot was committed.
    #[error("{0}")]
    Publish(#[from] PublishError),

    /// The operation hung and was reset by the watchdog.
    #[error("sync took too long and was reset; your edits are safe")]
    Timeout,

    /// The background sync task panicked.
    #[error("sync task failed: {0}")]
    Task(String),

    /// The session was built without a required component.
    #[error("invalid session configuration: {0}")]
    Config(String),
}

/// Fatal publish failures. Nothing was written when one of these is returned.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not load saved changes: {0}")]
    LoadChanges(#[source] StorageError),

    #[error("could not load the published content: {0}")]
    LoadBaseline(#[source] StorageError),

    #[error("could not load captions: {0}")]
    LoadCaptions(#[source] StorageError),

    #[error("could not save the published content: {0}")]
    WriteSnapshot(#[source] StorageError),
}

/// Why a reference could not be turned into a durable URL.
#[derive(Debug, Error)]
pub enum PromotionError {
    /// The `data:` URL is not well formed.
    #[error("malformed inline image: {0}")]
    Malformed(String),

    /// The base64 body could not be decoded.
    #[error("inline image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded bytes were rejected.
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    /// The blob store refused or failed the upload.
    #[error("upload failed: {0}")]
    Upload(#[from] BlobStoreError),

    /// The reference is neither durable nor inline (for example a `blob:` URL).
    #[error("unsupported image reference: {0}")]
    Unsupported(String),
}
