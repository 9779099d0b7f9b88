//! Core type definitions for livecopy.
//!
//! This crate defines the plain data shared by every layer of the
//! edit-buffering engine:
//! - Change and project identifiers
//! - Millisecond timestamps
//! - Change records (pending edits) and their persisted form
//! - The published snapshot a public site reads
//! - Classification of image references (durable URL vs. inline payload)
//!
//! No I/O happens here; stores, schedulers and publishers live in the
//! storage, blobstore and sync crates.

mod change;
mod ids;
mod reference;
mod snapshot;
mod timestamp;

pub use change::{ChangeKind, ChangeRecord, PersistedChange};
pub use ids::{ChangeId, ProjectId};
pub use reference::{
    ReferenceKind, append_query_param, classify_reference, is_durable_url, is_inline_payload,
};
pub use snapshot::{
    CAPTION_NAMESPACE, ContentBlock, LEGACY_CAPTION_PREFIX, PublishedSnapshot, caption_key,
    is_caption_key, is_legacy_caption_key,
};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid project id: {0:?}")]
    InvalidProjectId(String),

    #[error("unknown change kind: {0:?}")]
    UnknownKind(String),
}
