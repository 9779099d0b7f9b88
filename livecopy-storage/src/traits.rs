//! Store contracts consumed by the sync engine.

use crate::StorageResult;
use async_trait::async_trait;
use livecopy_types::{PersistedChange, ProjectId, PublishedSnapshot};
use std::collections::BTreeMap;

/// Durable store of dev-mode edits.
///
/// # Conflict resolution
///
/// Rows are unique on `(project, kind, key)`. [`ChangeStore::upsert_change`]
/// overwrites any existing row for the same identity, so when two writers
/// race on one key the last upsert to land wins. The session relies on this:
/// it never reads a row back before writing it.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Inserts or overwrites the row for `(change.project, change.kind, change.key)`.
    async fn upsert_change(&self, change: &PersistedChange) -> StorageResult<()>;

    /// Lists every persisted change for a project.
    async fn list_changes(&self, project: &ProjectId) -> StorageResult<Vec<PersistedChange>>;

    /// Returns true if the project has at least one persisted change.
    async fn exists(&self, project: &ProjectId) -> StorageResult<bool>;

    /// Deletes every persisted change for a project, returning the count.
    async fn delete_all(&self, project: &ProjectId) -> StorageResult<usize>;
}

/// Store of published snapshots, one per project.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Writes the snapshot, replacing the previous one wholesale.
    async fn upsert_snapshot(&self, snapshot: &PublishedSnapshot) -> StorageResult<()>;

    /// Reads the current snapshot, if the project was ever published.
    async fn get_snapshot(&self, project: &ProjectId) -> StorageResult<Option<PublishedSnapshot>>;
}

/// Isolated store of image captions, keyed by the image's original reference.
#[async_trait]
pub trait CaptionStore: Send + Sync {
    /// Sets (or overwrites) the caption for an image.
    async fn set_caption(
        &self,
        project: &ProjectId,
        image_key: &str,
        caption: &str,
    ) -> StorageResult<()>;

    /// Lists every caption of a project by image key.
    async fn list_captions(&self, project: &ProjectId) -> StorageResult<BTreeMap<String, String>>;

    /// Deletes every caption of a project, returning the count.
    async fn delete_captions(&self, project: &ProjectId) -> StorageResult<usize>;
}
