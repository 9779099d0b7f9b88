//! In-memory stores.
//!
//! Used by tests and by editors running without a backend. Besides the three
//! store contracts, [`MemoryStore`] records every upsert it receives and can
//! be told to fail or hang specific operations.

use crate::{CaptionStore, ChangeStore, SnapshotStore, StorageError, StorageResult};
use async_trait::async_trait;
use livecopy_types::{ChangeKind, PersistedChange, ProjectId, PublishedSnapshot};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

type ChangeKey = (ProjectId, ChangeKind, String);

#[derive(Default)]
struct Inner {
    changes: BTreeMap<ChangeKey, PersistedChange>,
    snapshots: HashMap<ProjectId, PublishedSnapshot>,
    captions: BTreeMap<(ProjectId, String), String>,
    upsert_log: Vec<PersistedChange>,
    upsert_attempts: usize,
    failing_keys: HashSet<String>,
    fail_change_reads: bool,
    fail_snapshot_reads: bool,
    fail_snapshot_writes: bool,
    hang_upserts: bool,
    upsert_delay: Option<Duration>,
}

/// In-memory implementation of every store contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    release: Notify,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Every successful change upsert, in the order they landed.
    pub async fn upsert_log(&self) -> Vec<PersistedChange> {
        self.inner.read().await.upsert_log.clone()
    }

    /// Number of upsert calls received, including failed and hung ones.
    pub async fn upsert_attempts(&self) -> usize {
        self.inner.read().await.upsert_attempts
    }

    /// Number of persisted rows across all projects.
    pub async fn change_count(&self) -> usize {
        self.inner.read().await.changes.len()
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Makes upserts for `key` fail until cleared.
    pub async fn fail_upserts_for(&self, key: impl Into<String>) {
        self.inner.write().await.failing_keys.insert(key.into());
    }

    /// Clears all per-key upsert failures.
    pub async fn clear_upsert_failures(&self) {
        self.inner.write().await.failing_keys.clear();
    }

    /// Makes `list_changes` and `exists` fail.
    pub async fn set_fail_change_reads(&self, fail: bool) {
        self.inner.write().await.fail_change_reads = fail;
    }

    /// Makes `get_snapshot` fail.
    pub async fn set_fail_snapshot_reads(&self, fail: bool) {
        self.inner.write().await.fail_snapshot_reads = fail;
    }

    /// Makes `upsert_snapshot` fail.
    pub async fn set_fail_snapshot_writes(&self, fail: bool) {
        self.inner.write().await.fail_snapshot_writes = fail;
    }

    /// Makes change upserts block until hanging is switched off again.
    pub async fn set_hang_upserts(&self, hang: bool) {
        self.inner.write().await.hang_upserts = hang;
        if !hang {
            self.release.notify_waiters();
        }
    }

    /// Delays every change upsert by `delay`.
    pub async fn set_upsert_delay(&self, delay: Option<Duration>) {
        self.inner.write().await.upsert_delay = delay;
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    async fn upsert_change(&self, change: &PersistedChange) -> StorageResult<()> {
        let (hang, delay, fail) = {
            let mut inner = self.inner.write().await;
            inner.upsert_attempts += 1;
            (
                inner.hang_upserts,
                inner.upsert_delay,
                inner.failing_keys.contains(&change.key),
            )
        };

        if hang {
            debug!("Holding upsert for {} until released", change.key);
            loop {
                let released = self.release.notified();
                if !self.inner.read().await.hang_upserts {
                    break;
                }
                released.await;
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StorageError::Unavailable(format!(
                "upsert rejected for key {}",
                change.key
            )));
        }

        let mut inner = self.inner.write().await;
        let key = (change.project.clone(), change.kind, change.key.clone());
        inner.changes.insert(key, change.clone());
        inner.upsert_log.push(change.clone());
        Ok(())
    }

    async fn list_changes(&self, project: &ProjectId) -> StorageResult<Vec<PersistedChange>> {
        let inner = self.inner.read().await;
        if inner.fail_change_reads {
            return Err(StorageError::Unavailable("change listing failed".into()));
        }
        Ok(inner
            .changes
            .values()
            .filter(|c| &c.project == project)
            .cloned()
            .collect())
    }

    async fn exists(&self, project: &ProjectId) -> StorageResult<bool> {
        let inner = self.inner.read().await;
        if inner.fail_change_reads {
            return Err(StorageError::Unavailable("change lookup failed".into()));
        }
        Ok(inner.changes.keys().any(|(p, _, _)| p == project))
    }

    async fn delete_all(&self, project: &ProjectId) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.changes.len();
        inner.changes.retain(|(p, _, _), _| p != project);
        Ok(before - inner.changes.len())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn upsert_snapshot(&self, snapshot: &PublishedSnapshot) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.fail_snapshot_writes {
            return Err(StorageError::Unavailable("snapshot write failed".into()));
        }
        inner
            .snapshots
            .insert(snapshot.project_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, project: &ProjectId) -> StorageResult<Option<PublishedSnapshot>> {
        let inner = self.inner.read().await;
        if inner.fail_snapshot_reads {
            return Err(StorageError::Unavailable("snapshot read failed".into()));
        }
        Ok(inner.snapshots.get(project).cloned())
    }
}

#[async_trait]
impl CaptionStore for MemoryStore {
    async fn set_caption(
        &self,
        project: &ProjectId,
        image_key: &str,
        caption: &str,
    ) -> StorageResult<()> {
        self.inner
            .write()
            .await
            .captions
            .insert((project.clone(), image_key.to_string()), caption.to_string());
        Ok(())
    }

    async fn list_captions(&self, project: &ProjectId) -> StorageResult<BTreeMap<String, String>> {
        Ok(self
            .inner
            .read()
            .await
            .captions
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_captions(&self, project: &ProjectId) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.captions.len();
        inner.captions.retain(|(p, _), _| p != project);
        Ok(before - inner.captions.len())
    }
}
