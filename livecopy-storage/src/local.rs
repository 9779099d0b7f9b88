//! Local snapshot cache and the fallback snapshot store built on it.
//!
//! The public site must keep rendering the last published state even when
//! the remote snapshot store is unreachable, so every successful read and
//! write is mirrored to a JSON file per project.

use crate::{SnapshotStore, StorageError, StorageResult};
use async_trait::async_trait;
use livecopy_types::{ProjectId, PublishedSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// One JSON file per project under a directory.
#[derive(Debug, Clone)]
pub struct LocalSnapshotCache {
    dir: PathBuf,
}

impl LocalSnapshotCache {
    /// Creates a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, project: &ProjectId) -> PathBuf {
        self.dir.join(format!("{}.json", project.as_str()))
    }

    /// Reads the cached snapshot, if any.
    pub async fn read(&self, project: &ProjectId) -> StorageResult<Option<PublishedSnapshot>> {
        let path = self.path_for(project);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the snapshot through a temp file so readers never see a
    /// partial document.
    pub async fn write(&self, snapshot: &PublishedSnapshot) -> StorageResult<()> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            info!("Created local snapshot cache: {:?}", self.dir);
        }
        let path = self.path_for(&snapshot.project_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Cached snapshot for {} at {:?}", snapshot.project_id, path);
        Ok(())
    }
}

/// A snapshot store that falls back to a local cache when the primary store
/// cannot be read.
///
/// Reads that succeed refresh the cache. Writes go to the primary store
/// first (its failure is the caller's failure) and are then mirrored to the
/// cache on a best-effort basis.
pub struct FallbackSnapshotStore {
    primary: Arc<dyn SnapshotStore>,
    cache: LocalSnapshotCache,
}

impl FallbackSnapshotStore {
    /// Wraps `primary` with `cache`.
    pub fn new(primary: Arc<dyn SnapshotStore>, cache: LocalSnapshotCache) -> Self {
        Self { primary, cache }
    }

    /// The local cache.
    pub fn cache(&self) -> &LocalSnapshotCache {
        &self.cache
    }
}

#[async_trait]
impl SnapshotStore for FallbackSnapshotStore {
    async fn upsert_snapshot(&self, snapshot: &PublishedSnapshot) -> StorageResult<()> {
        self.primary.upsert_snapshot(snapshot).await?;
        if let Err(e) = self.cache.write(snapshot).await {
            warn!("Failed to mirror snapshot for {} locally: {}", snapshot.project_id, e);
        }
        Ok(())
    }

    async fn get_snapshot(&self, project: &ProjectId) -> StorageResult<Option<PublishedSnapshot>> {
        match self.primary.get_snapshot(project).await {
            Ok(Some(snapshot)) => {
                if let Err(e) = self.cache.write(&snapshot).await {
                    warn!("Failed to refresh local snapshot for {}: {}", project, e);
                }
                Ok(Some(snapshot))
            }
            Ok(None) => Ok(None),
            Err(primary_err) => {
                warn!(
                    "Snapshot read for {} failed, trying local cache: {}",
                    project, primary_err
                );
                match self.cache.read(project).await {
                    Ok(Some(snapshot)) => Ok(Some(snapshot)),
                    // No cached copy means the baseline is unknown.
                    Ok(None) => Err(primary_err),
                    Err(cache_err) => Err(StorageError::Unavailable(format!(
                        "{primary_err}; local cache: {cache_err}"
                    ))),
                }
            }
        }
    }
}
