//! Filesystem blob store.
//!
//! Blobs are plain files under a root directory that a web server exposes at
//! the public base URL.

use crate::{AssetPolicy, BlobStore, BlobStoreError, BlobStoreResult, BlobUrls, validate_path};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

/// Distinguishes concurrent writes of the same path.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stores blobs as files under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    urls: BlobUrls,
    policy: AssetPolicy,
}

impl FsBlobStore {
    /// Creates a store writing under `root`, served at `public_base`.
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self::with_policy(root, public_base, AssetPolicy::default())
    }

    /// Creates a store with a custom upload policy.
    pub fn with_policy(
        root: impl Into<PathBuf>,
        public_base: impl Into<String>,
        policy: AssetPolicy,
    ) -> Self {
        Self {
            root: root.into(),
            urls: BlobUrls::new(public_base),
            policy,
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    async fn walk(&self, dir: PathBuf, rel: String, out: &mut Vec<String>) -> BlobStoreResult<()> {
        let mut stack = vec![(dir, rel)];
        while let Some((dir, rel)) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let child = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    stack.push((entry.path(), child));
                } else {
                    out.push(child);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> BlobStoreResult<String> {
        validate_path(path)?;
        self.policy.validate(bytes, content_type)?;

        let file = self.file_for(path);
        if let Some(parent) = file.parent() {
            if !fs::try_exists(parent).await? {
                fs::create_dir_all(parent).await?;
                info!("Created asset directory: {:?}", parent);
            }
        }
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = file.with_extension(format!("{}-{seq}.partial", std::process::id()));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &file).await?;
        debug!("Wrote {} bytes to {:?}", bytes.len(), file);
        Ok(self.urls.url_for(path))
    }

    async fn delete(&self, url: &str) -> BlobStoreResult<()> {
        let path = self
            .urls
            .path_of(url)
            .ok_or_else(|| BlobStoreError::ForeignUrl(url.to_string()))?;
        match fs::remove_file(self.file_for(&path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobStoreError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> BlobStoreResult<Vec<String>> {
        let mut paths = Vec::new();
        self.walk(self.root.clone(), String::new(), &mut paths).await?;
        paths.retain(|p| p.starts_with(prefix) && !p.ends_with(".partial"));
        paths.sort();
        Ok(paths.into_iter().map(|p| self.urls.url_for(&p)).collect())
    }

    fn owns(&self, url: &str) -> bool {
        self.urls.owns(url)
    }
}
