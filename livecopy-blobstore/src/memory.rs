//! In-memory blob store.

use crate::{AssetPolicy, BlobStore, BlobStoreError, BlobStoreResult, BlobUrls, validate_path};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct Inner {
    blobs: BTreeMap<String, StoredBlob>,
    fail_puts: bool,
    fail_deletes: bool,
    deleted: Vec<String>,
}

/// Keeps blobs in a map; URLs are `<base>/<path>`.
pub struct MemoryBlobStore {
    urls: BlobUrls,
    policy: AssetPolicy,
    inner: RwLock<Inner>,
}

impl MemoryBlobStore {
    /// Creates a store serving blobs under `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_policy(base, AssetPolicy::default())
    }

    /// Creates a store with a custom upload policy.
    pub fn with_policy(base: impl Into<String>, policy: AssetPolicy) -> Self {
        Self {
            urls: BlobUrls::new(base),
            policy,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Reads a blob by path.
    pub async fn get(&self, path: &str) -> Option<StoredBlob> {
        self.inner.read().await.blobs.get(path).cloned()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.blobs.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.blobs.is_empty()
    }

    /// URLs deleted so far, in order.
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.read().await.deleted.clone()
    }

    /// Makes every `put` fail.
    pub async fn set_fail_puts(&self, fail: bool) {
        self.inner.write().await.fail_puts = fail;
    }

    /// Makes every `delete` fail.
    pub async fn set_fail_deletes(&self, fail: bool) {
        self.inner.write().await.fail_deletes = fail;
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> BlobStoreResult<String> {
        validate_path(path)?;
        let format = self.policy.validate(bytes, content_type)?;

        let mut inner = self.inner.write().await;
        if inner.fail_puts {
            return Err(BlobStoreError::Storage("upload rejected".into()));
        }
        inner.blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: format.mime().to_string(),
            },
        );
        debug!("Stored {} bytes at {}", bytes.len(), path);
        Ok(self.urls.url_for(path))
    }

    async fn delete(&self, url: &str) -> BlobStoreResult<()> {
        let path = self
            .urls
            .path_of(url)
            .ok_or_else(|| BlobStoreError::ForeignUrl(url.to_string()))?;
        let mut inner = self.inner.write().await;
        if inner.fail_deletes {
            return Err(BlobStoreError::Storage("delete rejected".into()));
        }
        inner
            .blobs
            .remove(&path)
            .ok_or_else(|| BlobStoreError::NotFound(path.clone()))?;
        inner.deleted.push(url.to_string());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BlobStoreResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .blobs
            .keys()
            .filter(|p| p.starts_with(prefix))
            .map(|p| self.urls.url_for(p))
            .collect())
    }

    fn owns(&self, url: &str) -> bool {
        self.urls.owns(url)
    }
}
