//! The blob store contract.

use crate::BlobStoreResult;
use async_trait::async_trait;

/// Storage of image assets addressed by path, served at public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Validates and stores `bytes` at `path`, returning its public URL.
    /// An existing blob at the same path is replaced.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> BlobStoreResult<String>;

    /// Deletes the blob behind a public URL previously returned by `put`.
    async fn delete(&self, url: &str) -> BlobStoreResult<()>;

    /// Lists the public URLs of every blob whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> BlobStoreResult<Vec<String>>;

    /// Returns true if `url` points into this store.
    fn owns(&self, url: &str) -> bool;
}
