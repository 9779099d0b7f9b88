//! Blob paths and their public URLs.

use crate::{BlobStoreError, BlobStoreResult};

/// Checks that `path` is a relative, non-empty path of plain segments.
pub fn validate_path(path: &str) -> BlobStoreResult<()> {
    let ok = !path.is_empty()
        && !path.starts_with('/')
        && path.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if ok {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidPath(path.to_string()))
    }
}

/// Maps blob paths to public URLs under a base and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUrls {
    base: String,
}

impl BlobUrls {
    /// `base` is either absolute (`https://cdn.example.com/assets`) or
    /// root-relative (`/assets`). A trailing slash is ignored.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// The normalized base.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Public URL of a path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// The path behind a URL of this store. Query strings and fragments
    /// (e.g. cache busters) are ignored.
    pub fn path_of(&self, url: &str) -> Option<String> {
        let url = url.split(['?', '#']).next().unwrap_or(url);
        let rest = url.strip_prefix(&self.base)?.strip_prefix('/')?;
        validate_path(rest).ok()?;
        Some(rest.to_string())
    }

    /// Returns true if `url` points into this store.
    pub fn owns(&self, url: &str) -> bool {
        self.path_of(url).is_some()
    }
}
