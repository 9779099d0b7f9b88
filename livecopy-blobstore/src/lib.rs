//! Project-scoped image asset storage for livecopy.
//!
//! Publishing turns inline image payloads into stored objects with public
//! URLs. This crate provides the [`BlobStore`] contract the publisher talks
//! to, the image validation every upload passes through, and two adapters:
//!
//! - [`MemoryBlobStore`] for tests and previews
//! - [`FsBlobStore`] writing files under a directory served at a public base URL
//!
//! Paths are always `<project>/<name>`, so a project's assets can be listed
//! and garbage-collected by prefix.

mod error;
mod fs;
mod memory;
mod path;
mod store;
mod validate;

pub use error::{BlobStoreError, BlobStoreResult, ValidationError};
pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, StoredBlob};
pub use path::{BlobUrls, validate_path};
pub use store::BlobStore;
pub use validate::{AssetPolicy, ImageFormat};
