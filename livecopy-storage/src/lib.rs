//! Storage layer for livecopy.
//!
//! Three stores back the edit-buffering engine:
//!
//! - [`ChangeStore`]: persisted dev-mode edits, one row per
//!   `(project, kind, key)` with last-write-wins upserts
//! - [`SnapshotStore`]: the published snapshot, one per project
//! - [`CaptionStore`]: image captions, kept apart from text edits so caption
//!   keys can never collide with ordinary text keys
//!
//! # Adapters
//!
//! - [`MemoryStore`] implements all three in memory, with switches for
//!   injecting failures and hangs in tests
//! - [`SqliteStore`] implements all three on a single SQLite database
//! - [`FallbackSnapshotStore`] wraps any snapshot store with a
//!   [`LocalSnapshotCache`] read when the primary store is unreachable

mod error;
mod local;
mod memory;
mod sqlite;
mod traits;

pub use error::{StorageError, StorageResult};
pub use local::{FallbackSnapshotStore, LocalSnapshotCache};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CaptionStore, ChangeStore, SnapshotStore};
