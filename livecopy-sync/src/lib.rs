//! Edit buffering, batch persistence and publish engine for livecopy.
//!
//! Editors change page text, images and content blocks in place. This crate
//! turns that stream of edits into durable, published content.
//!
//! # Architecture
//!
//! An [`EditSession`] owns everything for one project and one editing
//! session; nothing here is global.
//!
//! ## Components
//!
//! - **Queue**: buffers pending edits, one per `(kind, key)`, and drops
//!   keystroke-level noise
//! - **Scheduler**: debounces edits and throttles flushes
//! - **Batch**: persists a bounded slice of the queue concurrently
//! - **Watchdog**: declares a hung flush or sync stuck and resets state
//!   without discarding queued edits
//! - **Publisher**: merges persisted edits over the published baseline,
//!   promoting inline images to the blob store
//! - **View**: patches the rendered page in place after a publish
//!
//! ## Edit flow
//!
//! 1. **Enqueue**: `enqueue_edit` accepts or rejects the edit
//! 2. **Debounce**: a quiet period after the last edit triggers a flush
//! 3. **Throttle**: flushes closer than the throttle floor are deferred
//! 4. **Batch**: up to `batch_size` entries are upserted; the rest follow
//! 5. **Publish**: `trigger_sync` drains the queue and publishes
//!
//! # Example
//!
//! ```no_run
//! use livecopy_blobstore::MemoryBlobStore;
//! use livecopy_storage::MemoryStore;
//! use livecopy_sync::{EditSession, SyncConfig};
//! use livecopy_types::{ChangeKind, ProjectId};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = EditSession::builder(ProjectId::new("acme")?)
//!     .config(SyncConfig::default())
//!     .stores(Arc::new(MemoryStore::new()))
//!     .blobs(Arc::new(MemoryBlobStore::new("/assets")))
//!     .build()?;
//!
//! session.enqueue_edit(ChangeKind::Text, "hero_title", "Hello".into());
//! session.trigger_sync().await?;
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod batch;
mod config;
mod error;
pub mod events;
pub mod publish;
pub mod queue;
mod scheduler;
mod session;
pub mod state;
pub mod view;
mod watchdog;

pub use assets::{AssetPromoter, GcReport, InlinePayload};
pub use batch::{BatchFailure, BatchReport};
pub use config::{ChangePolicy, SyncConfig};
pub use error::{PromotionError, PublishError, PublishResult, SyncError, SyncResult};
pub use events::{EventBus, Notice, NoticeLevel, RefreshScope, SyncEvent};
pub use publish::{PromotionFailure, PublishReport, Publisher};
pub use queue::{EnqueueOutcome, PendingQueue};
pub use session::{EditSession, FlushReport, SessionBuilder, SyncOutcome};
pub use state::SyncState;
pub use view::{DocumentState, DocumentView, PatchSummary, TextNode, ViewPatch, ViewPatcher};

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
/// Every critical section here is a plain field update, so the data is
/// consistent even after a panic.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
