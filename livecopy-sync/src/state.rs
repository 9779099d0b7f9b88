//! Observable session state.

use livecopy_types::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// A point-in-time view of a session, cheap to clone and send to a UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// A manual sync is running.
    pub is_syncing: bool,
    /// The queue holds edits not yet persisted.
    pub has_queued_changes: bool,
    /// When a batch last persisted anything.
    pub last_sync_time: Option<Timestamp>,
    /// Number of queued edits.
    pub pending_changes: usize,
    /// The watchdog fired and the session has not recovered yet.
    pub is_stuck: bool,
}

/// Lock-free backing store for [`SyncState`].
///
/// `sync_owner` and `batch_owner` hold the generation of the operation that
/// currently owns them, or 0. Releasing compares against the caller's
/// generation, so an operation abandoned by the watchdog cannot release a
/// newer one.
#[derive(Debug, Default)]
pub(crate) struct SyncStatus {
    sync_owner: AtomicU64,
    batch_owner: AtomicU64,
    generation: AtomicU64,
    pending: AtomicUsize,
    last_sync_ms: AtomicU64,
    stuck: AtomicBool,
}

impl SyncStatus {
    /// A fresh generation number, never 0.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> SyncState {
        let pending = self.pending.load(Ordering::Acquire);
        let last = self.last_sync_ms.load(Ordering::Acquire);
        SyncState {
            is_syncing: self.sync_owner.load(Ordering::Acquire) != 0,
            has_queued_changes: pending > 0,
            last_sync_time: (last != 0).then(|| Timestamp::from_millis(last)),
            pending_changes: pending,
            is_stuck: self.stuck.load(Ordering::Acquire),
        }
    }

    // ── Manual sync ──────────────────────────────────────────────

    pub fn try_begin_sync(&self, generation: u64) -> bool {
        self.sync_owner
            .compare_exchange(0, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the sync flag if `generation` still owns it.
    pub fn end_sync(&self, generation: u64) -> bool {
        self.sync_owner
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn owns_sync(&self, generation: u64) -> bool {
        self.sync_owner.load(Ordering::Acquire) == generation
    }

    // ── Batches ──────────────────────────────────────────────────

    pub fn try_begin_batch(&self, generation: u64) -> bool {
        self.batch_owner
            .compare_exchange(0, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the batch guard if `generation` still owns it.
    pub fn end_batch(&self, generation: u64) -> bool {
        self.batch_owner
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn owns_batch(&self, generation: u64) -> bool {
        self.batch_owner.load(Ordering::Acquire) == generation
    }

    // ── Flags ────────────────────────────────────────────────────

    pub fn set_pending(&self, pending: usize) {
        self.pending.store(pending, Ordering::Release);
    }

    pub fn mark_synced(&self, at: Timestamp) {
        self.last_sync_ms.store(at.as_millis(), Ordering::Release);
    }

    pub fn set_stuck(&self, stuck: bool) {
        self.stuck.store(stuck, Ordering::Release);
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.load(Ordering::Acquire)
    }

    /// Clears both in-flight flags unconditionally.
    pub fn clear_in_flight(&self) {
        self.sync_owner.store(0, Ordering::Release);
        self.batch_owner.store(0, Ordering::Release);
    }
}
