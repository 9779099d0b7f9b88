//! Batch persistence of queued edits.

use crate::{PendingQueue, lock};
use futures::future::join_all;
use livecopy_storage::ChangeStore;
use livecopy_types::{ChangeKind, PersistedChange, ProjectId};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// An upsert that failed; the entry stays queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub kind: ChangeKind,
    pub key: String,
    pub reason: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries taken from the queue.
    pub attempted: usize,
    /// Upserts that succeeded.
    pub persisted: usize,
    /// Successful upserts whose entry was edited again meanwhile and so stays
    /// queued with the newer value.
    pub superseded: usize,
    /// Upserts that failed.
    pub failed: Vec<BatchFailure>,
    /// Queue length after the batch.
    pub remaining: usize,
}

impl BatchReport {
    /// True if at least one write landed.
    #[must_use]
    pub fn made_progress(&self) -> bool {
        self.persisted > 0
    }
}

/// Upserts up to `batch_size` entries from the front of the queue
/// concurrently, then removes the ones that landed and were not superseded.
///
/// The queue lock is only held while taking and confirming entries, never
/// across the store calls.
pub async fn persist_batch(
    project: &ProjectId,
    queue: &Mutex<PendingQueue>,
    store: &dyn ChangeStore,
    batch_size: usize,
) -> BatchReport {
    let batch = lock(queue).front(batch_size.max(1));
    if batch.is_empty() {
        return BatchReport::default();
    }
    debug!("Persisting batch of {} edits for {}", batch.len(), project);

    let writes = batch.iter().map(|record| {
        let change = PersistedChange::from_record(project, record);
        async move { store.upsert_change(&change).await }
    });
    let results = join_all(writes).await;

    let mut report = BatchReport {
        attempted: batch.len(),
        ..BatchReport::default()
    };
    let mut queue = lock(queue);
    for (record, result) in batch.iter().zip(results) {
        match result {
            Ok(()) => {
                report.persisted += 1;
                if !queue.confirm(record) {
                    debug!("{} {} was edited during its write, keeping newer value", record.kind, record.key);
                    report.superseded += 1;
                }
            }
            Err(e) => {
                warn!("Failed to persist {} {}: {}", record.kind, record.key, e);
                report.failed.push(BatchFailure {
                    kind: record.kind,
                    key: record.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report.remaining = queue.len();

    info!(
        "Persisted {}/{} edits for {} ({} remaining)",
        report.persisted, report.attempted, project, report.remaining
    );
    report
}
