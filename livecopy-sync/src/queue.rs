//! The deduplicating pending queue.
//!
//! Holds at most one record per `(kind, key)`, in first-edit order. A newer
//! edit of a queued key replaces the record in place with a fresh
//! [`ChangeId`](livecopy_types::ChangeId), which is how the batch processor
//! tells that an entry was superseded while its write was in flight.

use crate::ChangePolicy;
use livecopy_types::{ChangeKind, ChangeRecord};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Result of offering a record to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended as a new entry; `dropped` older entries fell off the front.
    Queued { dropped: usize },
    /// Replaced the queued record for the same key.
    Replaced,
    /// Not different enough from the queued value.
    Rejected,
}

impl EnqueueOutcome {
    #[must_use]
    pub fn accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        match self {
            EnqueueOutcome::Queued { dropped } => *dropped,
            _ => 0,
        }
    }
}

/// Bounded queue of pending edits, unique by `(kind, key)`.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    entries: VecDeque<ChangeRecord>,
    max_size: usize,
    policy: ChangePolicy,
}

impl PendingQueue {
    /// Creates an empty queue holding at most `max_size` entries.
    pub fn new(max_size: usize, policy: ChangePolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
            policy,
        }
    }

    /// Offers a record.
    pub fn enqueue(&mut self, record: ChangeRecord) -> EnqueueOutcome {
        let existing = self.position(record.kind, &record.key);
        let previous = existing.map(|idx| &self.entries[idx].value);

        if !self.policy.is_meaningful(record.kind, previous, &record.value) {
            debug!("Ignoring minor {} edit for {}", record.kind, record.key);
            return EnqueueOutcome::Rejected;
        }

        if let Some(idx) = existing {
            self.entries[idx] = record;
            return EnqueueOutcome::Replaced;
        }

        self.entries.push_back(record);
        let mut dropped = 0;
        while self.entries.len() > self.max_size {
            if let Some(old) = self.entries.pop_front() {
                warn!("Pending queue full, dropping oldest edit for {}", old.key);
                dropped += 1;
            }
        }
        EnqueueOutcome::Queued { dropped }
    }

    fn position(&self, kind: ChangeKind, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|r| r.kind == kind && r.key == key)
    }

    /// The queued record for `(kind, key)`.
    pub fn get(&self, kind: ChangeKind, key: &str) -> Option<&ChangeRecord> {
        self.position(kind, key).map(|idx| &self.entries[idx])
    }

    /// Clones up to `n` records from the front.
    pub fn front(&self, n: usize) -> Vec<ChangeRecord> {
        self.entries.iter().take(n).cloned().collect()
    }

    /// Removes the queued record for `record`'s key if it is still the same
    /// record. Returns false if it was superseded or is gone.
    pub fn confirm(&mut self, record: &ChangeRecord) -> bool {
        match self.position(record.kind, &record.key) {
            Some(idx) if self.entries[idx].id == record.id => {
                self.entries.remove(idx);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.entries.iter()
    }
}
