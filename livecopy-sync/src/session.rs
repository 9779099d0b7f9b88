//! The caller-facing edit session.
//!
//! An [`EditSession`] owns the queue, timers, watchdog state and publisher
//! for one project. Timer tasks only hold a `Weak` reference to the session,
//! so dropping the last handle stops all scheduling.

use crate::assets::AssetPromoter;
use crate::batch::{BatchFailure, BatchReport, persist_batch};
use crate::events::{EventBus, Notice, RefreshScope, SyncEvent};
use crate::publish::{PublishReport, Publisher};
use crate::scheduler::Scheduler;
use crate::state::{SyncState, SyncStatus};
use crate::view::ViewPatcher;
use crate::watchdog::{self, Guarded, WatchdogGuard};
use crate::{PendingQueue, SyncConfig, SyncError, SyncResult, lock};
use futures::FutureExt;
use futures::future::BoxFuture;
use livecopy_blobstore::BlobStore;
use livecopy_storage::{CaptionStore, ChangeStore, SnapshotStore};
use livecopy_types::{ChangeKind, ChangeRecord, ProjectId, Timestamp};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

/// How often a drain re-checks a batch that another task has in flight.
const IN_FLIGHT_POLL: Duration = Duration::from_millis(50);

/// Result of [`EditSession::trigger_sync`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The session was stuck and has been reset; nothing was published.
    Reset,
    /// Another sync is running.
    AlreadySyncing,
    /// No persisted changes exist for the project.
    NothingToPublish,
    /// A new snapshot was committed.
    Published(PublishReport),
}

/// Result of draining the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batches: usize,
    pub persisted: usize,
    /// Failures from the last batch.
    pub failed: Vec<BatchFailure>,
    /// Edits still queued afterwards.
    pub remaining: usize,
    /// The drain was abandoned because its sync was reset.
    pub abandoned: bool,
}

/// Builds an [`EditSession`].
pub struct SessionBuilder {
    project: ProjectId,
    config: SyncConfig,
    changes: Option<Arc<dyn ChangeStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    captions: Option<Arc<dyn CaptionStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    view: Option<Arc<dyn ViewPatcher>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn changes(mut self, store: Arc<dyn ChangeStore>) -> Self {
        self.changes = Some(store);
        self
    }

    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn captions(mut self, store: Arc<dyn CaptionStore>) -> Self {
        self.captions = Some(store);
        self
    }

    /// Uses one store for changes, snapshots and captions.
    pub fn stores<S>(self, store: Arc<S>) -> Self
    where
        S: ChangeStore + SnapshotStore + CaptionStore + 'static,
    {
        let changes: Arc<dyn ChangeStore> = store.clone();
        let snapshots: Arc<dyn SnapshotStore> = store.clone();
        let captions: Arc<dyn CaptionStore> = store;
        self.changes(changes).snapshots(snapshots).captions(captions)
    }

    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Patches `view` after every publish.
    pub fn view(mut self, view: Arc<dyn ViewPatcher>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn build(self) -> SyncResult<EditSession> {
        let missing = |what: &str| SyncError::Config(format!("no {what} store configured"));
        let changes = self.changes.ok_or_else(|| missing("change"))?;
        let snapshots = self.snapshots.ok_or_else(|| missing("snapshot"))?;
        let captions = self.captions.ok_or_else(|| missing("caption"))?;
        let blobs = self.blobs.ok_or_else(|| missing("blob"))?;

        let events = EventBus::new(self.config.event_capacity);
        let assets = AssetPromoter::new(blobs, self.config.asset_policy.clone());
        let mut publisher = Publisher::new(Arc::clone(&changes), snapshots, captions, assets)
            .with_events(events.clone());
        if let Some(view) = self.view {
            publisher = publisher.with_view(view);
        }

        info!("Starting edit session for {}", self.project);
        Ok(EditSession {
            inner: Arc::new(SessionInner {
                queue: Mutex::new(PendingQueue::new(
                    self.config.max_queue_size,
                    self.config.change_policy.clone(),
                )),
                scheduler: Scheduler::new(self.config.throttle()),
                status: SyncStatus::default(),
                sync_abandoned: Notify::new(),
                project: self.project,
                config: self.config,
                changes,
                publisher,
                events,
            }),
        })
    }
}

/// One editing session for one project.
pub struct EditSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    project: ProjectId,
    config: SyncConfig,
    queue: Mutex<PendingQueue>,
    status: SyncStatus,
    scheduler: Scheduler,
    sync_abandoned: Notify,
    changes: Arc<dyn ChangeStore>,
    publisher: Publisher,
    events: EventBus,
}

impl EditSession {
    pub fn builder(project: ProjectId) -> SessionBuilder {
        SessionBuilder {
            project,
            config: SyncConfig::default(),
            changes: None,
            snapshots: None,
            captions: None,
            blobs: None,
            view: None,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.inner.project
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        self.inner.status.snapshot()
    }

    /// Registers an observer for session and publish events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    /// A copy of the queued edits, oldest first.
    pub fn pending(&self) -> Vec<ChangeRecord> {
        lock(&self.inner.queue).iter().cloned().collect()
    }

    /// Queues an edit and restarts the debounce timer.
    ///
    /// Returns false if the edit was not different enough from the queued
    /// value for the same key. Must be called from within a Tokio runtime.
    pub fn enqueue_edit(&self, kind: ChangeKind, key: impl Into<String>, value: Value) -> bool {
        let inner = &self.inner;
        let record = ChangeRecord::new(kind, key, value);
        let (outcome, pending) = {
            let mut queue = lock(&inner.queue);
            let outcome = queue.enqueue(record);
            (outcome, queue.len())
        };
        if !outcome.accepted() {
            return false;
        }

        inner.status.set_pending(pending);
        if outcome.dropped() > 0 {
            inner.events.notice(Notice::warning(format!(
                "Too many unsaved edits; the {} oldest were discarded",
                outcome.dropped()
            )));
        }
        inner.emit_state();
        inner.scheduler.debounce(inner.config.debounce(), inner.flush_task());
        true
    }

    /// Saves everything queued and publishes.
    pub async fn trigger_sync(&self) -> SyncResult<SyncOutcome> {
        let inner = &self.inner;
        if inner.status.is_stuck() {
            self.force_reset();
            inner
                .events
                .notice(Notice::info("Sync was reset. Your edits are safe; sync again to publish."));
            return Ok(SyncOutcome::Reset);
        }

        let generation = inner.status.next_generation();
        if !inner.status.try_begin_sync(generation) {
            inner.events.notice(Notice::info("A sync is already in progress"));
            return Ok(SyncOutcome::AlreadySyncing);
        }

        let abandoned = inner.sync_abandoned.notified();
        tokio::pin!(abandoned);
        abandoned.as_mut().enable();
        let _guard = SyncGuard {
            inner: Arc::clone(inner),
            generation,
            _watchdog: watchdog::arm(
                inner.config.stuck_timeout(),
                generation,
                inner.stuck_task(generation, Guarded::ManualSync),
            ),
        };
        inner.emit_state();

        // The sync runs detached so an abandoned sync is left to finish on
        // its own rather than cancelled mid-write.
        let task_inner = Arc::clone(inner);
        let mut task = tokio::spawn(async move { task_inner.run_manual_sync(generation).await });
        let result = tokio::select! {
            joined = &mut task => joined.unwrap_or_else(|e| Err(SyncError::Task(e.to_string()))),
            () = &mut abandoned => Err(SyncError::Timeout),
        };

        match &result {
            Ok(SyncOutcome::Published(report)) => {
                inner.events.notice(Notice::info(format!(
                    "Published {} text entries, {} images and {} sections",
                    report.snapshot.text_content.len(),
                    report.snapshot.image_replacements.len(),
                    report.snapshot.content_blocks.len()
                )));
                if !report.failed.is_empty() {
                    inner.events.notice(Notice::warning(format!(
                        "{} item(s) could not be published and were left out",
                        report.failed.len()
                    )));
                }
            }
            Ok(_) | Err(SyncError::Timeout) => {}
            Err(e) => inner.events.notice(Notice::error(e.to_string())),
        }
        result
    }

    /// Persists the whole queue now, ignoring the debounce and throttle.
    pub async fn flush_now(&self) -> FlushReport {
        self.inner.drain(None).await
    }

    /// Clears every in-flight flag and the stuck state. Queued edits are
    /// kept and rescheduled.
    pub fn force_reset(&self) {
        let inner = &self.inner;
        warn!("Resetting sync state for {}", inner.project);
        inner.sync_abandoned.notify_waiters();
        inner.status.clear_in_flight();
        inner.status.set_stuck(false);
        inner.emit_state();
        inner.reschedule_if_pending(inner.config.debounce());
    }

    /// Stops all timers. Queued edits stay in memory until the session is
    /// dropped; call [`flush_now`](Self::flush_now) first to keep them.
    pub fn shutdown(&self) {
        info!("Shutting down edit session for {}", self.inner.project);
        self.inner.scheduler.cancel();
    }
}

/// Releases a manual sync and disarms its watchdog on every exit path.
struct SyncGuard {
    inner: Arc<SessionInner>,
    generation: u64,
    _watchdog: WatchdogGuard,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if self.inner.status.end_sync(self.generation) {
            self.inner.emit_state();
        }
    }
}

/// Releases the batch guard if this batch still owns it.
struct BatchRelease<'a> {
    status: &'a SyncStatus,
    generation: u64,
}

impl Drop for BatchRelease<'_> {
    fn drop(&mut self) {
        self.status.end_batch(self.generation);
    }
}

impl SessionInner {
    fn emit_state(&self) {
        self.events.emit(SyncEvent::StateChanged(self.status.snapshot()));
    }

    fn flush_task(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let weak = Arc::downgrade(self);
        async move {
            if let Some(inner) = weak.upgrade() {
                inner.scheduled_flush().await;
            }
        }
        .boxed()
    }

    fn continuation_task(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let weak = Arc::downgrade(self);
        async move {
            if let Some(inner) = weak.upgrade() {
                inner.run_batch(true).await;
            }
        }
        .boxed()
    }

    fn stuck_task(self: &Arc<Self>, generation: u64, guarded: Guarded) -> BoxFuture<'static, ()> {
        let weak = Arc::downgrade(self);
        async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let released = match guarded {
                Guarded::Batch => inner.status.end_batch(generation),
                Guarded::ManualSync => {
                    if inner.status.owns_sync(generation) {
                        inner.sync_abandoned.notify_waiters();
                    }
                    inner.status.end_sync(generation)
                }
            };
            if released {
                inner.enter_stuck(guarded);
            }
        }
        .boxed()
    }

    fn enter_stuck(self: &Arc<Self>, guarded: Guarded) {
        warn!(
            "{:?} for {} did not finish within {:?}, resetting",
            guarded,
            self.project,
            self.config.stuck_timeout()
        );
        self.status.set_stuck(true);
        self.events.notice(Notice::warning(
            "Sync was taking too long and has been reset. Your edits are safe.",
        ));
        self.events.emit(SyncEvent::RefreshRequested {
            project: self.project.clone(),
            scope: RefreshScope::All,
        });
        self.emit_state();
        self.reschedule_if_pending(self.config.throttle());
    }

    fn reschedule_if_pending(self: &Arc<Self>, delay: Duration) {
        if !lock(&self.queue).is_empty() {
            self.scheduler.defer(delay, self.flush_task());
        }
    }

    /// Debounce or deferred-timer entry point: honours the throttle floor.
    async fn scheduled_flush(self: &Arc<Self>) {
        if let Some(wait) = self.scheduler.throttle_remaining() {
            debug!("Flush for {} throttled, retrying in {:?}", self.project, wait);
            self.scheduler.defer(wait, self.flush_task());
            return;
        }
        self.run_batch(true).await;
    }

    /// Runs one batch under the reentrancy guard and the watchdog.
    ///
    /// Returns `None` if another batch is in flight. With `follow_up`, a
    /// non-empty queue schedules the next batch: soon after progress,
    /// otherwise on the throttle interval.
    async fn run_batch(self: &Arc<Self>, follow_up: bool) -> Option<BatchReport> {
        let generation = self.status.next_generation();
        if !self.status.try_begin_batch(generation) {
            debug!("Batch already in flight for {}", self.project);
            return None;
        }
        let _release = BatchRelease {
            status: &self.status,
            generation,
        };
        if lock(&self.queue).is_empty() {
            return Some(BatchReport::default());
        }

        self.scheduler.mark_flush();
        let watchdog = watchdog::arm(
            self.config.stuck_timeout(),
            generation,
            self.stuck_task(generation, Guarded::Batch),
        );
        let report = persist_batch(
            &self.project,
            &self.queue,
            self.changes.as_ref(),
            self.config.batch_size,
        )
        .await;
        drop(watchdog);

        self.status.set_pending(report.remaining);
        if report.made_progress() {
            self.status.mark_synced(Timestamp::now());
            if report.failed.is_empty() && self.status.owns_batch(generation) {
                self.status.set_stuck(false);
            }
        }
        if !report.failed.is_empty() {
            self.events.notice(Notice::warning(format!(
                "{} edit(s) could not be saved and will be retried",
                report.failed.len()
            )));
        }
        self.emit_state();

        if follow_up && report.remaining > 0 {
            if report.made_progress() {
                self.scheduler
                    .after(self.config.batch_continuation(), self.continuation_task());
            } else {
                self.scheduler.defer(self.config.throttle(), self.flush_task());
            }
        }
        Some(report)
    }

    /// Runs batches until the queue is empty or a batch makes no progress.
    /// With `owner`, stops as soon as that sync no longer owns the session.
    async fn drain(self: &Arc<Self>, owner: Option<u64>) -> FlushReport {
        let mut flush = FlushReport::default();
        loop {
            if owner.is_some_and(|generation| !self.status.owns_sync(generation)) {
                flush.abandoned = true;
                break;
            }
            if lock(&self.queue).is_empty() {
                break;
            }
            match self.run_batch(false).await {
                None => tokio::time::sleep(IN_FLIGHT_POLL).await,
                Some(batch) => {
                    flush.batches += 1;
                    flush.persisted += batch.persisted;
                    let progressed = batch.made_progress();
                    flush.failed = batch.failed;
                    if !progressed {
                        break;
                    }
                }
            }
        }
        flush.remaining = lock(&self.queue).len();
        flush
    }

    async fn run_manual_sync(self: &Arc<Self>, generation: u64) -> SyncResult<SyncOutcome> {
        let flush = self.drain(Some(generation)).await;
        if flush.abandoned {
            return Err(SyncError::Timeout);
        }
        if flush.remaining > 0 {
            warn!("{} edits for {} are still unsaved, publishing the rest", flush.remaining, self.project);
            self.events.notice(Notice::warning(format!(
                "{} edit(s) could not be saved yet and will not be published",
                flush.remaining
            )));
        }

        if !self.changes.exists(&self.project).await? {
            info!("Nothing to publish for {}", self.project);
            self.events.notice(Notice::info("Nothing to publish"));
            return Ok(SyncOutcome::NothingToPublish);
        }
        if !self.status.owns_sync(generation) {
            return Err(SyncError::Timeout);
        }

        let report = self
            .publisher
            .publish(&self.project, self.config.preserve_local_edits)
            .await?;
        Ok(SyncOutcome::Published(report))
    }
}
