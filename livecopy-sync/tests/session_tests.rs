use livecopy_blobstore::MemoryBlobStore;
use livecopy_storage::{ChangeStore, MemoryStore, SnapshotStore};
use livecopy_sync::{
    EditSession, NoticeLevel, RefreshScope, SyncConfig, SyncError, SyncEvent, SyncOutcome,
};
use livecopy_types::{ChangeKind, ProjectId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

struct Harness {
    session: EditSession,
    store: Arc<MemoryStore>,
}

fn project() -> ProjectId {
    ProjectId::new("acme").unwrap()
}

fn harness(config: SyncConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let session = EditSession::builder(project())
        .config(config)
        .stores(Arc::clone(&store))
        .blobs(Arc::new(MemoryBlobStore::new("/assets")))
        .build()
        .unwrap();
    Harness { session, store }
}

fn fast_debounce() -> SyncConfig {
    SyncConfig {
        debounce_ms: 100,
        ..SyncConfig::default()
    }
}

fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn warnings(events: &[SyncEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Notice(n) if n.level == NoticeLevel::Warning => Some(n.message.clone()),
            _ => None,
        })
        .collect()
}

// ── Debounce and last-write-wins ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rapid_edits_to_one_key_persist_once_with_last_value() {
    let h = harness(SyncConfig::default());
    assert!(h.session.enqueue_edit(ChangeKind::Text, "k", json!("A")));
    assert!(h.session.enqueue_edit(ChangeKind::Text, "k", json!("B")));

    sleep(Duration::from_secs(3)).await;

    let log = h.store.upsert_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].key, "k");
    assert_eq!(log[0].value, json!("B"));
    assert!(h.session.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn each_edit_restarts_the_debounce() {
    let h = harness(SyncConfig::default());
    h.session.enqueue_edit(ChangeKind::Text, "a", json!("first"));
    sleep(Duration::from_secs(2)).await;
    h.session.enqueue_edit(ChangeKind::Text, "b", json!("second"));
    sleep(Duration::from_secs(2)).await;

    assert_eq!(h.store.upsert_attempts().await, 0);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.store.upsert_attempts().await, 2);
}

#[tokio::test(start_paused = true)]
async fn flush_inside_throttle_window_is_deferred_not_dropped() {
    let h = harness(fast_debounce());
    h.session.enqueue_edit(ChangeKind::Text, "a", json!("first"));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.store.change_count().await, 1);

    h.session.enqueue_edit(ChangeKind::Text, "b", json!("second"));
    sleep(Duration::from_millis(4_700)).await;
    assert_eq!(h.store.change_count().await, 1, "throttle floor not honoured");

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.store.change_count().await, 2);
}

// ── Batching ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn large_queue_is_persisted_in_continued_batches() {
    let h = harness(fast_debounce());
    for i in 0..25 {
        h.session
            .enqueue_edit(ChangeKind::Text, format!("key-{i}"), json!(format!("value {i}")));
    }

    sleep(Duration::from_millis(150)).await;
    assert_eq!(h.store.change_count().await, 10);

    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.store.change_count().await, 25);
    assert_eq!(h.session.state().pending_changes, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_entry_stays_queued_and_is_retried() {
    let h = harness(SyncConfig::default());
    let mut rx = h.session.subscribe();
    h.store.fail_upserts_for("bad").await;

    h.session.enqueue_edit(ChangeKind::Text, "good", json!("fine"));
    h.session.enqueue_edit(ChangeKind::Text, "bad", json!("rejected"));
    sleep(Duration::from_secs(3)).await;

    let pending = h.session.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "bad");
    assert_eq!(h.store.change_count().await, 1);
    assert!(!warnings(&drain_events(&mut rx)).is_empty());

    h.store.clear_upsert_failures().await;
    sleep(Duration::from_secs(5)).await;

    assert!(h.session.pending().is_empty());
    assert_eq!(h.store.change_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn edit_during_in_flight_write_is_not_lost() {
    let h = harness(SyncConfig::default());
    h.store.set_upsert_delay(Some(Duration::from_secs(1))).await;

    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello"));
    sleep(Duration::from_millis(2_600)).await;
    assert!(h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello there, friend")));

    sleep(Duration::from_millis(950)).await;
    let pending = h.session.pending();
    assert_eq!(pending.len(), 1, "superseded entry must stay queued");
    assert_eq!(pending[0].value, json!("Hello there, friend"));

    sleep(Duration::from_secs(5)).await;
    assert!(h.session.pending().is_empty());
    let log = h.store.upsert_log().await;
    assert_eq!(log.last().unwrap().value, json!("Hello there, friend"));
}

#[tokio::test(start_paused = true)]
async fn overflow_raises_a_warning() {
    let h = harness(SyncConfig {
        max_queue_size: 2,
        ..SyncConfig::default()
    });
    let mut rx = h.session.subscribe();
    for key in ["a", "b", "c"] {
        h.session.enqueue_edit(ChangeKind::Text, key, json!("value"));
    }

    let keys: Vec<String> = h.session.pending().into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["b", "c"]);
    assert_eq!(warnings(&drain_events(&mut rx)).len(), 1);
}

// ── Stuck detection ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stuck_batch_resets_state_and_keeps_edits() {
    let h = harness(SyncConfig::default());
    let mut rx = h.session.subscribe();
    h.store.set_hang_upserts(true).await;

    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello world"));
    sleep(Duration::from_millis(2_500 + 15_000 + 100)).await;

    let state = h.session.state();
    assert!(state.is_stuck);
    assert!(!state.is_syncing);
    assert_eq!(state.pending_changes, 1);
    assert_eq!(h.session.pending()[0].value, json!("Hello world"));

    let events = drain_events(&mut rx);
    assert!(warnings(&events).iter().any(|m| m.contains("edits are safe")));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RefreshRequested { scope: RefreshScope::All, .. }
    )));

    h.store.set_hang_upserts(false).await;
    h.session.enqueue_edit(ChangeKind::Text, "subtitle", json!("Recovered"));
    let flush = h.session.flush_now().await;

    assert_eq!(flush.remaining, 0);
    assert!(!h.session.state().is_stuck);
    let changes = h.store.list_changes(&project()).await.unwrap();
    assert_eq!(changes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stuck_manual_sync_times_out_then_resets() {
    let h = harness(SyncConfig::default());
    h.store.set_hang_upserts(true).await;
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello world"));

    let result = h.session.trigger_sync().await;
    assert!(matches!(result, Err(SyncError::Timeout)), "got {result:?}");

    let state = h.session.state();
    assert!(state.is_stuck);
    assert!(!state.is_syncing);
    assert_eq!(state.pending_changes, 1);

    let outcome = h.session.trigger_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reset);
    assert!(!h.session.state().is_stuck);
    assert_eq!(h.session.pending().len(), 1);

    h.store.set_hang_upserts(false).await;
}

#[tokio::test(start_paused = true)]
async fn force_reset_reschedules_queued_edits() {
    let h = harness(SyncConfig::default());
    h.store.set_hang_upserts(true).await;
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello world"));
    sleep(Duration::from_millis(2_500 + 15_000 + 100)).await;
    assert!(h.session.state().is_stuck);

    h.store.set_hang_upserts(false).await;
    h.session.force_reset();
    assert!(!h.session.state().is_stuck);

    sleep(Duration::from_secs(10)).await;
    assert!(h.session.pending().is_empty());
    assert!(h.store.exists(&project()).await.unwrap());
}

// ── Manual sync ─────────────────────────────────────────────────

#[tokio::test]
async fn sync_without_changes_has_nothing_to_publish() {
    let h = harness(SyncConfig::default());
    let outcome = h.session.trigger_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::NothingToPublish);
    assert!(h.store.get_snapshot(&project()).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_sync_is_refused() {
    let h = harness(SyncConfig::default());
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello"));

    let (first, second) = tokio::join!(h.session.trigger_sync(), async {
        tokio::task::yield_now().await;
        h.session.trigger_sync().await
    });

    assert!(matches!(first.unwrap(), SyncOutcome::Published(_)));
    assert_eq!(second.unwrap(), SyncOutcome::AlreadySyncing);
    assert!(!h.session.state().is_syncing);
}

#[tokio::test]
async fn sync_drains_queue_then_publishes() {
    let h = harness(SyncConfig::default());
    let mut rx = h.session.subscribe();
    h.session.enqueue_edit(ChangeKind::Text, "hero_title", json!("Hello"));

    let SyncOutcome::Published(report) = h.session.trigger_sync().await.unwrap() else {
        panic!("expected a publish");
    };

    assert_eq!(report.snapshot.text_content["hero_title"], "Hello");
    assert!(h.session.pending().is_empty());
    assert!(h.session.state().last_sync_time.is_some());
    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, SyncEvent::ProjectDataChanged { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::StateChanged(s) if s.is_syncing)));
}

#[tokio::test]
async fn publish_failure_surfaces_message() {
    let h = harness(SyncConfig::default());
    h.store.set_fail_snapshot_writes(true).await;
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello"));

    let err = h.session.trigger_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Publish(_)));
    assert!(err.to_string().contains("could not save the published content"));
    assert!(!h.session.state().is_syncing);
    // The edit itself was saved before publishing failed.
    assert!(h.store.exists(&project()).await.unwrap());
}

// ── End to end ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn edit_is_persisted_after_debounce_and_published_with_local_edits_kept() {
    let h = harness(SyncConfig::default());
    h.session.enqueue_edit(ChangeKind::Text, "hero_title", json!("Hello"));
    sleep(Duration::from_secs(3)).await;

    let persisted = h.store.list_changes(&project()).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].value, json!("Hello"));

    let report = h.session.publisher().publish(&project(), true).await.unwrap();
    assert_eq!(report.snapshot.text_content["hero_title"], "Hello");
    assert!(!report.cleared_local_edits);
    assert!(h.store.exists(&project()).await.unwrap());
}

// ── Lifecycle ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_stops_timers_but_keeps_queue() {
    let h = harness(SyncConfig::default());
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello"));
    h.session.shutdown();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.store.upsert_attempts().await, 0);
    assert_eq!(h.session.pending().len(), 1);

    let flush = h.session.flush_now().await;
    assert_eq!(flush.persisted, 1);
    assert_eq!(flush.remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_stops_scheduling() {
    let h = harness(SyncConfig::default());
    h.session.enqueue_edit(ChangeKind::Text, "title", json!("Hello"));
    let store = Arc::clone(&h.store);
    drop(h);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(store.upsert_attempts().await, 0);
}

#[test]
fn builder_requires_stores() {
    let result = EditSession::builder(project())
        .blobs(Arc::new(MemoryBlobStore::new("/assets")))
        .build();
    assert!(matches!(result, Err(SyncError::Config(_))));
}
