use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use livecopy_blobstore::{AssetPolicy, BlobStore, MemoryBlobStore};
use livecopy_storage::{
    CaptionStore, ChangeStore, FallbackSnapshotStore, LocalSnapshotCache, MemoryStore, SnapshotStore,
};
use livecopy_sync::{AssetPromoter, DocumentView, PublishError, Publisher, RefreshScope, SyncEvent};
use livecopy_types::{
    ChangeKind, ContentBlock, PersistedChange, ProjectId, PublishedSnapshot, Timestamp, is_durable_url,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R',
];
const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00";

fn project() -> ProjectId {
    ProjectId::new("acme").unwrap()
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

fn publisher(store: &Arc<MemoryStore>, blobs: &Arc<MemoryBlobStore>) -> Publisher {
    Publisher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        AssetPromoter::new(blobs.clone(), AssetPolicy::default()),
    )
}

fn setup() -> (Arc<MemoryStore>, Arc<MemoryBlobStore>) {
    (Arc::new(MemoryStore::new()), Arc::new(MemoryBlobStore::new("/assets")))
}

async fn save(store: &MemoryStore, kind: ChangeKind, key: &str, value: Value) {
    store
        .upsert_change(&PersistedChange {
            project: project(),
            kind,
            key: key.to_string(),
            value,
            updated_at: Timestamp::now(),
        })
        .await
        .unwrap();
}

fn baseline(text: &[(&str, &str)]) -> PublishedSnapshot {
    let mut snapshot = PublishedSnapshot::empty(project());
    snapshot.text_content = text
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    snapshot.published_at = Timestamp::from_millis(1);
    snapshot
}

fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ── Merge ───────────────────────────────────────────────────────

#[tokio::test]
async fn dev_changes_win_over_baseline() {
    let (store, blobs) = setup();
    store.upsert_snapshot(&baseline(&[("a", "1"), ("b", "2")])).await.unwrap();
    save(&store, ChangeKind::Text, "b", json!("3")).await;
    save(&store, ChangeKind::Text, "c", json!("4")).await;

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    assert_eq!(report.snapshot.text_content, map(&[("a", "1"), ("b", "3"), ("c", "4")]));
    let stored = store.get_snapshot(&project()).await.unwrap().unwrap();
    assert_eq!(stored, report.snapshot);
}

#[tokio::test]
async fn captions_use_one_namespace_and_legacy_keys_are_stripped() {
    let (store, blobs) = setup();
    store
        .upsert_snapshot(&baseline(&[("title", "Hi"), ("caption_hero", "old")]))
        .await
        .unwrap();
    save(&store, ChangeKind::Text, "caption_logo", json!("legacy")).await;
    store.set_caption(&project(), "/hero.png", "A hero").await.unwrap();

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    assert_eq!(
        report.snapshot.text_content,
        map(&[("caption::/hero.png", "A hero"), ("title", "Hi")])
    );
}

#[tokio::test]
async fn sections_are_replaced_whole() {
    let (store, blobs) = setup();
    let mut base = baseline(&[]);
    base.content_blocks.insert("hero".into(), vec![ContentBlock::new(json!({ "id": "h" }))]);
    base.content_blocks.insert(
        "features".into(),
        vec![ContentBlock::new(json!({ "id": "old-1" })), ContentBlock::new(json!({ "id": "old-2" }))],
    );
    store.upsert_snapshot(&base).await.unwrap();
    save(&store, ChangeKind::ContentBlock, "features", json!([{ "id": "new" }])).await;

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    let blocks = &report.snapshot.content_blocks;
    assert_eq!(blocks["hero"], base.content_blocks["hero"]);
    assert_eq!(blocks["features"], vec![ContentBlock::new(json!({ "id": "new" }))]);
}

// ── Images ──────────────────────────────────────────────────────

#[tokio::test]
async fn inline_image_is_published_as_durable_url() {
    let (store, blobs) = setup();
    let inline = data_url("image/png", PNG);
    save(&store, ChangeKind::Image, "/img/hero.png", json!(inline)).await;

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    let url = &report.snapshot.image_replacements["/img/hero.png"];
    assert_ne!(url, &inline);
    assert!(is_durable_url(url));
    assert!(url.starts_with("/assets/acme/"), "{url}");
    assert!(url.ends_with(".png"));
    assert_eq!(blobs.len().await, 1);
    assert_eq!(report.promoted["/img/hero.png"], *url);
}

#[tokio::test]
async fn failed_images_are_left_out_without_aborting() {
    let (store, blobs) = setup();
    save(&store, ChangeKind::Image, "/a.png", json!("data:image/png;base64,!!!!")).await;
    save(&store, ChangeKind::Image, "/b.png", json!("blob:https://editor.example.com/1234")).await;
    save(&store, ChangeKind::Image, "/c.png", json!(data_url("image/png", GIF))).await;
    save(&store, ChangeKind::Image, "/d.png", json!("https://cdn.example.com/d.png")).await;
    save(&store, ChangeKind::Text, "title", json!("Still published")).await;

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    assert_eq!(
        report.snapshot.image_replacements,
        map(&[("/d.png", "https://cdn.example.com/d.png")])
    );
    let mut failed: Vec<&str> = report.failed.iter().map(|f| f.key.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["/a.png", "/b.png", "/c.png"]);
    assert_eq!(report.snapshot.text_content["title"], "Still published");
    assert!(report.snapshot.images_are_durable());
}

#[tokio::test]
async fn non_durable_baseline_images_are_filtered() {
    let (store, blobs) = setup();
    let mut base = baseline(&[]);
    base.image_replacements.insert("/x.png".into(), "data:image/png;base64,AAAA".into());
    base.image_replacements.insert("/y.png".into(), "/assets/acme/y.png".into());
    store.upsert_snapshot(&base).await.unwrap();

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    assert_eq!(report.filtered, vec!["/x.png".to_string()]);
    assert_eq!(report.snapshot.image_replacements, map(&[("/y.png", "/assets/acme/y.png")]));
}

#[tokio::test]
async fn inline_images_in_blocks_are_promoted_and_bad_blocks_dropped() {
    let (store, blobs) = setup();
    save(
        &store,
        ChangeKind::ContentBlock,
        "gallery",
        json!([
            { "id": "good", "image": { "src": data_url("image/png", PNG), "alt": "Logo" } },
            { "id": "bad", "image": { "src": "data:image/png;base64,AAAA" } },
            { "id": "plain", "text": "No images here" }
        ]),
    )
    .await;

    let report = publisher(&store, &blobs).publish(&project(), true).await.unwrap();

    let gallery = &report.snapshot.content_blocks["gallery"];
    let ids: Vec<_> = gallery.iter().map(|b| b.id().unwrap()).collect();
    assert_eq!(ids, vec!["good", "plain"]);
    let src = gallery[0].as_value()["image"]["src"].as_str().unwrap();
    assert!(src.starts_with("/assets/acme/"));
    assert_eq!(gallery[0].as_value()["image"]["alt"], "Logo");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, ChangeKind::ContentBlock);
}

// ── Local edits ─────────────────────────────────────────────────

#[tokio::test]
async fn local_edits_are_cleared_only_when_asked() {
    let (store, blobs) = setup();
    save(&store, ChangeKind::Text, "title", json!("Hello")).await;
    store.set_caption(&project(), "/a.png", "Caption").await.unwrap();
    let publisher = publisher(&store, &blobs);

    let kept = publisher.publish(&project(), true).await.unwrap();
    assert!(!kept.cleared_local_edits);
    assert!(store.exists(&project()).await.unwrap());

    let cleared = publisher.publish(&project(), false).await.unwrap();
    assert!(cleared.cleared_local_edits);
    assert!(!store.exists(&project()).await.unwrap());
    assert!(store.list_captions(&project()).await.unwrap().is_empty());
    assert_eq!(cleared.snapshot.text_content["title"], "Hello");
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_write_failure_aborts_and_keeps_edits() {
    let (store, blobs) = setup();
    save(&store, ChangeKind::Text, "title", json!("Hello")).await;
    store.set_fail_snapshot_writes(true).await;

    let err = publisher(&store, &blobs).publish(&project(), false).await.unwrap_err();

    assert!(matches!(err, PublishError::WriteSnapshot(_)));
    assert!(store.exists(&project()).await.unwrap());
}

#[tokio::test]
async fn load_failure_aborts() {
    let (store, blobs) = setup();
    store.set_fail_change_reads(true).await;
    let err = publisher(&store, &blobs).publish(&project(), true).await.unwrap_err();
    assert!(matches!(err, PublishError::LoadChanges(_)));
    assert!(store.get_snapshot(&project()).await.unwrap().is_none());
}

#[tokio::test]
async fn cached_baseline_is_used_when_primary_read_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (store, blobs) = setup();
    let cache = LocalSnapshotCache::new(dir.path());
    cache.write(&baseline(&[("a", "cached")])).await.unwrap();
    store.set_fail_snapshot_reads(true).await;
    save(&store, ChangeKind::Text, "b", json!("dev")).await;

    let snapshots = Arc::new(FallbackSnapshotStore::new(store.clone(), cache.clone()));
    let publisher = Publisher::new(
        store.clone(),
        snapshots,
        store.clone(),
        AssetPromoter::new(blobs.clone(), AssetPolicy::default()),
    );
    let report = publisher.publish(&project(), true).await.unwrap();

    assert_eq!(report.snapshot.text_content, map(&[("a", "cached"), ("b", "dev")]));
    let mirrored = cache.read(&project()).await.unwrap().unwrap();
    assert_eq!(mirrored, report.snapshot);
}

// ── Asset cleanup ───────────────────────────────────────────────

#[tokio::test]
async fn superseded_and_orphaned_assets_are_deleted() {
    let (store, blobs) = setup();
    let publisher = publisher(&store, &blobs);

    save(&store, ChangeKind::Image, "/hero.png", json!(data_url("image/png", PNG))).await;
    let first = publisher.publish(&project(), true).await.unwrap();
    let old_url = first.snapshot.image_replacements["/hero.png"].clone();

    let orphan = blobs.put("acme/orphan.gif", GIF, "image/gif").await.unwrap();
    let other_project = blobs.put("other/keep.gif", GIF, "image/gif").await.unwrap();

    save(&store, ChangeKind::Image, "/hero.png", json!(data_url("image/gif", GIF))).await;
    let second = publisher.publish(&project(), true).await.unwrap();
    let new_url = second.snapshot.image_replacements["/hero.png"].clone();

    assert_ne!(old_url, new_url);
    let mut deleted = second.collected.deleted.clone();
    deleted.sort();
    let mut expected = vec![old_url, orphan];
    expected.sort();
    assert_eq!(deleted, expected);

    let remaining = blobs.list("").await.unwrap();
    assert!(remaining.contains(&new_url));
    assert!(remaining.contains(&other_project));
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn republishing_an_unchanged_image_keeps_its_url() {
    let (store, blobs) = setup();
    let view = Arc::new(DocumentView::new("/").with_image("/hero.png"));
    let publisher = publisher(&store, &blobs).with_view(view);

    save(&store, ChangeKind::Image, "/hero.png", json!(data_url("image/png", PNG))).await;
    let first = publisher.publish(&project(), true).await.unwrap();
    let second = publisher.publish(&project(), true).await.unwrap();

    let url = &first.snapshot.image_replacements["/hero.png"];
    assert_eq!(&second.snapshot.image_replacements["/hero.png"], url);
    assert!(second.collected.deleted.is_empty());
    assert_eq!(second.view.unwrap().images, 0);
    assert_eq!(blobs.list("").await.unwrap(), vec![url.clone()]);
}

// ── View ────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_publish_requests_no_section_refresh() {
    let (store, blobs) = setup();
    let publisher = publisher(&store, &blobs);
    let mut rx = publisher.subscribe();

    save(&store, ChangeKind::Text, "hero_title", json!("Hello")).await;
    publisher.publish(&project(), true).await.unwrap();

    let scopes: Vec<RefreshScope> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|event| match event {
            SyncEvent::RefreshRequested { scope, .. } => Some(scope),
            _ => None,
        })
        .collect();
    assert_eq!(scopes, vec![RefreshScope::Sections(Vec::new())]);
}

#[tokio::test]
async fn stripped_legacy_caption_is_removed_from_the_view() {
    let (store, blobs) = setup();
    store
        .upsert_snapshot(&baseline(&[("caption_/team.jpg", "Old"), ("title", "Hi")]))
        .await
        .unwrap();
    let view = Arc::new(
        DocumentView::new("/")
            .with_text("caption_/team.jpg", "Old")
            .with_text("title", "Hi"),
    );
    let publisher = publisher(&store, &blobs).with_view(view.clone());

    save(&store, ChangeKind::Text, "title", json!("Hello there")).await;
    let report = publisher.publish(&project(), true).await.unwrap();

    assert!(!report.snapshot.text_content.contains_key("caption_/team.jpg"));
    assert_eq!(report.view.unwrap().cleared_text_nodes, 1);
    let doc = view.snapshot();
    assert!(doc.texts("caption_/team.jpg").is_empty());
    assert_eq!(doc.texts("title"), vec!["Hello there"]);
}

#[tokio::test]
async fn publish_patches_view_without_navigating() {
    let (store, blobs) = setup();
    store.upsert_snapshot(&baseline(&[("unchanged", "same")])).await.unwrap();
    let view = Arc::new(
        DocumentView::new("/about?tab=team#people")
            .with_image("/img/hero.png")
            .with_background(".banner", "/img/hero.png")
            .with_text("hero_title", "Old title")
            .with_text("unchanged", "locally different")
            .with_section("features")
            .redirect_on_refresh("/"),
    );
    let publisher = publisher(&store, &blobs).with_view(view.clone());
    let mut rx = publisher.subscribe();

    save(&store, ChangeKind::Text, "hero_title", json!("New title")).await;
    save(&store, ChangeKind::Image, "/img/hero.png", json!(data_url("image/png", PNG))).await;
    save(&store, ChangeKind::ContentBlock, "features", json!([{ "id": "f1" }])).await;

    let report = publisher.publish(&project(), true).await.unwrap();
    let doc = view.snapshot();

    assert_eq!(doc.location, "/about?tab=team#people");
    let summary = report.view.unwrap();
    assert!(summary.location_restored);
    assert_eq!(summary.images, 2);
    assert_eq!(summary.text_nodes, 1);
    assert_eq!(summary.sections, 1);

    let url = &report.snapshot.image_replacements["/img/hero.png"];
    let version = report.snapshot.published_at.as_millis();
    assert_eq!(doc.images[0].src, format!("{url}?v={version}"));
    assert!(doc.backgrounds[0].css().contains(url.as_str()));
    assert_eq!(doc.texts("hero_title"), vec!["New title"]);
    assert_eq!(doc.texts("unchanged"), vec!["locally different"]);
    assert_eq!(doc.sections["features"], 2);
    assert_eq!(doc.refreshes, 1);

    let mut saw_data_changed = false;
    let mut saw_refresh = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            SyncEvent::ProjectDataChanged { .. } => saw_data_changed = true,
            SyncEvent::RefreshRequested { scope, .. } => {
                assert_eq!(scope, RefreshScope::Sections(vec!["features".to_string()]));
                saw_refresh = true;
            }
            _ => {}
        }
    }
    assert!(saw_data_changed && saw_refresh);
}
