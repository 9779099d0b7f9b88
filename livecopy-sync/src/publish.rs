//! The publish/merge engine.
//!
//! Publishing folds every persisted dev change over the last published
//! snapshot and commits the result as the new snapshot in one write. Dev
//! values win over the baseline; captions are overlaid last. Images are
//! promoted to durable URLs first, and anything that still is not durable
//! is left out, so a committed snapshot never points at an inline payload.
//!
//! Only loading and the final snapshot write are fatal. Once the snapshot
//! is committed, view patching, clearing local edits and asset cleanup are
//! best-effort and only logged.

use crate::assets::{AssetPromoter, GcReport};
use crate::events::{EventBus, RefreshScope, SyncEvent};
use crate::view::{PatchSummary, ViewPatch, ViewPatcher, apply_patch};
use crate::{PublishError, PublishResult};
use futures::future::join_all;
use livecopy_storage::{CaptionStore, ChangeStore, SnapshotStore};
use livecopy_types::{
    ChangeKind, ContentBlock, PersistedChange, ProjectId, PublishedSnapshot, Timestamp, caption_key,
    is_durable_url, is_legacy_caption_key,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// An image or block that could not be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionFailure {
    pub kind: ChangeKind,
    /// Image key or section id.
    pub key: String,
    pub reason: String,
}

/// What a publish did.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    /// The committed snapshot.
    pub snapshot: PublishedSnapshot,
    /// Image key to durable URL, for every dev image that made it in.
    pub promoted: BTreeMap<String, String>,
    /// Images and blocks left out because promotion failed.
    pub failed: Vec<PromotionFailure>,
    /// Image keys dropped because their value was not a durable URL.
    pub filtered: Vec<String>,
    /// Assets deleted after the commit.
    pub collected: GcReport,
    /// Present when a view was patched.
    pub view: Option<PatchSummary>,
    /// Persisted changes and captions were deleted after the commit.
    pub cleared_local_edits: bool,
}

/// Dev changes split by kind.
#[derive(Debug, Default)]
struct DevChanges {
    text: BTreeMap<String, String>,
    images: BTreeMap<String, Value>,
    blocks: BTreeMap<String, Vec<ContentBlock>>,
    /// Durable URLs referenced by any dev value.
    urls: BTreeSet<String>,
}

impl DevChanges {
    fn partition(changes: Vec<PersistedChange>) -> Self {
        let mut dev = Self::default();
        for change in changes {
            collect_durable(&change.value, &mut dev.urls);
            match change.kind {
                ChangeKind::Text => match change.value {
                    Value::String(s) => {
                        dev.text.insert(change.key, s);
                    }
                    Value::Number(n) => {
                        dev.text.insert(change.key, n.to_string());
                    }
                    Value::Bool(b) => {
                        dev.text.insert(change.key, b.to_string());
                    }
                    other => debug!("Skipping non-text value for {}: {}", change.key, other),
                },
                ChangeKind::Image => {
                    dev.images.insert(change.key, change.value);
                }
                ChangeKind::ContentBlock => match change.value {
                    Value::Array(items) => {
                        dev.blocks
                            .insert(change.key, items.into_iter().map(ContentBlock::new).collect());
                    }
                    Value::Object(_) => {
                        dev.blocks.insert(change.key, vec![ContentBlock::new(change.value)]);
                    }
                    Value::Null => {
                        dev.blocks.insert(change.key, Vec::new());
                    }
                    other => debug!("Skipping malformed blocks for {}: {}", change.key, other),
                },
            }
        }
        dev
    }
}

fn collect_durable(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) if is_durable_url(s) => {
            out.insert(s.trim().to_string());
        }
        Value::Array(items) => items.iter().for_each(|v| collect_durable(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_durable(v, out)),
        _ => {}
    }
}

/// `baseline ∪ dev` with dev winning, captions overlaid under the caption
/// namespace, and legacy caption keys removed.
#[must_use]
pub fn merge_text(
    baseline: &BTreeMap<String, String>,
    dev: &BTreeMap<String, String>,
    captions: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = baseline.clone();
    merged.extend(dev.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(captions.iter().map(|(k, v)| (caption_key(k), v.clone())));
    merged.retain(|key, _| !is_legacy_caption_key(key));
    merged
}

/// `baseline ∪ promoted` with promoted winning, minus every entry whose
/// value is not a durable URL. Returns the merged map and the dropped keys.
#[must_use]
pub fn merge_images(
    baseline: &BTreeMap<String, String>,
    promoted: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut merged = baseline.clone();
    merged.extend(promoted.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut filtered = Vec::new();
    merged.retain(|key, value| {
        let keep = is_durable_url(value);
        if !keep {
            debug!("Dropping image {} with non-durable value", key);
            filtered.push(key.clone());
        }
        keep
    });
    (merged, filtered)
}

/// Merges persisted dev changes into the published snapshot.
pub struct Publisher {
    changes: Arc<dyn ChangeStore>,
    snapshots: Arc<dyn SnapshotStore>,
    captions: Arc<dyn CaptionStore>,
    assets: AssetPromoter,
    view: Option<Arc<dyn ViewPatcher>>,
    events: EventBus,
}

impl Publisher {
    pub fn new(
        changes: Arc<dyn ChangeStore>,
        snapshots: Arc<dyn SnapshotStore>,
        captions: Arc<dyn CaptionStore>,
        assets: AssetPromoter,
    ) -> Self {
        Self {
            changes,
            snapshots,
            captions,
            assets,
            view: None,
            events: EventBus::default(),
        }
    }

    /// Patches `view` after every publish.
    pub fn with_view(mut self, view: Arc<dyn ViewPatcher>) -> Self {
        self.view = Some(view);
        self
    }

    /// Sends events on `events` instead of a private bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Publishes every persisted change for `project`.
    ///
    /// With `preserve_local_edits` false, persisted changes and captions are
    /// deleted once the snapshot is committed.
    pub async fn publish(&self, project: &ProjectId, preserve_local_edits: bool) -> PublishResult<PublishReport> {
        let changes = self
            .changes
            .list_changes(project)
            .await
            .map_err(PublishError::LoadChanges)?;
        let baseline = self
            .snapshots
            .get_snapshot(project)
            .await
            .map_err(PublishError::LoadBaseline)?
            .unwrap_or_else(|| PublishedSnapshot::empty(project.clone()));
        let captions = self
            .captions
            .list_captions(project)
            .await
            .map_err(PublishError::LoadCaptions)?;

        info!(
            "Publishing {} changes and {} captions for {}",
            changes.len(),
            captions.len(),
            project
        );
        let dev = DevChanges::partition(changes);
        let mut failed = Vec::new();

        let promoted = self.promote_images(project, &dev.images, &mut failed).await;
        let text_content = merge_text(&baseline.text_content, &dev.text, &captions);
        let content_blocks = self.merge_blocks(project, &baseline.content_blocks, &dev.blocks, &mut failed).await;
        let (image_replacements, filtered) = merge_images(&baseline.image_replacements, &promoted);

        let snapshot = PublishedSnapshot {
            project_id: project.clone(),
            text_content,
            image_replacements,
            content_blocks,
            published_at: Timestamp::now(),
        };
        self.snapshots
            .upsert_snapshot(&snapshot)
            .await
            .map_err(PublishError::WriteSnapshot)?;
        info!(
            "Committed snapshot for {}: {} text, {} images, {} sections",
            project,
            snapshot.text_content.len(),
            snapshot.image_replacements.len(),
            snapshot.content_blocks.len()
        );
        self.events.emit(SyncEvent::ProjectDataChanged {
            project: project.clone(),
        });

        let view = self.patch_view(project, &baseline, &snapshot).await;
        let cleared_local_edits = !preserve_local_edits && self.clear_local_edits(project).await;

        let keep = if preserve_local_edits {
            dev.urls
        } else {
            BTreeSet::new()
        };
        let collected = self
            .assets
            .collect_garbage(project, &baseline, &snapshot, &keep)
            .await;

        Ok(PublishReport {
            snapshot,
            promoted,
            failed,
            filtered,
            collected,
            view,
            cleared_local_edits,
        })
    }

    async fn promote_images(
        &self,
        project: &ProjectId,
        images: &BTreeMap<String, Value>,
        failed: &mut Vec<PromotionFailure>,
    ) -> BTreeMap<String, String> {
        let attempts = images.iter().map(|(key, value)| async move {
            let result = match value.as_str() {
                Some(reference) => self.assets.promote(project, reference).await.map_err(|e| e.to_string()),
                None => Err(format!("image value is not a string: {value}")),
            };
            (key, result)
        });

        let mut promoted = BTreeMap::new();
        for (key, result) in join_all(attempts).await {
            match result {
                Ok(url) => {
                    promoted.insert(key.clone(), url);
                }
                Err(reason) => {
                    warn!("Leaving out image {}: {}", key, reason);
                    failed.push(PromotionFailure {
                        kind: ChangeKind::Image,
                        key: key.clone(),
                        reason,
                    });
                }
            }
        }
        promoted
    }

    async fn merge_blocks(
        &self,
        project: &ProjectId,
        baseline: &BTreeMap<String, Vec<ContentBlock>>,
        dev: &BTreeMap<String, Vec<ContentBlock>>,
        failed: &mut Vec<PromotionFailure>,
    ) -> BTreeMap<String, Vec<ContentBlock>> {
        let mut merged = baseline.clone();
        for (section, blocks) in dev {
            let mut resolved = Vec::with_capacity(blocks.len());
            for block in blocks {
                match self.assets.resolve_block(project, block).await {
                    Ok(block) => resolved.push(block),
                    Err(e) => {
                        warn!("Dropping block {:?} from section {}: {}", block.id(), section, e);
                        failed.push(PromotionFailure {
                            kind: ChangeKind::ContentBlock,
                            key: section.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            merged.insert(section.clone(), resolved);
        }
        merged
    }

    async fn patch_view(
        &self,
        project: &ProjectId,
        baseline: &PublishedSnapshot,
        snapshot: &PublishedSnapshot,
    ) -> Option<PatchSummary> {
        let patch = ViewPatch::between(baseline, snapshot);
        match &self.view {
            Some(view) => {
                let version = snapshot.published_at.as_millis().to_string();
                Some(apply_patch(view.as_ref(), &patch, project, &version, &self.events).await)
            }
            None => {
                self.events.emit(SyncEvent::RefreshRequested {
                    project: project.clone(),
                    scope: RefreshScope::Sections(patch.sections),
                });
                None
            }
        }
    }

    async fn clear_local_edits(&self, project: &ProjectId) -> bool {
        let changes = self.changes.delete_all(project).await;
        let captions = self.captions.delete_captions(project).await;
        match (changes, captions) {
            (Ok(changes), Ok(captions)) => {
                info!("Cleared {} changes and {} captions for {}", changes, captions, project);
                true
            }
            (changes, captions) => {
                if let Err(e) = changes {
                    warn!("Failed to clear saved changes for {}: {}", project, e);
                }
                if let Err(e) = captions {
                    warn!("Failed to clear captions for {}: {}", project, e);
                }
                false
            }
        }
    }
}
