//! In-place patching of the rendered page after a publish.
//!
//! The engine never reloads or navigates. It computes what changed between
//! the previous and the new snapshot and hands each change to a
//! [`ViewPatcher`], then asks observers to refresh and puts the location
//! back if anything moved it.

use crate::events::{EventBus, RefreshScope, SyncEvent};
use crate::lock;
use async_trait::async_trait;
use livecopy_types::{ProjectId, PublishedSnapshot, append_query_param};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Query parameter appended to patched image URLs to defeat caches.
pub const CACHE_BUST_PARAM: &str = "v";

/// A rendered view the engine can patch.
#[async_trait]
pub trait ViewPatcher: Send + Sync {
    /// Points every element showing `original` at `resolved`. Returns the
    /// number of elements updated.
    async fn patch_image(&self, original: &str, resolved: &str) -> usize;

    /// Replaces the text of every node tagged with `key`.
    async fn patch_text(&self, key: &str, value: &str) -> usize;

    /// Removes every node tagged with `key`, whose entry is gone from the
    /// snapshot. Returns the number of nodes removed.
    async fn clear_text(&self, key: &str) -> usize;

    /// Marks a content-block section for re-rendering. Returns false if the
    /// section is not on the page.
    async fn patch_section(&self, section: &str) -> bool;

    /// The current location (path, query and fragment).
    async fn location(&self) -> String;

    /// Returns to `location` without adding a history entry.
    async fn restore_location(&self, location: &str);

    /// Asks the host to re-render data-bound components.
    async fn request_refresh(&self);
}

/// The visible difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewPatch {
    pub images: BTreeMap<String, String>,
    pub text: BTreeMap<String, String>,
    /// Text keys present before and absent now.
    pub removed_text: Vec<String>,
    pub sections: Vec<String>,
}

impl ViewPatch {
    /// Entries of `current` that are new or differ from `previous`.
    #[must_use]
    pub fn between(previous: &PublishedSnapshot, current: &PublishedSnapshot) -> Self {
        let changed = |old: &BTreeMap<String, String>, new: &BTreeMap<String, String>| {
            new.iter()
                .filter(|(k, v)| old.get(*k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        let sections = current
            .content_blocks
            .iter()
            .filter(|(id, blocks)| previous.content_blocks.get(*id) != Some(*blocks))
            .map(|(id, _)| id.clone())
            .collect();

        let removed_text = previous
            .text_content
            .keys()
            .filter(|key| !current.text_content.contains_key(*key))
            .cloned()
            .collect();

        Self {
            images: changed(&previous.image_replacements, &current.image_replacements),
            text: changed(&previous.text_content, &current.text_content),
            removed_text,
            sections,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
            && self.text.is_empty()
            && self.removed_text.is_empty()
            && self.sections.is_empty()
    }
}

/// What a patch pass touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub images: usize,
    pub text_nodes: usize,
    pub cleared_text_nodes: usize,
    pub sections: usize,
    pub location_restored: bool,
}

/// Applies `patch` to `view`, requests a refresh, and restores the location
/// captured before patching if it drifted.
pub async fn apply_patch(
    view: &dyn ViewPatcher,
    patch: &ViewPatch,
    project: &ProjectId,
    version: &str,
    events: &EventBus,
) -> PatchSummary {
    let before = view.location().await;
    let mut summary = PatchSummary::default();

    for (original, resolved) in &patch.images {
        let busted = append_query_param(resolved, CACHE_BUST_PARAM, version);
        summary.images += view.patch_image(original, &busted).await;
    }
    for (key, value) in &patch.text {
        summary.text_nodes += view.patch_text(key, value).await;
    }
    for key in &patch.removed_text {
        summary.cleared_text_nodes += view.clear_text(key).await;
    }
    for section in &patch.sections {
        if view.patch_section(section).await {
            summary.sections += 1;
        } else {
            debug!("Section {} is not rendered, skipping", section);
        }
    }

    events.emit(SyncEvent::RefreshRequested {
        project: project.clone(),
        scope: RefreshScope::Sections(patch.sections.clone()),
    });
    view.request_refresh().await;

    let after = view.location().await;
    if after != before {
        info!("Location drifted to {} during refresh, restoring {}", after, before);
        view.restore_location(&before).await;
        summary.location_restored = true;
    }

    info!(
        "Patched {} images, {} text nodes ({} removed), {} sections",
        summary.images, summary.text_nodes, summary.cleared_text_nodes, summary.sections
    );
    summary
}

// ── In-memory document ──────────────────────────────────────────

/// An `<img>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageElement {
    /// The reference the page was authored with.
    pub original: String,
    /// What the element currently shows.
    pub src: String,
}

/// A CSS rule with a `background-image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundRule {
    pub selector: String,
    pub original: String,
    pub url: String,
}

impl BackgroundRule {
    /// The rule as CSS text.
    #[must_use]
    pub fn css(&self) -> String {
        format!("{} {{ background-image: url(\"{}\"); }}", self.selector, self.url)
    }
}

/// An element whose text is bound to a content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    pub key: String,
    pub text: String,
}

/// Everything a [`DocumentView`] models.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    pub location: String,
    /// Locations pushed by navigation, oldest first.
    pub history: Vec<String>,
    pub images: Vec<ImageElement>,
    pub backgrounds: Vec<BackgroundRule>,
    pub text: Vec<TextNode>,
    /// Render count per content-block section.
    pub sections: BTreeMap<String, usize>,
    pub refreshes: usize,
    /// Where a refresh navigates to, simulating a router that rewrites the
    /// location when data changes.
    pub refresh_redirect: Option<String>,
}

impl DocumentState {
    /// Texts of the nodes tagged with `key`, in document order.
    #[must_use]
    pub fn texts(&self, key: &str) -> Vec<&str> {
        self.text
            .iter()
            .filter(|node| node.key == key)
            .map(|node| node.text.as_str())
            .collect()
    }
}

/// An in-memory page for headless use and tests.
#[derive(Debug, Default)]
pub struct DocumentView {
    state: Mutex<DocumentState>,
}

impl DocumentView {
    /// A page at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            state: Mutex::new(DocumentState {
                history: vec![location.clone()],
                location,
                ..DocumentState::default()
            }),
        }
    }

    pub fn with_image(self, original: impl Into<String>) -> Self {
        let original = original.into();
        lock(&self.state).images.push(ImageElement {
            src: original.clone(),
            original,
        });
        self
    }

    pub fn with_background(self, selector: impl Into<String>, original: impl Into<String>) -> Self {
        let original = original.into();
        lock(&self.state).backgrounds.push(BackgroundRule {
            selector: selector.into(),
            url: original.clone(),
            original,
        });
        self
    }

    /// Adds a text node. A key may tag any number of nodes.
    pub fn with_text(self, key: impl Into<String>, text: impl Into<String>) -> Self {
        lock(&self.state).text.push(TextNode {
            key: key.into(),
            text: text.into(),
        });
        self
    }

    pub fn with_section(self, section: impl Into<String>) -> Self {
        lock(&self.state).sections.insert(section.into(), 1);
        self
    }

    /// Makes every refresh navigate to `location`.
    pub fn redirect_on_refresh(self, location: impl Into<String>) -> Self {
        lock(&self.state).refresh_redirect = Some(location.into());
        self
    }

    /// Navigates, pushing a history entry.
    pub fn navigate(&self, location: impl Into<String>) {
        let mut state = lock(&self.state);
        state.location = location.into();
        let location = state.location.clone();
        state.history.push(location);
    }

    /// A copy of the current document.
    pub fn snapshot(&self) -> DocumentState {
        lock(&self.state).clone()
    }
}

#[async_trait]
impl ViewPatcher for DocumentView {
    async fn patch_image(&self, original: &str, resolved: &str) -> usize {
        let mut state = lock(&self.state);
        let mut updated = 0;
        for image in state.images.iter_mut().filter(|i| i.original == original) {
            image.src = resolved.to_string();
            updated += 1;
        }
        for rule in state.backgrounds.iter_mut().filter(|r| r.original == original) {
            rule.url = resolved.to_string();
            updated += 1;
        }
        updated
    }

    async fn patch_text(&self, key: &str, value: &str) -> usize {
        let mut state = lock(&self.state);
        let mut updated = 0;
        for node in state.text.iter_mut().filter(|n| n.key == key) {
            node.text = value.to_string();
            updated += 1;
        }
        updated
    }

    async fn clear_text(&self, key: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.text.len();
        state.text.retain(|n| n.key != key);
        before - state.text.len()
    }

    async fn patch_section(&self, section: &str) -> bool {
        match lock(&self.state).sections.get_mut(section) {
            Some(renders) => {
                *renders += 1;
                true
            }
            None => false,
        }
    }

    async fn location(&self) -> String {
        lock(&self.state).location.clone()
    }

    async fn restore_location(&self, location: &str) {
        let mut state = lock(&self.state);
        state.location = location.to_string();
        if let Some(last) = state.history.last_mut() {
            *last = location.to_string();
        }
    }

    async fn request_refresh(&self) {
        let mut state = lock(&self.state);
        state.refreshes += 1;
        if let Some(target) = state.refresh_redirect.clone() {
            state.location = target.clone();
            state.history.push(target);
        }
    }
}
