//! The published snapshot: the only artifact the public site reads.

use crate::{ProjectId, Timestamp, is_durable_url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Prefix under which captions are merged into `text_content`.
pub const CAPTION_NAMESPACE: &str = "caption::";

/// Prefix of caption keys written by older editors directly into the text
/// keyspace. These are stripped at publish time.
pub const LEGACY_CAPTION_PREFIX: &str = "caption_";

/// Returns the namespaced text key for an image caption.
#[must_use]
pub fn caption_key(image_key: &str) -> String {
    format!("{CAPTION_NAMESPACE}{image_key}")
}

/// Returns true if `key` lives in the caption namespace.
#[must_use]
pub fn is_caption_key(key: &str) -> bool {
    key.starts_with(CAPTION_NAMESPACE)
}

/// Returns true if `key` is a caption key in the legacy text keyspace.
#[must_use]
pub fn is_legacy_caption_key(key: &str) -> bool {
    key.starts_with(LEGACY_CAPTION_PREFIX)
}

/// One rich content block. The engine treats blocks as opaque JSON objects;
/// only embedded image references are inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentBlock(Value);

impl ContentBlock {
    /// Wraps a JSON value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The block's `id` field, if it has one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Borrow the raw JSON.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Mutably borrow the raw JSON.
    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    /// Unwraps the raw JSON.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Every string leaf of the block that is a durable URL.
    #[must_use]
    pub fn durable_urls(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_urls(&self.0, &mut out);
        out
    }
}

fn collect_urls<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) if is_durable_url(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_urls(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_urls(v, out)),
        _ => {}
    }
}

impl From<Value> for ContentBlock {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// The authoritative live state of a project.
///
/// Invariant: every value of `image_replacements` is a durable URL. The
/// publish engine filters anything else before committing a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedSnapshot {
    pub project_id: ProjectId,
    #[serde(default)]
    pub text_content: BTreeMap<String, String>,
    #[serde(default)]
    pub image_replacements: BTreeMap<String, String>,
    #[serde(default)]
    pub content_blocks: BTreeMap<String, Vec<ContentBlock>>,
    pub published_at: Timestamp,
}

impl PublishedSnapshot {
    /// An empty baseline for a project that was never published.
    #[must_use]
    pub fn empty(project_id: ProjectId) -> Self {
        Self {
            project_id,
            text_content: BTreeMap::new(),
            image_replacements: BTreeMap::new(),
            content_blocks: BTreeMap::new(),
            published_at: Timestamp::from_millis(0),
        }
    }

    /// True when nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_content.is_empty()
            && self.image_replacements.is_empty()
            && self.content_blocks.is_empty()
    }

    /// Every durable URL the snapshot references, from image replacements and
    /// from content blocks.
    #[must_use]
    pub fn referenced_urls(&self) -> BTreeSet<String> {
        let mut urls: BTreeSet<String> = self
            .image_replacements
            .values()
            .filter(|v| is_durable_url(v))
            .cloned()
            .collect();
        for block in self.content_blocks.values().flatten() {
            urls.extend(block.durable_urls().into_iter().map(str::to_string));
        }
        urls
    }

    /// Checks the durable-URL invariant.
    #[must_use]
    pub fn images_are_durable(&self) -> bool {
        self.image_replacements.values().all(|v| is_durable_url(v))
    }
}
