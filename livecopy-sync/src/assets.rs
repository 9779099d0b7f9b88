//! Asset promotion and garbage collection.
//!
//! Editors paste images as `data:` URLs. Before a snapshot may reference
//! them they are decoded, validated and uploaded to the blob store, and the
//! resulting durable URL replaces the inline payload. After a publish,
//! uploads that the new snapshot no longer references are deleted.

use crate::PromotionError;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use livecopy_blobstore::{AssetPolicy, BlobStore, BlobStoreError, ImageFormat};
use livecopy_types::{ContentBlock, ProjectId, PublishedSnapshot, ReferenceKind, classify_reference, is_inline_payload};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    /// Declared media type, lowercased, without parameters.
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl InlinePayload {
    /// Parses `data:[<mime>][;param]*[;base64],<data>`.
    ///
    /// Base64 bodies may use the standard or URL-safe alphabet and may be
    /// unpadded or wrapped; other bodies are percent-decoded.
    pub fn parse(input: &str) -> Result<Self, PromotionError> {
        let input = input.trim();
        let rest = input
            .get(..5)
            .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
            .map(|_| &input[5..])
            .ok_or_else(|| PromotionError::Malformed("missing data: scheme".into()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| PromotionError::Malformed("missing ',' separator".into()))?;

        let mut params = header.split(';');
        let mime = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));
        let mime = if mime.is_empty() {
            "text/plain".to_string()
        } else {
            mime
        };

        let bytes = if is_base64 {
            decode_base64(data)?
        } else {
            urlencoding::decode_binary(data.as_bytes()).into_owned()
        };
        Ok(Self { mime, bytes })
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, PromotionError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let padded = match compact.len() % 4 {
        0 => compact,
        n => format!("{compact}{}", "=".repeat(4 - n)),
    };
    match STANDARD.decode(&padded) {
        Ok(bytes) => Ok(bytes),
        Err(e) if padded.contains(['-', '_']) => URL_SAFE.decode(&padded).map_err(|_| e.into()),
        Err(e) => Err(e.into()),
    }
}

/// Blob path for an uploaded asset: `<project>/<sha256>.<ext>`.
///
/// Names are content-addressed, so re-promoting an unchanged image yields
/// the URL the live snapshot already serves.
#[must_use]
pub fn asset_path(project: &ProjectId, bytes: &[u8], format: ImageFormat) -> String {
    format!(
        "{}/{}.{}",
        project,
        hex::encode(Sha256::digest(bytes)),
        format.extension()
    )
}

/// Assets deleted (or not) by a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Turns image references into durable URLs and cleans up after publishes.
#[derive(Clone)]
pub struct AssetPromoter {
    blobs: Arc<dyn BlobStore>,
    policy: AssetPolicy,
}

impl AssetPromoter {
    pub fn new(blobs: Arc<dyn BlobStore>, policy: AssetPolicy) -> Self {
        Self { blobs, policy }
    }

    /// The underlying blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Returns a durable URL for `input`.
    ///
    /// Durable URLs pass through unchanged. Inline payloads are uploaded.
    /// Everything else fails.
    pub async fn promote(&self, project: &ProjectId, input: &str) -> Result<String, PromotionError> {
        match classify_reference(input) {
            ReferenceKind::AbsoluteUrl | ReferenceKind::RootRelative => Ok(input.trim().to_string()),
            ReferenceKind::Inline => {
                let payload = InlinePayload::parse(input)?;
                let format = self.policy.validate(&payload.bytes, &payload.mime)?;
                let path = asset_path(project, &payload.bytes, format);
                let url = self.blobs.put(&path, &payload.bytes, format.mime()).await?;
                info!("Promoted {} byte {} image to {}", payload.bytes.len(), format.mime(), url);
                Ok(url)
            }
            ReferenceKind::Other => Err(PromotionError::Unsupported(abbreviate(input))),
        }
    }

    /// Promotes every inline image inside a content block.
    ///
    /// Fails on the first image that cannot be promoted; the caller drops
    /// the block in that case.
    pub async fn resolve_block(&self, project: &ProjectId, block: &ContentBlock) -> Result<ContentBlock, PromotionError> {
        let mut pointers = Vec::new();
        inline_pointers(block.as_value(), String::new(), &mut pointers);
        if pointers.is_empty() {
            return Ok(block.clone());
        }

        let mut resolved = block.clone();
        for pointer in pointers {
            let Some(slot) = resolved.as_value_mut().pointer_mut(&pointer) else {
                continue;
            };
            let Some(inline) = slot.as_str().map(str::to_string) else {
                continue;
            };
            let url = self.promote(project, &inline).await?;
            *slot = Value::String(url);
        }
        Ok(resolved)
    }

    /// Deletes assets the published snapshot no longer references.
    ///
    /// Two sets are removed: URLs referenced by `previous` but not by
    /// `current` that this blob store owns, and every asset stored under the
    /// project prefix that neither `current` nor `keep` references. Errors
    /// are collected, never returned.
    pub async fn collect_garbage(
        &self,
        project: &ProjectId,
        previous: &PublishedSnapshot,
        current: &PublishedSnapshot,
        keep: &BTreeSet<String>,
    ) -> GcReport {
        let live: BTreeSet<String> = current.referenced_urls().union(keep).cloned().collect();

        let mut doomed: BTreeSet<String> = previous
            .referenced_urls()
            .into_iter()
            .filter(|url| !live.contains(url) && self.blobs.owns(url))
            .collect();

        match self.blobs.list(&format!("{project}/")).await {
            Ok(stored) => doomed.extend(stored.into_iter().filter(|url| !live.contains(url))),
            Err(e) => warn!("Could not list assets for {}: {}", project, e),
        }

        let mut report = GcReport::default();
        for url in doomed {
            match self.blobs.delete(&url).await {
                Ok(()) | Err(BlobStoreError::NotFound(_)) => report.deleted.push(url),
                Err(e) => {
                    warn!("Failed to delete unused asset {}: {}", url, e);
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        if !report.deleted.is_empty() {
            info!("Deleted {} unused assets for {}", report.deleted.len(), project);
        }
        report
    }
}

/// JSON pointers of every inline payload string inside `value`.
fn inline_pointers(value: &Value, path: String, out: &mut Vec<String>) {
    match value {
        Value::String(s) if is_inline_payload(s) => out.push(path),
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                inline_pointers(item, format!("{path}/{idx}"), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let escaped = key.replace('~', "~0").replace('/', "~1");
                inline_pointers(item, format!("{path}/{escaped}"), out);
            }
        }
        _ => {}
    }
}

fn abbreviate(reference: &str) -> String {
    const MAX: usize = 48;
    match reference.char_indices().nth(MAX) {
        Some((idx, _)) => {
            debug!("Abbreviating {} byte reference", reference.len());
            format!("{}...", &reference[..idx])
        }
        None => reference.to_string(),
    }
}
