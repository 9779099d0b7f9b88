//! Session configuration.

use livecopy_blobstore::AssetPolicy;
use livecopy_types::ChangeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default quiet period after the last accepted edit.
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_500;
/// Default minimum spacing between flush starts.
pub const DEFAULT_THROTTLE_MS: u64 = 5_000;
/// Default number of entries persisted per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Decides whether an edit differs enough from the queued value to be worth
/// persisting.
///
/// Text edits are measured by the changed span: the longer of the removed
/// and inserted runs once the common prefix and suffix are trimmed. An edit
/// is meaningful when that span is at least `min_char_delta` characters or
/// at least `min_relative_delta` of the previous length. Other kinds are
/// meaningful on any inequality. Setting `min_char_delta` to 0 accepts every
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangePolicy {
    /// Absolute length delta that always counts.
    pub min_char_delta: usize,
    /// Length delta relative to the previous value that always counts.
    pub min_relative_delta: f64,
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self {
            min_char_delta: 3,
            min_relative_delta: 0.10,
        }
    }
}

impl ChangePolicy {
    /// Returns true if `next` should replace `previous` in the queue.
    ///
    /// `previous` is `None` when the key has no queued value.
    #[must_use]
    pub fn is_meaningful(&self, kind: ChangeKind, previous: Option<&Value>, next: &Value) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if previous == next {
            return false;
        }
        if kind != ChangeKind::Text {
            return true;
        }

        let (Some(prev), Some(next)) = (previous.as_str(), next.as_str()) else {
            return true;
        };
        let prev: Vec<char> = prev.chars().collect();
        let next: Vec<char> = next.chars().collect();
        let delta = changed_span(&prev, &next);

        if delta >= self.min_char_delta {
            return true;
        }
        if prev.is_empty() {
            return !next.is_empty();
        }
        delta as f64 / prev.len() as f64 >= self.min_relative_delta
    }
}

fn changed_span(prev: &[char], next: &[char]) -> usize {
    let prefix = prev.iter().zip(next).take_while(|(a, b)| a == b).count();
    let suffix = prev[prefix..]
        .iter()
        .rev()
        .zip(next[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    (prev.len() - prefix - suffix).max(next.len() - prefix - suffix)
}

/// Configuration for an [`EditSession`](crate::EditSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last accepted edit before a flush (ms).
    pub debounce_ms: u64,
    /// Minimum time between flush starts (ms).
    pub throttle_ms: u64,
    /// Maximum entries per batch.
    pub batch_size: usize,
    /// Delay before the next batch when the queue is still non-empty (ms).
    pub batch_continuation_ms: u64,
    /// Maximum pending entries; the oldest are dropped beyond this.
    pub max_queue_size: usize,
    /// Time after which a batch or sync is declared stuck (ms).
    pub stuck_timeout_ms: u64,
    /// Keep persisted changes and captions after publishing.
    pub preserve_local_edits: bool,
    /// Capacity of the event channel.
    pub event_capacity: usize,
    /// Text change thresholds.
    pub change_policy: ChangePolicy,
    /// Limits for promoted assets.
    pub asset_policy: AssetPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            throttle_ms: DEFAULT_THROTTLE_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_continuation_ms: 100,
            max_queue_size: 100,
            stuck_timeout_ms: 15_000,
            preserve_local_edits: true,
            event_capacity: 64,
            change_policy: ChangePolicy::default(),
            asset_policy: AssetPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn batch_continuation(&self) -> Duration {
        Duration::from_millis(self.batch_continuation_ms)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SyncConfig = serde_json::from_value(json!({ "debounce_ms": 10 })).unwrap();
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.throttle_ms, DEFAULT_THROTTLE_MS);
        assert_eq!(config.change_policy, ChangePolicy::default());
    }

    #[test]
    fn changed_span_ignores_shared_context() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(changed_span(&chars("hello world"), &chars("hello brave world")), 6);
        assert_eq!(changed_span(&chars("A"), &chars("B")), 1);
        assert_eq!(changed_span(&chars("aaa"), &chars("aaaa")), 1);
        assert_eq!(changed_span(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn zero_char_delta_accepts_any_change() {
        let policy = ChangePolicy {
            min_char_delta: 0,
            min_relative_delta: 1.0,
        };
        let prev = json!("a long sentence of text");
        assert!(policy.is_meaningful(ChangeKind::Text, Some(&prev), &json!("a long sentence of texT")));
        assert!(!policy.is_meaningful(ChangeKind::Text, Some(&prev), &prev));
    }
}
