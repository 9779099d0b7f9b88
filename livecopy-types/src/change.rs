//! Change records: the atomic unit of an in-place edit.
//!
//! A [`ChangeRecord`] lives in the session's pending queue until it is
//! written to the persistence store, where it becomes a
//! [`PersistedChange`]. Both are identified by `(kind, key)`; the persisted
//! form adds the project.

use crate::{ChangeId, Error, ProjectId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What an edit touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A text node, keyed by its content key.
    Text,
    /// An image, keyed by the original image reference it replaces.
    Image,
    /// A content-block section, keyed by the section id.
    ContentBlock,
}

impl ChangeKind {
    /// All kinds, in publish order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Text, ChangeKind::Image, ChangeKind::ContentBlock];

    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Text => "text",
            ChangeKind::Image => "image",
            ChangeKind::ContentBlock => "content_block",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ChangeKind::Text),
            "image" => Ok(ChangeKind::Image),
            "content_block" | "content-block" => Ok(ChangeKind::ContentBlock),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// A pending edit held in memory until it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Unique identifier; changes whenever the record is superseded.
    pub id: ChangeId,
    /// What the edit touches.
    pub kind: ChangeKind,
    /// Text key, original image reference, or section id.
    pub key: String,
    /// The new value.
    pub value: Value,
    /// When the edit was made.
    pub timestamp: Timestamp,
}

impl ChangeRecord {
    /// Creates a new record stamped with the current time.
    #[must_use]
    pub fn new(kind: ChangeKind, key: impl Into<String>, value: Value) -> Self {
        Self {
            id: ChangeId::new(),
            kind,
            key: key.into(),
            value,
            timestamp: Timestamp::now(),
        }
    }

    /// Returns the deduplication identity.
    #[must_use]
    pub fn identity(&self) -> (ChangeKind, &str) {
        (self.kind, self.key.as_str())
    }

    /// Returns the value as a string when it is one.
    #[must_use]
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// The durable form of a change, keyed by `(project, kind, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedChange {
    pub project: ProjectId,
    pub kind: ChangeKind,
    pub key: String,
    pub value: Value,
    pub updated_at: Timestamp,
}

impl PersistedChange {
    /// Builds the persisted form of a pending record.
    #[must_use]
    pub fn from_record(project: &ProjectId, record: &ChangeRecord) -> Self {
        Self {
            project: project.clone(),
            kind: record.kind,
            key: record.key.clone(),
            value: record.value.clone(),
            updated_at: record.timestamp,
        }
    }
}
