//! Session events for UI observers.
//!
//! Observers call `subscribe()` on an [`EditSession`](crate::EditSession) or
//! [`Publisher`](crate::Publisher) and receive every event sent after that
//! point. Slow receivers lag rather than block the engine.

use crate::SyncState;
use livecopy_types::ProjectId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A short message meant for the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// What a refresh request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    /// Everything on the page may be stale.
    All,
    /// Only these content-block sections changed. Empty when a publish
    /// touched text or images only.
    Sections(Vec<String>),
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A new snapshot was published for the project.
    ProjectDataChanged { project: ProjectId },
    /// Views should re-render data-bound components in `scope`.
    RefreshRequested {
        project: ProjectId,
        scope: RefreshScope,
    },
    /// A message for the editor.
    Notice(Notice),
    /// The session state changed.
    StateChanged(SyncState),
}

/// Broadcast channel shared by a session and its publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Sends an event. Having no observers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event observers");
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(SyncEvent::Notice(notice));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
