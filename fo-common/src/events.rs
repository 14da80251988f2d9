//! Event types for the inbox event system
//!
//! Provides shared event definitions and the EventBus used by the inbox
//! services and the SSE endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Lifecycle status of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Bypassed,
}

impl FileStatus {
    /// Terminal statuses end a pipeline run
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Error | FileStatus::Bypassed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Error => "error",
            FileStatus::Bypassed => "bypassed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of ingestion queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items admitted but not started
    pub queued: usize,
    /// Items currently running
    pub processing: usize,
    pub completed: usize,
    pub errors: usize,
    pub bypassed: usize,
    /// Held items plus every terminal bucket
    pub total: usize,
}

/// Inbox event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboxEvent {
    /// File admitted into the ingestion queue
    FileQueued {
        hash: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Record status transition
    StatusChanged {
        hash: String,
        status: FileStatus,
        timestamp: DateTime<Utc>,
    },

    /// File disqualified and parked in the bypass folder
    FileBypassed {
        hash: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// File relocated inside the vault
    FileMoved {
        hash: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// File renamed in place
    FileRenamed {
        hash: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline step failed
    FileFailed {
        hash: String,
        step: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline finished for a file
    FileCompleted {
        hash: String,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue counters changed
    QueueStats {
        stats: QueueStats,
        timestamp: DateTime<Utc>,
    },

    /// Nothing pending and nothing active
    QueueDrained { timestamp: DateTime<Utc> },
}

impl InboxEvent {
    /// Event type name, used as the SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            InboxEvent::FileQueued { .. } => "FileQueued",
            InboxEvent::StatusChanged { .. } => "StatusChanged",
            InboxEvent::FileBypassed { .. } => "FileBypassed",
            InboxEvent::FileMoved { .. } => "FileMoved",
            InboxEvent::FileRenamed { .. } => "FileRenamed",
            InboxEvent::FileFailed { .. } => "FileFailed",
            InboxEvent::FileCompleted { .. } => "FileCompleted",
            InboxEvent::QueueStats { .. } => "QueueStats",
            InboxEvent::QueueDrained { .. } => "QueueDrained",
        }
    }

    /// Hash of the file the event concerns, if any
    pub fn hash(&self) -> Option<&str> {
        match self {
            InboxEvent::FileQueued { hash, .. }
            | InboxEvent::StatusChanged { hash, .. }
            | InboxEvent::FileBypassed { hash, .. }
            | InboxEvent::FileMoved { hash, .. }
            | InboxEvent::FileRenamed { hash, .. }
            | InboxEvent::FileFailed { hash, .. }
            | InboxEvent::FileCompleted { hash, .. } => Some(hash),
            InboxEvent::QueueStats { .. } | InboxEvent::QueueDrained { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and lose
/// the oldest events rather than blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InboxEvent>,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: InboxEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained() -> InboxEvent {
        InboxEvent::QueueDrained {
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(10);
        bus.emit_lossy(drained());

        // Late subscribers only see events emitted after they joined
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
        bus.emit_lossy(drained());
        assert_eq!(rx.try_recv().unwrap().event_type(), "QueueDrained");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit_lossy(InboxEvent::FileQueued {
            hash: "abcdef012345".to_string(),
            name: "note.md".to_string(),
            timestamp: Utc::now(),
        });
        bus.emit_lossy(drained());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "FileQueued");
        assert_eq!(first.hash(), Some("abcdef012345"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "QueueDrained");
        assert_eq!(second.hash(), None);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = InboxEvent::StatusChanged {
            hash: "abcdef012345".to_string(),
            status: FileStatus::Bypassed,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StatusChanged");
        assert_eq!(json["status"], "bypassed");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!FileStatus::Queued.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
        assert!(FileStatus::Completed.is_terminal());
        assert!(FileStatus::Error.is_terminal());
        assert!(FileStatus::Bypassed.is_terminal());
        assert_eq!(FileStatus::Error.to_string(), "error");
    }
}
