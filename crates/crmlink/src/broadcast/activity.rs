//! Activity broadcasting for linking and scanner events.
//!
//! The engine and the scanner receive an [`ActivityLog`] at construction and
//! report every outcome through it, next to their `tracing` output. Hosts
//! subscribe to stream events to a UI or an API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Linked,
    NoMatch,
    AlreadyLinked,
    Skipped,
    AccessDenied,
    ResolverFailed,
    CycleCompleted,
    CycleFailed,
    ScannerStarted,
    ScannerStopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub text: String,
}

impl ActivityEvent {
    pub fn new(level: &str, kind: ActivityKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string(),
            kind,
            tenant: None,
            message_id: None,
            text: text.into(),
        }
    }

    pub fn for_message(mut self, tenant: i64, message_id: i64) -> Self {
        self.tenant = Some(tenant);
        self.message_id = Some(message_id);
        self
    }

    pub fn for_tenant(mut self, tenant: i64) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

#[derive(Clone)]
pub struct ActivityLog {
    sender: broadcast::Sender<ActivityEvent>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: ActivityEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.sender.subscribe()
    }

    pub fn info(&self, kind: ActivityKind, tenant: i64, message_id: i64, text: impl Into<String>) {
        self.send(ActivityEvent::new("INFO", kind, text).for_message(tenant, message_id));
    }

    pub fn warn(&self, kind: ActivityKind, tenant: i64, message_id: i64, text: impl Into<String>) {
        self.send(ActivityEvent::new("WARN", kind, text).for_message(tenant, message_id));
    }

    /// Reports a scanner-level event not tied to one message.
    pub fn scanner(&self, level: &str, kind: ActivityKind, text: impl Into<String>) {
        self.send(ActivityEvent::new(level, kind, text));
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
