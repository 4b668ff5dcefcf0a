//! Notification dispatch collaborator.
//!
//! The engine only decides that a notification should go out and with what
//! semantic payload; delivery is someone else's problem. Dispatch is
//! fire-and-forget: implementations swallow their own failures, which never
//! roll back progress or points state.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    Achievement,
    LevelUp,
    ModuleCompletion,
    PathCompletion,
    StreakMilestone,
    StatusUpdate,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value);
}

/// Logs every notification through `tracing`. The default dispatcher when no
/// delivery transport is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        tracing::info!(%user_id, ?kind, %payload, "notification queued");
    }
}

/// Captures notifications for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, NotificationKind, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Uuid, NotificationKind, serde_json::Value)> {
        self.sent.lock().expect("notifier lock").clone()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .expect("notifier lock")
            .iter()
            .filter(|(_, sent_kind, _)| *sent_kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        self.sent
            .lock()
            .expect("notifier lock")
            .push((user_id, kind, payload));
    }
}
