use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "activity_type", rename_all = "snake_case")]
pub enum ActivityType {
    Login,
    ModuleCompleted,
    QuizPassed,
    PathCompleted,
    LevelUp,
    StreakMilestone,
}

/// Append-only audit/feed row for a domain event. Never mutated after
/// creation.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub activity_type: ActivityType,
    pub description: String,
    pub metadata: serde_json::Value,
    /// Snapshot of the points granted by the event, 0 for revisions.
    pub points_earned: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Uuid,
    pub activity_type: ActivityType,
    pub description: String,
    pub metadata: serde_json::Value,
    pub points_earned: i64,
    pub created_at: OffsetDateTime,
}
