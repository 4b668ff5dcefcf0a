use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::{Date, OffsetDateTime};

/// One row per (user, calendar date). Source of truth for streak auditing,
/// independent of the mutable counters on [`crate::db::User`].
///
/// `activity_count` counts every qualifying call that day, weekends included;
/// `completed` is only ever set on a working day that was credited to the
/// streak.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct StreakHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub day: Date,
    pub completed: bool,
    pub activity_count: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
