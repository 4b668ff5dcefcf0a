use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

/// Identity plus gamification state.
///
/// Point and level fields are mutated only by the points ledger; streak
/// fields only by the streak tracker. None of them ever decrease, except
/// `current_streak` which resets to 0 on a broken streak.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub total_points: i64,
    pub current_level: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    /// Date of the last credited streak day.
    pub last_active_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Fresh user with zeroed gamification state.
    pub fn new(
        email: impl Into<String>,
        display_name: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            display_name: display_name.into(),
            total_points: 0,
            current_level: 1,
            current_streak: 0,
            longest_streak: 0,
            last_active_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}
