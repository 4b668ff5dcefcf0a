use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "enrollment_status", rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    InProgress,
    Completed,
    Dropped,
}

/// A user's tracked participation in one learning path.
///
/// `progress` is always a function of the enrollment's module-progress rows;
/// it is never set directly except on enrollment reset.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub learning_path_id: Uuid,
    pub status: EnrollmentStatus,
    /// Aggregate progress, 0-100, rounded to two decimals.
    pub progress: f64,
    pub completed_at: Option<OffsetDateTime>,
    pub final_score: Option<f64>,
    pub last_activity_at: OffsetDateTime,
    pub enrolled_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Enrollment {
    pub fn new(user_id: Uuid, learning_path_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            learning_path_id,
            status: EnrollmentStatus::Enrolled,
            progress: 0.0,
            completed_at: None,
            final_score: None,
            last_activity_at: now,
            enrolled_at: now,
            updated_at: now,
        }
    }
}

/// Write record for the unconditional persist step of the enrollment
/// recompute. `completed_at`/`final_score` are only honored by the store on a
/// first transition into `Completed`.
#[derive(Debug, Clone)]
pub struct EnrollmentProgressUpdate {
    pub progress: f64,
    pub status: EnrollmentStatus,
    pub last_activity_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub final_score: Option<f64>,
}

/// Result of an atomic enrollment progress write: the stored row plus the
/// status it held before the write.
#[derive(Debug, Clone)]
pub struct EnrollmentTransition {
    pub enrollment: Enrollment,
    pub previous_status: EnrollmentStatus,
}

impl EnrollmentTransition {
    /// True when this write moved the enrollment into `Completed` for the
    /// first time.
    pub fn first_completion(&self) -> bool {
        self.enrollment.status == EnrollmentStatus::Completed
            && self.previous_status != EnrollmentStatus::Completed
    }
}
