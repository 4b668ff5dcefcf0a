use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "module_progress_status", rename_all = "snake_case")]
pub enum ModuleProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    Skipped,
}

/// A user's state for one module within one enrollment. Unique per
/// (enrollment, module); created lazily on first access and never deleted
/// while the enrollment exists.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub enrollment_id: Uuid,
    pub status: ModuleProgressStatus,
    pub progress: f64,
    /// Seconds, monotonically non-decreasing.
    pub time_spent: i64,
    /// Quiz attempt count for this module.
    pub attempts: i32,
    /// Set once, on the module's first transition into `Completed`.
    pub points_earned: Option<i64>,
    /// Set once, from the initial quiz attempt only.
    pub quiz_score: Option<f64>,
    pub bookmarked: bool,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub last_accessed_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Caller-supplied patch for a module-progress update.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ModuleProgressPatch {
    pub status: Option<ModuleProgressStatus>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub progress: Option<f64>,
    /// Additional seconds spent, accumulated into `time_spent`.
    #[validate(range(min = 0))]
    pub time_spent: Option<i64>,
    pub bookmarked: Option<bool>,
}

/// Granular in-content tick (e.g. a video position report).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ContentProgressTick {
    #[validate(range(min = 0.0, max = 100.0))]
    pub progress: f64,
    /// Seconds of content consumed since the previous tick.
    #[validate(range(min = 0))]
    pub duration: Option<i64>,
    #[serde(default)]
    pub completed: bool,
}

/// Fully merged record handed to the store for an atomic upsert.
///
/// `time_spent_delta` and `attempts_delta` are additive so concurrent writers
/// cannot lose increments; `quiz_score` and `points_earned` are only honored
/// when the stored row has not set them yet; `started_at`/`completed_at`
/// never overwrite an existing value.
#[derive(Debug, Clone)]
pub struct ModuleProgressWrite {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub enrollment_id: Uuid,
    pub status: ModuleProgressStatus,
    pub progress: f64,
    pub time_spent_delta: i64,
    pub attempts_delta: i32,
    pub points_earned: Option<i64>,
    pub quiz_score: Option<f64>,
    pub bookmarked: Option<bool>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub last_accessed_at: OffsetDateTime,
}

/// Result of an atomic module-progress upsert: the stored row plus the status
/// held before the write (`None` when the row was just created).
#[derive(Debug, Clone)]
pub struct ModuleProgressTransition {
    pub progress: ModuleProgress,
    pub previous_status: Option<ModuleProgressStatus>,
}

impl ModuleProgressTransition {
    /// True when this write moved the module into `Completed` for the first
    /// time.
    pub fn first_completion(&self) -> bool {
        self.progress.status == ModuleProgressStatus::Completed
            && self.previous_status != Some(ModuleProgressStatus::Completed)
    }
}
