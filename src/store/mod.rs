//! The data-store seam.
//!
//! Every engine component receives the handles it needs explicitly, so the
//! whole engine runs unchanged against Postgres ([`PgStore`]) or the
//! in-memory implementation ([`MemoryStore`]) used by tests and embedding
//! callers.

mod memory;
mod postgres;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::db::{
    Activity, DatabaseError, Enrollment, EnrollmentProgressUpdate, EnrollmentStatus,
    EnrollmentTransition, LearningPath, Module, ModuleProgress, ModuleProgressTransition,
    ModuleProgressWrite, NewActivity, NewPointsTransaction, NewQuizAttempt, PointAward,
    PointsTransaction, Quiz, QuizAttempt, QuizQuestion, StreakHistory, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Entity access for the progress engine.
///
/// The compound write methods (`apply_point_award`, `upsert_module_progress`,
/// `apply_enrollment_progress`, `record_streak_day`) are atomic: each
/// implementation executes them under per-entity locking and reports the
/// pre-write state, which is what callers base every first-time-completion
/// decision on.
#[async_trait]
pub trait Store: Send + Sync {
    // -- users & gamification state --

    async fn user(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    /// Append a ledger entry and roll the user's total and level forward in
    /// one step. Fails with [`DatabaseError::Duplicate`] when the
    /// (user, source, source_id) idempotency key already exists and with
    /// [`DatabaseError::NotFound`] for an unknown user.
    async fn apply_point_award(
        &self,
        award: &NewPointsTransaction,
    ) -> Result<PointAward, DatabaseError>;

    async fn transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PointsTransaction>, DatabaseError>;

    /// Reset `current_streak` to 0, leaving `longest_streak` and
    /// `last_active_date` untouched.
    async fn reset_streak(&self, user_id: Uuid) -> Result<(), DatabaseError>;

    async fn advance_streak(
        &self,
        user_id: Uuid,
        current: i32,
        longest: i32,
        last_active: OffsetDateTime,
    ) -> Result<(), DatabaseError>;

    /// Upsert the per-day history row: bumps `activity_count` and, when
    /// `credited` is set, marks the day completed.
    async fn record_streak_day(
        &self,
        user_id: Uuid,
        day: Date,
        credited: bool,
        now: OffsetDateTime,
    ) -> Result<StreakHistory, DatabaseError>;

    async fn streak_history(
        &self,
        user_id: Uuid,
        day: Date,
    ) -> Result<Option<StreakHistory>, DatabaseError>;

    // -- catalog --

    async fn learning_path(&self, id: Uuid) -> Result<Option<LearningPath>, DatabaseError>;

    async fn module(&self, id: Uuid) -> Result<Option<Module>, DatabaseError>;

    /// Count of all modules in the path, not just those with progress rows.
    async fn module_count(&self, learning_path_id: Uuid) -> Result<i64, DatabaseError>;

    // -- enrollments --

    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, DatabaseError>;

    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError>;

    /// Persist recomputed progress/status and report the previous status.
    /// `completed_at`/`final_score` from the update are only applied on a
    /// first transition into `Completed`.
    async fn apply_enrollment_progress(
        &self,
        id: Uuid,
        update: &EnrollmentProgressUpdate,
    ) -> Result<EnrollmentTransition, DatabaseError>;

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError>;

    /// Re-enrollment after a drop: status back to `Enrolled`, progress to 0,
    /// completion markers cleared. Module-progress rows are left in place.
    async fn reset_enrollment(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError>;

    // -- module progress --

    async fn module_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<ModuleProgress>, DatabaseError>;

    async fn module_progress_for_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<Vec<ModuleProgress>, DatabaseError>;

    /// Create-or-update the unique (enrollment, module) row and report the
    /// status it held before the write.
    async fn upsert_module_progress(
        &self,
        write: &ModuleProgressWrite,
    ) -> Result<ModuleProgressTransition, DatabaseError>;

    /// Whether any module of this user first completed on the given day.
    async fn module_completed_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError>;

    // -- quizzes --

    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, DatabaseError>;

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, DatabaseError>;

    /// Questions in quiz order.
    async fn quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<QuizQuestion>, DatabaseError>;

    async fn attempt_count(&self, user_id: Uuid, quiz_id: Uuid) -> Result<i64, DatabaseError>;

    /// Whether the user has any passed attempt for this quiz.
    async fn passed_before(&self, user_id: Uuid, quiz_id: Uuid) -> Result<bool, DatabaseError>;

    /// Whether a passed attempt exists for (user, quiz, enrollment) — the
    /// completion-gate predicate.
    async fn passed_attempt_exists(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        enrollment_id: Uuid,
    ) -> Result<bool, DatabaseError>;

    async fn insert_quiz_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttempt, DatabaseError>;

    /// Whether the user submitted any attempt (pass or fail) on the given day.
    async fn quiz_attempted_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError>;
}

/// Append-only activity feed collaborator.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn log_activity(&self, entry: &NewActivity) -> Result<Activity, DatabaseError>;

    /// Most recent first.
    async fn activities_for_user(&self, user_id: Uuid) -> Result<Vec<Activity>, DatabaseError>;
}
