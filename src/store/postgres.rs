//! Postgres-backed [`Store`] and [`ActivityFeed`] implementation.
//!
//! Compound writes run inside a transaction with the affected row locked
//! (`SELECT … FOR UPDATE`), so every first-time-completion decision reads a
//! status no concurrent writer can invalidate. The ledger's uniqueness
//! constraint on (user_id, source, source_id) backs this up as an
//! idempotency key.

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::db::{
    Activity, DatabaseError, Enrollment, EnrollmentProgressUpdate, EnrollmentStatus,
    EnrollmentTransition, LearningPath, Module, ModuleProgress, ModuleProgressTransition,
    ModuleProgressWrite, NewActivity, NewPointsTransaction, NewQuizAttempt, PointAward,
    PointsTransaction, Quiz, QuizAttempt, QuizQuestion, StreakHistory, TransactionType, User,
};
use crate::services::levels;

use super::{ActivityFeed, Store};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn day_bounds(day: Date) -> (OffsetDateTime, OffsetDateTime) {
    let start = day.midnight().assume_utc();
    (start, start + time::Duration::days(1))
}

#[async_trait]
impl Store for PgStore {
    async fn user(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn apply_point_award(
        &self,
        award: &NewPointsTransaction,
    ) -> Result<PointAward, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(award.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or(DatabaseError::NotFound)?;

        let previous_points = user.total_points;
        let previous_level = user.current_level;
        let new_points = previous_points + award.amount;
        let new_level = levels::level_for(new_points);

        let transaction = sqlx::query_as::<_, PointsTransaction>(
            r#"
            INSERT INTO points_transactions
                (id, user_id, tx_type, amount, balance, source, source_id, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(award.user_id)
        .bind(TransactionType::Earned)
        .bind(award.amount)
        .bind(new_points)
        .bind(award.source.clone())
        .bind(award.source_id)
        .bind(&award.description)
        .bind(award.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "UPDATE users SET total_points = $2, current_level = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(award.user_id)
        .bind(new_points)
        .bind(new_level)
        .bind(award.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(PointAward {
            transaction,
            previous_points,
            new_points,
            previous_level,
            new_level,
        })
    }

    async fn transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PointsTransaction>, DatabaseError> {
        sqlx::query_as::<_, PointsTransaction>(
            "SELECT * FROM points_transactions WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn reset_streak(&self, user_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE users SET current_streak = 0 WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn advance_streak(
        &self,
        user_id: Uuid,
        current: i32,
        longest: i32,
        last_active: OffsetDateTime,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET current_streak = $2, longest_streak = $3, last_active_date = $4, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(current)
        .bind(longest)
        .bind(last_active)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    async fn record_streak_day(
        &self,
        user_id: Uuid,
        day: Date,
        credited: bool,
        now: OffsetDateTime,
    ) -> Result<StreakHistory, DatabaseError> {
        sqlx::query_as::<_, StreakHistory>(
            r#"
            INSERT INTO streak_history (id, user_id, day, completed, activity_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5, $5)
            ON CONFLICT (user_id, day) DO UPDATE SET
                activity_count = streak_history.activity_count + 1,
                completed = streak_history.completed OR EXCLUDED.completed,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(day)
        .bind(credited)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn streak_history(
        &self,
        user_id: Uuid,
        day: Date,
    ) -> Result<Option<StreakHistory>, DatabaseError> {
        sqlx::query_as::<_, StreakHistory>(
            "SELECT * FROM streak_history WHERE user_id = $1 AND day = $2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn learning_path(&self, id: Uuid) -> Result<Option<LearningPath>, DatabaseError> {
        sqlx::query_as::<_, LearningPath>("SELECT * FROM learning_paths WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn module(&self, id: Uuid) -> Result<Option<Module>, DatabaseError> {
        sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn module_count(&self, learning_path_id: Uuid) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM modules WHERE learning_path_id = $1")
            .bind(learning_path_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, DatabaseError> {
        sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError> {
        sqlx::query_as::<_, Enrollment>(
            "SELECT * FROM enrollments WHERE user_id = $1 ORDER BY enrolled_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn apply_enrollment_progress(
        &self,
        id: Uuid,
        update: &EnrollmentProgressUpdate,
    ) -> Result<EnrollmentTransition, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let existing =
            sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .ok_or(DatabaseError::NotFound)?;

        let previous_status = existing.status.clone();
        let first_completion = update.status == EnrollmentStatus::Completed
            && previous_status != EnrollmentStatus::Completed;

        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            UPDATE enrollments
            SET status = $2,
                progress = $3,
                last_activity_at = $4,
                updated_at = $4,
                completed_at = CASE WHEN $5 THEN COALESCE(completed_at, $6) ELSE completed_at END,
                final_score = CASE WHEN $5 THEN $7 ELSE final_score END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status.clone())
        .bind(update.progress)
        .bind(update.last_activity_at)
        .bind(first_completion)
        .bind(update.completed_at)
        .bind(update.final_score)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(EnrollmentTransition {
            enrollment,
            previous_status,
        })
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError> {
        sqlx::query_as::<_, Enrollment>(
            r#"
            UPDATE enrollments
            SET status = $2, last_activity_at = $3, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(DatabaseError::NotFound)
    }

    async fn reset_enrollment(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError> {
        sqlx::query_as::<_, Enrollment>(
            r#"
            UPDATE enrollments
            SET status = 'enrolled', progress = 0, completed_at = NULL, final_score = NULL,
                last_activity_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(DatabaseError::NotFound)
    }

    async fn module_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<ModuleProgress>, DatabaseError> {
        sqlx::query_as::<_, ModuleProgress>(
            "SELECT * FROM module_progress WHERE enrollment_id = $1 AND module_id = $2",
        )
        .bind(enrollment_id)
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn module_progress_for_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<Vec<ModuleProgress>, DatabaseError> {
        sqlx::query_as::<_, ModuleProgress>(
            "SELECT * FROM module_progress WHERE enrollment_id = $1",
        )
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_module_progress(
        &self,
        write: &ModuleProgressWrite,
    ) -> Result<ModuleProgressTransition, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let existing = sqlx::query_as::<_, ModuleProgress>(
            "SELECT * FROM module_progress WHERE enrollment_id = $1 AND module_id = $2 FOR UPDATE",
        )
        .bind(write.enrollment_id)
        .bind(write.module_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let previous_status = existing.as_ref().map(|row| row.status.clone());

        let progress = match existing {
            Some(existing) => {
                sqlx::query_as::<_, ModuleProgress>(
                    r#"
                    UPDATE module_progress
                    SET status = $2,
                        progress = $3,
                        time_spent = time_spent + $4,
                        attempts = attempts + $5,
                        points_earned = COALESCE(points_earned, $6),
                        quiz_score = COALESCE(quiz_score, $7),
                        bookmarked = COALESCE($8, bookmarked),
                        started_at = COALESCE(started_at, $9),
                        completed_at = COALESCE(completed_at, $10),
                        last_accessed_at = $11,
                        updated_at = $11
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(existing.id)
                .bind(write.status.clone())
                .bind(write.progress)
                .bind(write.time_spent_delta)
                .bind(write.attempts_delta)
                .bind(write.points_earned)
                .bind(write.quiz_score)
                .bind(write.bookmarked)
                .bind(write.started_at)
                .bind(write.completed_at)
                .bind(write.last_accessed_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
            None => {
                sqlx::query_as::<_, ModuleProgress>(
                    r#"
                    INSERT INTO module_progress
                        (id, user_id, module_id, enrollment_id, status, progress, time_spent,
                         attempts, points_earned, quiz_score, bookmarked, started_at,
                         completed_at, last_accessed_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, GREATEST($7, 0), GREATEST($8, 0), $9, $10,
                            COALESCE($11, FALSE), $12, $13, $14, $14, $14)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(write.user_id)
                .bind(write.module_id)
                .bind(write.enrollment_id)
                .bind(write.status.clone())
                .bind(write.progress)
                .bind(write.time_spent_delta)
                .bind(write.attempts_delta)
                .bind(write.points_earned)
                .bind(write.quiz_score)
                .bind(write.bookmarked)
                .bind(write.started_at)
                .bind(write.completed_at)
                .bind(write.last_accessed_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(ModuleProgressTransition {
            progress,
            previous_status,
        })
    }

    async fn module_completed_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError> {
        let (start, end) = day_bounds(day);
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM module_progress
                WHERE user_id = $1 AND completed_at >= $2 AND completed_at < $3
            )
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, DatabaseError> {
        sqlx::query_as::<_, Quiz>("SELECT * FROM quizzes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, DatabaseError> {
        sqlx::query_as::<_, Quiz>("SELECT * FROM quizzes WHERE module_id = $1")
            .bind(module_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<QuizQuestion>, DatabaseError> {
        sqlx::query_as::<_, QuizQuestion>(
            r#"SELECT * FROM quiz_questions WHERE quiz_id = $1 ORDER BY "position""#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn attempt_count(&self, user_id: Uuid, quiz_id: Uuid) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2",
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn passed_before(&self, user_id: Uuid, quiz_id: Uuid) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM quiz_attempts
                WHERE user_id = $1 AND quiz_id = $2 AND passed
            )
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn passed_attempt_exists(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        enrollment_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM quiz_attempts
                WHERE user_id = $1 AND quiz_id = $2 AND enrollment_id = $3 AND passed
            )
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .bind(enrollment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_quiz_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttempt, DatabaseError> {
        sqlx::query_as::<_, QuizAttempt>(
            r#"
            INSERT INTO quiz_attempts
                (id, quiz_id, enrollment_id, user_id, attempt_number, score, percentage,
                 passed, answers, detailed_results, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt.quiz_id)
        .bind(attempt.enrollment_id)
        .bind(attempt.user_id)
        .bind(attempt.attempt_number)
        .bind(attempt.score)
        .bind(attempt.percentage)
        .bind(attempt.passed)
        .bind(&attempt.answers)
        .bind(&attempt.detailed_results)
        .bind(attempt.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn quiz_attempted_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError> {
        let (start, end) = day_bounds(day);
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM quiz_attempts
                WHERE user_id = $1 AND completed_at >= $2 AND completed_at < $3
            )
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl ActivityFeed for PgStore {
    async fn log_activity(&self, entry: &NewActivity) -> Result<Activity, DatabaseError> {
        sqlx::query_as::<_, Activity>(
            r#"
            INSERT INTO activities
                (id, user_id, activity_type, description, metadata, points_earned, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.activity_type.clone())
        .bind(&entry.description)
        .bind(&entry.metadata)
        .bind(entry.points_earned)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn activities_for_user(&self, user_id: Uuid) -> Result<Vec<Activity>, DatabaseError> {
        sqlx::query_as::<_, Activity>(
            "SELECT * FROM activities WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
