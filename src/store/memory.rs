//! In-memory [`Store`] and [`ActivityFeed`] implementation.
//!
//! Backs the engine's test suite and is useful for embedding callers that do
//! not want a database. A single mutex around the whole state map makes every
//! compound write trivially atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
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

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    learning_paths: HashMap<Uuid, LearningPath>,
    modules: HashMap<Uuid, Module>,
    enrollments: HashMap<Uuid, Enrollment>,
    /// Keyed by (enrollment_id, module_id) — the uniqueness the schema
    /// enforces.
    module_progress: HashMap<(Uuid, Uuid), ModuleProgress>,
    quizzes: HashMap<Uuid, Quiz>,
    quiz_questions: Vec<QuizQuestion>,
    quiz_attempts: Vec<QuizAttempt>,
    transactions: Vec<PointsTransaction>,
    streak_history: HashMap<(Uuid, Date), StreakHistory>,
    activities: Vec<Activity>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers for tests and embedding callers. The engine itself
    // never creates catalog entities.

    pub fn seed_user(&self, user: User) {
        self.state.lock().expect("store lock").users.insert(user.id, user);
    }

    pub fn seed_learning_path(&self, path: LearningPath) {
        self.state
            .lock()
            .expect("store lock")
            .learning_paths
            .insert(path.id, path);
    }

    pub fn seed_module(&self, module: Module) {
        self.state
            .lock()
            .expect("store lock")
            .modules
            .insert(module.id, module);
    }

    pub fn seed_enrollment(&self, enrollment: Enrollment) {
        self.state
            .lock()
            .expect("store lock")
            .enrollments
            .insert(enrollment.id, enrollment);
    }

    pub fn seed_quiz(&self, quiz: Quiz, questions: Vec<QuizQuestion>) {
        let mut state = self.state.lock().expect("store lock");
        state.quizzes.insert(quiz.id, quiz);
        state.quiz_questions.extend(questions);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.state.lock().expect("store lock").users.get(&id).cloned())
    }

    async fn apply_point_award(
        &self,
        award: &NewPointsTransaction,
    ) -> Result<PointAward, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");

        let duplicate = state.transactions.iter().any(|tx| {
            tx.user_id == award.user_id
                && tx.source == award.source
                && tx.source_id == award.source_id
        });
        if duplicate {
            return Err(DatabaseError::Duplicate);
        }

        let user = state
            .users
            .get_mut(&award.user_id)
            .ok_or(DatabaseError::NotFound)?;

        let previous_points = user.total_points;
        let previous_level = user.current_level;
        let new_points = previous_points + award.amount;
        let new_level = levels::level_for(new_points);

        user.total_points = new_points;
        user.current_level = new_level;
        user.updated_at = award.created_at;

        let transaction = PointsTransaction {
            id: Uuid::new_v4(),
            user_id: award.user_id,
            tx_type: TransactionType::Earned,
            amount: award.amount,
            balance: new_points,
            source: award.source.clone(),
            source_id: award.source_id,
            description: award.description.clone(),
            created_at: award.created_at,
        };
        state.transactions.push(transaction.clone());

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
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn reset_streak(&self, user_id: Uuid) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let user = state.users.get_mut(&user_id).ok_or(DatabaseError::NotFound)?;
        user.current_streak = 0;
        Ok(())
    }

    async fn advance_streak(
        &self,
        user_id: Uuid,
        current: i32,
        longest: i32,
        last_active: OffsetDateTime,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let user = state.users.get_mut(&user_id).ok_or(DatabaseError::NotFound)?;
        user.current_streak = current;
        user.longest_streak = longest;
        user.last_active_date = Some(last_active);
        user.updated_at = last_active;
        Ok(())
    }

    async fn record_streak_day(
        &self,
        user_id: Uuid,
        day: Date,
        credited: bool,
        now: OffsetDateTime,
    ) -> Result<StreakHistory, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let entry = state
            .streak_history
            .entry((user_id, day))
            .and_modify(|row| {
                row.activity_count += 1;
                row.completed = row.completed || credited;
                row.updated_at = now;
            })
            .or_insert_with(|| StreakHistory {
                id: Uuid::new_v4(),
                user_id,
                day,
                completed: credited,
                activity_count: 1,
                created_at: now,
                updated_at: now,
            });
        Ok(entry.clone())
    }

    async fn streak_history(
        &self,
        user_id: Uuid,
        day: Date,
    ) -> Result<Option<StreakHistory>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .streak_history
            .get(&(user_id, day))
            .cloned())
    }

    async fn learning_path(&self, id: Uuid) -> Result<Option<LearningPath>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .learning_paths
            .get(&id)
            .cloned())
    }

    async fn module(&self, id: Uuid) -> Result<Option<Module>, DatabaseError> {
        Ok(self.state.lock().expect("store lock").modules.get(&id).cloned())
    }

    async fn module_count(&self, learning_path_id: Uuid) -> Result<i64, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .modules
            .values()
            .filter(|module| module.learning_path_id == learning_path_id)
            .count() as i64)
    }

    async fn enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .enrollments
            .get(&id)
            .cloned())
    }

    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .enrollments
            .values()
            .filter(|enrollment| enrollment.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn apply_enrollment_progress(
        &self,
        id: Uuid,
        update: &EnrollmentProgressUpdate,
    ) -> Result<EnrollmentTransition, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let enrollment = state.enrollments.get_mut(&id).ok_or(DatabaseError::NotFound)?;

        let previous_status = enrollment.status.clone();
        enrollment.progress = update.progress;
        enrollment.status = update.status.clone();
        enrollment.last_activity_at = update.last_activity_at;
        enrollment.updated_at = update.last_activity_at;

        if update.status == EnrollmentStatus::Completed
            && previous_status != EnrollmentStatus::Completed
        {
            enrollment.completed_at = enrollment.completed_at.or(update.completed_at);
            enrollment.final_score = update.final_score;
        }

        Ok(EnrollmentTransition {
            enrollment: enrollment.clone(),
            previous_status,
        })
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let enrollment = state.enrollments.get_mut(&id).ok_or(DatabaseError::NotFound)?;
        enrollment.status = status;
        enrollment.last_activity_at = now;
        enrollment.updated_at = now;
        Ok(enrollment.clone())
    }

    async fn reset_enrollment(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Enrollment, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let enrollment = state.enrollments.get_mut(&id).ok_or(DatabaseError::NotFound)?;
        enrollment.status = EnrollmentStatus::Enrolled;
        enrollment.progress = 0.0;
        enrollment.completed_at = None;
        enrollment.final_score = None;
        enrollment.last_activity_at = now;
        enrollment.updated_at = now;
        Ok(enrollment.clone())
    }

    async fn module_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<ModuleProgress>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .module_progress
            .get(&(enrollment_id, module_id))
            .cloned())
    }

    async fn module_progress_for_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<Vec<ModuleProgress>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .module_progress
            .values()
            .filter(|row| row.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn upsert_module_progress(
        &self,
        write: &ModuleProgressWrite,
    ) -> Result<ModuleProgressTransition, DatabaseError> {
        let mut state = self.state.lock().expect("store lock");
        let key = (write.enrollment_id, write.module_id);

        let (row, previous_status) = match state.module_progress.get(&key) {
            Some(existing) => {
                let previous_status = existing.status.clone();
                let mut row = existing.clone();
                row.status = write.status.clone();
                row.progress = write.progress;
                row.time_spent += write.time_spent_delta;
                row.attempts += write.attempts_delta;
                row.points_earned = row.points_earned.or(write.points_earned);
                row.quiz_score = row.quiz_score.or(write.quiz_score);
                if let Some(bookmarked) = write.bookmarked {
                    row.bookmarked = bookmarked;
                }
                row.started_at = row.started_at.or(write.started_at);
                row.completed_at = row.completed_at.or(write.completed_at);
                row.last_accessed_at = write.last_accessed_at;
                row.updated_at = write.last_accessed_at;
                (row, Some(previous_status))
            }
            None => {
                let row = ModuleProgress {
                    id: Uuid::new_v4(),
                    user_id: write.user_id,
                    module_id: write.module_id,
                    enrollment_id: write.enrollment_id,
                    status: write.status.clone(),
                    progress: write.progress,
                    time_spent: write.time_spent_delta.max(0),
                    attempts: write.attempts_delta.max(0),
                    points_earned: write.points_earned,
                    quiz_score: write.quiz_score,
                    bookmarked: write.bookmarked.unwrap_or(false),
                    started_at: write.started_at,
                    completed_at: write.completed_at,
                    last_accessed_at: write.last_accessed_at,
                    created_at: write.last_accessed_at,
                    updated_at: write.last_accessed_at,
                };
                (row, None)
            }
        };

        state.module_progress.insert(key, row.clone());

        Ok(ModuleProgressTransition {
            progress: row,
            previous_status,
        })
    }

    async fn module_completed_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .module_progress
            .values()
            .any(|row| {
                row.user_id == user_id
                    && row
                        .completed_at
                        .map(|completed| completed.date() == day)
                        .unwrap_or(false)
            }))
    }

    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, DatabaseError> {
        Ok(self.state.lock().expect("store lock").quizzes.get(&id).cloned())
    }

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .quizzes
            .values()
            .find(|quiz| quiz.module_id == module_id)
            .cloned())
    }

    async fn quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<QuizQuestion>, DatabaseError> {
        let mut questions: Vec<QuizQuestion> = self
            .state
            .lock()
            .expect("store lock")
            .quiz_questions
            .iter()
            .filter(|question| question.quiz_id == quiz_id)
            .cloned()
            .collect();
        questions.sort_by_key(|question| question.position);
        Ok(questions)
    }

    async fn attempt_count(&self, user_id: Uuid, quiz_id: Uuid) -> Result<i64, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .quiz_attempts
            .iter()
            .filter(|attempt| attempt.user_id == user_id && attempt.quiz_id == quiz_id)
            .count() as i64)
    }

    async fn passed_before(&self, user_id: Uuid, quiz_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .quiz_attempts
            .iter()
            .any(|attempt| {
                attempt.user_id == user_id && attempt.quiz_id == quiz_id && attempt.passed
            }))
    }

    async fn passed_attempt_exists(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        enrollment_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .quiz_attempts
            .iter()
            .any(|attempt| {
                attempt.user_id == user_id
                    && attempt.quiz_id == quiz_id
                    && attempt.enrollment_id == enrollment_id
                    && attempt.passed
            }))
    }

    async fn insert_quiz_attempt(
        &self,
        attempt: &NewQuizAttempt,
    ) -> Result<QuizAttempt, DatabaseError> {
        let row = QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id: attempt.quiz_id,
            enrollment_id: attempt.enrollment_id,
            user_id: attempt.user_id,
            attempt_number: attempt.attempt_number,
            score: attempt.score,
            percentage: attempt.percentage,
            passed: attempt.passed,
            answers: attempt.answers.clone(),
            detailed_results: attempt.detailed_results.clone(),
            completed_at: attempt.completed_at,
        };
        self.state
            .lock()
            .expect("store lock")
            .quiz_attempts
            .push(row.clone());
        Ok(row)
    }

    async fn quiz_attempted_on(&self, user_id: Uuid, day: Date) -> Result<bool, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .quiz_attempts
            .iter()
            .any(|attempt| attempt.user_id == user_id && attempt.completed_at.date() == day))
    }
}

#[async_trait]
impl ActivityFeed for MemoryStore {
    async fn log_activity(&self, entry: &NewActivity) -> Result<Activity, DatabaseError> {
        let row = Activity {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            activity_type: entry.activity_type.clone(),
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
            points_earned: entry.points_earned,
            created_at: entry.created_at,
        };
        self.state
            .lock()
            .expect("store lock")
            .activities
            .push(row.clone());
        Ok(row)
    }

    async fn activities_for_user(&self, user_id: Uuid) -> Result<Vec<Activity>, DatabaseError> {
        let mut activities: Vec<Activity> = self
            .state
            .lock()
            .expect("store lock")
            .activities
            .iter()
            .filter(|activity| activity.user_id == user_id)
            .cloned()
            .collect();
        activities.reverse();
        Ok(activities)
    }
}
