//! Quiz attempt grading and its interaction with module completion.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::db::{
    ActivityType, ModuleProgressStatus, ModuleProgressWrite, NewActivity, NewQuizAttempt,
    PointsSource, QuestionResult, QuizAttempt, QuizSubmission,
};
use crate::error::{AppError, AppResult};
use crate::store::{ActivityFeed, Store};

use super::enrollment::EnrollmentCoordinator;
use super::points::PointsLedger;
use super::streaks::StreakTracker;

#[derive(Clone)]
pub struct QuizScorer {
    store: Arc<dyn Store>,
    feed: Arc<dyn ActivityFeed>,
    ledger: PointsLedger,
    streaks: StreakTracker,
    coordinator: EnrollmentCoordinator,
    clock: Arc<dyn Clock>,
}

impl QuizScorer {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ActivityFeed>,
        ledger: PointsLedger,
        streaks: StreakTracker,
        coordinator: EnrollmentCoordinator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            feed,
            ledger,
            streaks,
            coordinator,
            clock,
        }
    }

    /// Grade a submission and record an immutable attempt.
    ///
    /// Attempt numbering is 1-based per (user, quiz). `quiz_score` on the
    /// module-progress row is pinned from attempt #1 only; points are awarded
    /// once, on the first-ever pass, whatever attempt that happens to be.
    #[instrument(skip(self, submission))]
    pub async fn submit_attempt(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        enrollment_id: Uuid,
        submission: &QuizSubmission,
    ) -> AppResult<QuizAttempt> {
        submission.validate()?;

        let quiz = self
            .store
            .quiz(quiz_id)
            .await?
            .ok_or_else(|| AppError::NotFound("quiz".into()))?;
        let enrollment = self
            .store
            .enrollment(enrollment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("enrollment".into()))?;
        if enrollment.user_id != user_id {
            return Err(AppError::BadRequest(
                "enrollment does not belong to the caller".into(),
            ));
        }
        let module = self
            .store
            .module(quiz.module_id)
            .await?
            .ok_or_else(|| AppError::NotFound("module".into()))?;
        if module.learning_path_id != enrollment.learning_path_id {
            return Err(AppError::BadRequest(
                "module does not belong to the enrollment's learning path".into(),
            ));
        }

        let prior_attempts = self.store.attempt_count(user_id, quiz_id).await?;
        if let Some(max_attempts) = quiz.max_attempts {
            if prior_attempts >= max_attempts as i64 {
                return Err(AppError::Validation("maximum attempts reached".into()));
            }
        }

        let questions = self.store.quiz_questions(quiz_id).await?;
        if questions.is_empty() {
            return Err(AppError::Validation("quiz has no questions".into()));
        }

        let mut results = Vec::with_capacity(questions.len());
        let mut correct_count = 0usize;
        for (index, question) in questions.iter().enumerate() {
            let user_answer = submission.answers.get(index).cloned();
            let correct = user_answer.as_deref() == Some(question.correct_answer_key.as_str());
            if correct {
                correct_count += 1;
            }
            results.push(QuestionResult {
                question_index: index,
                question_id: question.id,
                user_answer,
                correct_answer: question.correct_answer_key.clone(),
                correct,
            });
        }

        let percentage = correct_count as f64 / questions.len() as f64 * 100.0;
        let score = percentage / 100.0 * quiz.points_available as f64;
        let passed = percentage >= quiz.passing_score;
        let attempt_number = (prior_attempts + 1) as i32;
        let now = self.clock.now();

        // Must be read before the insert so it reflects prior attempts only.
        let passed_before = self.store.passed_before(user_id, quiz_id).await?;
        let first_pass = passed && !passed_before;

        let attempt = self
            .store
            .insert_quiz_attempt(&NewQuizAttempt {
                quiz_id,
                enrollment_id,
                user_id,
                attempt_number,
                score,
                percentage,
                passed,
                answers: serde_json::to_value(&submission.answers)?,
                detailed_results: serde_json::to_value(&results)?,
                completed_at: now,
            })
            .await?;

        info!(
            attempt_number,
            percentage,
            passed,
            "quiz attempt recorded"
        );

        let existing = self.store.module_progress(enrollment_id, module.id).await?;
        let current_status = existing
            .as_ref()
            .map(|row| row.status.clone())
            .unwrap_or(ModuleProgressStatus::NotStarted);
        let current_progress = existing.as_ref().map(|row| row.progress).unwrap_or(0.0);

        let (status, progress) = if passed {
            (ModuleProgressStatus::Completed, 100.0)
        } else if current_status == ModuleProgressStatus::NotStarted {
            (ModuleProgressStatus::InProgress, current_progress)
        } else {
            (current_status, current_progress)
        };

        self.store
            .upsert_module_progress(&ModuleProgressWrite {
                user_id,
                module_id: module.id,
                enrollment_id,
                status,
                progress,
                time_spent_delta: 0,
                attempts_delta: 1,
                points_earned: first_pass.then_some(score.round() as i64),
                // Only the very first submitted attempt may carry the
                // recorded initial score.
                quiz_score: (attempt_number == 1).then_some(score),
                bookmarked: None,
                started_at: Some(now),
                completed_at: passed.then_some(now),
                last_accessed_at: now,
            })
            .await?;

        if passed {
            if first_pass {
                let points = score.round() as i64;
                self.ledger
                    .award_points(
                        user_id,
                        points,
                        PointsSource::QuizCompletion,
                        quiz_id,
                        &format!("Passed quiz: {}", quiz.title),
                    )
                    .await?;
                self.feed
                    .log_activity(&NewActivity {
                        user_id,
                        activity_type: ActivityType::QuizPassed,
                        description: format!("Passed quiz: {}", quiz.title),
                        metadata: json!({
                            "quiz_id": quiz_id,
                            "attempt_number": attempt_number,
                            "percentage": percentage,
                        }),
                        points_earned: points,
                        created_at: now,
                    })
                    .await?;
            } else {
                self.feed
                    .log_activity(&NewActivity {
                        user_id,
                        activity_type: ActivityType::QuizPassed,
                        description: format!("Passed quiz again: {}", quiz.title),
                        metadata: json!({
                            "quiz_id": quiz_id,
                            "attempt_number": attempt_number,
                            "percentage": percentage,
                            "is_revision": true,
                        }),
                        points_earned: 0,
                        created_at: now,
                    })
                    .await?;
            }
        }

        self.coordinator
            .recompute_progress(enrollment_id, user_id)
            .await?;

        // "Attempted a quiz today" is one of the two daily streak
        // conditions, so this runs for failed attempts too.
        self.streaks.record_daily_activity(user_id).await?;

        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::GamificationConfig;
    use crate::db::{
        Enrollment, LearningPath, Module, ModuleContentType, Quiz, QuizQuestion, User,
    };
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryStore;
    use time::macros::datetime;

    struct Fixture {
        scorer: QuizScorer,
        store: Arc<MemoryStore>,
        user_id: Uuid,
        enrollment_id: Uuid,
        module_id: Uuid,
        quiz_id: Uuid,
    }

    fn fixture(max_attempts: Option<i32>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(datetime!(2024-03-04 10:00 UTC)));
        let now = clock.now();

        let user = User::new("learner@example.com", "Learner", now);
        let user_id = user.id;
        store.seed_user(user);

        let path = LearningPath::new("Rust basics", now);
        let module = Module::new(path.id, "Ownership", 1, ModuleContentType::Quiz, now);
        let module_id = module.id;
        // A second module keeps the path from completing when the quiz
        // module does, so point assertions see quiz awards only.
        let filler = Module::new(path.id, "Borrowing", 2, ModuleContentType::Video, now);

        let mut quiz = Quiz::new(module.id, "Ownership check", 70.0, 100, now);
        quiz.max_attempts = max_attempts;
        let quiz_id = quiz.id;
        let questions = vec![
            QuizQuestion::new(quiz.id, 1, "Q1", json!(["a", "b"]), "a", now),
            QuizQuestion::new(quiz.id, 2, "Q2", json!(["a", "b"]), "b", now),
            QuizQuestion::new(quiz.id, 3, "Q3", json!(["a", "b"]), "a", now),
            QuizQuestion::new(quiz.id, 4, "Q4", json!(["a", "b"]), "b", now),
            QuizQuestion::new(quiz.id, 5, "Q5", json!(["a", "b"]), "a", now),
        ];

        let enrollment = Enrollment::new(user_id, path.id, now);
        let enrollment_id = enrollment.id;

        store.seed_learning_path(path);
        store.seed_module(module);
        store.seed_module(filler);
        store.seed_quiz(quiz, questions);
        store.seed_enrollment(enrollment);

        let ledger = PointsLedger::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let streaks = StreakTracker::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let coordinator = EnrollmentCoordinator::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            ledger.clone(),
            clock.clone(),
            GamificationConfig::default(),
        );
        let scorer = QuizScorer::new(
            store.clone(),
            store.clone(),
            ledger,
            streaks,
            coordinator,
            clock,
        );

        Fixture {
            scorer,
            store,
            user_id,
            enrollment_id,
            module_id,
            quiz_id,
        }
    }

    fn all_correct() -> QuizSubmission {
        QuizSubmission {
            answers: vec!["a", "b", "a", "b", "a"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn two_correct() -> QuizSubmission {
        QuizSubmission {
            answers: vec!["a", "b", "b", "a", "b"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    #[tokio::test]
    async fn grades_against_the_answer_key() {
        let fx = fixture(None);

        let attempt = fx
            .scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &two_correct())
            .await
            .unwrap();

        assert_eq!(attempt.attempt_number, 1);
        assert!((attempt.percentage - 40.0).abs() < 0.001);
        assert!((attempt.score - 40.0).abs() < 0.001);
        assert!(!attempt.passed);

        let breakdown: Vec<QuestionResult> =
            serde_json::from_value(attempt.detailed_results).unwrap();
        assert_eq!(breakdown.len(), 5);
        assert_eq!(breakdown.iter().filter(|r| r.correct).count(), 2);
    }

    #[tokio::test]
    async fn enforces_the_attempt_limit() {
        let fx = fixture(Some(3));

        for _ in 0..3 {
            fx.scorer
                .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &two_correct())
                .await
                .unwrap();
        }

        let result = fx
            .scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &two_correct())
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(
            fx.store.attempt_count(fx.user_id, fx.quiz_id).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn initial_score_is_pinned_and_first_pass_still_awards() {
        let fx = fixture(None);

        // Attempt 1 fails with 40.
        fx.scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &two_correct())
            .await
            .unwrap();

        // Attempt 2 passes with 100.
        let attempt = fx
            .scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &all_correct())
            .await
            .unwrap();
        assert_eq!(attempt.attempt_number, 2);
        assert!(attempt.passed);

        let row = fx
            .store
            .module_progress(fx.enrollment_id, fx.module_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ModuleProgressStatus::Completed);
        assert_eq!(row.attempts, 2);
        // The initial attempt's score stays recorded.
        assert!((row.quiz_score.unwrap() - 40.0).abs() < 0.001);

        // The first pass still awards points, whatever attempt it was.
        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.total_points, 100);
    }

    #[tokio::test]
    async fn repeat_pass_is_a_revision_with_no_award() {
        let fx = fixture(None);

        fx.scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &all_correct())
            .await
            .unwrap();
        fx.scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &all_correct())
            .await
            .unwrap();

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.total_points, 100);
        assert_eq!(
            fx.store.transactions_for_user(fx.user_id).await.unwrap().len(),
            1
        );

        let activities = fx.store.activities_for_user(fx.user_id).await.unwrap();
        let revision = activities
            .iter()
            .find(|a| a.metadata.get("is_revision").is_some())
            .expect("revision activity");
        assert_eq!(revision.points_earned, 0);
    }

    #[tokio::test]
    async fn failed_attempt_tracks_progress_without_completion() {
        let fx = fixture(None);

        fx.scorer
            .submit_attempt(fx.user_id, fx.quiz_id, fx.enrollment_id, &two_correct())
            .await
            .unwrap();

        let row = fx
            .store
            .module_progress(fx.enrollment_id, fx.module_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ModuleProgressStatus::InProgress);
        assert_eq!(row.attempts, 1);
        assert!(row.completed_at.is_none());

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.total_points, 0);
    }

    #[tokio::test]
    async fn unknown_quiz_is_not_found() {
        let fx = fixture(None);

        let result = fx
            .scorer
            .submit_attempt(fx.user_id, Uuid::new_v4(), fx.enrollment_id, &all_correct())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn foreign_enrollment_is_rejected() {
        let fx = fixture(None);

        let result = fx
            .scorer
            .submit_attempt(Uuid::new_v4(), fx.quiz_id, fx.enrollment_id, &all_correct())
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
