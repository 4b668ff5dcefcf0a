//! End-to-end engine scenarios over the in-memory store.

use std::sync::Arc;

use progress_engine::clock::{Clock, FixedClock};
use progress_engine::config::GamificationConfig;
use progress_engine::db::{
    Enrollment, EnrollmentStatus, LearningPath, Module, ModuleContentType, ModuleProgressPatch,
    ModuleProgressStatus, PointsSource, Quiz, QuizQuestion, QuizSubmission, User,
};
use progress_engine::notify::{NotificationKind, RecordingNotifier};
use progress_engine::store::{MemoryStore, Store};
use progress_engine::Engine;
use serde_json::json;
use time::macros::datetime;
use uuid::Uuid;

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<FixedClock>,
    user_id: Uuid,
    path_id: Uuid,
    enrollment_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    // A Monday.
    let clock = Arc::new(FixedClock::new(datetime!(2024-03-04 09:00 UTC)));
    let now = clock.now();

    let user = User::new("learner@example.com", "Learner", now);
    let user_id = user.id;
    store.seed_user(user);

    let path = LearningPath::new("Rust fundamentals", now);
    let path_id = path.id;
    let enrollment = Enrollment::new(user_id, path.id, now);
    let enrollment_id = enrollment.id;
    store.seed_learning_path(path);
    store.seed_enrollment(enrollment);

    let engine = Engine::new(
        store.clone(),
        store.clone(),
        notifier.clone(),
        clock.clone(),
        GamificationConfig::default(),
    );

    Harness {
        engine,
        store,
        notifier,
        clock,
        user_id,
        path_id,
        enrollment_id,
    }
}

fn seed_module(h: &Harness, title: &str, position: i32, points: Option<i64>) -> Uuid {
    let mut module = Module::new(
        h.path_id,
        title,
        position,
        ModuleContentType::Video,
        h.clock.now(),
    );
    module.completion_points = points;
    let id = module.id;
    h.store.seed_module(module);
    id
}

fn complete_patch() -> ModuleProgressPatch {
    ModuleProgressPatch {
        status: Some(ModuleProgressStatus::Completed),
        ..Default::default()
    }
}

#[tokio::test]
async fn completing_a_path_awards_module_and_path_points() {
    let h = harness();
    let modules = [
        seed_module(&h, "Ownership", 1, Some(100)),
        seed_module(&h, "Borrowing", 2, Some(100)),
        seed_module(&h, "Lifetimes", 3, Some(100)),
    ];

    // Module 1: a third of the path, first module award.
    h.engine
        .progress
        .update_module_progress(h.enrollment_id, modules[0], h.user_id, &complete_patch())
        .await
        .unwrap();

    let user = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(user.total_points, 100);
    let enrollment = h.store.enrollment(h.enrollment_id).await.unwrap().unwrap();
    assert!((enrollment.progress - 33.33).abs() < 0.001);
    assert_eq!(enrollment.status, EnrollmentStatus::InProgress);

    // Modules 2 and 3 finish the path: 300 in module awards plus the
    // default 500 path-completion award.
    h.engine
        .progress
        .update_module_progress(h.enrollment_id, modules[1], h.user_id, &complete_patch())
        .await
        .unwrap();
    h.engine
        .progress
        .update_module_progress(h.enrollment_id, modules[2], h.user_id, &complete_patch())
        .await
        .unwrap();

    let user = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(user.total_points, 800);

    let enrollment = h.store.enrollment(h.enrollment_id).await.unwrap().unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.progress, 100.0);
    assert!(enrollment.completed_at.is_some());

    let transactions = h.store.transactions_for_user(h.user_id).await.unwrap();
    assert_eq!(transactions.len(), 4);
    assert_eq!(
        transactions
            .iter()
            .filter(|tx| tx.source == PointsSource::PathCompletion)
            .count(),
        1
    );
    // Running balances stay consistent with the final total.
    assert_eq!(transactions.last().unwrap().balance, 800);

    assert_eq!(h.notifier.count_of(NotificationKind::ModuleCompletion), 3);
    assert_eq!(h.notifier.count_of(NotificationKind::PathCompletion), 1);
}

#[tokio::test]
async fn quiz_gated_module_drives_completion_and_streak() {
    let h = harness();
    let gated = seed_module(&h, "Ownership", 1, Some(100));
    seed_module(&h, "Borrowing", 2, None);

    let now = h.clock.now();
    let quiz = Quiz::new(gated, "Ownership check", 70.0, 80, now);
    let quiz_id = quiz.id;
    let questions = vec![
        QuizQuestion::new(quiz.id, 1, "Q1", json!(["a", "b"]), "a", now),
        QuizQuestion::new(quiz.id, 2, "Q2", json!(["a", "b"]), "b", now),
    ];
    h.store.seed_quiz(quiz, questions);

    // Direct completion is gated until the quiz is passed.
    let rejected = h
        .engine
        .progress
        .update_module_progress(h.enrollment_id, gated, h.user_id, &complete_patch())
        .await;
    assert!(rejected.is_err());

    let attempt = h
        .engine
        .scorer
        .submit_attempt(
            h.user_id,
            quiz_id,
            h.enrollment_id,
            &QuizSubmission {
                answers: vec!["a".to_string(), "b".to_string()],
            },
        )
        .await
        .unwrap();
    assert!(attempt.passed);
    assert_eq!(attempt.attempt_number, 1);

    // The pass completed the module and awarded the rounded score.
    let row = h
        .engine
        .progress
        .get_module_progress(h.enrollment_id, gated, h.user_id)
        .await
        .unwrap();
    assert_eq!(row.status, ModuleProgressStatus::Completed);
    assert_eq!(row.quiz_score, Some(80.0));

    let user = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(user.total_points, 80);

    // Module completed and quiz attempted on the same working day: the
    // streak advances exactly once.
    assert_eq!(user.current_streak, 1);
    assert_eq!(user.longest_streak, 1);
    assert_eq!(h.notifier.count_of(NotificationKind::StreakMilestone), 1);

    let overview = h
        .engine
        .progress
        .get_user_progress_overview(h.user_id)
        .await
        .unwrap();
    assert_eq!(overview.level.level, 1);
    assert_eq!(overview.enrollments.len(), 1);
    assert_eq!(overview.enrollments[0].status, EnrollmentStatus::InProgress);
}

#[tokio::test]
async fn weekday_streak_survives_a_weekend_and_breaks_on_a_missed_day() {
    let h = harness();

    // Friday: complete a module and attempt its quiz.
    h.clock.set(datetime!(2024-03-08 09:00 UTC));
    let friday_module = seed_module(&h, "Friday", 1, None);
    let quiz = Quiz::new(friday_module, "Friday check", 50.0, 10, h.clock.now());
    let friday_quiz = quiz.id;
    let questions = vec![QuizQuestion::new(
        quiz.id,
        1,
        "Q1",
        json!(["a", "b"]),
        "a",
        h.clock.now(),
    )];
    h.store.seed_quiz(quiz, questions);

    h.engine
        .scorer
        .submit_attempt(
            h.user_id,
            friday_quiz,
            h.enrollment_id,
            &QuizSubmission {
                answers: vec!["a".to_string()],
            },
        )
        .await
        .unwrap();

    let user = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(user.current_streak, 1);

    // Monday: the weekend gap is tolerated and the streak extends.
    h.clock.set(datetime!(2024-03-11 09:00 UTC));
    let monday_module = seed_module(&h, "Monday", 2, None);
    let quiz = Quiz::new(monday_module, "Monday check", 50.0, 10, h.clock.now());
    let monday_quiz = quiz.id;
    let questions = vec![QuizQuestion::new(
        quiz.id,
        1,
        "Q1",
        json!(["a", "b"]),
        "a",
        h.clock.now(),
    )];
    h.store.seed_quiz(quiz, questions);

    h.engine
        .scorer
        .submit_attempt(
            h.user_id,
            monday_quiz,
            h.enrollment_id,
            &QuizSubmission {
                answers: vec!["a".to_string()],
            },
        )
        .await
        .unwrap();

    let user = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(user.current_streak, 2);

    // Wednesday: Tuesday was missed, so the streak restarts at the
    // validation step before any new credit.
    h.clock.set(datetime!(2024-03-13 09:00 UTC));
    let user = h
        .engine
        .streaks
        .validate_streak(h.user_id)
        .await
        .unwrap();
    assert_eq!(user.current_streak, 0);
    let stored = h.store.user(h.user_id).await.unwrap().unwrap();
    assert_eq!(stored.current_streak, 0);
    assert_eq!(stored.longest_streak, 2);
}

#[tokio::test]
async fn attempt_limit_is_enforced_end_to_end() {
    let h = harness();
    let module_id = seed_module(&h, "Gated", 1, None);

    let now = h.clock.now();
    let mut quiz = Quiz::new(module_id, "Strict", 90.0, 20, now);
    quiz.max_attempts = Some(2);
    let quiz_id = quiz.id;
    let questions = vec![QuizQuestion::new(quiz.id, 1, "Q1", json!(["a", "b"]), "a", now)];
    h.store.seed_quiz(quiz, questions);

    let wrong = QuizSubmission {
        answers: vec!["b".to_string()],
    };
    for _ in 0..2 {
        let attempt = h
            .engine
            .scorer
            .submit_attempt(h.user_id, quiz_id, h.enrollment_id, &wrong)
            .await
            .unwrap();
        assert!(!attempt.passed);
    }

    let third = h
        .engine
        .scorer
        .submit_attempt(h.user_id, quiz_id, h.enrollment_id, &wrong)
        .await;
    assert!(third.is_err());
    assert_eq!(h.store.attempt_count(h.user_id, quiz_id).await.unwrap(), 2);

    // The module tracked both attempts without completing.
    let row = h
        .engine
        .progress
        .get_module_progress(h.enrollment_id, module_id, h.user_id)
        .await
        .unwrap();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.status, ModuleProgressStatus::InProgress);
}
