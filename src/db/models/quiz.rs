use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

/// A quiz belongs to exactly one module.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    /// Percentage required to pass, 0-100.
    pub passing_score: f64,
    /// None means unlimited attempts.
    pub max_attempts: Option<i32>,
    /// Points a perfect score is worth.
    pub points_available: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Quiz {
    pub fn new(
        module_id: Uuid,
        title: impl Into<String>,
        passing_score: f64,
        points_available: i64,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            module_id,
            title: title.into(),
            passing_score,
            max_attempts: None,
            points_available,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub position: i32,
    pub question_text: String,
    /// Answer options as a JSON array of {key, text} objects.
    pub options: serde_json::Value,
    pub correct_answer_key: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl QuizQuestion {
    pub fn new(
        quiz_id: Uuid,
        position: i32,
        question_text: impl Into<String>,
        options: serde_json::Value,
        correct_answer_key: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            position,
            question_text: question_text.into(),
            options,
            correct_answer_key: correct_answer_key.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable record of one graded submission.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub enrollment_id: Uuid,
    pub user_id: Uuid,
    /// 1-based per (user, quiz); never reused.
    pub attempt_number: i32,
    pub score: f64,
    pub percentage: f64,
    pub passed: bool,
    /// The answer keys exactly as submitted.
    pub answers: serde_json::Value,
    /// Per-question breakdown, an array of [`QuestionResult`] values.
    pub detailed_results: serde_json::Value,
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewQuizAttempt {
    pub quiz_id: Uuid,
    pub enrollment_id: Uuid,
    pub user_id: Uuid,
    pub attempt_number: i32,
    pub score: f64,
    pub percentage: f64,
    pub passed: bool,
    pub answers: serde_json::Value,
    pub detailed_results: serde_json::Value,
    pub completed_at: OffsetDateTime,
}

/// Per-question grading outcome stored in `QuizAttempt::detailed_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_index: usize,
    pub question_id: Uuid,
    pub user_answer: Option<String>,
    pub correct_answer: String,
    pub correct: bool,
}

/// A submission handed to the scorer: one answer key per question, in
/// question order.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuizSubmission {
    #[validate(length(min = 1))]
    pub answers: Vec<String>,
}
