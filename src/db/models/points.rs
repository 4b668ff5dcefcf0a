use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "points_transaction_type", rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "points_source", rename_all = "snake_case")]
pub enum PointsSource {
    ModuleCompletion,
    QuizCompletion,
    PathCompletion,
}

impl PointsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointsSource::ModuleCompletion => "module_completion",
            PointsSource::QuizCompletion => "quiz_completion",
            PointsSource::PathCompletion => "path_completion",
        }
    }
}

/// Append-only ledger entry. The sum of `amount` over a user always equals
/// that user's `total_points`; (user, source, source_id) is unique and acts
/// as the idempotency key for concurrent award attempts.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    pub amount: i64,
    /// Post-transaction total for the user.
    pub balance: i64,
    pub source: PointsSource,
    pub source_id: Uuid,
    pub description: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPointsTransaction {
    pub user_id: Uuid,
    pub amount: i64,
    pub source: PointsSource,
    pub source_id: Uuid,
    pub description: String,
    pub created_at: OffsetDateTime,
}

/// Outcome of an atomically applied award.
#[derive(Debug, Clone)]
pub struct PointAward {
    pub transaction: PointsTransaction,
    pub previous_points: i64,
    pub new_points: i64,
    pub previous_level: i32,
    pub new_level: i32,
}

impl PointAward {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.previous_level
    }
}
