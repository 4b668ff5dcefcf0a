use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "module_content_type", rename_all = "snake_case")]
pub enum ModuleContentType {
    Video,
    Article,
    Document,
    Interactive,
    Quiz,
}

impl ModuleContentType {
    /// Whether in-content scrubbing ticks apply to this module kind.
    /// Quiz modules complete through graded attempts instead.
    pub fn supports_content_ticks(&self) -> bool {
        match self {
            ModuleContentType::Video
            | ModuleContentType::Article
            | ModuleContentType::Document
            | ModuleContentType::Interactive => true,
            ModuleContentType::Quiz => false,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LearningPath {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Award for completing the whole path. Falls back to the configured
    /// default when unset.
    pub completion_points: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl LearningPath {
    pub fn new(title: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            completion_points: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single learning unit within a path.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Module {
    pub id: Uuid,
    pub learning_path_id: Uuid,
    pub title: String,
    pub position: i32,
    pub content_type: ModuleContentType,
    /// Award for first-time completion of this module.
    pub completion_points: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Module {
    pub fn new(
        learning_path_id: Uuid,
        title: impl Into<String>,
        position: i32,
        content_type: ModuleContentType,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            learning_path_id,
            title: title.into(),
            position,
            content_type,
            completion_points: None,
            created_at: now,
            updated_at: now,
        }
    }
}
