//! Module-level progress state and its effect on enrollment aggregates.
//!
//! Owns the completion gate and the first-time-completion decision. The
//! atomic upsert's reported previous status — not the earlier read — is what
//! awards are based on, so racing double-submits cannot double-award.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::db::{
    ActivityType, ContentProgressTick, Enrollment, Module, ModuleProgress, ModuleProgressPatch,
    ModuleProgressStatus, ModuleProgressWrite, NewActivity, PointsSource, User,
};
use crate::error::{AppError, AppResult};
use crate::notify::{NotificationKind, Notifier};
use crate::store::{ActivityFeed, Store};

use super::enrollment::EnrollmentCoordinator;
use super::levels::{self, LevelProgress};
use super::points::PointsLedger;
use super::streaks::StreakTracker;

/// Per-enrollment view for the consuming API layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrollmentProgressSummary {
    pub enrollment: Enrollment,
    pub total_modules: i64,
    pub completed_modules: i64,
    pub in_progress_modules: i64,
    pub modules: Vec<ModuleProgress>,
}

/// Cross-enrollment view plus gamification state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserProgressOverview {
    pub user: User,
    pub level: LevelProgress,
    pub enrollments: Vec<Enrollment>,
}

#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn Store>,
    feed: Arc<dyn ActivityFeed>,
    notifier: Arc<dyn Notifier>,
    ledger: PointsLedger,
    streaks: StreakTracker,
    coordinator: EnrollmentCoordinator,
    clock: Arc<dyn Clock>,
}

impl ProgressAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ActivityFeed>,
        notifier: Arc<dyn Notifier>,
        ledger: PointsLedger,
        streaks: StreakTracker,
        coordinator: EnrollmentCoordinator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            feed,
            notifier,
            ledger,
            streaks,
            coordinator,
            clock,
        }
    }

    /// Whether a module may transition to `Completed` through the
    /// progress-update path. A module with an associated quiz requires a
    /// passed attempt; modules without one are always permitted.
    pub async fn can_complete(
        &self,
        module: &Module,
        user_id: Uuid,
        enrollment_id: Uuid,
    ) -> AppResult<bool> {
        match self.store.quiz_for_module(module.id).await? {
            Some(quiz) => Ok(self
                .store
                .passed_attempt_exists(user_id, quiz.id, enrollment_id)
                .await?),
            None => Ok(true),
        }
    }

    /// Apply a progress patch to the (enrollment, module) row.
    #[instrument(skip(self, patch))]
    pub async fn update_module_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
        user_id: Uuid,
        patch: &ModuleProgressPatch,
    ) -> AppResult<ModuleProgress> {
        patch.validate()?;
        let (_, module) = self
            .validated_pair(enrollment_id, module_id, user_id)
            .await?;

        let requests_completion = patch.status == Some(ModuleProgressStatus::Completed);
        if requests_completion && !self.can_complete(&module, user_id, enrollment_id).await? {
            return Err(AppError::Validation(
                "module completion requires a passed quiz attempt".into(),
            ));
        }

        let now = self.clock.now();
        let existing = self.store.module_progress(enrollment_id, module_id).await?;
        let current_status = existing
            .as_ref()
            .map(|row| row.status.clone())
            .unwrap_or(ModuleProgressStatus::NotStarted);
        let current_progress = existing.as_ref().map(|row| row.progress).unwrap_or(0.0);

        let status = patch.status.clone().unwrap_or(current_status);
        let progress = if status == ModuleProgressStatus::Completed {
            100.0
        } else {
            patch.progress.unwrap_or(current_progress)
        };
        let starts_now = matches!(
            status,
            ModuleProgressStatus::InProgress | ModuleProgressStatus::Completed
        );

        let transition = self
            .store
            .upsert_module_progress(&ModuleProgressWrite {
                user_id,
                module_id,
                enrollment_id,
                status,
                progress,
                time_spent_delta: patch.time_spent.unwrap_or(0),
                attempts_delta: 0,
                points_earned: if requests_completion {
                    module.completion_points
                } else {
                    None
                },
                quiz_score: None,
                bookmarked: patch.bookmarked,
                started_at: starts_now.then_some(now),
                completed_at: requests_completion.then_some(now),
                last_accessed_at: now,
            })
            .await?;

        if transition.first_completion() {
            let points = module.completion_points.unwrap_or(0);
            info!(%module_id, points, "module completed");

            if let Some(points) = module.completion_points {
                self.ledger
                    .award_points(
                        user_id,
                        points,
                        PointsSource::ModuleCompletion,
                        module_id,
                        &format!("Completed module: {}", module.title),
                    )
                    .await?;
            }

            self.feed
                .log_activity(&NewActivity {
                    user_id,
                    activity_type: ActivityType::ModuleCompleted,
                    description: format!("Completed module: {}", module.title),
                    metadata: json!({
                        "module_id": module_id,
                        "enrollment_id": enrollment_id,
                    }),
                    points_earned: points,
                    created_at: now,
                })
                .await?;

            self.notifier
                .notify(
                    user_id,
                    NotificationKind::ModuleCompletion,
                    json!({
                        "module_id": module_id,
                        "title": module.title,
                        "points": points,
                    }),
                )
                .await;

            self.streaks.record_daily_activity(user_id).await?;
        } else if requests_completion {
            // Re-sent completion for an already-completed module.
            self.feed
                .log_activity(&NewActivity {
                    user_id,
                    activity_type: ActivityType::ModuleCompleted,
                    description: format!("Revisited module: {}", module.title),
                    metadata: json!({
                        "module_id": module_id,
                        "enrollment_id": enrollment_id,
                        "is_revision": true,
                    }),
                    points_earned: 0,
                    created_at: now,
                })
                .await?;
        }

        self.coordinator
            .recompute_progress(enrollment_id, user_id)
            .await?;

        Ok(transition.progress)
    }

    /// Granular in-content tick: derives a status from the numeric position
    /// and delegates to [`Self::update_module_progress`], inheriting all of
    /// its completion semantics.
    pub async fn track_content_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
        user_id: Uuid,
        tick: &ContentProgressTick,
    ) -> AppResult<ModuleProgress> {
        tick.validate()?;
        let module = self
            .store
            .module(module_id)
            .await?
            .ok_or_else(|| AppError::NotFound("module".into()))?;
        if !module.content_type.supports_content_ticks() {
            return Err(AppError::BadRequest(
                "quiz modules complete through graded attempts".into(),
            ));
        }

        let completed = tick.completed || tick.progress >= 100.0;
        let status = if completed {
            ModuleProgressStatus::Completed
        } else if tick.progress > 0.0 {
            ModuleProgressStatus::InProgress
        } else {
            ModuleProgressStatus::NotStarted
        };

        let patch = ModuleProgressPatch {
            status: Some(status),
            progress: Some(tick.progress.min(100.0)),
            time_spent: tick.duration,
            bookmarked: None,
        };
        self.update_module_progress(enrollment_id, module_id, user_id, &patch)
            .await
    }

    /// Fetch the (enrollment, module) row, creating the `NotStarted` row
    /// lazily on first access. Refreshes `last_accessed_at` either way.
    pub async fn get_module_progress(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<ModuleProgress> {
        self.validated_pair(enrollment_id, module_id, user_id)
            .await?;

        let now = self.clock.now();
        let existing = self.store.module_progress(enrollment_id, module_id).await?;
        let (status, progress) = existing
            .map(|row| (row.status, row.progress))
            .unwrap_or((ModuleProgressStatus::NotStarted, 0.0));

        let transition = self
            .store
            .upsert_module_progress(&ModuleProgressWrite {
                user_id,
                module_id,
                enrollment_id,
                status,
                progress,
                time_spent_delta: 0,
                attempts_delta: 0,
                points_earned: None,
                quiz_score: None,
                bookmarked: None,
                started_at: None,
                completed_at: None,
                last_accessed_at: now,
            })
            .await?;

        Ok(transition.progress)
    }

    pub async fn get_enrollment_progress_summary(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<EnrollmentProgressSummary> {
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

        let total_modules = self
            .store
            .module_count(enrollment.learning_path_id)
            .await?;
        let modules = self
            .store
            .module_progress_for_enrollment(enrollment_id)
            .await?;
        let completed_modules = modules
            .iter()
            .filter(|row| row.status == ModuleProgressStatus::Completed)
            .count() as i64;
        let in_progress_modules = modules
            .iter()
            .filter(|row| row.status == ModuleProgressStatus::InProgress)
            .count() as i64;

        Ok(EnrollmentProgressSummary {
            enrollment,
            total_modules,
            completed_modules,
            in_progress_modules,
            modules,
        })
    }

    /// Everything the profile page needs. Validates the streak first so a
    /// stale counter is corrected before it is displayed.
    pub async fn get_user_progress_overview(
        &self,
        user_id: Uuid,
    ) -> AppResult<UserProgressOverview> {
        let user = self.streaks.validate_streak(user_id).await?;
        let level = levels::level_progress(user.total_points);
        let enrollments = self.store.enrollments_for_user(user_id).await?;

        Ok(UserProgressOverview {
            user,
            level,
            enrollments,
        })
    }

    async fn validated_pair(
        &self,
        enrollment_id: Uuid,
        module_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<(Enrollment, Module)> {
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
            .module(module_id)
            .await?
            .ok_or_else(|| AppError::NotFound("module".into()))?;
        if module.learning_path_id != enrollment.learning_path_id {
            return Err(AppError::BadRequest(
                "module does not belong to the enrollment's learning path".into(),
            ));
        }
        Ok((enrollment, module))
    }
}
