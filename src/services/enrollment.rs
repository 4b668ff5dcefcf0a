//! Enrollment-level aggregation and path completion.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::GamificationConfig;
use crate::db::{
    ActivityType, Enrollment, EnrollmentProgressUpdate, EnrollmentStatus, NewActivity,
    PointsSource,
};
use crate::error::{AppError, AppResult};
use crate::notify::{NotificationKind, Notifier};
use crate::store::{ActivityFeed, Store};

use super::points::PointsLedger;
use super::round_two;

#[derive(Clone)]
pub struct EnrollmentCoordinator {
    store: Arc<dyn Store>,
    feed: Arc<dyn ActivityFeed>,
    notifier: Arc<dyn Notifier>,
    ledger: PointsLedger,
    clock: Arc<dyn Clock>,
    config: GamificationConfig,
}

impl EnrollmentCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ActivityFeed>,
        notifier: Arc<dyn Notifier>,
        ledger: PointsLedger,
        clock: Arc<dyn Clock>,
        config: GamificationConfig,
    ) -> Self {
        Self {
            store,
            feed,
            notifier,
            ledger,
            clock,
            config,
        }
    }

    /// Recompute the enrollment aggregate from its module-progress rows.
    ///
    /// Runs after every module-progress write. Progress averages row
    /// progress over all path modules, so partially-progressed modules
    /// contribute fractionally. The first transition into `Completed` awards
    /// path-completion points exactly once.
    #[instrument(skip(self))]
    pub async fn recompute_progress(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Enrollment> {
        let enrollment = self.owned_enrollment(enrollment_id, user_id).await?;

        let total_modules = self
            .store
            .module_count(enrollment.learning_path_id)
            .await?;
        let rows = self
            .store
            .module_progress_for_enrollment(enrollment_id)
            .await?;

        let percentage = if total_modules == 0 {
            0.0
        } else {
            round_two(rows.iter().map(|row| row.progress).sum::<f64>() / total_modules as f64)
        };

        let status = if percentage <= 0.0 {
            EnrollmentStatus::Enrolled
        } else if percentage < 100.0 {
            EnrollmentStatus::InProgress
        } else {
            EnrollmentStatus::Completed
        };

        let now = self.clock.now();
        let transition = self
            .store
            .apply_enrollment_progress(
                enrollment_id,
                &EnrollmentProgressUpdate {
                    progress: percentage,
                    status,
                    last_activity_at: now,
                    completed_at: Some(now),
                    final_score: Some(percentage),
                },
            )
            .await?;

        if transition.first_completion() {
            let path = self
                .store
                .learning_path(enrollment.learning_path_id)
                .await?;
            let (points, path_title) = match path {
                Some(path) => (
                    path.completion_points
                        .unwrap_or(self.config.path_completion_fallback_points),
                    path.title,
                ),
                None => (
                    self.config.path_completion_fallback_points,
                    "learning path".to_string(),
                ),
            };

            info!(%enrollment_id, points, "learning path completed");

            self.ledger
                .award_points(
                    user_id,
                    points,
                    PointsSource::PathCompletion,
                    enrollment.learning_path_id,
                    &format!("Completed learning path: {path_title}"),
                )
                .await?;

            self.feed
                .log_activity(&NewActivity {
                    user_id,
                    activity_type: ActivityType::PathCompleted,
                    description: format!("Completed learning path: {path_title}"),
                    metadata: json!({
                        "enrollment_id": enrollment_id,
                        "learning_path_id": enrollment.learning_path_id,
                        "final_score": percentage,
                    }),
                    points_earned: points,
                    created_at: now,
                })
                .await?;

            self.notifier
                .notify(
                    user_id,
                    NotificationKind::PathCompletion,
                    json!({
                        "learning_path_id": enrollment.learning_path_id,
                        "points": points,
                    }),
                )
                .await;
        }

        Ok(transition.enrollment)
    }

    /// Withdraw from a path. Progress rows stay in place.
    pub async fn drop_enrollment(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Enrollment> {
        let enrollment = self.owned_enrollment(enrollment_id, user_id).await?;
        if enrollment.status == EnrollmentStatus::Completed {
            return Err(AppError::Conflict(
                "completed enrollments cannot be dropped".into(),
            ));
        }
        Ok(self
            .store
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Dropped, self.clock.now())
            .await?)
    }

    /// Re-enroll after a drop: aggregate progress restarts at zero while the
    /// existing module-progress rows are reused, never duplicated.
    pub async fn reactivate_enrollment(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Enrollment> {
        let enrollment = self.owned_enrollment(enrollment_id, user_id).await?;
        if enrollment.status != EnrollmentStatus::Dropped {
            return Err(AppError::Conflict("enrollment is not dropped".into()));
        }
        Ok(self
            .store
            .reset_enrollment(enrollment_id, self.clock.now())
            .await?)
    }

    async fn owned_enrollment(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Enrollment> {
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
        Ok(enrollment)
    }
}
