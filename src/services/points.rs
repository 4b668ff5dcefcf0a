//! The points ledger.
//!
//! Appends immutable transactions and rolls the user's total and level
//! forward. Callers are responsible for invoking it at most once per
//! rewarded event; the store's idempotency key absorbs racing duplicates.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{ActivityType, DatabaseError, NewActivity, NewPointsTransaction, PointAward, PointsSource};
use crate::error::{AppError, AppResult};
use crate::notify::{NotificationKind, Notifier};
use crate::store::{ActivityFeed, Store};

use super::levels::{self, LevelProgress};

#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn Store>,
    feed: Arc<dyn ActivityFeed>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl PointsLedger {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ActivityFeed>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            feed,
            notifier,
            clock,
        }
    }

    /// Award `amount` points to a user.
    ///
    /// Returns `Ok(None)` on the two silent paths: an unknown user (callers
    /// validate existence upstream) and a duplicate (user, source, source_id)
    /// award absorbed by the idempotency key.
    pub async fn award_points(
        &self,
        user_id: Uuid,
        amount: i64,
        source: PointsSource,
        source_id: Uuid,
        description: &str,
    ) -> AppResult<Option<PointAward>> {
        if amount < 0 {
            return Err(AppError::Validation(
                "point awards must be non-negative".into(),
            ));
        }

        let now = self.clock.now();
        let award = NewPointsTransaction {
            user_id,
            amount,
            source: source.clone(),
            source_id,
            description: description.to_string(),
            created_at: now,
        };

        let award = match self.store.apply_point_award(&award).await {
            Ok(award) => award,
            Err(DatabaseError::NotFound) => {
                warn!(%user_id, "point award for unknown user ignored");
                return Ok(None);
            }
            Err(DatabaseError::Duplicate) => {
                warn!(
                    %user_id,
                    source = source.as_str(),
                    %source_id,
                    "duplicate point award absorbed"
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            %user_id,
            amount,
            balance = award.new_points,
            source = source.as_str(),
            "points awarded"
        );

        if award.leveled_up() {
            self.feed
                .log_activity(&NewActivity {
                    user_id,
                    activity_type: ActivityType::LevelUp,
                    description: format!("Reached level {}", award.new_level),
                    metadata: json!({
                        "old_level": award.previous_level,
                        "new_level": award.new_level,
                        "points": award.new_points,
                    }),
                    points_earned: 0,
                    created_at: now,
                })
                .await?;

            self.notifier
                .notify(
                    user_id,
                    NotificationKind::LevelUp,
                    json!({
                        "old_level": award.previous_level,
                        "new_level": award.new_level,
                        "total_points": award.new_points,
                    }),
                )
                .await;
        }

        Ok(Some(award))
    }

    /// Level position for a stored user.
    pub async fn level_progress(&self, user_id: Uuid) -> AppResult<LevelProgress> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))?;
        Ok(levels::level_progress(user.total_points))
    }
}
