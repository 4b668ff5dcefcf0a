//! Consecutive-activity streak tracking over a Monday-Friday calendar.
//!
//! A day counts toward the streak only when the learner both completed a
//! module and attempted a quiz on that working day. Weekends never advance
//! and never break a streak; a gap containing a missed working day always
//! breaks it.

use std::sync::Arc;

use serde_json::json;
use time::{Date, Weekday};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{ActivityType, NewActivity, User};
use crate::error::{AppError, AppResult};
use crate::notify::{NotificationKind, Notifier};
use crate::store::{ActivityFeed, Store};

/// Saturday and Sunday are outside the activity calendar.
pub fn is_working_day(day: Date) -> bool {
    !matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// Whether the days strictly between `last_active` and `today` contain a
/// missed working day.
fn gap_breaks_streak(last_active: Date, today: Date) -> bool {
    let mut day = match last_active.next_day() {
        Some(day) => day,
        None => return false,
    };
    while day < today {
        if is_working_day(day) {
            return true;
        }
        day = match day.next_day() {
            Some(next) => next,
            None => return false,
        };
    }
    false
}

#[derive(Clone)]
pub struct StreakTracker {
    store: Arc<dyn Store>,
    feed: Arc<dyn ActivityFeed>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl StreakTracker {
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

    /// Reset a stale streak before it is read or extended. Returns the user
    /// with the correction applied.
    pub async fn validate_streak(&self, user_id: Uuid) -> AppResult<User> {
        let mut user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))?;

        if user.current_streak > 0 {
            if let Some(last_active) = user.last_active_date {
                let today = self.clock.now().date();
                if gap_breaks_streak(last_active.date(), today) {
                    debug!(%user_id, streak = user.current_streak, "streak broken by missed working day");
                    self.store.reset_streak(user_id).await?;
                    user.current_streak = 0;
                }
            }
        }

        Ok(user)
    }

    /// Evaluate today's activity after a module completion or a quiz attempt.
    ///
    /// Returns the new streak length when today was credited, `None`
    /// otherwise. Safe to call any number of times per day.
    pub async fn record_daily_activity(&self, user_id: Uuid) -> AppResult<Option<i32>> {
        let now = self.clock.now();
        let today = now.date();

        // Weekend activity is recorded for auditing but cannot advance or
        // reset the streak.
        if !is_working_day(today) {
            self.store
                .record_streak_day(user_id, today, false, now)
                .await?;
            return Ok(None);
        }

        let user = self.validate_streak(user_id).await?;

        let completed_module = self.store.module_completed_on(user_id, today).await?;
        let attempted_quiz = self.store.quiz_attempted_on(user_id, today).await?;

        if !(completed_module && attempted_quiz) {
            self.store
                .record_streak_day(user_id, today, false, now)
                .await?;
            return Ok(None);
        }

        let already_credited = user
            .last_active_date
            .map(|last| last.date() == today)
            .unwrap_or(false);
        if already_credited {
            self.store
                .record_streak_day(user_id, today, true, now)
                .await?;
            return Ok(None);
        }

        let current = user.current_streak + 1;
        let longest = current.max(user.longest_streak);

        self.store
            .advance_streak(user_id, current, longest, now)
            .await?;
        self.store
            .record_streak_day(user_id, today, true, now)
            .await?;

        info!(%user_id, streak = current, "streak advanced");

        self.feed
            .log_activity(&NewActivity {
                user_id,
                activity_type: ActivityType::StreakMilestone,
                description: format!("Learning streak reached {} day(s)", current),
                metadata: json!({
                    "current_streak": current,
                    "longest_streak": longest,
                }),
                points_earned: 0,
                created_at: now,
            })
            .await?;

        self.notifier
            .notify(
                user_id,
                NotificationKind::StreakMilestone,
                json!({ "current_streak": current, "longest_streak": longest }),
            )
            .await;

        Ok(Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{
        Enrollment, LearningPath, Module, ModuleContentType, ModuleProgressStatus,
        ModuleProgressWrite, NewQuizAttempt, Quiz,
    };
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryStore;
    use time::macros::datetime;
    use time::OffsetDateTime;

    struct Fixture {
        tracker: StreakTracker,
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        user_id: Uuid,
        enrollment_id: Uuid,
        path_id: Uuid,
        quiz_id: Uuid,
    }

    fn fixture(start: OffsetDateTime) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(start));
        let now = clock.now();

        let user = User::new("learner@example.com", "Learner", now);
        let user_id = user.id;
        store.seed_user(user);

        let path = LearningPath::new("Rust basics", now);
        let path_id = path.id;
        let module = Module::new(path.id, "Ownership", 1, ModuleContentType::Video, now);
        let quiz = Quiz::new(module.id, "Ownership check", 70.0, 100, now);
        let quiz_id = quiz.id;
        let enrollment = Enrollment::new(user_id, path.id, now);
        let enrollment_id = enrollment.id;

        store.seed_learning_path(path);
        store.seed_module(module);
        store.seed_quiz(quiz, Vec::new());
        store.seed_enrollment(enrollment);

        let tracker =
            StreakTracker::new(store.clone(), store.clone(), notifier, clock.clone());

        Fixture {
            tracker,
            store,
            clock,
            user_id,
            enrollment_id,
            path_id,
            quiz_id,
        }
    }

    /// Complete a fresh module and submit a quiz attempt stamped "now" so
    /// both daily conditions hold for the clock's current day.
    async fn satisfy_daily_conditions(fx: &Fixture) {
        let now = fx.clock.now();
        let module = Module::new(fx.path_id, "Daily module", 99, ModuleContentType::Video, now);
        fx.store.seed_module(module.clone());
        fx.store
            .upsert_module_progress(&ModuleProgressWrite {
                user_id: fx.user_id,
                module_id: module.id,
                enrollment_id: fx.enrollment_id,
                status: ModuleProgressStatus::Completed,
                progress: 100.0,
                time_spent_delta: 0,
                attempts_delta: 0,
                points_earned: None,
                quiz_score: None,
                bookmarked: None,
                started_at: Some(now),
                completed_at: Some(now),
                last_accessed_at: now,
            })
            .await
            .unwrap();
        fx.store
            .insert_quiz_attempt(&NewQuizAttempt {
                quiz_id: fx.quiz_id,
                enrollment_id: fx.enrollment_id,
                user_id: fx.user_id,
                attempt_number: 1,
                score: 80.0,
                percentage: 80.0,
                passed: true,
                answers: json!(["a"]),
                detailed_results: json!([]),
                completed_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn both_conditions_required_to_advance() {
        // Monday
        let fx = fixture(datetime!(2024-03-04 10:00 UTC));
        let now = fx.clock.now();

        // Only a quiz attempt, no module completion.
        fx.store
            .insert_quiz_attempt(&NewQuizAttempt {
                quiz_id: fx.quiz_id,
                enrollment_id: fx.enrollment_id,
                user_id: fx.user_id,
                attempt_number: 1,
                score: 10.0,
                percentage: 10.0,
                passed: false,
                answers: json!(["x"]),
                detailed_results: json!([]),
                completed_at: now,
            })
            .await
            .unwrap();

        assert_eq!(fx.tracker.record_daily_activity(fx.user_id).await.unwrap(), None);
        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.current_streak, 0);

        // Completing a module as well satisfies both conditions.
        satisfy_daily_conditions(&fx).await;
        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn same_day_credit_is_idempotent() {
        let fx = fixture(datetime!(2024-03-04 10:00 UTC));
        satisfy_daily_conditions(&fx).await;

        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(1)
        );
        assert_eq!(fx.tracker.record_daily_activity(fx.user_id).await.unwrap(), None);

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.current_streak, 1);

        let history = fx
            .store
            .streak_history(fx.user_id, datetime!(2024-03-04 10:00 UTC).date())
            .await
            .unwrap()
            .unwrap();
        assert!(history.completed);
        assert_eq!(history.activity_count, 2);
    }

    #[tokio::test]
    async fn weekend_gap_does_not_break_the_streak() {
        // Friday
        let fx = fixture(datetime!(2024-03-08 10:00 UTC));
        satisfy_daily_conditions(&fx).await;
        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(1)
        );

        // Monday: nothing happened Saturday or Sunday.
        fx.clock.set(datetime!(2024-03-11 10:00 UTC));
        satisfy_daily_conditions(&fx).await;
        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(2)
        );

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.current_streak, 2);
        assert_eq!(user.longest_streak, 2);
    }

    #[tokio::test]
    async fn missed_working_day_resets_before_crediting() {
        // Monday
        let fx = fixture(datetime!(2024-03-04 10:00 UTC));
        satisfy_daily_conditions(&fx).await;
        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(1)
        );

        // Wednesday: Tuesday was a working day with no activity.
        fx.clock.set(datetime!(2024-03-06 10:00 UTC));
        let user = fx.tracker.validate_streak(fx.user_id).await.unwrap();
        assert_eq!(user.current_streak, 0);

        satisfy_daily_conditions(&fx).await;
        assert_eq!(
            fx.tracker.record_daily_activity(fx.user_id).await.unwrap(),
            Some(1)
        );

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.current_streak, 1);
        assert_eq!(user.longest_streak, 1);
    }

    #[tokio::test]
    async fn weekend_activity_is_recorded_but_never_credited() {
        // Saturday
        let fx = fixture(datetime!(2024-03-09 10:00 UTC));
        satisfy_daily_conditions(&fx).await;

        assert_eq!(fx.tracker.record_daily_activity(fx.user_id).await.unwrap(), None);

        let user = fx.store.user(fx.user_id).await.unwrap().unwrap();
        assert_eq!(user.current_streak, 0);

        let history = fx
            .store
            .streak_history(fx.user_id, datetime!(2024-03-09 10:00 UTC).date())
            .await
            .unwrap()
            .unwrap();
        assert!(!history.completed);
        assert_eq!(history.activity_count, 1);
    }

    #[test]
    fn working_day_predicate_matches_the_calendar() {
        assert!(is_working_day(datetime!(2024-03-04 00:00 UTC).date())); // Monday
        assert!(is_working_day(datetime!(2024-03-08 00:00 UTC).date())); // Friday
        assert!(!is_working_day(datetime!(2024-03-09 00:00 UTC).date())); // Saturday
        assert!(!is_working_day(datetime!(2024-03-10 00:00 UTC).date())); // Sunday
    }
}
