//! The progress & gamification engine.
//!
//! Dependency graph is layered: [`levels`] is pure, [`points`] and
//! [`streaks`] sit directly on the store, [`quiz`] and [`progress`] compose
//! them, and nothing depends back on the aggregator.

pub mod enrollment;
pub mod levels;
pub mod points;
pub mod progress;
pub mod quiz;
pub mod streaks;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GamificationConfig;
use crate::notify::Notifier;
use crate::store::{ActivityFeed, Store};

pub use enrollment::EnrollmentCoordinator;
pub use levels::LevelProgress;
pub use points::PointsLedger;
pub use progress::{EnrollmentProgressSummary, ProgressAggregator, UserProgressOverview};
pub use quiz::QuizScorer;
pub use streaks::StreakTracker;

/// Round to two decimal places, the precision used for every stored
/// percentage.
pub(crate) fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Facade bundling the engine components for the consuming HTTP layer.
#[derive(Clone)]
pub struct Engine {
    pub ledger: PointsLedger,
    pub streaks: StreakTracker,
    pub coordinator: EnrollmentCoordinator,
    pub scorer: QuizScorer,
    pub progress: ProgressAggregator,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ActivityFeed>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: GamificationConfig,
    ) -> Self {
        let ledger = PointsLedger::new(
            store.clone(),
            feed.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let streaks = StreakTracker::new(
            store.clone(),
            feed.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let coordinator = EnrollmentCoordinator::new(
            store.clone(),
            feed.clone(),
            notifier.clone(),
            ledger.clone(),
            clock.clone(),
            config,
        );
        let scorer = QuizScorer::new(
            store.clone(),
            feed.clone(),
            ledger.clone(),
            streaks.clone(),
            coordinator.clone(),
            clock.clone(),
        );
        let progress = ProgressAggregator::new(
            store,
            feed,
            notifier,
            ledger.clone(),
            streaks.clone(),
            coordinator.clone(),
            clock,
        );

        Self {
            ledger,
            streaks,
            coordinator,
            scorer,
            progress,
        }
    }
}
