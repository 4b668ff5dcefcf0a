//! Level thresholds and progress math.
//!
//! Pure functions over a fixed threshold table; everything else in the
//! engine derives a user's level from these.

use serde::Serialize;

use super::round_two;

/// Cumulative points required to enter each level, L1 through L10.
pub static LEVEL_THRESHOLDS: &[i64] = &[
    0, 1_000, 2_500, 5_000, 10_000, 20_000, 40_000, 75_000, 125_000, 200_000,
];

/// Highest level whose threshold is within `points`. Never below 1, capped at
/// the last defined level — no extrapolation beyond the table.
pub fn level_for(points: i64) -> i32 {
    LEVEL_THRESHOLDS
        .iter()
        .rposition(|threshold| points >= *threshold)
        .map(|idx| idx as i32 + 1)
        .unwrap_or(1)
}

/// Position within the current level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelProgress {
    pub level: i32,
    pub total_points: i64,
    /// Points accrued past the current level's threshold.
    pub points_into_level: i64,
    /// Cumulative points needed to enter the next level. At the cap this
    /// falls back to twice the current threshold.
    pub next_level_points: i64,
    /// 0-100, two decimals.
    pub percent: f64,
}

pub fn level_progress(points: i64) -> LevelProgress {
    let level = level_for(points);
    let current_threshold = LEVEL_THRESHOLDS[(level - 1) as usize];
    let next_level_points = LEVEL_THRESHOLDS
        .get(level as usize)
        .copied()
        .unwrap_or(current_threshold * 2);

    let points_into_level = (points - current_threshold).max(0);
    let span = (next_level_points - current_threshold).max(1);
    let percent = round_two((points_into_level as f64 / span as f64) * 100.0).clamp(0.0, 100.0);

    LevelProgress {
        level,
        total_points: points,
        points_into_level,
        next_level_points,
        percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(999), 1);
        assert_eq!(level_for(1_000), 2);
        assert_eq!(level_for(2_499), 2);
        assert_eq!(level_for(2_500), 3);
        assert_eq!(level_for(200_000), 10);
        assert_eq!(level_for(500_000), 10);
    }

    #[test]
    fn negative_points_stay_at_level_one() {
        assert_eq!(level_for(-5), 1);
    }

    #[test]
    fn progress_within_a_level() {
        // 1500 points: level 2 entered at 1000, level 3 at 2500.
        let progress = level_progress(1_500);
        assert_eq!(progress.level, 2);
        assert_eq!(progress.points_into_level, 500);
        assert_eq!(progress.next_level_points, 2_500);
        assert!((progress.percent - 33.33).abs() < 0.001);
    }

    #[test]
    fn progress_at_the_cap_uses_doubled_threshold() {
        let progress = level_progress(200_000);
        assert_eq!(progress.level, 10);
        assert_eq!(progress.next_level_points, 400_000);
        assert_eq!(progress.percent, 0.0);

        let beyond = level_progress(500_000);
        assert_eq!(beyond.level, 10);
        assert_eq!(beyond.percent, 100.0);
    }
}
