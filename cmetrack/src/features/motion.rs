//! Displacement and mean-squared-displacement of a position series.

use glam::DVec2;

use crate::math::{mean, std_dev};
use crate::track::{MotionStats, Track};

/// Primary-channel positions of the non-separator columns, NaN where unknown.
pub fn primary_positions(track: &Track) -> Vec<DVec2> {
    track
        .points
        .iter()
        .filter(|p| !p.is_separator())
        .map(|p| p.primary().pos)
        .collect()
}

pub fn motion_stats(track: &Track, max_lag: usize) -> MotionStats {
    let positions = primary_positions(track);
    let known: Vec<DVec2> = positions.iter().copied().filter(|p| p.is_finite()).collect();
    let total_displacement = match (known.first(), known.last()) {
        (Some(first), Some(last)) => first.distance(*last),
        _ => f64::NAN,
    };

    let (msd, msd_std) = mean_squared_displacement(&positions, max_lag);
    MotionStats {
        total_displacement,
        msd,
        msd_std,
    }
}

/// MSD and its per-lag standard deviation for lags `1..=min(max_lag, n - 1)`.
/// Pairs with an unknown position are skipped; a lag without pairs is NaN.
pub fn mean_squared_displacement(positions: &[DVec2], max_lag: usize) -> (Vec<f64>, Vec<f64>) {
    let n_lags = max_lag.min(positions.len().saturating_sub(1));
    let mut msd = Vec::with_capacity(n_lags);
    let mut msd_std = Vec::with_capacity(n_lags);

    for lag in 1..=n_lags {
        let squared: Vec<f64> = positions
            .iter()
            .zip(&positions[lag..])
            .map(|(a, b)| a.distance_squared(*b))
            .filter(|d| d.is_finite())
            .collect();
        msd.push(mean(&squared));
        msd_std.push(std_dev(&squared));
    }
    (msd, msd_std)
}
