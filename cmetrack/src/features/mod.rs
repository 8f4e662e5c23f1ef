//! Motion and shape statistics of the final track collection.
//!
//! Per-track descriptors are computed first; the intensity spread is then
//! min-max normalized in a second pass over the whole collection.

pub mod motion;
pub mod shape;
pub mod table;

use rayon::prelude::*;
use tracing::info;

use crate::track::Track;

pub use motion::{mean_squared_displacement, motion_stats};
pub use shape::{decay_r2, find_peaks, intensity_trace, prominence, shape_stats};
pub use table::{TrackFeatures, feature_table};

/// Fill `motion` and `shape` of every track.
pub fn compute_statistics(tracks: &mut [Track], max_msd_lag: usize) {
    tracks.par_iter_mut().for_each(|track| {
        track.motion = Some(motion_stats(track, max_msd_lag));
        track.shape = Some(shape_stats(track));
    });
    normalize_spread(tracks);
    info!(tracks = tracks.len(), "Motion and shape statistics computed");
}

/// Min-max normalize `intensity_spread` over the tracks that have one.
/// A collection where every spread is equal normalizes to 0.
pub fn normalize_spread(tracks: &mut [Track]) {
    let spreads = || {
        tracks
            .iter()
            .filter_map(|t| t.shape.as_ref())
            .map(|s| s.intensity_spread)
            .filter(|v| v.is_finite())
    };
    let (Some(lo), Some(hi)) = (spreads().reduce(f64::min), spreads().reduce(f64::max)) else {
        return;
    };
    let range = hi - lo;

    for shape in tracks.iter_mut().filter_map(|t| t.shape.as_mut()) {
        shape.normalized_spread = if !shape.intensity_spread.is_finite() {
            f64::NAN
        } else if range > 0.0 {
            (shape.intensity_spread - lo) / range
        } else {
            0.0
        };
    }
}
