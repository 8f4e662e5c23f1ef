//! Flat per-track feature records for downstream classifiers.
//!
//! One record of named scalars per track, the category index first as the
//! class variable. Missing statistics are NaN (written as `null`).

use serde::{Deserialize, Serialize};

use crate::track::Track;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatures {
    /// Category index 1..=9.
    pub category: u8,
    pub id: usize,
    pub parent: Option<usize>,
    pub start_frame: usize,
    pub end_frame: usize,
    pub lifetime_s: f64,
    pub n_frames: usize,
    pub n_segments: usize,
    pub n_gap_columns: usize,
    pub gap_fraction: f64,
    pub diffraction_limited: bool,
    /// Largest primary-channel amplitude of a resolved column.
    pub max_amplitude: f64,
    pub total_displacement: f64,
    /// Mean squared displacement at lag 1.
    pub msd_lag1: f64,
    /// Mean squared displacement at the longest computed lag.
    pub msd_last: f64,
    pub n_peaks: Option<usize>,
    pub n_prominent_peaks: Option<usize>,
    pub peak_ratio: f64,
    pub decay_r2: f64,
    pub intensity_spread: f64,
    pub normalized_spread: f64,
}

impl TrackFeatures {
    pub fn of(track: &Track) -> Self {
        let motion = track.motion.as_ref();
        let shape = track.shape.as_ref();
        let msd = motion.map(|m| m.msd.as_slice()).unwrap_or_default();
        let shape_value = |f: fn(&crate::track::ShapeStats) -> f64| shape.map_or(f64::NAN, f);

        Self {
            category: track.category().index(),
            id: track.id,
            parent: track.parent,
            start_frame: track.start_frame,
            end_frame: track.end_frame,
            lifetime_s: track.lifetime_s,
            n_frames: track.n_frames(),
            n_segments: track.n_segments,
            n_gap_columns: track.n_gap_columns(),
            gap_fraction: track.gap_fraction(),
            diffraction_limited: track.diffraction_limited,
            max_amplitude: track.max_amplitude().unwrap_or(f64::NAN),
            total_displacement: motion.map_or(f64::NAN, |m| m.total_displacement),
            msd_lag1: msd.first().copied().unwrap_or(f64::NAN),
            msd_last: msd.last().copied().unwrap_or(f64::NAN),
            n_peaks: shape.map(|s| s.n_peaks),
            n_prominent_peaks: shape.map(|s| s.n_prominent_peaks),
            peak_ratio: shape_value(|s| s.peak_ratio),
            decay_r2: shape_value(|s| s.decay_r2),
            intensity_spread: shape_value(|s| s.intensity_spread),
            normalized_spread: shape_value(|s| s.normalized_spread),
        }
    }
}

/// Feature records of `tracks`, in collection order.
pub fn feature_table(tracks: &[Track]) -> Vec<TrackFeatures> {
    tracks.iter().map(TrackFeatures::of).collect()
}
