//! Configuration for track processing.
//!
//! A flat [`Config`] struct with parameters grouped by comments into the
//! pipeline stages they control. Values are checked once by
//! [`Config::validate`] before any movie is processed.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::LMConfig;

/// Default lifetime cohort boundaries in seconds. The last cohort is open-ended.
pub const DEFAULT_COHORT_BOUNDS_S: [f64; 9] = [0.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 125.0, 150.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ------------------------------------------------------------------------
    // Stage switches
    // ------------------------------------------------------------------------
    /// Remove short/spurious segments and reject short or border tracks.
    pub preprocess: bool,
    /// Run classification, hotspot splitting and the final relabel.
    pub postprocess: bool,
    /// Demote accepted tracks that are not diffraction-limited.
    pub force_diffraction_limited: bool,

    // ------------------------------------------------------------------------
    // Track assembly
    // ------------------------------------------------------------------------
    /// Tracks shorter than this (seconds) are rejected.
    pub min_lifetime_s: f64,
    /// Merge/split branches shorter than this (frames) are spurious.
    pub min_segment_length: usize,
    /// Border margin in units of the primary channel PSF sigma.
    pub border_margin_sigma: f64,

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------
    /// Frames read before the track start and after the track end.
    pub buffer_frames: [usize; 2],
    /// Buffer every track, not only complete ones.
    pub buffer_all: bool,

    // ------------------------------------------------------------------------
    // Localization refinement
    // ------------------------------------------------------------------------
    /// Amplitude must exceed this many residual standard deviations.
    pub k_level: f64,
    /// Significance level for amplitude, normality and background tests.
    pub alpha: f64,
    /// Levenberg-Marquardt settings for PSF fits.
    pub fit: LMConfig,

    // ------------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------------
    /// Lifetime cohort lower bounds (seconds), strictly increasing.
    pub cohort_bounds_s: Vec<f64>,
    /// Percentile of accepted max amplitudes used as rescue threshold.
    pub rescue_percentile: f64,
    /// Rescued tracks must be longer than this many frames.
    pub min_rescue_length: usize,
    /// Tracks whose gap fraction reaches this value are rejected.
    pub max_gap_fraction: f64,
    /// Population percentile defining a displacement excursion.
    pub displacement_percentile: f64,
    /// Tracks with more excursions than this are rejected.
    pub max_displacement_excursions: usize,

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------
    /// Longest lag of the mean-squared-displacement curve.
    pub max_msd_lag: usize,

    // ------------------------------------------------------------------------
    // Movie access and output
    // ------------------------------------------------------------------------
    /// Movie frame index for each tracking frame when the tracker ran on a
    /// subsampled movie. Must have a uniform stride.
    pub frame_indices: Option<Vec<usize>>,
    /// File name of the persisted result inside the movie directory.
    pub result_file_name: String,
    /// Also write the flat per-track feature table next to the result.
    pub export_features: bool,
    /// Replace existing results instead of skipping the movie.
    pub overwrite: bool,
    /// Movies processed at the same time.
    pub max_concurrent_movies: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preprocess: true,
            postprocess: true,
            force_diffraction_limited: true,
            min_lifetime_s: 0.4,
            min_segment_length: 4,
            border_margin_sigma: 4.0,
            buffer_frames: [5, 5],
            buffer_all: false,
            k_level: 1.96,
            alpha: 0.05,
            fit: LMConfig::default(),
            cohort_bounds_s: DEFAULT_COHORT_BOUNDS_S.to_vec(),
            rescue_percentile: 2.5,
            min_rescue_length: 4,
            max_gap_fraction: 0.5,
            displacement_percentile: 95.0,
            max_displacement_excursions: 4,
            max_msd_lag: 10,
            frame_indices: None,
            result_file_name: "ProcessedTracks.json".to_string(),
            export_features: true,
            overwrite: false,
            max_concurrent_movies: 4,
        }
    }
}

impl Config {
    /// Check every option. Called before any movie is processed.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_lifetime_s.is_finite() && self.min_lifetime_s >= 0.0) {
            return Err(invalid(format!(
                "min_lifetime_s must be finite and non-negative, got {}",
                self.min_lifetime_s
            )));
        }
        if self.min_segment_length == 0 {
            return Err(invalid("min_segment_length must be at least 1"));
        }
        if !(self.border_margin_sigma.is_finite() && self.border_margin_sigma >= 0.0) {
            return Err(invalid(format!(
                "border_margin_sigma must be finite and non-negative, got {}",
                self.border_margin_sigma
            )));
        }
        if !(self.k_level.is_finite() && self.k_level > 0.0) {
            return Err(invalid(format!("k_level must be positive, got {}", self.k_level)));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(invalid(format!("alpha must be in (0, 1), got {}", self.alpha)));
        }
        self.fit.validate().map_err(invalid)?;

        if self.cohort_bounds_s.is_empty() {
            return Err(invalid("cohort_bounds_s must not be empty"));
        }
        if self.cohort_bounds_s.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(invalid("cohort_bounds_s must be finite and non-negative"));
        }
        if self.cohort_bounds_s.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid(format!(
                "cohort_bounds_s must be strictly increasing, got {:?}",
                self.cohort_bounds_s
            )));
        }
        for (name, p) in [
            ("rescue_percentile", self.rescue_percentile),
            ("displacement_percentile", self.displacement_percentile),
        ] {
            if !(0.0..=100.0).contains(&p) {
                return Err(invalid(format!("{name} must be in [0, 100], got {p}")));
            }
        }
        if !(self.max_gap_fraction > 0.0 && self.max_gap_fraction <= 1.0) {
            return Err(invalid(format!(
                "max_gap_fraction must be in (0, 1], got {}",
                self.max_gap_fraction
            )));
        }
        if self.max_msd_lag == 0 {
            return Err(invalid("max_msd_lag must be at least 1"));
        }

        if let Some(indices) = &self.frame_indices {
            if indices.is_empty() {
                return Err(invalid("frame_indices must not be empty"));
            }
            let stride = frame_stride(indices);
            if stride == 0 {
                return Err(invalid("frame_indices must be strictly increasing"));
            }
            if indices.windows(2).any(|w| w[1] != w[0] + stride) {
                return Err(invalid(format!(
                    "frame_indices must have a uniform stride, got {:?}",
                    indices
                )));
            }
        }

        if self.result_file_name.trim().is_empty() {
            return Err(invalid("result_file_name must not be empty"));
        }
        if self.max_concurrent_movies == 0 {
            return Err(invalid("max_concurrent_movies must be at least 1"));
        }
        Ok(())
    }

    /// Movie frame read for a tracking frame.
    pub fn movie_frame(&self, tracking_frame: usize) -> usize {
        match &self.frame_indices {
            Some(indices) => indices[tracking_frame],
            None => tracking_frame,
        }
    }
}

fn frame_stride(indices: &[usize]) -> usize {
    match indices {
        [first, second, ..] => second.saturating_sub(*first),
        _ => 1,
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::Configuration(reason.into())
}
