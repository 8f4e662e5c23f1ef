//! cmetrack - refinement and classification of single-particle tracks.
//!
//! Turns raw tracker output from fluorescence microscopy movies into
//! per-track time series:
//! - Track assembly from segment linkage, with pruning and rejection
//! - Gap detection and PSF refits at missing frames
//! - Background buffers before and after each track
//! - Multi-stage category classification and splitting of misjoined tracks
//! - Motion and intensity-shape statistics
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cmetrack::{Config, JsonResultStore, MovieInput, process_movies};
//!
//! let config = Config::default();
//! let store = JsonResultStore::new(config.result_file_name.clone());
//! let outcomes = process_movies(&inputs, &config, &store)?;
//! ```

pub mod assembly;
pub mod classify;
mod config;
mod error;
pub mod features;
pub mod gaps;
mod input;
pub mod math;
pub mod pipeline;
pub mod psf;
pub mod split;
mod store;
pub mod sweep;
pub mod track;

#[cfg(test)]
mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{Config, DEFAULT_COHORT_BOUNDS_S};
pub use error::{Error, Result};

// ============================================================================
// Inputs
// ============================================================================

pub use input::{
    Detection, DetectionTable, EventKind, Frame, FrameSource, MovieInfo, RawTrack, SequenceEvent,
};

// ============================================================================
// Tracks
// ============================================================================

pub use features::TrackFeatures;
pub use psf::{FitError, PointFit};
pub use track::{
    BufferPoint, Gap, GapStatus, MotionStats, PointKind, ShapeStats, Track, TrackBuffer,
    TrackCategory, TrackPoint, Visibility,
};

// ============================================================================
// Processing and persistence
// ============================================================================

pub use pipeline::{
    LifetimeHistogram, MovieInput, MovieOutcome, MovieResult, ProcessingMetadata, StagesRun,
    process_movie, process_movies, process_tracks,
};
pub use store::{JsonResultStore, ResultStore};
