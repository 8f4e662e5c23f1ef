//! Boundary types for the upstream detector, tracker and frame loader.

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::psf::PointFit;

/// One detected spot with an estimate per channel. Channel 0 is primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub channels: Vec<PointFit>,
}

impl Detection {
    pub fn primary(&self) -> &PointFit {
        &self.channels[0]
    }
}

/// Detections of a movie, indexed by frame then feature index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionTable {
    pub frames: Vec<Vec<Detection>>,
}

impl DetectionTable {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames }
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn get(&self, frame: usize, feature: usize) -> Option<&Detection> {
        self.frames.get(frame)?.get(feature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Start,
    End,
}

/// Birth or death of a segment.
///
/// A `Start` with a partner is a split off the partner; an `End` with a
/// partner is a merge into the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEvent {
    /// Absolute frame index.
    pub frame: usize,
    pub kind: EventKind,
    pub segment: usize,
    pub partner: Option<usize>,
}

/// Tracker output for one compound track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTrack {
    /// Absolute frame of column 0 of `feature_indices`.
    pub start_frame: usize,
    /// Segment × frame feature index into the detection table.
    pub feature_indices: Vec<Vec<Option<usize>>>,
    pub events: Vec<SequenceEvent>,
}

impl RawTrack {
    pub fn n_segments(&self) -> usize {
        self.feature_indices.len()
    }
}

/// Acquisition properties of a movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieInfo {
    pub name: String,
    pub width: usize,
    pub height: usize,
    /// Tracking frames.
    pub n_frames: usize,
    /// Seconds between tracking frames.
    pub frame_interval_s: f64,
    /// PSF standard deviation per channel, in pixels. Channel 0 is primary.
    pub psf_sigma: Vec<f64>,
}

impl MovieInfo {
    pub fn n_channels(&self) -> usize {
        self.psf_sigma.len()
    }

    /// Check the values the pipeline divides by or indexes with.
    pub fn validate(&self) -> crate::Result<()> {
        let inconsistent = |reason: String| crate::Error::InconsistentInput {
            movie: self.name.clone(),
            reason,
        };
        if self.psf_sigma.is_empty() {
            return Err(inconsistent("no channels".to_string()));
        }
        if let Some(s) = self.psf_sigma.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(inconsistent(format!("PSF sigma must be positive, got {s}")));
        }
        if !(self.frame_interval_s.is_finite() && self.frame_interval_s > 0.0) {
            return Err(inconsistent(format!(
                "frame interval must be positive, got {}",
                self.frame_interval_s
            )));
        }
        if self.width == 0 || self.height == 0 || self.n_frames == 0 {
            return Err(inconsistent(format!(
                "empty movie: {}x{} with {} frames",
                self.width, self.height, self.n_frames
            )));
        }
        Ok(())
    }
}

/// Image and binary segmentation mask of one channel at one frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Buffer2<f32>,
    pub mask: Buffer2<bool>,
}

/// Loader of movie frames.
pub trait FrameSource: Send + Sync {
    /// Load frame `frame` (movie frame index) of channel `channel`.
    fn frame(&self, channel: usize, frame: usize) -> anyhow::Result<Frame>;
}
