//! Per-track time series and derived descriptors.
//!
//! A [`Track`] holds one [`TrackPoint`] column per acquired frame across all
//! of its segments, with a single separator column between consecutive
//! segments. Missing values inside a [`PointFit`] are NaN; the column kind
//! carries the structural meaning.


use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::psf::PointFit;

/// Structural role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    Detected,
    /// No detection at this frame; filled by interpolation and refitting
    /// when the gap is valid.
    Gap,
    /// Boundary between two segments. Carries no data.
    Separator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Absolute tracking frame. A separator repeats the previous column's frame.
    pub frame: usize,
    /// Time in seconds. NaN for separators.
    pub t: f64,
    pub segment: usize,
    pub kind: PointKind,
    pub channels: Vec<PointFit>,
}

impl TrackPoint {
    pub fn primary(&self) -> &PointFit {
        &self.channels[0]
    }

    pub fn is_separator(&self) -> bool {
        self.kind == PointKind::Separator
    }

    pub fn is_gap(&self) -> bool {
        self.kind == PointKind::Gap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapStatus {
    Valid,
    Invalid,
}

/// A maximal run of gap columns, as inclusive column indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub first: usize,
    pub last: usize,
    pub status: GapStatus,
}

impl Gap {
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn columns(&self) -> std::ops::RangeInclusive<usize> {
        self.first..=self.last
    }

    pub fn is_valid(&self) -> bool {
        self.status == GapStatus::Valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Starts and ends inside the movie.
    Complete,
    /// Present in the first or the last frame.
    Incomplete,
    /// Present in both the first and the last frame.
    Persistent,
}

/// One refined estimate read before the start or after the end of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPoint {
    pub frame: usize,
    /// Time extrapolated from the track start or end.
    pub t: f64,
    pub channels: Vec<PointFit>,
}

impl BufferPoint {
    pub fn primary(&self) -> &PointFit {
        &self.channels[0]
    }
}

/// Window of refined estimates adjacent to a track, in frame order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackBuffer {
    pub points: Vec<BufferPoint>,
}

impl TrackBuffer {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest resolved primary-channel amplitude.
    pub fn max_amplitude(&self) -> Option<f64> {
        crate::math::finite_max(self.points.iter().map(|p| p.primary().amplitude))
    }

    /// Whether `run` consecutive points are at background level in the
    /// primary channel. Unresolved fits break a run.
    pub fn has_background_run(&self, run: usize, alpha: f64) -> bool {
        let mut current = 0;
        for point in &self.points {
            if point.primary().is_background(alpha) {
                current += 1;
                if current >= run {
                    return true;
                }
            } else {
                current = 0;
            }
        }
        false
    }
}

/// Track class. See [`TrackCategory::index`] for the numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum TrackCategory {
    /// Single segment, all gaps valid, complete.
    Valid,
    /// Single segment with invalid gaps. Also the rejected state.
    InvalidGaps,
    /// Single segment touching the first or last frame.
    Cut,
    /// Single segment spanning the whole movie.
    Persistent,
    CompoundValid,
    CompoundInvalidGaps,
    CompoundCut,
    CompoundPersistent,
    /// Accepted but still containing gaps.
    GappedValid,
}

impl TrackCategory {
    pub fn index(self) -> u8 {
        match self {
            TrackCategory::Valid => 1,
            TrackCategory::InvalidGaps => 2,
            TrackCategory::Cut => 3,
            TrackCategory::Persistent => 4,
            TrackCategory::CompoundValid => 5,
            TrackCategory::CompoundInvalidGaps => 6,
            TrackCategory::CompoundCut => 7,
            TrackCategory::CompoundPersistent => 8,
            TrackCategory::GappedValid => 9,
        }
    }

    /// Category from segment count, gap validity and visibility.
    pub fn initial(compound: bool, gaps_valid: bool, visibility: Visibility) -> Self {
        match (compound, visibility, gaps_valid) {
            (false, Visibility::Persistent, _) => TrackCategory::Persistent,
            (false, Visibility::Incomplete, _) => TrackCategory::Cut,
            (false, Visibility::Complete, true) => TrackCategory::Valid,
            (false, Visibility::Complete, false) => TrackCategory::InvalidGaps,
            (true, Visibility::Persistent, _) => TrackCategory::CompoundPersistent,
            (true, Visibility::Incomplete, _) => TrackCategory::CompoundCut,
            (true, Visibility::Complete, true) => TrackCategory::CompoundValid,
            (true, Visibility::Complete, false) => TrackCategory::CompoundInvalidGaps,
        }
    }
}

/// Displacement statistics of the primary-channel positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionStats {
    /// Distance between the first and last known positions.
    pub total_displacement: f64,
    /// Mean squared displacement for lags 1, 2, ...
    pub msd: Vec<f64>,
    pub msd_std: Vec<f64>,
}

/// Descriptors of the intensity trace (amplitude + background).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStats {
    pub n_peaks: usize,
    /// Peaks with prominence at least the mean prominence.
    pub n_prominent_peaks: usize,
    /// `n_prominent_peaks / n_peaks`, NaN without peaks.
    pub peak_ratio: f64,
    /// R² of the power-law decay fit from the trace maximum to the end.
    pub decay_r2: f64,
    /// Trace maximum minus trace mean.
    pub intensity_spread: f64,
    /// `intensity_spread` min-max normalized over the movie.
    pub normalized_spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Identifier within the movie. Split children get fresh ids.
    pub id: usize,
    /// Track this one was split from.
    pub parent: Option<usize>,
    pub start_frame: usize,
    pub end_frame: usize,
    pub lifetime_s: f64,
    pub n_segments: usize,
    visibility: Visibility,
    pub points: Vec<TrackPoint>,
    pub gaps: Vec<Gap>,
    pub start_buffer: Option<TrackBuffer>,
    pub end_buffer: Option<TrackBuffer>,
    category: TrackCategory,
    pub diffraction_limited: bool,
    pub motion: Option<MotionStats>,
    pub shape: Option<ShapeStats>,
}

impl Track {
    /// A track with the given columns. Category starts as `Valid` until the
    /// initial classification runs.
    pub fn new(
        id: usize,
        points: Vec<TrackPoint>,
        n_segments: usize,
        visibility: Visibility,
        frame_interval_s: f64,
    ) -> Self {
        let mut track = Self {
            id,
            parent: None,
            start_frame: 0,
            end_frame: 0,
            lifetime_s: 0.0,
            n_segments,
            visibility,
            points,
            gaps: Vec::new(),
            start_buffer: None,
            end_buffer: None,
            category: TrackCategory::Valid,
            diffraction_limited: false,
            motion: None,
            shape: None,
        };
        track.update_extent(frame_interval_s);
        track
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn category(&self) -> TrackCategory {
        self.category
    }

    /// Recompute start, end and lifetime from the columns.
    pub fn update_extent(&mut self, frame_interval_s: f64) {
        let frames = || self.points.iter().filter(|p| !p.is_separator()).map(|p| p.frame);
        if let (Some(first), Some(last)) = (frames().min(), frames().max()) {
            self.start_frame = first;
            self.end_frame = last;
            self.lifetime_s = (last - first + 1) as f64 * frame_interval_s;
        }
    }

    pub fn n_channels(&self) -> usize {
        self.points.first().map_or(0, |p| p.channels.len())
    }

    /// Columns that are not separators.
    pub fn n_frames(&self) -> usize {
        self.points.iter().filter(|p| !p.is_separator()).count()
    }

    pub fn n_gap_columns(&self) -> usize {
        self.points.iter().filter(|p| p.is_gap()).count()
    }

    /// Gap columns over non-separator columns.
    pub fn gap_fraction(&self) -> f64 {
        let n = self.n_frames();
        if n == 0 {
            return 0.0;
        }
        self.n_gap_columns() as f64 / n as f64
    }

    pub fn all_gaps_valid(&self) -> bool {
        self.gaps.iter().all(Gap::is_valid)
    }

    /// Largest resolved primary-channel amplitude over the track columns.
    pub fn max_amplitude(&self) -> Option<f64> {
        crate::math::finite_max(
            self.points
                .iter()
                .filter(|p| !p.is_separator())
                .map(|p| p.primary().amplitude),
        )
    }

    /// First column with a known primary position.
    pub fn first_position(&self) -> Option<glam::DVec2> {
        self.points
            .iter()
            .map(|p| p.primary().pos)
            .find(|pos| pos.is_finite())
    }

    /// Last column with a known primary position.
    pub fn last_position(&self) -> Option<glam::DVec2> {
        self.points
            .iter()
            .rev()
            .map(|p| p.primary().pos)
            .find(|pos| pos.is_finite())
    }

    pub(crate) fn set_initial_category(&mut self, category: TrackCategory) {
        self.category = category;
    }

    /// `InvalidGaps → Valid`, the one controlled promotion.
    pub(crate) fn rescue(&mut self) -> bool {
        if self.category == TrackCategory::InvalidGaps {
            self.category = TrackCategory::Valid;
            true
        } else {
            false
        }
    }

    /// `Valid → InvalidGaps`. Other categories are left unchanged.
    pub fn demote(&mut self) -> bool {
        if self.category == TrackCategory::Valid {
            self.category = TrackCategory::InvalidGaps;
            true
        } else {
            false
        }
    }

    /// `Valid → GappedValid` when the track still has gap columns, including
    /// unanchored ones at the series edges.
    pub(crate) fn relabel_gapped(&mut self) -> bool {
        if self.category == TrackCategory::Valid && self.n_gap_columns() > 0 {
            self.category = TrackCategory::GappedValid;
            true
        } else {
            false
        }
    }
}
