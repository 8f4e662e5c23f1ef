//! Splitting of accepted tracks at gaps where the signal vanished.
//!
//! A gap whose refit amplitude is significantly below detectability at every
//! column, and across which the track jumps to a separate location, marks
//! two distinct events erroneously linked into one track. Such tracks are
//! replaced by the pieces between the split gaps.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::gaps::{detect_gaps, invalidate_unresolved_gaps};
use crate::math::{median, percentile};
use crate::track::{Gap, Track, TrackCategory};

/// Fewest columns each side of a split must keep.
const MIN_PIECE_COLUMNS: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    pub candidates: usize,
    pub split_tracks: usize,
    pub children: usize,
}

/// Split candidate tracks in place. Split parents are removed and their
/// children appended with fresh ids.
pub fn split_tracks(tracks: &mut Vec<Track>, alpha: f64, frame_interval_s: f64) -> SplitReport {
    let mut report = SplitReport::default();
    let mut next_id = tracks.iter().map(|t| t.id + 1).max().unwrap_or(0);
    let mut kept = Vec::with_capacity(tracks.len());
    let mut children = Vec::new();

    for track in tracks.drain(..) {
        if !is_candidate(&track) {
            kept.push(track);
            continue;
        }
        report.candidates += 1;

        let splits = split_gaps(&track, alpha);
        if splits.is_empty() {
            kept.push(track);
            continue;
        }

        let pieces = split_into_children(track, &splits, &mut next_id, frame_interval_s);
        report.split_tracks += 1;
        report.children += pieces.len();
        children.extend(pieces);
    }

    kept.extend(children);
    *tracks = kept;

    if report.split_tracks > 0 {
        info!(
            split = report.split_tracks,
            children = report.children,
            "Tracks split at vanishing gaps"
        );
    }
    report
}

fn is_candidate(track: &Track) -> bool {
    track.category() == TrackCategory::Valid && !track.gaps.is_empty() && track.points.len() > 2
}

/// Every gap column's amplitude is significantly below detectability.
pub fn gap_below_background(track: &Track, gap: &Gap, alpha: f64) -> bool {
    gap.columns()
        .all(|c| track.points[c].primary().below_background_p_value() < alpha)
}

/// Gaps at which `track` should be split, in column order.
///
/// Each vanishing gap is judged on the pieces between it and its
/// neighbouring vanishing gaps (or the track ends).
pub fn split_gaps(track: &Track, alpha: f64) -> Vec<Gap> {
    let vanishing: Vec<Gap> = track
        .gaps
        .iter()
        .filter(|gap| gap_below_background(track, gap, alpha))
        .copied()
        .collect();

    let mut splits = Vec::new();
    for (k, gap) in vanishing.iter().enumerate() {
        let pre_start = if k == 0 { 0 } else { vanishing[k - 1].last + 1 };
        let post_end = vanishing
            .get(k + 1)
            .map_or(track.points.len(), |next| next.first);
        let pre = &track.points[pre_start..gap.first];
        let post = &track.points[gap.last + 1..post_end];
        if pre.len() < MIN_PIECE_COLUMNS || post.len() < MIN_PIECE_COLUMNS {
            continue;
        }
        if separated(positions(pre), positions(post)) {
            debug!(track = track.id, first = gap.first, last = gap.last, "Split point accepted");
            splits.push(*gap);
        }
    }
    splits
}

fn positions(points: &[crate::track::TrackPoint]) -> Vec<DVec2> {
    points
        .iter()
        .map(|p| p.primary().pos)
        .filter(|pos| pos.is_finite())
        .collect()
}

/// Projected onto the axis joining the two median positions, the 95th
/// percentile of `pre` lies below the 5th percentile of `post`.
pub fn separated(pre: Vec<DVec2>, post: Vec<DVec2>) -> bool {
    if pre.is_empty() || post.is_empty() {
        return false;
    }
    let median_of = |points: &[DVec2]| {
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        DVec2::new(median(&xs), median(&ys))
    };
    let m_pre = median_of(&pre);
    let m_post = median_of(&post);
    let Some(axis) = (m_post - m_pre).try_normalize() else {
        return false;
    };
    let center = (m_pre + m_post) * 0.5;
    let project = |points: &[DVec2]| -> Vec<f64> {
        points.iter().map(|p| (*p - center).dot(axis)).collect()
    };

    percentile(&project(&pre), 95.0) < percentile(&project(&post), 5.0)
}

fn split_into_children(
    parent: Track,
    splits: &[Gap],
    next_id: &mut usize,
    frame_interval_s: f64,
) -> Vec<Track> {
    let mut bounds = Vec::with_capacity(splits.len() + 1);
    let mut start = 0;
    for gap in splits {
        bounds.push(start..gap.first);
        start = gap.last + 1;
    }
    bounds.push(start..parent.points.len());

    let n = bounds.len();
    let mut children = Vec::with_capacity(n);
    for (i, range) in bounds.into_iter().enumerate() {
        let mut child = Track::new(
            *next_id,
            parent.points[range].to_vec(),
            parent.n_segments,
            parent.visibility(),
            frame_interval_s,
        );
        *next_id += 1;
        child.parent = Some(parent.id);
        child.set_initial_category(TrackCategory::Valid);
        child.diffraction_limited = parent.diffraction_limited;
        if i == 0 {
            child.start_buffer = parent.start_buffer.clone();
        }
        if i + 1 == n {
            child.end_buffer = parent.end_buffer.clone();
        }
        detect_gaps(&mut child);
        invalidate_unresolved_gaps(&mut child);
        children.push(child);
    }
    debug!(parent = parent.id, children = n, "Track split");
    children
}
