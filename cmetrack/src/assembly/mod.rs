//! Track assembly: raw tracker linkage to per-track time series.
//!
//! Each raw track becomes a [`SegmentGraph`]; with preprocessing enabled,
//! single-frame segments and short spurious branches are pruned. The
//! surviving segments are concatenated into one column series with a
//! separator between segments. Short tracks and tracks near the image
//! border are rejected.

mod segment_graph;


use glam::DVec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::input::{DetectionTable, MovieInfo, RawTrack};
use crate::psf::PointFit;
use crate::track::{PointKind, Track, TrackPoint, Visibility};

pub use segment_graph::{EdgeKind, SegmentEdge, SegmentGraph, SegmentNode};

/// Counts and lifetimes collected during assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyReport {
    /// Raw tracks received.
    pub n_raw: usize,
    /// Segments removed as single-frame or spurious.
    pub pruned_segments: usize,
    /// Tracks with no segment left after pruning.
    pub rejected_empty: usize,
    pub rejected_lifetime: usize,
    pub rejected_border: usize,
    /// Lifetime (seconds) of every raw track before any rejection.
    pub lifetimes_before_s: Vec<f64>,
}

/// Build the track collection of a movie.
pub fn assemble_tracks(
    raw_tracks: &[RawTrack],
    detections: &DetectionTable,
    movie: &MovieInfo,
    config: &Config,
) -> Result<(Vec<Track>, AssemblyReport)> {
    let mut report = AssemblyReport {
        n_raw: raw_tracks.len(),
        ..Default::default()
    };
    let margin = config.border_margin_sigma * movie.psf_sigma[0];
    let mut tracks = Vec::new();

    for (raw_index, raw) in raw_tracks.iter().enumerate() {
        let mut graph = SegmentGraph::from_raw(raw);
        if let (Some(first), Some(last)) = (
            graph.segments().map(|n| n.first_frame).min(),
            graph.segments().map(|n| n.last_frame).max(),
        ) {
            report
                .lifetimes_before_s
                .push((last - first + 1) as f64 * movie.frame_interval_s);
        }

        if config.preprocess {
            report.pruned_segments += graph.prune(config.min_segment_length);
        }
        if graph.n_segments() == 0 {
            report.rejected_empty += 1;
            continue;
        }

        let points = build_series(raw, &graph, detections, movie)?;
        let visibility = visibility(&graph, movie.n_frames);
        let track = Track::new(
            tracks.len(),
            points,
            graph.n_segments(),
            visibility,
            movie.frame_interval_s,
        );

        if config.preprocess {
            if track.lifetime_s < config.min_lifetime_s {
                debug!(raw_index, lifetime_s = track.lifetime_s, "Track rejected: too short");
                report.rejected_lifetime += 1;
                continue;
            }
            if near_border(&track, margin, movie) {
                debug!(raw_index, "Track rejected: too close to the image border");
                report.rejected_border += 1;
                continue;
            }
        }
        tracks.push(track);
    }

    Ok((tracks, report))
}

/// Concatenate the segments of `graph` into one column series.
fn build_series(
    raw: &RawTrack,
    graph: &SegmentGraph,
    detections: &DetectionTable,
    movie: &MovieInfo,
) -> Result<Vec<TrackPoint>> {
    let n_channels = movie.n_channels();
    let mut points: Vec<TrackPoint> = Vec::new();

    for (segment_index, node) in graph.segments().enumerate() {
        if let Some(previous) = points.last() {
            points.push(TrackPoint {
                frame: previous.frame,
                t: f64::NAN,
                segment: segment_index,
                kind: PointKind::Separator,
                channels: vec![PointFit::missing(); n_channels],
            });
        }

        let row = &raw.feature_indices[node.segment];
        for frame in node.first_frame..=node.last_frame {
            let feature = row[frame - raw.start_frame];
            let (kind, channels) = match feature {
                Some(feature) => {
                    let detection =
                        detections
                            .get(frame, feature)
                            .ok_or_else(|| Error::MissingInput {
                                movie: movie.name.clone(),
                                what: "detection referenced by the track linkage",
                            })?;
                    if detection.channels.len() != n_channels {
                        return Err(Error::InconsistentInput {
                            movie: movie.name.clone(),
                            reason: format!(
                                "detection {feature} at frame {frame} has {} channels, expected {n_channels}",
                                detection.channels.len()
                            ),
                        });
                    }
                    if detection.primary().is_resolved() {
                        (PointKind::Detected, detection.channels.clone())
                    } else {
                        (PointKind::Gap, vec![PointFit::missing(); n_channels])
                    }
                }
                None => (PointKind::Gap, vec![PointFit::missing(); n_channels]),
            };
            points.push(TrackPoint {
                frame,
                t: frame as f64 * movie.frame_interval_s,
                segment: segment_index,
                kind,
                channels,
            });
        }
    }
    Ok(points)
}

fn visibility(graph: &SegmentGraph, n_frames: usize) -> Visibility {
    let first = graph.segments().map(|n| n.first_frame).min().unwrap_or(0);
    let last = graph.segments().map(|n| n.last_frame).max().unwrap_or(0);
    let at_start = first == 0;
    let at_end = last + 1 >= n_frames;
    match (at_start, at_end) {
        (true, true) => Visibility::Persistent,
        (false, false) => Visibility::Complete,
        _ => Visibility::Incomplete,
    }
}

/// Whether any detected primary position lies within `margin` of the border.
fn near_border(track: &Track, margin: f64, movie: &MovieInfo) -> bool {
    let positions: Vec<DVec2> = track
        .points
        .iter()
        .filter(|p| p.kind == PointKind::Detected)
        .map(|p| p.primary().pos)
        .filter(|pos| pos.is_finite())
        .collect();
    let Some(min) = positions.iter().copied().reduce(DVec2::min) else {
        return false;
    };
    let Some(max) = positions.iter().copied().reduce(DVec2::max) else {
        return false;
    };
    min.x <= margin
        || min.y <= margin
        || max.x > movie.width as f64 - margin
        || max.y > movie.height as f64 - margin
}
