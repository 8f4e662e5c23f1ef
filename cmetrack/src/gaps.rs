//! Gap detection, validity classification and position interpolation.
//!
//! A gap is a maximal run of gap columns inside one segment. It is valid if
//! it is a single frame, or if the detected runs on both sides are longer
//! than one frame. Valid gaps get linearly interpolated positions that seed
//! the refit; invalid gaps stay empty.

use tracing::debug;

use crate::math::linear_between;
use crate::psf::PointFit;
use crate::track::{Gap, GapStatus, PointKind, Track};

/// Find the gaps of `track` and classify their validity.
pub fn detect_gaps(track: &mut Track) {
    let points = &track.points;
    let mut gaps = Vec::new();

    let mut i = 0;
    while i < points.len() {
        if points[i].kind != PointKind::Gap {
            i += 1;
            continue;
        }
        let first = i;
        while i < points.len() && points[i].kind == PointKind::Gap {
            i += 1;
        }
        let last = i - 1;

        // Runs at the series edges or next to a separator have no anchor
        // on one side.
        if first == 0 || last + 1 >= points.len() {
            continue;
        }
        if points[first - 1].is_separator() || points[last + 1].is_separator() {
            continue;
        }

        let before = detected_run(points.iter().take(first).rev());
        let after = detected_run(points.iter().skip(last + 1));
        let valid = first == last || (before > 1 && after > 1);

        gaps.push(Gap {
            first,
            last,
            status: if valid {
                GapStatus::Valid
            } else {
                GapStatus::Invalid
            },
        });
    }

    track.gaps = gaps;
}

fn detected_run<'a>(points: impl Iterator<Item = &'a crate::track::TrackPoint>) -> usize {
    points
        .take_while(|p| p.kind == PointKind::Detected)
        .count()
}

/// Fill the positions of valid gap columns by linear interpolation between
/// the bounding detected columns, per channel. Amplitudes stay unknown until
/// the refit.
pub fn interpolate_gaps(track: &mut Track) {
    let n_channels = track.n_channels();
    for gap in track.gaps.clone() {
        if !gap.is_valid() {
            continue;
        }
        for channel in 0..n_channels {
            let from = track.points[gap.first - 1].channels[channel].pos;
            let to = track.points[gap.last + 1].channels[channel].pos;
            let xs = linear_between(from.x, to.x, gap.len());
            let ys = linear_between(from.y, to.y, gap.len());
            for (column, (x, y)) in gap.columns().zip(xs.zip(ys)) {
                track.points[column].channels[channel] = PointFit::at(glam::DVec2::new(x, y));
            }
        }
    }
}

/// Mark valid gaps whose primary-channel refit failed as invalid.
/// Returns the number of gaps changed.
pub fn invalidate_unresolved_gaps(track: &mut Track) -> usize {
    let mut changed = 0;
    for gap in track.gaps.iter_mut() {
        if !gap.is_valid() {
            continue;
        }
        let unresolved = gap
            .columns()
            .any(|c| !track.points[c].primary().is_resolved());
        if unresolved {
            gap.status = GapStatus::Invalid;
            changed += 1;
        }
    }
    if changed > 0 {
        debug!(track = track.id, changed, "Gaps with unresolved refits marked invalid");
    }
    changed
}
