//! Frame sweep: gap refits and buffer readout.
//!
//! Every frame that holds a valid gap column or a buffer position of some
//! track is loaded once per channel, its mask labeled once, and all
//! refinement requests touching it are fit in parallel before the frame is
//! dropped.

use std::collections::BTreeMap;

use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gaps::invalidate_unresolved_gaps;
use crate::input::{FrameSource, MovieInfo};
use crate::psf::{FitError, FitSettings, PointFit, label_components, refine_point};
use crate::track::{BufferPoint, Track, TrackBuffer, Visibility};

/// Where a refit result is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    GapColumn(usize),
    StartBuffer(usize),
    EndBuffer(usize),
}

#[derive(Debug, Clone, Copy)]
struct Request {
    track: usize,
    target: Target,
    channel: usize,
    pos: DVec2,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Frame loads, counting each channel separately.
    pub frames_loaded: usize,
    pub gap_fits: usize,
    pub gap_failures: usize,
    pub buffer_fits: usize,
    pub buffer_failures: usize,
    /// Valid gaps relabeled invalid after a failed refit.
    pub gaps_invalidated: usize,
}

/// Allocate buffers, refit gap columns, read buffers and finish buffer times.
pub fn sweep_movie(
    tracks: &mut [Track],
    movie: &MovieInfo,
    frames: &dyn FrameSource,
    config: &Config,
) -> Result<SweepReport> {
    allocate_buffers(tracks, movie.n_frames, config);

    let mut by_frame: BTreeMap<usize, Vec<Request>> = BTreeMap::new();
    for (index, track) in tracks.iter().enumerate() {
        collect_requests(index, track, &mut by_frame);
    }

    let settings: Vec<FitSettings> = movie
        .psf_sigma
        .iter()
        .map(|&sigma| FitSettings::from_config(config, sigma))
        .collect();

    let mut report = SweepReport::default();
    for (&frame, requests) in &by_frame {
        for (channel, channel_settings) in settings.iter().enumerate() {
            let batch: Vec<&Request> = requests.iter().filter(|r| r.channel == channel).collect();
            if batch.is_empty() {
                continue;
            }

            let movie_frame = config.movie_frame(frame);
            let data = frames
                .frame(channel, movie_frame)
                .map_err(|source| Error::Frame {
                    channel,
                    frame: movie_frame,
                    source,
                })?;
            if !data.image.same_shape(&data.mask) {
                return Err(Error::InconsistentInput {
                    movie: movie.name.clone(),
                    reason: format!(
                        "frame {movie_frame} of channel {channel}: image {}x{} but mask {}x{}",
                        data.image.width(),
                        data.image.height(),
                        data.mask.width(),
                        data.mask.height()
                    ),
                });
            }
            report.frames_loaded += 1;
            let labels = label_components(&data.mask);

            let results: Vec<(Request, Result<PointFit, FitError>)> = batch
                .par_iter()
                .map(|r| (**r, refine_point(&data.image, &labels, r.pos, channel_settings)))
                .collect();

            for (request, result) in results {
                store_result(tracks, request, result, frame, &mut report);
            }
        }
    }

    for track in tracks.iter_mut() {
        finish_buffer_times(track, movie.frame_interval_s);
        report.gaps_invalidated += invalidate_unresolved_gaps(track);
    }

    if report.gap_failures + report.buffer_failures > 0 {
        warn!(
            movie = %movie.name,
            gap_failures = report.gap_failures,
            buffer_failures = report.buffer_failures,
            "Some refits did not resolve"
        );
    }
    debug!(movie = %movie.name, ?report, "Frame sweep finished");
    Ok(report)
}

/// Give eligible tracks empty start/end windows clipped to the movie.
fn allocate_buffers(tracks: &mut [Track], n_frames: usize, config: &Config) {
    let [before, after] = config.buffer_frames;
    for track in tracks.iter_mut() {
        let eligible = config.buffer_all || track.visibility() == Visibility::Complete;
        if !eligible {
            track.start_buffer = None;
            track.end_buffer = None;
            continue;
        }
        let n_channels = track.n_channels();
        let window = |frames: std::ops::Range<usize>| TrackBuffer {
            points: frames
                .map(|frame| BufferPoint {
                    frame,
                    t: f64::NAN,
                    channels: vec![PointFit::missing(); n_channels],
                })
                .collect(),
        };
        let start = track.start_frame.saturating_sub(before)..track.start_frame;
        let end = (track.end_frame + 1)..(track.end_frame + 1 + after).min(n_frames);
        track.start_buffer = Some(window(start));
        track.end_buffer = Some(window(end));
    }
}

fn collect_requests(index: usize, track: &Track, by_frame: &mut BTreeMap<usize, Vec<Request>>) {
    let n_channels = track.n_channels();

    for gap in track.gaps.iter().filter(|g| g.is_valid()) {
        for column in gap.columns() {
            let point = &track.points[column];
            for channel in 0..n_channels {
                by_frame.entry(point.frame).or_default().push(Request {
                    track: index,
                    target: Target::GapColumn(column),
                    channel,
                    pos: point.channels[channel].pos,
                });
            }
        }
    }

    for channel in 0..n_channels {
        let first = first_position(track, channel);
        let last = last_position(track, channel);
        if let (Some(buffer), Some(pos)) = (&track.start_buffer, first) {
            for (i, point) in buffer.points.iter().enumerate() {
                by_frame.entry(point.frame).or_default().push(Request {
                    track: index,
                    target: Target::StartBuffer(i),
                    channel,
                    pos,
                });
            }
        }
        if let (Some(buffer), Some(pos)) = (&track.end_buffer, last) {
            for (i, point) in buffer.points.iter().enumerate() {
                by_frame.entry(point.frame).or_default().push(Request {
                    track: index,
                    target: Target::EndBuffer(i),
                    channel,
                    pos,
                });
            }
        }
    }
}

fn first_position(track: &Track, channel: usize) -> Option<DVec2> {
    track
        .points
        .iter()
        .map(|p| p.channels[channel].pos)
        .find(|pos| pos.is_finite())
}

fn last_position(track: &Track, channel: usize) -> Option<DVec2> {
    track
        .points
        .iter()
        .rev()
        .map(|p| p.channels[channel].pos)
        .find(|pos| pos.is_finite())
}

fn store_result(
    tracks: &mut [Track],
    request: Request,
    result: Result<PointFit, FitError>,
    frame: usize,
    report: &mut SweepReport,
) {
    let is_gap = matches!(request.target, Target::GapColumn(_));
    let fit = match result {
        Ok(fit) => {
            if is_gap {
                report.gap_fits += 1;
            } else {
                report.buffer_fits += 1;
            }
            fit
        }
        Err(err) => {
            if is_gap {
                report.gap_failures += 1;
            } else {
                report.buffer_failures += 1;
            }
            debug!(track = request.track, frame, channel = request.channel, %err, "Refit failed");
            PointFit::at(request.pos)
        }
    };

    let track = &mut tracks[request.track];
    let slot = match request.target {
        Target::GapColumn(column) => &mut track.points[column].channels[request.channel],
        Target::StartBuffer(i) => match track.start_buffer.as_mut() {
            Some(buffer) => &mut buffer.points[i].channels[request.channel],
            None => return,
        },
        Target::EndBuffer(i) => match track.end_buffer.as_mut() {
            Some(buffer) => &mut buffer.points[i].channels[request.channel],
            None => return,
        },
    };
    *slot = fit;
}

/// Extrapolate buffer times backward from the track start and forward from
/// the track end.
fn finish_buffer_times(track: &mut Track, frame_interval_s: f64) {
    let start_t = track.start_frame as f64 * frame_interval_s;
    let end_t = track.end_frame as f64 * frame_interval_s;
    let (start_frame, end_frame) = (track.start_frame, track.end_frame);

    if let Some(buffer) = track.start_buffer.as_mut() {
        for point in buffer.points.iter_mut() {
            point.t = start_t - (start_frame - point.frame) as f64 * frame_interval_s;
        }
    }
    if let Some(buffer) = track.end_buffer.as_mut() {
        for point in buffer.points.iter_mut() {
            point.t = end_t + (point.frame - end_frame) as f64 * frame_interval_s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::assemble_tracks;
    use crate::gaps::{detect_gaps, interpolate_gaps};
    use crate::testing::{BrokenFrames, SyntheticMovie};
    use crate::track::GapStatus;

    fn prepared(movie: &SyntheticMovie, config: &Config) -> Vec<Track> {
        let (mut tracks, _) =
            assemble_tracks(&movie.raw_tracks(), &movie.detections(), &movie.info(), config)
                .unwrap();
        for track in tracks.iter_mut() {
            detect_gaps(track);
            interpolate_gaps(track);
        }
        tracks
    }

    #[test]
    fn test_buffers_are_read_at_track_ends() {
        let movie = SyntheticMovie::default();
        let config = Config {
            buffer_frames: [3, 3],
            ..Default::default()
        };
        let mut tracks = prepared(&movie, &config);
        let report = sweep_movie(&mut tracks, &movie.info(), &movie.frames(), &config).unwrap();

        let track = &tracks[0];
        let start = track.start_buffer.as_ref().unwrap();
        let end = track.end_buffer.as_ref().unwrap();
        assert_eq!(start.points.iter().map(|p| p.frame).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(end.points.iter().map(|p| p.frame).collect::<Vec<_>>(), vec![41, 42, 43]);
        assert_eq!(start.points.iter().map(|p| p.t).collect::<Vec<_>>(), vec![7.0, 8.0, 9.0]);
        assert_eq!(end.points[2].t, 43.0);
        assert!(start.points.iter().all(|p| p.primary().is_background(0.05)));
        assert_eq!(report.buffer_fits, 6);
        assert_eq!(report.frames_loaded, 6);
    }

    #[test]
    fn test_buffers_clip_to_movie() {
        let movie = SyntheticMovie {
            first: 2,
            last: 47,
            ..Default::default()
        };
        let config = Config {
            buffer_frames: [5, 5],
            ..Default::default()
        };
        let mut tracks = prepared(&movie, &config);
        sweep_movie(&mut tracks, &movie.info(), &movie.frames(), &config).unwrap();

        assert_eq!(tracks[0].start_buffer.as_ref().unwrap().len(), 2);
        assert_eq!(tracks[0].end_buffer.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_tracks_have_no_buffers_unless_requested() {
        let movie = SyntheticMovie {
            first: 0,
            last: 20,
            ..Default::default()
        };
        let config = Config::default();
        let mut tracks = prepared(&movie, &config);
        sweep_movie(&mut tracks, &movie.info(), &movie.frames(), &config).unwrap();
        assert!(tracks[0].start_buffer.is_none());
        assert!(tracks[0].end_buffer.is_none());

        let config = Config {
            buffer_all: true,
            ..Default::default()
        };
        let mut tracks = prepared(&movie, &config);
        sweep_movie(&mut tracks, &movie.info(), &movie.frames(), &config).unwrap();
        assert!(tracks[0].start_buffer.as_ref().unwrap().is_empty());
        assert_eq!(tracks[0].end_buffer.as_ref().unwrap().len(), 5);
    }

    #[test]
    fn test_gap_columns_are_refit() {
        let movie = SyntheticMovie {
            missed_frames: vec![25],
            ..Default::default()
        };
        let config = Config::default();
        let mut tracks = prepared(&movie, &config);
        let report = sweep_movie(&mut tracks, &movie.info(), &movie.frames(), &config).unwrap();

        let track = &tracks[0];
        let gap = track.gaps[0];
        assert_eq!(gap.status, GapStatus::Valid);
        let fit = track.points[gap.first].primary();
        assert!((fit.amplitude - 500.0).abs() < 25.0, "amp {}", fit.amplitude);
        assert!(fit.pos.distance(movie.spot) < 0.1);
        assert_eq!(report.gap_fits, 1);
    }

    #[test]
    fn test_frame_errors_propagate() {
        let movie = SyntheticMovie::default();
        let config = Config::default();
        let mut tracks = prepared(&movie, &config);
        let err = sweep_movie(&mut tracks, &movie.info(), &BrokenFrames, &config).unwrap_err();
        assert!(matches!(err, Error::Frame { frame: 5, .. }));
    }
}
