use super::*;
use crate::psf::PointFit;
use crate::testing::{detected_fit, track_from_pattern};
use crate::track::{BufferPoint, TrackBuffer, Visibility};
use glam::DVec2;

/// Buffer with one point per `(amplitude, pval)`.
fn buffer(values: &[(f64, f64)]) -> TrackBuffer {
    TrackBuffer {
        points: values
            .iter()
            .enumerate()
            .map(|(i, &(amplitude, pval_ar))| BufferPoint {
                frame: i,
                t: i as f64,
                channels: vec![PointFit {
                    amplitude,
                    pval_ar,
                    ..detected_fit(DVec2::new(10.0, 10.0), amplitude, 10.0)
                }],
            })
            .collect(),
    }
}

fn background_buffer() -> TrackBuffer {
    buffer(&[(1.0, 0.6), (-0.5, 0.9), (0.3, 0.7)])
}

fn valid_track(pattern: &str) -> Track {
    let mut track = track_from_pattern(pattern);
    track.set_initial_category(TrackCategory::Valid);
    track.diffraction_limited = true;
    track.start_buffer = Some(background_buffer());
    track.end_buffer = Some(background_buffer());
    track
}

fn with_visibility(track: Track, visibility: Visibility) -> Track {
    Track::new(track.id, track.points, track.n_segments, visibility, 1.0)
}

#[test]
fn test_initial_categories() {
    let mut tracks = vec![
        track_from_pattern("xxxxx"),
        track_from_pattern("x..xx"),
        track_from_pattern("xx|xx"),
        with_visibility(track_from_pattern("xxxx"), Visibility::Incomplete),
        with_visibility(track_from_pattern("xxxx"), Visibility::Persistent),
        with_visibility(track_from_pattern("xx|xx"), Visibility::Incomplete),
    ];
    for track in tracks.iter_mut() {
        crate::gaps::detect_gaps(track);
    }
    let mut report = ClassificationReport::default();
    initial_classification(&mut tracks, &mut report);

    let indices: Vec<u8> = tracks.iter().map(|t| t.category().index()).collect();
    assert_eq!(indices, vec![1, 2, 5, 3, 4, 7]);
    assert_eq!(report.initial.get(TrackCategory::Valid), 1);
    assert_eq!(report.diffraction_limited, 6);
}

#[test]
fn test_one_non_normal_column_breaks_diffraction_limit() {
    let mut track = track_from_pattern("xxxx");
    assert!(is_diffraction_limited(&track));
    track.points[2].channels[0].is_psf = false;
    assert!(!is_diffraction_limited(&track));
}

#[test]
fn test_gap_columns_do_not_count_for_diffraction_limit() {
    let track = track_from_pattern("xx.xx");
    assert!(!track.points[2].primary().is_psf);
    assert!(is_diffraction_limited(&track));
}

#[test]
fn test_cohorts() {
    let bounds = [0.0, 10.0, 20.0];
    assert_eq!(cohort_of(0.0, &bounds), Some(0));
    assert_eq!(cohort_of(9.9, &bounds), Some(0));
    assert_eq!(cohort_of(10.0, &bounds), Some(1));
    assert_eq!(cohort_of(500.0, &bounds), Some(2));
    assert_eq!(cohort_of(5.0, &[6.0, 10.0]), None);
}

#[test]
fn test_rescue_uses_cohort_threshold() {
    let config = Config {
        cohort_bounds_s: vec![0.0, 100.0],
        ..Default::default()
    };
    let mut tracks: Vec<Track> = (0..10)
        .map(|i| {
            let mut t = valid_track("xxxxxxxx");
            for p in t.points.iter_mut() {
                p.channels[0].amplitude = 100.0 + 10.0 * i as f64;
            }
            t
        })
        .collect();

    let mut bright = track_from_pattern("xxx..xxx");
    bright.set_initial_category(TrackCategory::InvalidGaps);
    let mut dim = bright.clone();
    for p in dim.points.iter_mut() {
        p.channels[0].amplitude = 50.0;
    }
    let mut short = track_from_pattern("x..x");
    short.set_initial_category(TrackCategory::InvalidGaps);
    for p in short.points.iter_mut() {
        p.channels[0].amplitude = 1000.0;
    }
    tracks.extend([bright, dim, short]);

    assert_eq!(rescue_invalid_gaps(&mut tracks, &config), 1);
    assert_eq!(tracks[10].category(), TrackCategory::Valid);
    assert_eq!(tracks[11].category(), TrackCategory::InvalidGaps);
    assert_eq!(tracks[12].category(), TrackCategory::InvalidGaps);
}

#[test]
fn test_empty_cohort_rescues_nothing() {
    let config = Config {
        cohort_bounds_s: vec![0.0, 5.0],
        ..Default::default()
    };
    // All accepted tracks live in cohort 0; the candidate lives in cohort 1.
    let mut tracks = vec![valid_track("xxxx")];
    let mut candidate = track_from_pattern("xxx..xxx");
    candidate.set_initial_category(TrackCategory::InvalidGaps);
    for p in candidate.points.iter_mut() {
        p.channels[0].amplitude = 1e6;
    }
    tracks.push(candidate);

    assert_eq!(rescue_invalid_gaps(&mut tracks, &config), 0);
    assert_eq!(tracks[1].category(), TrackCategory::InvalidGaps);
}

#[test]
fn test_buffers_at_background_keep_track() {
    let mut tracks = vec![valid_track("xxxxx")];
    assert_eq!(test_buffers(&mut tracks, 0.05), 0);
    assert_eq!(tracks[0].category(), TrackCategory::Valid);
}

#[test]
fn test_absent_buffer_demotes() {
    let mut track = valid_track("xxxxx");
    track.end_buffer = None;
    let mut tracks = vec![track];
    assert_eq!(test_buffers(&mut tracks, 0.05), 1);
    assert_eq!(tracks[0].category(), TrackCategory::InvalidGaps);
}

#[test]
fn test_isolated_background_frames_demote() {
    let mut track = valid_track("xxxxx");
    track.start_buffer = Some(buffer(&[(1.0, 0.5), (80.0, 0.0), (1.0, 0.5)]));
    let mut tracks = vec![track];
    assert_eq!(test_buffers(&mut tracks, 0.05), 1);
}

#[test]
fn test_unresolved_buffer_points_are_not_background() {
    let mut track = valid_track("xxxxx");
    track.end_buffer = Some(buffer(&[(f64::NAN, f64::NAN), (1.0, 0.5), (f64::NAN, f64::NAN)]));
    let mut tracks = vec![track];
    assert_eq!(test_buffers(&mut tracks, 0.05), 1);
}

#[test]
fn test_bright_buffer_demotes() {
    let mut track = valid_track("xxxxx");
    // Background run present, but one point outshines the track (amplitude 100).
    track.start_buffer = Some(buffer(&[(150.0, 0.0), (1.0, 0.5), (1.0, 0.5)]));
    let mut tracks = vec![track];
    assert_eq!(test_buffers(&mut tracks, 0.05), 1);
}

#[test]
fn test_not_diffraction_limited_demoted() {
    let mut a = valid_track("xxxx");
    a.diffraction_limited = false;
    let mut tracks = vec![a, valid_track("xxxx")];
    assert_eq!(enforce_diffraction_limited(&mut tracks), 1);
    assert_eq!(tracks[0].category(), TrackCategory::InvalidGaps);
    assert_eq!(tracks[1].category(), TrackCategory::Valid);
}

#[test]
fn test_gap_fraction_rejection() {
    let mut tracks = vec![valid_track("xx..x"), valid_track("x...xx"), valid_track("xx.xx")];
    assert_eq!(reject_gap_fraction(&mut tracks, 0.5), 1);
    assert_eq!(tracks[1].category(), TrackCategory::InvalidGaps);
}

/// Steady track alternating steps of 0.375 and 0.625 px: five excursions of
/// 0.25 above its median step.
fn steady_positions(track: &mut Track) {
    for (i, p) in track.points.iter_mut().enumerate() {
        let offset = if i % 2 == 1 { -0.125 } else { 0.0 };
        p.channels[0].pos = DVec2::new(10.0 + i as f64 * 0.5 + offset, 10.0);
    }
}

/// Staircase: five 3 px jumps between 0.5 px steps.
fn staircase_positions(track: &mut Track) {
    for (i, p) in track.points.iter_mut().enumerate() {
        let jumps = [2, 4, 6, 8, 10].iter().filter(|&&j| j <= i).count();
        p.channels[0].pos = DVec2::new(10.0 + i as f64 * 0.5, 10.0 + 3.0 * jumps as f64);
    }
}

#[test]
fn test_jittery_track_rejected() {
    let mut tracks: Vec<Track> = (0..20).map(|_| valid_track("xxxxxxxxxxxx")).collect();
    tracks.iter_mut().for_each(steady_positions);
    staircase_positions(&mut tracks[3]);

    let steady = displacement_excursions(&tracks[0]);
    assert_eq!(steady.len(), 11);
    assert_eq!(steady.iter().filter(|&&e| e > 0.0).count(), 5);

    let demoted = reject_displacement_outliers(&mut tracks, 95.0, 4);
    assert_eq!(demoted, 1);
    assert_eq!(tracks[3].category(), TrackCategory::InvalidGaps);
}

#[test]
fn test_displacement_threshold_pools_every_category() {
    let mut tracks: Vec<Track> = (0..20)
        .map(|_| {
            let mut track = track_from_pattern("xxxxxxxxxxxx");
            track.set_initial_category(TrackCategory::Cut);
            steady_positions(&mut track);
            track
        })
        .collect();
    let mut jumpy = valid_track("xxxxxxxxxxxx");
    staircase_positions(&mut jumpy);
    tracks.push(jumpy);

    let demoted = reject_displacement_outliers(&mut tracks, 95.0, 4);

    assert_eq!(demoted, 1);
    assert_eq!(tracks[20].category(), TrackCategory::InvalidGaps);
    assert!(tracks[..20].iter().all(|t| t.category() == TrackCategory::Cut));
}

#[test]
fn test_categories_only_demote_after_rescue() {
    let config = Config::default();
    let mut tracks = vec![
        valid_track("xxxxxx"),
        valid_track("x...xx"),
        {
            let mut t = valid_track("xxxxx");
            t.start_buffer = None;
            t
        },
        {
            let mut t = track_from_pattern("xx|xx");
            t.set_initial_category(TrackCategory::CompoundValid);
            t
        },
        {
            let mut t = track_from_pattern("xxxx");
            t.set_initial_category(TrackCategory::Cut);
            t.diffraction_limited = false;
            t
        },
    ];
    let before: Vec<TrackCategory> = tracks.iter().map(|t| t.category()).collect();

    test_buffers(&mut tracks, config.alpha);
    enforce_diffraction_limited(&mut tracks);
    reject_gap_fraction(&mut tracks, config.max_gap_fraction);
    reject_displacement_outliers(&mut tracks, 95.0, 4);

    for (b, track) in before.iter().zip(&tracks) {
        let a = track.category();
        assert!(
            a == *b || (*b == TrackCategory::Valid && a == TrackCategory::InvalidGaps),
            "{b} became {a}"
        );
    }
    assert_eq!(tracks[0].category(), TrackCategory::Valid);
    assert_eq!(tracks[3].category(), TrackCategory::CompoundValid);
    assert_eq!(tracks[4].category(), TrackCategory::Cut);
}

#[test]
fn test_relabel_only_gapped_valid() {
    let mut gapped = valid_track("xx.xx");
    crate::gaps::detect_gaps(&mut gapped);
    let mut tracks = vec![gapped, valid_track("xxxx")];
    assert_eq!(relabel_gapped(&mut tracks), 1);
    assert_eq!(tracks[0].category(), TrackCategory::GappedValid);
    assert_eq!(tracks[0].category().index(), 9);
    assert_eq!(tracks[1].category(), TrackCategory::Valid);
}
