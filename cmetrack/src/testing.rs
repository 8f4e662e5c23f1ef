//! Synthetic movies and tracks for tests.

#![allow(dead_code)]

use std::path::PathBuf;

use common::Buffer2;
use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::input::{
    Detection, DetectionTable, EventKind, Frame, FrameSource, MovieInfo, RawTrack, SequenceEvent,
};
use crate::pipeline::MovieInput;
use crate::psf::PointFit;
use crate::track::{PointKind, Track, TrackPoint, Visibility};

/// Standard normal sample by the Box-Muller transform.
pub fn gaussian_noise(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Image of Gaussian spots `(center, amplitude)` over a flat background with
/// additive Gaussian noise.
pub fn render_frame(
    width: usize,
    height: usize,
    background: f64,
    noise_std: f64,
    spots: &[(DVec2, f64)],
    sigma: f64,
    rng: &mut StdRng,
) -> Buffer2<f32> {
    Buffer2::from_fn(width, height, |x, y| {
        let p = DVec2::new(x as f64, y as f64);
        let signal: f64 = spots
            .iter()
            .map(|(center, amp)| {
                let d2 = p.distance_squared(*center);
                amp * (-d2 / (2.0 * sigma * sigma)).exp()
            })
            .sum();
        (background + signal + noise_std * gaussian_noise(rng)) as f32
    })
}

/// Mask of disks of `radius` around each center.
pub fn spot_mask(width: usize, height: usize, centers: &[DVec2], radius: f64) -> Buffer2<bool> {
    Buffer2::from_fn(width, height, |x, y| {
        let p = DVec2::new(x as f64, y as f64);
        centers.iter().any(|c| p.distance(*c) <= radius)
    })
}

/// A confidently detected single-channel point.
pub fn detected_fit(pos: DVec2, amplitude: f64, background: f64) -> PointFit {
    PointFit {
        pos,
        amplitude,
        background,
        pos_std: DVec2::splat(0.02),
        amplitude_std: 5.0,
        background_std: 0.5,
        residual_std: 2.0,
        residual_std_se: 0.1,
        pval_ar: 0.0,
        is_psf: true,
    }
}

/// Single-channel track from a pattern: `x` detected, `.` gap, `|` segment
/// separator. Column `i` sits at `(10 + i, 10)` with amplitude 100; frames
/// start at 5 with a 1 s interval.
pub fn track_from_pattern(pattern: &str) -> Track {
    let mut points: Vec<TrackPoint> = Vec::new();
    let mut segment = 0;
    let mut frame = 5;
    for (i, c) in pattern.chars().enumerate() {
        let pos = DVec2::new(10.0 + i as f64, 10.0);
        let point = match c {
            'x' => TrackPoint {
                frame,
                t: frame as f64,
                segment,
                kind: PointKind::Detected,
                channels: vec![detected_fit(pos, 100.0, 10.0)],
            },
            '.' => TrackPoint {
                frame,
                t: frame as f64,
                segment,
                kind: PointKind::Gap,
                channels: vec![PointFit::missing()],
            },
            '|' => {
                segment += 1;
                points.push(TrackPoint {
                    frame: frame - 1,
                    t: f64::NAN,
                    segment,
                    kind: PointKind::Separator,
                    channels: vec![PointFit::missing()],
                });
                continue;
            }
            other => panic!("unknown pattern character {other:?}"),
        };
        points.push(point);
        frame += 1;
    }
    Track::new(0, points, segment + 1, Visibility::Complete, 1.0)
}

/// Single-segment raw track covering `first..=last` with feature index 0.
pub fn raw_track(first: usize, last: usize) -> RawTrack {
    RawTrack {
        start_frame: first,
        feature_indices: vec![vec![Some(0); last - first + 1]],
        events: vec![
            SequenceEvent {
                frame: first,
                kind: EventKind::Start,
                segment: 0,
                partner: None,
            },
            SequenceEvent {
                frame: last,
                kind: EventKind::End,
                segment: 0,
                partner: None,
            },
        ],
    }
}

/// Frames held in memory, indexed by channel then movie frame.
pub struct MemoryFrames {
    pub frames: Vec<Vec<Frame>>,
}

impl FrameSource for MemoryFrames {
    fn frame(&self, channel: usize, frame: usize) -> anyhow::Result<Frame> {
        self.frames
            .get(channel)
            .and_then(|c| c.get(frame))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no frame {frame} in channel {channel}"))
    }
}

/// Frame source that always fails.
pub struct BrokenFrames;

impl FrameSource for BrokenFrames {
    fn frame(&self, _channel: usize, frame: usize) -> anyhow::Result<Frame> {
        anyhow::bail!("disk on fire at frame {frame}")
    }
}

/// One-channel movie with a single stationary spot.
///
/// Defaults: 50 frames of 64x64 pixels, 1 s interval, PSF sigma 1.5, spot at
/// (32.3, 31.6) with amplitude 500 over background 50 from frame 10 to 40,
/// noise std 2.
#[derive(Debug, Clone)]
pub struct SyntheticMovie {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub n_frames: usize,
    pub frame_interval_s: f64,
    pub sigma: f64,
    pub background: f64,
    pub noise_std: f64,
    pub spot: DVec2,
    pub amplitude: f64,
    pub first: usize,
    pub last: usize,
    /// Frames missing from the detection table inside the track.
    pub missed_frames: Vec<usize>,
    /// Extra spots `(frame, amplitude)` drawn at the spot position outside
    /// the track's own frames.
    pub intruders: Vec<(usize, f64)>,
    pub seed: u64,
}

impl Default for SyntheticMovie {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: 64,
            height: 64,
            n_frames: 50,
            frame_interval_s: 1.0,
            sigma: 1.5,
            background: 50.0,
            noise_std: 2.0,
            spot: DVec2::new(32.3, 31.6),
            amplitude: 500.0,
            first: 10,
            last: 40,
            missed_frames: Vec::new(),
            intruders: Vec::new(),
            seed: 42,
        }
    }
}

impl SyntheticMovie {
    pub fn info(&self) -> MovieInfo {
        MovieInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            n_frames: self.n_frames,
            frame_interval_s: self.frame_interval_s,
            psf_sigma: vec![self.sigma],
        }
    }

    fn spot_amplitude(&self, frame: usize) -> Option<f64> {
        if (self.first..=self.last).contains(&frame) {
            return Some(self.amplitude);
        }
        self.intruders
            .iter()
            .find(|(f, _)| *f == frame)
            .map(|(_, amp)| *amp)
    }

    pub fn detections(&self) -> DetectionTable {
        let frames = (0..self.n_frames)
            .map(|frame| {
                if (self.first..=self.last).contains(&frame) && !self.missed_frames.contains(&frame)
                {
                    vec![Detection {
                        channels: vec![detected_fit(self.spot, self.amplitude, self.background)],
                    }]
                } else {
                    Vec::new()
                }
            })
            .collect();
        DetectionTable::new(frames)
    }

    pub fn raw_tracks(&self) -> Vec<RawTrack> {
        let mut raw = raw_track(self.first, self.last);
        for &frame in &self.missed_frames {
            raw.feature_indices[0][frame - self.first] = None;
        }
        vec![raw]
    }

    pub fn frames(&self) -> MemoryFrames {
        let channel = (0..self.n_frames)
            .map(|frame| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_mul(1000) + frame as u64);
                let spots: Vec<(DVec2, f64)> = self
                    .spot_amplitude(frame)
                    .map(|amp| (self.spot, amp))
                    .into_iter()
                    .collect();
                let image = render_frame(
                    self.width,
                    self.height,
                    self.background,
                    self.noise_std,
                    &spots,
                    self.sigma,
                    &mut rng,
                );
                let centers: Vec<DVec2> = spots.iter().map(|(c, _)| *c).collect();
                let mask = spot_mask(self.width, self.height, &centers, 3.0);
                Frame { image, mask }
            })
            .collect();
        MemoryFrames {
            frames: vec![channel],
        }
    }

    pub fn input(&self, dir: PathBuf) -> MovieInput {
        MovieInput {
            info: self.info(),
            dir,
            detections: Some(self.detections()),
            tracks: Some(self.raw_tracks()),
            frames: Box::new(self.frames()),
        }
    }
}
