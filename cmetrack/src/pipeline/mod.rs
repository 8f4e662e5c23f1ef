//! Per-movie processing driver.
//!
//! [`process_tracks`] runs the stages over one movie's data:
//! assembly, gap detection and interpolation, the frame sweep, initial
//! classification and, with post-processing enabled, category refinement,
//! splitting and the final relabel. Motion and shape statistics are computed
//! for every track that remains.
//!
//! [`process_movies`] dispatches independent movies in parallel. A failing
//! or panicking movie is logged and reported without affecting the others.


use std::path::PathBuf;

use common::parallel::par_map_isolated;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span};

use crate::assembly::{AssemblyReport, assemble_tracks};
use crate::classify::{
    CategoryCounts, ClassificationReport, initial_classification, refine_categories,
    relabel_gapped,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::features::{compute_statistics, feature_table};
use crate::gaps::{detect_gaps, interpolate_gaps};
use crate::input::{DetectionTable, FrameSource, MovieInfo, RawTrack};
use crate::split::{SplitReport, split_tracks};
use crate::store::ResultStore;
use crate::sweep::{SweepReport, sweep_movie};
use crate::track::{Track, TrackCategory};

/// Everything needed to process one movie.
pub struct MovieInput {
    pub info: MovieInfo,
    /// Directory the result is written to.
    pub dir: PathBuf,
    pub detections: Option<DetectionTable>,
    pub tracks: Option<Vec<RawTrack>>,
    pub frames: Box<dyn FrameSource>,
}

/// Track counts per lifetime, one bin per frame.
///
/// `counts[k]` is the number of tracks living `k + 1` frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifetimeHistogram {
    pub bin_width_s: f64,
    pub counts: Vec<usize>,
}

impl LifetimeHistogram {
    pub fn from_lifetimes(lifetimes_s: &[f64], frame_interval_s: f64, n_frames: usize) -> Self {
        let mut counts = vec![0; n_frames];
        for lifetime in lifetimes_s {
            let frames = (lifetime / frame_interval_s).round();
            if frames >= 1.0 && frames <= n_frames as f64 {
                counts[frames as usize - 1] += 1;
            }
        }
        Self {
            bin_width_s: frame_interval_s,
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Which optional stages ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagesRun {
    pub preprocess: bool,
    pub postprocess: bool,
    pub buffers: bool,
    pub statistics: bool,
}

/// Provenance and summary of one processed movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub movie: String,
    pub crate_version: String,
    pub config: Config,
    pub stages: StagesRun,
    pub assembly: AssemblyReport,
    pub sweep: SweepReport,
    pub classification: ClassificationReport,
    pub split: SplitReport,
    pub n_tracks: usize,
    pub final_categories: CategoryCounts,
    /// Every raw track before rejection.
    pub lifetimes_before: LifetimeHistogram,
    /// Final `Valid` and `GappedValid` tracks.
    pub lifetimes_after: LifetimeHistogram,
}

impl ProcessingMetadata {
    pub fn new(movie: &str, config: &Config) -> Self {
        Self {
            movie: movie.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            config: config.clone(),
            stages: StagesRun::default(),
            assembly: AssemblyReport::default(),
            sweep: SweepReport::default(),
            classification: ClassificationReport::default(),
            split: SplitReport::default(),
            n_tracks: 0,
            final_categories: CategoryCounts::default(),
            lifetimes_before: LifetimeHistogram::default(),
            lifetimes_after: LifetimeHistogram::default(),
        }
    }
}

/// Processed tracks of one movie and how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieResult {
    pub tracks: Vec<Track>,
    pub metadata: ProcessingMetadata,
}

impl MovieResult {
    /// Tracks in the accepted categories.
    pub fn accepted(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| is_accepted(t.category()))
    }
}

fn is_accepted(category: TrackCategory) -> bool {
    matches!(category, TrackCategory::Valid | TrackCategory::GappedValid)
}

#[derive(Debug)]
pub enum MovieOutcome {
    Processed(MovieResult),
    /// A result already existed and overwriting is disabled.
    Skipped,
}

/// Run every stage over one movie's tracks.
pub fn process_tracks(
    raw_tracks: &[RawTrack],
    detections: &DetectionTable,
    movie: &MovieInfo,
    frames: &dyn FrameSource,
    config: &Config,
) -> Result<MovieResult> {
    let mut metadata = ProcessingMetadata::new(&movie.name, config);
    metadata.stages.preprocess = config.preprocess;

    let (mut tracks, assembly) = assemble_tracks(raw_tracks, detections, movie, config)?;
    for track in tracks.iter_mut() {
        detect_gaps(track);
        interpolate_gaps(track);
    }

    metadata.sweep = sweep_movie(&mut tracks, movie, frames, config)?;
    metadata.stages.buffers = config.buffer_frames != [0, 0];

    initial_classification(&mut tracks, &mut metadata.classification);
    if config.postprocess {
        refine_categories(&mut tracks, config, &mut metadata.classification);
        metadata.split = split_tracks(&mut tracks, config.alpha, movie.frame_interval_s);
        metadata.classification.relabeled_gapped = relabel_gapped(&mut tracks);
        metadata.stages.postprocess = true;
    }

    compute_statistics(&mut tracks, config.max_msd_lag);
    metadata.stages.statistics = true;

    metadata.lifetimes_before = LifetimeHistogram::from_lifetimes(
        &assembly.lifetimes_before_s,
        movie.frame_interval_s,
        movie.n_frames,
    );
    let accepted: Vec<f64> = tracks
        .iter()
        .filter(|t| is_accepted(t.category()))
        .map(|t| t.lifetime_s)
        .collect();
    metadata.lifetimes_after =
        LifetimeHistogram::from_lifetimes(&accepted, movie.frame_interval_s, movie.n_frames);
    metadata.assembly = assembly;
    metadata.n_tracks = tracks.len();
    metadata.final_categories = CategoryCounts::of(&tracks);

    info!(
        movie = %movie.name,
        tracks = metadata.n_tracks,
        accepted = accepted.len(),
        "Movie processed"
    );
    Ok(MovieResult { tracks, metadata })
}

/// Process one movie and persist its result, unless a result exists and
/// `config.overwrite` is off. The feature table is written after the result
/// when `config.export_features` is set.
pub fn process_movie(
    input: &MovieInput,
    config: &Config,
    store: &dyn ResultStore,
) -> Result<MovieOutcome> {
    config.validate()?;
    let movie = &input.info;
    let _span = info_span!("movie", name = %movie.name).entered();

    if !config.overwrite && store.exists(&input.dir) {
        info!(dir = %input.dir.display(), "Result exists, skipping");
        return Ok(MovieOutcome::Skipped);
    }

    movie.validate()?;
    let detections = input.detections.as_ref().ok_or_else(|| Error::MissingInput {
        movie: movie.name.clone(),
        what: "detection table",
    })?;
    let raw_tracks = input.tracks.as_ref().ok_or_else(|| Error::MissingInput {
        movie: movie.name.clone(),
        what: "track linkage",
    })?;
    check_frame_counts(movie, detections, config)?;

    let result = process_tracks(raw_tracks, detections, movie, input.frames.as_ref(), config)?;
    let path = store.save(&input.dir, &result)?;
    info!(path = %path.display(), "Result saved");
    if config.export_features {
        let path = store.save_features(&input.dir, &feature_table(&result.tracks))?;
        info!(path = %path.display(), "Feature table saved");
    }
    Ok(MovieOutcome::Processed(result))
}

fn check_frame_counts(movie: &MovieInfo, detections: &DetectionTable, config: &Config) -> Result<()> {
    let inconsistent = |reason: String| Error::InconsistentInput {
        movie: movie.name.clone(),
        reason,
    };
    if detections.n_frames() != movie.n_frames {
        return Err(inconsistent(format!(
            "detection table has {} frames, movie has {}",
            detections.n_frames(),
            movie.n_frames
        )));
    }
    if let Some(indices) = &config.frame_indices
        && indices.len() < movie.n_frames
    {
        return Err(inconsistent(format!(
            "{} frame indices for {} tracking frames",
            indices.len(),
            movie.n_frames
        )));
    }
    Ok(())
}

/// Validate `config`, then process `inputs` in parallel with at most
/// `config.max_concurrent_movies` in flight. Returns one outcome per input,
/// in input order.
pub fn process_movies(
    inputs: &[MovieInput],
    config: &Config,
    store: &dyn ResultStore,
) -> Result<Vec<Result<MovieOutcome>>> {
    config.validate()?;
    info!(movies = inputs.len(), "Processing movies");

    let outcomes = par_map_isolated(inputs, config.max_concurrent_movies, |input| {
        process_movie(input, config, store)
    });

    let outcomes: Vec<Result<MovieOutcome>> = outcomes
        .into_iter()
        .zip(inputs)
        .map(|(outcome, input)| {
            let outcome = outcome.unwrap_or_else(|message| {
                Err(Error::Panicked {
                    movie: input.info.name.clone(),
                    message,
                })
            });
            if let Err(err) = &outcome {
                error!(movie = %input.info.name, %err, "Movie processing failed");
            }
            outcome
        })
        .collect();

    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    info!(movies = inputs.len(), failed, "Processing finished");
    Ok(outcomes)
}
