//! Category classification stages.
//!
//! Stages run in order over a movie's track collection:
//! 1. initial category from segments, gap validity and visibility
//! 2. diffraction-limited flag from residual normality
//! 3. rescue of bright invalid-gap tracks per lifetime cohort
//! 4. buffer significance test
//! 5. diffraction-limited enforcement
//! 6. gap-fraction rejection
//! 7. displacement-outlier rejection
//! 8. final relabel of gapped accepted tracks (after splitting)
//!
//! After stage 3 the only transition is demotion `Valid → InvalidGaps`,
//! until the stage 8 relabel.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::config::Config;
use crate::math::{median, percentile};
use crate::track::{PointKind, Track, TrackCategory};

/// Consecutive background frames a buffer must contain.
const MIN_BACKGROUND_RUN: usize = 2;

/// Track counts per category, indexed by [`TrackCategory::index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts(pub Vec<(TrackCategory, usize)>);

impl CategoryCounts {
    pub fn of(tracks: &[Track]) -> Self {
        Self(
            TrackCategory::iter()
                .map(|c| (c, tracks.iter().filter(|t| t.category() == c).count()))
                .collect(),
        )
    }

    pub fn get(&self, category: TrackCategory) -> usize {
        self.0
            .iter()
            .find(|(c, _)| *c == category)
            .map_or(0, |(_, n)| *n)
    }
}

/// What each classification stage did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub initial: CategoryCounts,
    pub diffraction_limited: usize,
    pub rescued: usize,
    pub demoted_buffers: usize,
    pub demoted_not_diffraction_limited: usize,
    pub demoted_gap_fraction: usize,
    pub demoted_displacement: usize,
    pub relabeled_gapped: usize,
}

/// Stages 1 and 2.
pub fn initial_classification(tracks: &mut [Track], report: &mut ClassificationReport) {
    for track in tracks.iter_mut() {
        let category =
            TrackCategory::initial(track.n_segments > 1, track.all_gaps_valid(), track.visibility());
        track.set_initial_category(category);
        track.diffraction_limited = is_diffraction_limited(track);
    }
    report.initial = CategoryCounts::of(tracks);
    report.diffraction_limited = tracks.iter().filter(|t| t.diffraction_limited).count();
    info!(
        tracks = tracks.len(),
        valid = report.initial.get(TrackCategory::Valid),
        diffraction_limited = report.diffraction_limited,
        "Initial classification"
    );
}

/// Every detected column's primary residuals pass the normality test.
pub fn is_diffraction_limited(track: &Track) -> bool {
    track
        .points
        .iter()
        .filter(|p| p.kind == PointKind::Detected)
        .all(|p| p.primary().is_psf)
}

/// Stages 3 to 7.
pub fn refine_categories(tracks: &mut [Track], config: &Config, report: &mut ClassificationReport) {
    report.rescued = rescue_invalid_gaps(tracks, config);
    report.demoted_buffers = test_buffers(tracks, config.alpha);
    if config.force_diffraction_limited {
        report.demoted_not_diffraction_limited = enforce_diffraction_limited(tracks);
    }
    report.demoted_gap_fraction = reject_gap_fraction(tracks, config.max_gap_fraction);
    report.demoted_displacement = reject_displacement_outliers(
        tracks,
        config.displacement_percentile,
        config.max_displacement_excursions,
    );
    info!(
        rescued = report.rescued,
        buffers = report.demoted_buffers,
        not_diffraction_limited = report.demoted_not_diffraction_limited,
        gap_fraction = report.demoted_gap_fraction,
        displacement = report.demoted_displacement,
        "Category refinement"
    );
}

/// Cohort of a lifetime: the last bound not above it. None below the first.
pub fn cohort_of(lifetime_s: f64, bounds: &[f64]) -> Option<usize> {
    bounds.iter().rposition(|&b| b <= lifetime_s)
}

/// Stage 3. Returns the number of tracks rescued.
pub fn rescue_invalid_gaps(tracks: &mut [Track], config: &Config) -> usize {
    let bounds = &config.cohort_bounds_s;
    let mut amplitudes: Vec<Vec<f64>> = vec![Vec::new(); bounds.len()];
    for track in tracks.iter().filter(|t| t.category() == TrackCategory::Valid) {
        if let (Some(cohort), Some(amp)) = (cohort_of(track.lifetime_s, bounds), track.max_amplitude()) {
            amplitudes[cohort].push(amp);
        }
    }
    let thresholds: Vec<Option<f64>> = amplitudes
        .iter()
        .map(|a| (!a.is_empty()).then(|| percentile(a, config.rescue_percentile)))
        .collect();

    let mut rescued = 0;
    for track in tracks.iter_mut() {
        if track.category() != TrackCategory::InvalidGaps || track.n_frames() <= config.min_rescue_length {
            continue;
        }
        let Some(threshold) = cohort_of(track.lifetime_s, bounds).and_then(|c| thresholds[c]) else {
            continue;
        };
        if track.max_amplitude().is_some_and(|amp| amp >= threshold) && track.rescue() {
            debug!(track = track.id, threshold, "Invalid-gap track rescued");
            rescued += 1;
        }
    }
    rescued
}

/// Stage 4. Returns the number of tracks demoted.
pub fn test_buffers(tracks: &mut [Track], alpha: f64) -> usize {
    let mut demoted = 0;
    for track in tracks.iter_mut() {
        if track.category() != TrackCategory::Valid {
            continue;
        }
        if !buffers_at_background(track, alpha) && track.demote() {
            debug!(track = track.id, "Demoted: buffers not at background");
            demoted += 1;
        }
    }
    demoted
}

fn buffers_at_background(track: &Track, alpha: f64) -> bool {
    let (Some(start), Some(end)) = (&track.start_buffer, &track.end_buffer) else {
        return false;
    };
    if !start.has_background_run(MIN_BACKGROUND_RUN, alpha)
        || !end.has_background_run(MIN_BACKGROUND_RUN, alpha)
    {
        return false;
    }
    let Some(track_max) = track.max_amplitude() else {
        return false;
    };
    [start, end]
        .iter()
        .all(|b| b.max_amplitude().is_none_or(|amp| amp <= track_max))
}

/// Stage 5. Returns the number of tracks demoted.
pub fn enforce_diffraction_limited(tracks: &mut [Track]) -> usize {
    let mut demoted = 0;
    for track in tracks.iter_mut().filter(|t| !t.diffraction_limited) {
        if track.demote() {
            demoted += 1;
        }
    }
    demoted
}

/// Stage 6. Returns the number of tracks demoted.
pub fn reject_gap_fraction(tracks: &mut [Track], max_gap_fraction: f64) -> usize {
    let mut demoted = 0;
    for track in tracks.iter_mut() {
        if track.gap_fraction() >= max_gap_fraction && track.demote() {
            debug!(track = track.id, fraction = track.gap_fraction(), "Demoted: too many gaps");
            demoted += 1;
        }
    }
    demoted
}

/// Frame-to-frame displacements as signed excess over the track's median
/// displacement.
pub fn displacement_excursions(track: &Track) -> Vec<f64> {
    let mut steps = Vec::new();
    for pair in track.points.windows(2) {
        if pair[0].is_separator() || pair[1].is_separator() {
            continue;
        }
        let d = pair[0].primary().pos.distance(pair[1].primary().pos);
        if d.is_finite() {
            steps.push(d);
        }
    }
    if steps.is_empty() {
        return steps;
    }
    let m = median(&steps);
    steps.into_iter().map(|d| d - m).collect()
}

/// Stage 7. The threshold is taken over the excursions of every track in
/// the movie; only `Valid` tracks are demoted. Returns the number demoted.
pub fn reject_displacement_outliers(
    tracks: &mut [Track],
    population_percentile: f64,
    max_excursions: usize,
) -> usize {
    let excursions: Vec<Vec<f64>> = tracks.iter().map(displacement_excursions).collect();
    let pooled: Vec<f64> = excursions.iter().flatten().copied().collect();
    if pooled.is_empty() {
        return 0;
    }
    let threshold = percentile(&pooled, population_percentile);

    let mut demoted = 0;
    for (track, track_excursions) in tracks.iter_mut().zip(&excursions) {
        if track.category() != TrackCategory::Valid {
            continue;
        }
        let outliers = track_excursions.iter().filter(|&&e| e > threshold).count();
        if outliers > max_excursions && track.demote() {
            debug!(track = track.id, outliers, threshold, "Demoted: displacement outliers");
            demoted += 1;
        }
    }
    demoted
}

/// Stage 8. Returns the number of tracks relabeled.
pub fn relabel_gapped(tracks: &mut [Track]) -> usize {
    tracks.iter_mut().map(|t| t.relabel_gapped()).filter(|&changed| changed).count()
}
