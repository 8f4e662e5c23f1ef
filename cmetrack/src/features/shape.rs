//! Descriptors of a track's intensity trace.

use crate::math::{mean, pchip_fill};
use crate::track::{ShapeStats, Track};

/// Fewest samples for a decay fit.
const MIN_DECAY_SAMPLES: usize = 3;

/// Amplitude plus background of the primary channel over the non-separator
/// columns, with unknown values filled by PCHIP interpolation.
pub fn intensity_trace(track: &Track) -> Vec<f64> {
    let columns = || track.points.iter().filter(|p| !p.is_separator());
    let mut amplitude: Vec<f64> = columns().map(|p| p.primary().amplitude).collect();
    let mut background: Vec<f64> = columns().map(|p| p.primary().background).collect();
    pchip_fill(&mut amplitude);
    pchip_fill(&mut background);
    amplitude.iter().zip(&background).map(|(a, c)| a + c).collect()
}

/// Shape descriptors of one track. `normalized_spread` is left NaN for
/// [`super::normalize_spread`].
pub fn shape_stats(track: &Track) -> ShapeStats {
    let trace = intensity_trace(track);
    let finite: Vec<f64> = trace.iter().copied().filter(|v| v.is_finite()).collect();

    let peaks = find_peaks(&trace);
    let prominences: Vec<f64> = peaks.iter().map(|&i| prominence(&trace, i)).collect();
    let mean_prominence = mean(&prominences);
    let n_prominent_peaks = prominences.iter().filter(|&&p| p >= mean_prominence).count();
    let peak_ratio = if peaks.is_empty() {
        f64::NAN
    } else {
        n_prominent_peaks as f64 / peaks.len() as f64
    };

    let intensity_spread = match crate::math::finite_max(finite.iter().copied()) {
        Some(max) => max - mean(&finite),
        None => f64::NAN,
    };

    ShapeStats {
        n_peaks: peaks.len(),
        n_prominent_peaks,
        peak_ratio,
        decay_r2: decay_r2(&trace),
        intensity_spread,
        normalized_spread: f64::NAN,
    }
}

/// Indices of interior local maxima. A flat top counts once, at its first
/// sample, when both sides of it are lower.
pub fn find_peaks(trace: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = trace.len();
    let mut i = 1;
    while i + 1 < n {
        if !(trace[i] > trace[i - 1]) {
            i += 1;
            continue;
        }
        let mut end = i;
        while end + 1 < n && trace[end + 1] == trace[i] {
            end += 1;
        }
        if end + 1 < n && trace[end + 1] < trace[i] {
            peaks.push(i);
        }
        i = end + 1;
    }
    peaks
}

/// Height of a peak above the higher of its two bases. Each base is the
/// lowest sample between the peak and the nearest higher sample on that side
/// (or the trace end).
pub fn prominence(trace: &[f64], peak: usize) -> f64 {
    let height = trace[peak];
    let left_base = trace[..peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .copied()
        .fold(height, f64::min);
    let right_base = trace[peak + 1..]
        .iter()
        .take_while(|&&v| v <= height)
        .copied()
        .fold(height, f64::min);
    height - left_base.max(right_base)
}

/// R² of a least-squares line through `(ln(k + 1), ln(trace[max + k]))`,
/// from the trace maximum to its end. Non-positive samples are skipped.
/// NaN when fewer than three samples remain or the samples are constant.
pub fn decay_r2(trace: &[f64]) -> f64 {
    let Some(start) = trace
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    else {
        return f64::NAN;
    };

    let (xs, ys): (Vec<f64>, Vec<f64>) = trace[start..]
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite() && **v > 0.0)
        .map(|(k, v)| (((k + 1) as f64).ln(), v.ln()))
        .unzip();
    if xs.len() < MIN_DECAY_SAMPLES {
        return f64::NAN;
    }

    let (mx, my) = (mean(&xs), mean(&ys));
    let sxx: f64 = xs.iter().map(|x| (x - mx) * (x - mx)).sum();
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - my) * (y - my)).sum();
    if sxx == 0.0 || ss_tot == 0.0 {
        return f64::NAN;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let ss_res: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let r = y - (intercept + slope * x);
            r * r
        })
        .sum();
    1.0 - ss_res / ss_tot
}
