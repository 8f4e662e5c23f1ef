//! Descriptive statistics over f64 slices.
//!
//! NaN inputs are not filtered here; callers pass finite samples.

/// Arithmetic mean. NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 normalization). NaN for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Median, averaging the two middle values for even lengths. NaN when empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    }
}

/// Percentile `p` in [0, 100].
///
/// Sample `i` (0-based) of `n` sorted values sits at percentile
/// `100 (i + 0.5) / n`; values in between are linearly interpolated and
/// values beyond the outermost samples clamp to them. NaN when empty.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    let rank = p / 100.0 * n as f64 - 0.5;
    if rank <= 0.0 {
        return sorted[0];
    }
    if rank >= (n - 1) as f64 {
        return sorted[n - 1];
    }
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
}

/// Largest finite value, or None when there is none.
pub fn finite_max(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        // sample std of this set is sqrt(32 / 7)
        assert!((std_dev(&values) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!(mean(&[]).is_nan());
        assert!(std_dev(&[1.0]).is_nan());
    }

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_percentile_interpolates_between_samples() {
        let values = [1.0, 2.0, 3.0, 4.0];
        // samples sit at 12.5, 37.5, 62.5, 87.5
        assert_eq!(percentile(&values, 50.0), 2.5);
        assert_eq!(percentile(&values, 37.5), 2.0);
        assert_eq!(percentile(&values, 5.0), 1.0);
        assert_eq!(percentile(&values, 95.0), 4.0);
        assert_eq!(percentile(&[7.0], 2.5), 7.0);
    }

    #[test]
    fn test_finite_max_skips_nan() {
        assert_eq!(finite_max([1.0, f64::NAN, 3.0]), Some(3.0));
        assert_eq!(finite_max([f64::NAN]), None);
    }
}
