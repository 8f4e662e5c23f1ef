//! Distribution functions for the amplitude and residual tests.
//!
//! Student's t and normal CDFs come from `statrs`; the Anderson-Darling
//! composite normality test is computed here.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Probabilities are clamped to this distance from 0 and 1 before taking logs.
const PROB_EPS: f64 = 1e-300;

/// CDF of Student's t distribution with `nu` (possibly fractional) degrees
/// of freedom. NaN when `t` or `nu` is not usable.
pub fn student_t_cdf(t: f64, nu: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    StudentsT::new(0.0, 1.0, nu).map_or(f64::NAN, |dist| dist.cdf(t))
}

/// Anderson-Darling test result for a normal distribution with estimated
/// mean and variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AndersonDarling {
    /// Small-sample adjusted statistic A*².
    pub statistic: f64,
    /// Approximate p-value (D'Agostino & Stephens).
    pub p_value: f64,
}

impl AndersonDarling {
    /// True when normality is not rejected at level `alpha`.
    pub fn is_normal(&self, alpha: f64) -> bool {
        self.p_value >= alpha
    }
}

/// Anderson-Darling normality test. None when fewer than 4 finite samples
/// or when the samples have no spread.
pub fn anderson_darling(samples: &[f64]) -> Option<AndersonDarling> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    let n = sorted.len();
    if n < 4 {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let nf = n as f64;
    let mean = sorted.iter().sum::<f64>() / nf;
    let var = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (nf - 1.0);
    let std = var.sqrt();
    if !(std > 0.0) {
        return None;
    }
    let normal = Normal::new(mean, std).ok()?;

    let cdf: Vec<f64> = sorted
        .iter()
        .map(|&v| normal.cdf(v).clamp(PROB_EPS, 1.0 - 1e-16))
        .collect();

    let mut s = 0.0;
    for i in 0..n {
        let weight = (2 * i + 1) as f64;
        s += weight * (cdf[i].ln() + (1.0 - cdf[n - 1 - i]).ln());
    }
    let a2 = -nf - s / nf;
    let statistic = a2 * (1.0 + 0.75 / nf + 2.25 / (nf * nf));

    Some(AndersonDarling {
        statistic,
        p_value: anderson_darling_p_value(statistic),
    })
}

fn anderson_darling_p_value(a: f64) -> f64 {
    let p = if a >= 0.6 {
        (1.2937 - 5.709 * a + 0.0186 * a * a).exp()
    } else if a >= 0.34 {
        (0.9177 - 4.279 * a - 1.38 * a * a).exp()
    } else if a >= 0.2 {
        1.0 - (-8.318 + 42.796 * a - 59.938 * a * a).exp()
    } else {
        1.0 - (-13.436 + 101.14 * a - 223.73 * a * a).exp()
    };
    p.clamp(0.0, 1.0)
}
