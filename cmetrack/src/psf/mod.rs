//! Sub-pixel localization refinement by fixed-sigma Gaussian PSF fitting.
//!
//! A window of radius ⌈4σ⌉ around the approximate position is fit with a
//! free-position Gaussian by Levenberg-Marquardt. If the fit wanders more
//! than 2σ from the start (or fails), the position is held fixed and only
//! amplitude and background are fit. The result carries standard errors,
//! residual statistics, an Anderson-Darling normality flag on the residuals
//! and the p-value of a one-sided t-test that the amplitude exceeds
//! `k_level` residual standard deviations.

mod gaussian;
pub mod labeling;


use common::Buffer2;
use glam::DVec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::math::{
    LMConfig, LMModel, anderson_darling, median, optimize, parameter_covariance, residuals,
    std_dev, student_t_cdf,
};
use gaussian::{FixedPositionGaussian, FixedSigmaGaussian};

pub use labeling::label_components;

/// Fewest usable window pixels for a fit.
const MIN_FIT_PIXELS: usize = 8;

/// A free fit may move at most this many sigmas from the start position.
const MAX_SHIFT_SIGMA: f64 = 2.0;

/// Localization and intensity estimate of one point in one channel.
///
/// Unknown quantities are NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointFit {
    pub pos: DVec2,
    pub amplitude: f64,
    pub background: f64,
    pub pos_std: DVec2,
    pub amplitude_std: f64,
    pub background_std: f64,
    /// Standard deviation of the fit residuals.
    pub residual_std: f64,
    /// Standard error of `residual_std`.
    pub residual_std_se: f64,
    /// p-value of the test `amplitude > k_level * residual_std`.
    pub pval_ar: f64,
    /// Residuals pass the normality test.
    pub is_psf: bool,
}

impl PointFit {
    /// A point with nothing known.
    pub fn missing() -> Self {
        Self {
            pos: DVec2::NAN,
            amplitude: f64::NAN,
            background: f64::NAN,
            pos_std: DVec2::NAN,
            amplitude_std: f64::NAN,
            background_std: f64::NAN,
            residual_std: f64::NAN,
            residual_std_se: f64::NAN,
            pval_ar: f64::NAN,
            is_psf: false,
        }
    }

    /// A point with only its position known.
    pub fn at(pos: DVec2) -> Self {
        Self {
            pos,
            ..Self::missing()
        }
    }

    pub fn has_position(&self) -> bool {
        self.pos.is_finite()
    }

    /// Amplitude and position are known.
    pub fn is_resolved(&self) -> bool {
        self.amplitude.is_finite() && self.has_position()
    }

    /// Amplitude is at background level: a resolved fit whose amplitude test
    /// is not significant at `alpha`.
    pub fn is_background(&self, alpha: f64) -> bool {
        self.is_resolved() && self.pval_ar >= alpha
    }

    /// One-sided p-value that the amplitude is *below* `k_level` residual
    /// standard deviations: the complement of `pval_ar` by symmetry of the
    /// t distribution. NaN when unresolved.
    pub fn below_background_p_value(&self) -> f64 {
        if self.is_resolved() { 1.0 - self.pval_ar } else { f64::NAN }
    }
}

/// Reasons a refinement produced no estimate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("Start position is not finite")]
    NonFinitePosition,
    #[error("Window center ({x}, {y}) lies outside the {width}x{height} image")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
    },
    #[error("Only {found} usable pixels in the fit window, need {needed}")]
    TooFewPixels { found: usize, needed: usize },
    #[error("Normal equations are singular")]
    Singular,
    #[error("Fit produced non-finite parameters")]
    NonFinite,
}

/// Per-channel settings for [`refine_point`].
#[derive(Debug, Clone)]
pub struct FitSettings {
    /// PSF standard deviation in pixels.
    pub sigma: f64,
    pub k_level: f64,
    pub alpha: f64,
    pub lm: LMConfig,
}

impl FitSettings {
    pub fn from_config(config: &Config, sigma: f64) -> Self {
        Self {
            sigma,
            k_level: config.k_level,
            alpha: config.alpha,
            lm: config.fit.clone(),
        }
    }
}

/// Pixels of the fit window with the background annulus estimate.
struct Window {
    xs: Vec<f64>,
    ys: Vec<f64>,
    zs: Vec<f64>,
    background: f64,
    peak: f64,
}

/// Refine the position and intensity of a point near `approx`.
///
/// `labels` is the connected-component labeling of the frame's mask. Labeled
/// pixels, the center's own component included, are kept out of the
/// background annulus; every window pixel enters the fit.
pub fn refine_point(
    image: &Buffer2<f32>,
    labels: &Buffer2<u32>,
    approx: DVec2,
    settings: &FitSettings,
) -> Result<PointFit, FitError> {
    if !approx.is_finite() {
        return Err(FitError::NonFinitePosition);
    }
    let cx = approx.x.round() as i64;
    let cy = approx.y.round() as i64;
    if !image.contains(cx, cy) {
        return Err(FitError::OutOfBounds {
            x: cx,
            y: cy,
            width: image.width(),
            height: image.height(),
        });
    }

    let sigma = settings.sigma;
    let window = extract_window(image, labels, cx, cy, sigma);
    let n = window.zs.len();
    if n < MIN_FIT_PIXELS {
        return Err(FitError::TooFewPixels {
            found: n,
            needed: MIN_FIT_PIXELS,
        });
    }

    let initial_amplitude = (window.peak - window.background).max(0.0);
    let free_model = FixedSigmaGaussian { sigma };
    let free = optimize(
        &free_model,
        &window.xs,
        &window.ys,
        &window.zs,
        [approx.x, approx.y, initial_amplitude, window.background],
        &settings.lm,
    );

    let shift = DVec2::new(free.params[0], free.params[1]).distance(approx);
    let free_ok = free.converged
        && free.params.iter().all(|p| p.is_finite())
        && shift <= MAX_SHIFT_SIGMA * sigma;

    let free_cov = if free_ok {
        parameter_covariance(&free_model, &window.xs, &window.ys, &free.params, free.chi2)
    } else {
        None
    };

    let (pos, amplitude, background, pos_std, amplitude_var, background_var, residuals) =
        match free_cov {
            Some(cov) => {
                let [x0, y0, amp, bg] = free.params;
                let values = window_residuals(&free_model, &window, &free.params);
                (
                    DVec2::new(x0, y0),
                    amp,
                    bg,
                    DVec2::new(cov[0][0].sqrt(), cov[1][1].sqrt()),
                    cov[2][2],
                    cov[3][3],
                    values,
                )
            }
            None => {
                let fixed_model = FixedPositionGaussian {
                    x0: approx.x,
                    y0: approx.y,
                    sigma,
                };
                let fixed = optimize(
                    &fixed_model,
                    &window.xs,
                    &window.ys,
                    &window.zs,
                    [initial_amplitude, window.background],
                    &settings.lm,
                );
                let cov = parameter_covariance(
                    &fixed_model,
                    &window.xs,
                    &window.ys,
                    &fixed.params,
                    fixed.chi2,
                )
                .ok_or(FitError::Singular)?;
                let values = window_residuals(&fixed_model, &window, &fixed.params);
                (
                    approx,
                    fixed.params[0],
                    fixed.params[1],
                    DVec2::NAN,
                    cov[0][0],
                    cov[1][1],
                    values,
                )
            }
        };

    let residual_std = std_dev(&residuals);
    let residual_std_se = residual_std / (2.0 * (n - 1) as f64).sqrt();
    let amplitude_std = amplitude_var.sqrt();

    let is_psf = anderson_darling(&residuals).is_some_and(|ad| ad.is_normal(settings.alpha));
    let pval_ar = amplitude_p_value(amplitude, amplitude_std, residual_std, n, settings.k_level);

    let fit = PointFit {
        pos,
        amplitude,
        background,
        pos_std,
        amplitude_std,
        background_std: background_var.sqrt(),
        residual_std,
        residual_std_se,
        pval_ar,
        is_psf,
    };
    if !(fit.pos.is_finite()
        && fit.amplitude.is_finite()
        && fit.background.is_finite()
        && fit.amplitude_std.is_finite()
        && fit.residual_std.is_finite()
        && fit.pval_ar.is_finite())
    {
        return Err(FitError::NonFinite);
    }
    Ok(fit)
}

/// One-sided p-value of `amplitude > k_level * residual_std`, Welch-style
/// degrees of freedom. Small values mean a significant signal.
///
/// The threshold's uncertainty is `k_level` times the standard error of the
/// residual std, `residual_std / sqrt(2(n - 1))`.
pub fn amplitude_p_value(
    amplitude: f64,
    amplitude_std: f64,
    residual_std: f64,
    n: usize,
    k_level: f64,
) -> f64 {
    let threshold_std = k_level * residual_std / (2.0 * (n as f64 - 1.0)).sqrt();
    let t = amplitude_t_statistic(
        amplitude,
        amplitude_std,
        residual_std,
        threshold_std,
        n,
        k_level,
    );
    let nu = amplitude_dof(amplitude_std, threshold_std, n);
    student_t_cdf(-t, nu)
}

fn amplitude_t_statistic(
    amplitude: f64,
    amplitude_std: f64,
    residual_std: f64,
    threshold_std: f64,
    n: usize,
    k_level: f64,
) -> f64 {
    let combined = (amplitude_std * amplitude_std + threshold_std * threshold_std) / n as f64;
    (amplitude - k_level * residual_std) / combined.sqrt()
}

fn amplitude_dof(amplitude_std: f64, threshold_std: f64, n: usize) -> f64 {
    let a2 = amplitude_std * amplitude_std;
    let r2 = threshold_std * threshold_std;
    (n as f64 - 1.0) * (a2 + r2).powi(2) / (a2 * a2 + r2 * r2)
}

fn window_radius(sigma: f64) -> i64 {
    (4.0 * sigma).ceil() as i64
}

fn extract_window(
    image: &Buffer2<f32>,
    labels: &Buffer2<u32>,
    cx: i64,
    cy: i64,
    sigma: f64,
) -> Window {
    let outer = window_radius(sigma);
    let inner = (3.0 * sigma).ceil();

    let side = (2 * outer + 1) as usize;
    let mut xs = Vec::with_capacity(side * side);
    let mut ys = Vec::with_capacity(side * side);
    let mut zs = Vec::with_capacity(side * side);
    let mut annulus = Vec::new();
    let mut peak = f64::NEG_INFINITY;

    for y in (cy - outer)..=(cy + outer) {
        for x in (cx - outer)..=(cx + outer) {
            let Some(&value) = image.get_signed(x, y) else {
                continue;
            };
            let value = value as f64;
            if !value.is_finite() {
                continue;
            }

            let dx = (x - cx) as f64;
            let dy = (y - cy) as f64;
            let r = (dx * dx + dy * dy).sqrt();
            let foreground = labels.get_signed(x, y).is_some_and(|&label| label != 0);
            if r > inner && r <= outer as f64 && !foreground {
                annulus.push(value);
            }
            peak = peak.max(value);
            xs.push(x as f64);
            ys.push(y as f64);
            zs.push(value);
        }
    }

    let background = if annulus.is_empty() {
        zs.iter().copied().fold(f64::INFINITY, f64::min)
    } else {
        median(&annulus)
    };

    Window {
        xs,
        ys,
        zs,
        background,
        peak,
    }
}

fn window_residuals<const N: usize, M: LMModel<N>>(
    model: &M,
    window: &Window,
    params: &[f64; N],
) -> Vec<f64> {
    residuals(model, &window.xs, &window.ys, &window.zs, params)
}
