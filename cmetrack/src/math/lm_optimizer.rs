//! Levenberg-Marquardt optimizer for PSF fitting.
//!
//! Generic over the number of free parameters so the same solver serves the
//! free-position model and the fixed-position fallback. Uses f64 throughout.

use serde::{Deserialize, Serialize};

use super::linear_solver::{invert, solve};

/// Damping above which no descent step exists and the search stops.
const MAX_LAMBDA: f64 = 1e10;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold for the largest parameter change.
    pub convergence_threshold: f64,
    /// Convergence threshold for the relative decrease of chi².
    pub chi2_tolerance: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on failed step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on successful step.
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-8,
            chi2_tolerance: 1e-10,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl LMConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("fit.max_iterations must be at least 1".to_string());
        }
        if !(self.initial_lambda > 0.0) {
            return Err(format!(
                "fit.initial_lambda must be positive, got {}",
                self.initial_lambda
            ));
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(format!(
                "fit.lambda_up must be > 1 and fit.lambda_down in (0, 1), got {} and {}",
                self.lambda_up, self.lambda_down
            ));
        }
        if !(self.convergence_threshold >= 0.0 && self.chi2_tolerance >= 0.0) {
            return Err("fit convergence tolerances must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Result of L-M optimization.
#[derive(Debug, Clone, Copy)]
pub struct LMResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Trait for models that can be fit with L-M optimization.
pub trait LMModel<const N: usize> {
    /// Evaluate the model at a point.
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Compute partial derivatives at a point.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Apply parameter constraints after an update.
    fn constrain(&self, _params: &mut [f64; N]) {}
}

/// Run L-M optimization for an N-parameter model.
pub fn optimize<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    data_z: &[f64],
    initial_params: [f64; N],
    config: &LMConfig,
) -> LMResult<N> {
    let mut params = initial_params;
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(model, data_x, data_y, data_z, &params);
    let mut converged = false;
    let mut iterations = 0;

    let n = data_x.len();
    let mut jacobian = Vec::with_capacity(n);
    let mut residuals = Vec::with_capacity(n);

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        fill_jacobian_residuals(
            model,
            data_x,
            data_y,
            data_z,
            &params,
            &mut jacobian,
            &mut residuals,
        );
        let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);

        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            break;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);

        let new_chi2 = compute_chi2(model, data_x, data_y, data_z, &new_params);

        if new_chi2 < prev_chi2 {
            let decrease = prev_chi2 - new_chi2;
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;

            let max_delta = delta.iter().copied().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_delta < config.convergence_threshold
                || decrease <= config.chi2_tolerance * new_chi2
            {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            // No step reduces chi² any more: the current parameters are a minimum.
            if lambda > MAX_LAMBDA {
                converged = prev_chi2.is_finite();
                break;
            }
        }
    }

    LMResult {
        params,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

/// Residuals `z - model` at the given parameters.
pub fn residuals<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    data_z: &[f64],
    params: &[f64; N],
) -> Vec<f64> {
    data_x
        .iter()
        .zip(data_y.iter())
        .zip(data_z.iter())
        .map(|((&x, &y), &z)| z - model.evaluate(x, y, params))
        .collect()
}

/// Parameter covariance `s² (JᵀJ)⁻¹` at the solution, with
/// `s² = chi² / (n - N)`. Returns None for singular normal matrices or when
/// there are no residual degrees of freedom.
pub fn parameter_covariance<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    params: &[f64; N],
    chi2: f64,
) -> Option<[[f64; N]; N]> {
    let n = data_x.len();
    if n <= N {
        return None;
    }
    let jacobian: Vec<[f64; N]> = data_x
        .iter()
        .zip(data_y.iter())
        .map(|(&x, &y)| model.jacobian_row(x, y, params))
        .collect();
    let zeros = vec![0.0; n];
    let (hessian, _) = compute_hessian_gradient(&jacobian, &zeros);
    let mut covariance = invert(&hessian)?;

    let s2 = chi2 / (n - N) as f64;
    for row in covariance.iter_mut() {
        for value in row.iter_mut() {
            *value *= s2;
        }
    }
    Some(covariance)
}

fn compute_chi2<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    data_z: &[f64],
    params: &[f64; N],
) -> f64 {
    data_x
        .iter()
        .zip(data_y.iter())
        .zip(data_z.iter())
        .map(|((&x, &y), &z)| {
            let residual = z - model.evaluate(x, y, params);
            residual * residual
        })
        .sum()
}

/// Fill jacobian and residuals buffers, reusing existing allocations.
fn fill_jacobian_residuals<const N: usize, M: LMModel<N>>(
    model: &M,
    data_x: &[f64],
    data_y: &[f64],
    data_z: &[f64],
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    for ((&x, &y), &z) in data_x.iter().zip(data_y.iter()).zip(data_z.iter()) {
        jacobian.push(model.jacobian_row(x, y, params));
        residuals.push(z - model.evaluate(x, y, params));
    }
}

/// Compute Hessian (JᵀJ) and gradient (Jᵀr).
/// Only the upper triangle is accumulated, then mirrored.
#[allow(clippy::needless_range_loop)]
fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
