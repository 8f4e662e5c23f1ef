//! Isotropic 2D Gaussian PSF models with fixed sigma.
//!
//! f(x,y) = A × exp(-((x-x₀)² + (y-y₀)²) / 2σ²) + c

use crate::math::LMModel;

/// Free-position model. Parameters: [x0, y0, amplitude, background]
#[derive(Debug)]
pub(crate) struct FixedSigmaGaussian {
    pub sigma: f64,
}

impl LMModel<4> for FixedSigmaGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 4]) -> f64 {
        let [x0, y0, amp, bg] = *params;
        amp * gaussian(x - x0, y - y0, self.sigma) + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 4]) -> [f64; 4] {
        let [x0, y0, amp, _bg] = *params;
        let sigma2 = self.sigma * self.sigma;
        let dx = x - x0;
        let dy = y - y0;
        let exp_val = gaussian(dx, dy, self.sigma);
        let amp_exp = amp * exp_val;

        [
            amp_exp * dx / sigma2, // df/dx0
            amp_exp * dy / sigma2, // df/dy0
            exp_val,               // df/damp
            1.0,                   // df/dbg
        ]
    }
}

/// Fixed-position model. Parameters: [amplitude, background]
#[derive(Debug)]
pub(crate) struct FixedPositionGaussian {
    pub x0: f64,
    pub y0: f64,
    pub sigma: f64,
}

impl LMModel<2> for FixedPositionGaussian {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 2]) -> f64 {
        params[0] * gaussian(x - self.x0, y - self.y0, self.sigma) + params[1]
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, _params: &[f64; 2]) -> [f64; 2] {
        [gaussian(x - self.x0, y - self.y0, self.sigma), 1.0]
    }
}

#[inline]
fn gaussian(dx: f64, dy: f64, sigma: f64) -> f64 {
    (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
}
