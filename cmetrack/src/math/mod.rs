//! Numerical building blocks: least-squares fitting, statistics, distribution
//! functions and interpolation.

pub mod distributions;
pub mod interpolation;
pub mod linear_solver;
pub mod lm_optimizer;
pub mod statistics;

pub use distributions::{AndersonDarling, anderson_darling, student_t_cdf};
pub use interpolation::{linear_between, pchip_fill};
pub use lm_optimizer::{LMConfig, LMModel, LMResult, optimize, parameter_covariance, residuals};
pub use statistics::{finite_max, mean, median, percentile, std_dev};
