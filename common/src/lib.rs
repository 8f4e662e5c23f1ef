//! Utilities shared across the workspace: a row-major pixel grid, test
//! logging setup, and bounded parallel mapping.

pub mod buffer2;
pub mod log_setup;
pub mod parallel;

pub use buffer2::Buffer2;
