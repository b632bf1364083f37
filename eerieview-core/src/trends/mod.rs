//! Trend estimation, scalar and gridded.

pub mod regression;
pub mod runner;

pub use regression::{linear_fit, trend_with_autocorrelation, LinearFit, TrendResult};
pub use runner::compute_trend;
