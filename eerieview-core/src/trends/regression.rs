//! Autocorrelation-adjusted linear trend estimation.
//!
//! Implements the Santer et al. (2008) method for trends in time series with
//! missing data: an ordinary least-squares fit over the available points,
//! followed by a reduction of the effective sample size based on the lag-1
//! autocorrelation of the residuals. Degenerate inputs never panic; they are
//! reported through the additive irregularity code and sentinel values.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::errors::{EerieError, EerieResult};

/// Residuals of an estimate were fine but the autocorrelation was clamped.
pub const IRREGULAR_RHO_CLAMPED: u32 = 1;
/// The reduced degrees of freedom fell below 3.
pub const IRREGULAR_LOW_DOF: u32 = 10;
/// The lag-1 autocorrelation could not be estimated.
pub const IRREGULAR_RHO_UNDEFINED: u32 = 100;
/// Fewer than 3 available data points, no fit attempted.
pub const IRREGULAR_TOO_FEW_POINTS: u32 = 1000;

/// Ordinary least-squares fit `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub intercept: f64,
    pub intercept_stderr: f64,
    pub slope: f64,
    pub slope_stderr: f64,
}

/// Closed-form univariate OLS via the normal equations.
///
/// Standard errors follow Sveshnikov's formulae and assume independent,
/// normally distributed errors with constant variance. Degenerate systems
/// (constant x, n <= 2) yield infinities or NaN, not errors.
pub fn linear_fit(x: &[f64], y: &[f64]) -> EerieResult<LinearFit> {
    if x.len() != y.len() {
        return Err(EerieError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let n = x.len() as f64;
    let s0 = n;
    let s1: f64 = x.iter().sum();
    let s2: f64 = x.iter().map(|v| v * v).sum();
    let v0: f64 = y.iter().sum();
    let v1: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();

    let det = s2 * s0 - s1 * s1;
    let intercept = (s2 * v0 - s1 * v1) / det;
    let slope = (-s1 * v0 + s0 * v1) / det;

    let residual_ss: f64 = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let e = yi - (intercept + slope * xi);
            e * e
        })
        .sum();

    Ok(LinearFit {
        intercept,
        intercept_stderr: (s2 / det * residual_ss / (n - 2.0)).sqrt(),
        slope,
        slope_stderr: (s0 / det * residual_ss / (n - 2.0)).sqrt(),
    })
}

/// Everything the trend fit reports for one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    /// Trend slope per unit of x.
    pub slope: f64,
    /// Half-width of the confidence interval for the slope.
    pub confidence_half_width: f64,
    /// Standard error of the slope, adjusted for autocorrelation.
    pub stderr: f64,
    /// Effective sample size after the autocorrelation reduction.
    pub reduced_dof: f64,
    /// Lag-1 autocorrelation of the residuals (unclamped).
    pub lag1_autocorrelation: f64,
    /// Two-sided p-value for the null hypothesis of no trend.
    pub p_value: f64,
    /// Additive irregularity code; 0 is a regular application.
    pub irregularity: u32,
    /// Length of the input series.
    pub n_total: usize,
    /// Intercept of the trend line.
    pub intercept: f64,
    /// Number of available (non-missing) data points.
    pub n_available: usize,
    /// Number of residual pairs the autocorrelation was estimated from.
    pub n_autocorr_pairs: usize,
}

/// Fit a trend to `y` over the uniform grid `x`, missing values as NaN.
///
/// `confidence_level` sets the interval width (0.90 in the product pipeline).
/// The only error is a length mismatch between `x` and `y`; every numerical
/// degeneracy is reported through `irregularity` and the sentinel values
/// slope = NaN, stderr = inf, p = 1, half-width = inf, reduced DOF = 0.
pub fn trend_with_autocorrelation(
    x: &[f64],
    y: &[f64],
    confidence_level: f64,
) -> EerieResult<TrendResult> {
    if x.len() != y.len() {
        return Err(EerieError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let n = x.len();

    let mut result = TrendResult {
        slope: f64::NAN,
        confidence_half_width: f64::INFINITY,
        stderr: f64::INFINITY,
        reduced_dof: 0.0,
        lag1_autocorrelation: f64::NAN,
        p_value: 1.0,
        irregularity: 0,
        n_total: n,
        intercept: f64::NAN,
        n_available: 0,
        n_autocorr_pairs: 0,
    };

    let available: Vec<usize> = (0..n).filter(|&i| !y[i].is_nan()).collect();
    result.n_available = available.len();
    if result.n_available < 3 {
        result.irregularity += IRREGULAR_TOO_FEW_POINTS;
        return Ok(result);
    }

    let xa: Vec<f64> = available.iter().map(|&i| x[i]).collect();
    let ya: Vec<f64> = available.iter().map(|&i| y[i]).collect();
    let fit = linear_fit(&xa, &ya)?;
    result.intercept = fit.intercept;
    result.slope = fit.slope;

    // Residuals at their original positions, so only adjacent available
    // points form autocorrelation pairs.
    let mut residuals = vec![f64::NAN; n];
    for (&i, (&xi, &yi)) in available.iter().zip(xa.iter().zip(&ya)) {
        residuals[i] = yi - fit.intercept - fit.slope * xi;
    }
    let pairs: Vec<(f64, f64)> = residuals
        .windows(2)
        .filter(|w| !w[0].is_nan() && !w[1].is_nan())
        .map(|w| (w[0], w[1]))
        .collect();
    result.n_autocorr_pairs = pairs.len();

    let rho = if pairs.len() < 2 {
        f64::NAN
    } else {
        pearson(&pairs)
    };
    result.lag1_autocorrelation = rho;
    if rho.is_nan() {
        result.irregularity += IRREGULAR_RHO_UNDEFINED;
        return Ok(result);
    }

    let rho_clamped = rho.max(0.0);
    if rho < 0.0 {
        result.irregularity += IRREGULAR_RHO_CLAMPED;
    }

    let na = result.n_available as f64;
    let reduced_dof = na * (1.0 - rho_clamped) / (1.0 + rho_clamped);
    result.reduced_dof = reduced_dof;
    if reduced_dof < 3.0 {
        result.irregularity += IRREGULAR_LOW_DOF;
    }

    if reduced_dof > 2.0 {
        let stderr = fit.slope_stderr * ((na - 2.0) / (reduced_dof - 2.0)).sqrt();
        result.stderr = stderr;
        let student = StudentsT::new(0.0, 1.0, reduced_dof - 2.0)
            .map_err(|e| EerieError::Config(format!("invalid t distribution: {e}")))?;
        result.p_value = 2.0 * (1.0 - student.cdf((fit.slope / stderr).abs()));
        result.confidence_half_width =
            stderr * student.inverse_cdf(0.5 + confidence_level / 2.0);
    }

    Ok(result)
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (a, b) in pairs {
        let da = a - mean_a;
        let db = b - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn ols_recovers_an_exact_line() {
        let x: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 2.0 * v).collect();
        let fit = linear_fit(&x, &y).unwrap();
        assert!(is_close!(fit.slope, 2.0));
        assert!(is_close!(fit.intercept, 3.0));
        assert!(is_close!(fit.slope_stderr, 0.0, abs_tol = 1e-9));
    }

    #[test]
    fn mismatched_lengths_are_the_one_hard_error() {
        let err = linear_fit(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, EerieError::LengthMismatch { x_len: 2, y_len: 1 }));
        assert!(trend_with_autocorrelation(&[1.0], &[1.0, 2.0], 0.9).is_err());
    }

    #[test]
    fn noisy_trend_is_recovered_within_tolerance() {
        let x: Vec<f64> = (0..60).map(|v| v as f64).collect();
        // Deterministic zero-mean wiggle on top of a 0.02/step trend.
        let y: Vec<f64> = x
            .iter()
            .map(|&v| 10.0 + 0.02 * v + 0.05 * (v * 2.399963).sin())
            .collect();
        let result = trend_with_autocorrelation(&x, &y, 0.90).unwrap();
        assert!(is_close!(result.slope, 0.02, abs_tol = 0.01));
        assert!(result.p_value < 0.05);
        assert!(result.reduced_dof > 2.0);
    }

    #[test]
    fn perfect_line_has_undefined_autocorrelation() {
        let x: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 0.5 * v).collect();
        let result = trend_with_autocorrelation(&x, &y, 0.90).unwrap();
        // Residuals are all zero, so rho is 0/0 and the stats are sentinels.
        assert!(is_close!(result.slope, 0.5));
        assert_eq!(result.irregularity, IRREGULAR_RHO_UNDEFINED);
        assert!(result.stderr.is_infinite());
        assert!(is_close!(result.p_value, 1.0));
    }

    #[test]
    fn too_few_points_short_circuits() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, f64::NAN, f64::NAN, 2.0];
        let result = trend_with_autocorrelation(&x, &y, 0.90).unwrap();
        assert_eq!(result.irregularity, IRREGULAR_TOO_FEW_POINTS);
        assert!(result.slope.is_nan());
        assert!(result.stderr.is_infinite());
        assert!(result.confidence_half_width.is_infinite());
        assert!(is_close!(result.p_value, 1.0));
        assert!(is_close!(result.reduced_dof, 0.0));
        assert_eq!(result.n_available, 2);
        assert_eq!(result.n_total, 4);
    }

    #[test]
    fn missing_values_break_autocorrelation_pairs() {
        let x: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|&v| v + 0.3 * (v * 1.7).sin()).collect();
        y[3] = f64::NAN;
        let result = trend_with_autocorrelation(&x, &y, 0.90).unwrap();
        // Positions (2,3) and (3,4) are lost; 7 windows minus 2.
        assert_eq!(result.n_autocorr_pairs, 5);
        assert_eq!(result.n_available, 7);
    }

    #[test]
    fn negative_autocorrelation_is_clamped_and_flagged() {
        let x: Vec<f64> = (0..30).map(|v| v as f64).collect();
        // Alternating residuals give a strongly negative lag-1 correlation.
        let y: Vec<f64> = x
            .iter()
            .map(|&v| v + if v as usize % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let result = trend_with_autocorrelation(&x, &y, 0.90).unwrap();
        assert!(result.lag1_autocorrelation < 0.0);
        assert_eq!(result.irregularity & 1, IRREGULAR_RHO_CLAMPED);
        // Clamping to zero leaves the full sample size.
        assert!(is_close!(result.reduced_dof, 30.0));
    }
}
