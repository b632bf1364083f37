//! Multi-decade averaging periods.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::errors::{EerieError, EerieResult};

/// An inclusive range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start_year: i32,
    pub end_year: i32,
}

impl Period {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self { start_year, end_year }
    }

    /// Label used for the `period` dimension, e.g. "1991-2020".
    pub fn label(&self) -> String {
        format!("{}-{}", self.start_year, self.end_year)
    }
}

/// The periods a product is computed for, with one marked as the reference
/// for anomalies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodsConfig {
    pub reference_period: Period,
    pub periods: Vec<Period>,
}

impl PeriodsConfig {
    /// All periods to compute, reference first.
    pub fn all(&self) -> Vec<Period> {
        let mut all = vec![self.reference_period];
        all.extend(self.periods.iter().copied());
        all
    }
}

/// Restrict a dataset to the time steps inside a period.
///
/// The window is inclusive on both ends, January 1st of the first year
/// through December 31st of the last. A window that selects nothing is an
/// [`EerieError::EmptySlice`], which callers turn into a NaN placeholder.
pub fn slice_period(dataset: &Dataset, period: Period) -> EerieResult<Dataset> {
    let first = NaiveDate::from_ymd_opt(period.start_year, 1, 1);
    let last = NaiveDate::from_ymd_opt(period.end_year, 12, 31);
    let (Some(first), Some(last)) = (first, last) else {
        return Err(EerieError::Config(format!(
            "period {} is not a calendar year range",
            period.label()
        )));
    };
    let axis = dataset.time_axis()?;
    let indices: Vec<usize> = axis
        .values()
        .iter()
        .enumerate()
        .filter(|(_, date)| **date >= first && **date <= last)
        .map(|(i, _)| i)
        .collect();
    if indices.is_empty() {
        return Err(EerieError::EmptySlice(period.label()));
    }
    dataset.select("time", &indices)
}

/// Mean over a period's time steps, keeping variable metadata.
pub fn aggregate_period(dataset: &Dataset, period: Period) -> EerieResult<Dataset> {
    slice_period(dataset, period)?.mean_over("time")
}
