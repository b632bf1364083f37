//! Time axis helpers shared by the filtering and aggregation code.
//!
//! Timestamps are calendar dates on a uniform grid (daily or monthly source
//! cadence). The axis is required to be strictly increasing; uniform spacing
//! is checked and logged but not enforced, since some reanalyses carry the
//! occasional calendar quirk.

use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{EerieError, EerieResult};

/// Native cadence of a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    Daily,
    Monthly,
}

impl Cadence {
    pub fn parse(value: &str) -> EerieResult<Self> {
        match value {
            "daily" => Ok(Cadence::Daily),
            "monthly" => Ok(Cadence::Monthly),
            other => Err(EerieError::Config(format!(
                "unknown original frequency '{other}'"
            ))),
        }
    }
}

/// A strictly increasing axis of calendar dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis(Vec<NaiveDate>);

impl TimeAxis {
    /// Build a time axis, rejecting non-monotonic input.
    pub fn new(dates: Vec<NaiveDate>) -> EerieResult<Self> {
        for pair in dates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EerieError::Shape(format!(
                    "time axis is not strictly increasing at {} -> {}",
                    pair[0], pair[1]
                )));
            }
        }
        if let Some(first) = dates.windows(2).next() {
            let step = first[1] - first[0];
            if dates.windows(2).any(|pair| pair[1] - pair[0] != step) {
                debug!("time axis spacing is irregular (first step {step})");
            }
        }
        Ok(Self(dates))
    }

    pub fn values(&self) -> &[NaiveDate] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Meteorological season of a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    MAM,
    JJA,
    SON,
    DJF,
}

impl Season {
    pub fn of_month(month: u32) -> Season {
        match month {
            3..=5 => Season::MAM,
            6..=8 => Season::JJA,
            9..=11 => Season::SON,
            _ => Season::DJF,
        }
    }

    /// First month of the season, used to label season groups.
    pub fn first_month(&self) -> u32 {
        match self {
            Season::DJF => 12,
            Season::MAM => 3,
            Season::JJA => 6,
            Season::SON => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Season::MAM => "MAM",
            Season::JJA => "JJA",
            Season::SON => "SON",
            Season::DJF => "DJF",
        }
    }
}

/// Year a timestamp belongs to for season grouping.
///
/// DJF spans the year boundary: December opens the season that runs into the
/// following January and February, so those two months are labeled with the
/// previous year.
pub fn season_year(date: NaiveDate) -> i32 {
    if matches!(date.month(), 1 | 2) {
        date.year() - 1
    } else {
        date.year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn axis_rejects_unsorted_dates() {
        let result = TimeAxis::new(vec![date(2000, 2, 1), date(2000, 1, 1)]);
        assert!(result.is_err());
    }

    #[test]
    fn season_year_wraps_djf() {
        assert_eq!(season_year(date(2000, 12, 15)), 2000);
        assert_eq!(season_year(date(2001, 1, 15)), 2000);
        assert_eq!(season_year(date(2001, 2, 15)), 2000);
        assert_eq!(season_year(date(2001, 3, 15)), 2001);
    }

    #[test]
    fn season_of_month() {
        assert_eq!(Season::of_month(12), Season::DJF);
        assert_eq!(Season::of_month(1), Season::DJF);
        assert_eq!(Season::of_month(4), Season::MAM);
        assert_eq!(Season::of_month(7), Season::JJA);
        assert_eq!(Season::of_month(10), Season::SON);
    }

    #[test]
    fn unknown_cadence_is_a_config_error() {
        assert!(Cadence::parse("hourly").is_err());
    }
}
