//! Time filtering and season-aware temporal aggregation.
//!
//! Products are computed for the whole year and for each meteorological
//! season. A [`TimeFilter`] restricts the time axis before aggregation;
//! [`aggregate_time`] then groups the remaining steps by year, season or
//! month and takes a NaN-aware mean, masking groups with too few valid
//! samples.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::dataset::{Coord, DataArray, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::timeseries::{season_year, Cadence, Season};

/// Grouping resolution for temporal aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Year,
    Season,
    Month,
}

/// A selection over the time axis of a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFilter {
    /// Keep every time step.
    Year,
    /// Keep only the months of one meteorological season.
    Season(Season),
}

impl TimeFilter {
    /// The filters every product is computed for.
    pub fn catalog() -> [TimeFilter; 5] {
        [
            TimeFilter::Year,
            TimeFilter::Season(Season::MAM),
            TimeFilter::Season(Season::JJA),
            TimeFilter::Season(Season::SON),
            TimeFilter::Season(Season::DJF),
        ]
    }

    /// Label used for the `time_filter` dimension.
    pub fn label(&self) -> &'static str {
        match self {
            TimeFilter::Year => "year",
            TimeFilter::Season(season) => season.name(),
        }
    }

    /// Resolution the filtered data is aggregated at for time series.
    pub fn unit(&self) -> TimeUnit {
        match self {
            TimeFilter::Year => TimeUnit::Year,
            TimeFilter::Season(_) => TimeUnit::Season,
        }
    }
}

/// Fewest valid source steps a group may contain before its mean is masked.
///
/// The daily thresholds allow a few missing days; the monthly thresholds
/// require every month of the group.
pub fn min_valid_count(unit: TimeUnit, cadence: Cadence) -> usize {
    match (cadence, unit) {
        (Cadence::Daily, TimeUnit::Month) => 28,
        (Cadence::Daily, TimeUnit::Season) => 80,
        (Cadence::Daily, TimeUnit::Year) => 354,
        (Cadence::Monthly, TimeUnit::Month) => 1,
        (Cadence::Monthly, TimeUnit::Season) => 3,
        (Cadence::Monthly, TimeUnit::Year) => 12,
    }
}

/// Restrict the time axis to the steps a filter selects.
pub fn filter_time_axis(dataset: &Dataset, filter: TimeFilter) -> EerieResult<Dataset> {
    match filter {
        TimeFilter::Year => Ok(dataset.clone()),
        TimeFilter::Season(season) => {
            let axis = dataset.time_axis()?;
            let indices: Vec<usize> = axis
                .values()
                .iter()
                .enumerate()
                .filter(|(_, date)| Season::of_month(date.month()) == season)
                .map(|(i, _)| i)
                .collect();
            dataset.select("time", &indices)
        }
    }
}

fn group_date(date: NaiveDate, unit: TimeUnit) -> EerieResult<NaiveDate> {
    let built = match unit {
        TimeUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        TimeUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        TimeUnit::Season => {
            let season = Season::of_month(date.month());
            NaiveDate::from_ymd_opt(season_year(date), season.first_month(), 1)
        }
    };
    built.ok_or_else(|| EerieError::Config(format!("cannot label group for {date}")))
}

/// Group the time axis by `unit` and reduce each group with a NaN-aware mean.
///
/// Group labels are the first day of the group; a DJF group is labeled with
/// December 1st of the year the season opened in. Groups where `varname` has
/// fewer than `min_count` valid samples are set to NaN cell by cell.
pub fn aggregate_time(
    dataset: &Dataset,
    unit: TimeUnit,
    min_count: usize,
    varname: &str,
) -> EerieResult<Dataset> {
    let axis = dataset.time_axis()?;
    let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, &date) in axis.values().iter().enumerate() {
        groups.entry(group_date(date, unit)?).or_default().push(i);
    }
    let labels: Vec<NaiveDate> = groups.keys().copied().collect();

    let mut out = Dataset {
        coords: dataset.coords.clone(),
        vars: BTreeMap::new(),
        attrs: dataset.attrs.clone(),
    };
    out.coords.insert(
        "time".to_string(),
        Coord::Time(crate::timeseries::TimeAxis::new(labels.clone())?),
    );

    for (name, var) in &dataset.vars {
        let Some(time_axis) = var.axis_of("time") else {
            out.vars.insert(name.clone(), var.clone());
            continue;
        };
        let mut shape: Vec<usize> = var.values.shape().to_vec();
        shape[time_axis] = labels.len();
        let mut values = ArrayD::from_elem(IxDyn(&shape), f64::NAN);

        for (g, indices) in groups.values().enumerate() {
            let group = var.values.select(Axis(time_axis), indices);
            let mean = group.map_axis(Axis(time_axis), |lane| {
                let (mut sum, mut count) = (0.0, 0usize);
                for &v in lane.iter() {
                    if !v.is_nan() {
                        sum += v;
                        count += 1;
                    }
                }
                if name == varname && count < min_count {
                    f64::NAN
                } else if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            });
            values
                .index_axis_mut(Axis(time_axis), g)
                .assign(&mean);
        }

        out.vars.insert(
            name.clone(),
            DataArray {
                dims: var.dims.clone(),
                values,
                attrs: var.attrs.clone(),
            },
        );
    }
    Ok(out)
}
