//! Dataset repairs: realm and name fixes, unit harmonization, anomalies.
//!
//! Raw catalogues are inconsistent in small, model-specific ways. The fixes
//! here are pure functions over member keys and datasets, so the orchestrator
//! can apply them in a fixed order and retry lookups deterministically.

use log::{info, warn};
use ndarray::Axis;

use crate::access::DataSource;
use crate::dataset::{Coord, DataArray, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::members::{MemberKey, ModelFamily};
use crate::naming::is_ocean_variable;
use crate::periods::{Period, PeriodsConfig};
use chrono::Datelike;

/// Rewrite the frequency field of a raw member key.
fn map_raw_frequency(member: &MemberKey, f: impl Fn(&str) -> String) -> MemberKey {
    match member {
        MemberKey::Raw(raw) => {
            let mut out = raw.clone();
            out.frequency = f(&out.frequency);
            MemberKey::Raw(out)
        }
        MemberKey::Cmor(_) => member.clone(),
    }
}

/// Derive the member key a variable actually lives under.
///
/// Ocean variables move to the ocean realm (except for AMIP runs, which have
/// none); the FESOM historical and control ocean output only exists at daily
/// frequency under a year-range suffix; ICON daily extrema are published as
/// rewritten daily streams.
pub fn realm_for_variable(member: &MemberKey, varname: &str) -> MemberKey {
    let mut member = member.clone();
    if is_ocean_variable(varname) && member.family() != ModelFamily::IfsAmip {
        member = member.to_ocean();
        if member.family() == ModelFamily::IfsFesom
            && (member.simulation().contains("hist") || member.simulation().contains("control"))
        {
            member = map_raw_frequency(&member.to_daily(), |f| format!("{f}_1950-2014"));
        }
    }
    if member.family() == ModelFamily::Icon && (varname == "tasmax" || varname == "tasmin") {
        let extreme = if varname == "tasmax" { "max" } else { "min" };
        member = map_raw_frequency(&member, |f| {
            f.replace("monthly_mean", &format!("daily_{extreme}"))
        });
    }
    member
}

/// One fix to try when a catalogue lookup fails.
///
/// Rules are applied in order and cumulatively: each applicable rule rewrites
/// the (member, raw name) pair and the lookup is retried before moving on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRule {
    /// The entry may only exist at daily frequency.
    MonthlyToDaily,
    /// Daily extrema are stored as max/min streams with a `24` name suffix.
    DailyExtremum,
}

impl RetryRule {
    pub fn ordered() -> [RetryRule; 2] {
        [RetryRule::MonthlyToDaily, RetryRule::DailyExtremum]
    }

    pub fn applies(&self, member: &MemberKey, varname: &str) -> bool {
        match self {
            RetryRule::MonthlyToDaily => *member != member.to_daily(),
            RetryRule::DailyExtremum => {
                (varname == "tasmax" || varname == "tasmin")
                    && member.family().has_realm_daily_suffix()
            }
        }
    }

    pub fn apply(
        &self,
        member: &MemberKey,
        rawname: &str,
        varname: &str,
    ) -> (MemberKey, String) {
        match self {
            RetryRule::MonthlyToDaily => (member.to_daily(), rawname.to_string()),
            RetryRule::DailyExtremum => {
                let extreme = if varname == "tasmax" { "max" } else { "min" };
                let member = map_raw_frequency(member, |f| f.replace("avg", extreme));
                let rawname = if rawname.contains("24") {
                    rawname.to_string()
                } else {
                    format!("{rawname}24")
                };
                (member, rawname)
            }
        }
    }
}

/// Fetch an entry, retrying with the fix rules when the lookup fails.
///
/// Returns the dataset together with the member and raw name that finally
/// resolved, so callers log and label with the real entry. Only lookup
/// failures are retried; any other error propagates immediately.
pub fn fetch_with_fixes(
    source: &dyn DataSource,
    member: &MemberKey,
    rawname: &str,
    varname: &str,
) -> EerieResult<(Dataset, MemberKey, String)> {
    let mut member = member.clone();
    let mut rawname = rawname.to_string();
    let mut last = match source.fetch(&member, &rawname) {
        Ok(dataset) => return Ok((dataset, member, rawname)),
        Err(err @ EerieError::Lookup { .. }) => err,
        Err(err) => return Err(err),
    };
    for rule in RetryRule::ordered() {
        if !rule.applies(&member, varname) {
            continue;
        }
        let (fixed_member, fixed_rawname) = rule.apply(&member, &rawname, varname);
        member = fixed_member;
        rawname = fixed_rawname;
        info!("retrying lookup as {member} / {rawname}");
        match source.fetch(&member, &rawname) {
            Ok(dataset) => return Ok((dataset, member, rawname)),
            Err(err @ EerieError::Lookup { .. }) => last = err,
            Err(err) => return Err(err),
        }
    }
    Err(last)
}

/// Bring a variable to the common output units in place.
///
/// Precipitation becomes mm/day; temperatures in Kelvin become Celsius except
/// for trend products, where the change per year is the same in both scales
/// and only the units label moves.
pub fn fix_units(dataset: &mut Dataset, varname: &str, for_trend: bool) -> EerieResult<()> {
    let var = dataset
        .vars
        .get_mut(varname)
        .ok_or_else(|| EerieError::Config(format!("dataset has no variable '{varname}'")))?;
    if varname == "pr" {
        let units = var.attrs.get("units").cloned().unwrap_or_default();
        if units != "mm" {
            let mut factor = 86400.0;
            if units.contains("m s**-1") {
                factor *= 1000.0;
            }
            var.values.mapv_inplace(|v| v * factor);
        }
        var.attrs.insert("units".to_string(), "mm day-1".to_string());
    }
    if matches!(varname, "tasmax" | "tasmin" | "tas" | "tos") {
        let max = var
            .values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if max > 200.0 {
            if !for_trend {
                var.values.mapv_inplace(|v| v - 273.15);
            }
            var.attrs.insert("units".to_string(), "degC".to_string());
        }
    }
    Ok(())
}

/// Add `<var>_anom`: the variable minus its reference-period slice along the
/// `period` dimension. Over the reference period itself the anomaly is zero
/// wherever the variable is valid.
pub fn add_anomalies(
    dataset: &mut Dataset,
    periods: &PeriodsConfig,
    varname: &str,
) -> EerieResult<()> {
    let ref_label = periods.reference_period.label();
    let labels = match dataset.coords.get("period") {
        Some(Coord::Labels(labels)) => labels.clone(),
        _ => {
            return Err(EerieError::Config(
                "anomalies need a period dimension".to_string(),
            ))
        }
    };
    let ref_pos = labels
        .iter()
        .position(|l| *l == ref_label)
        .ok_or_else(|| {
            EerieError::Config(format!("reference period '{ref_label}' is not in the dataset"))
        })?;

    let var = dataset.var(varname)?;
    let axis = var.axis_of("period").ok_or_else(|| {
        EerieError::Shape(format!("variable '{varname}' has no period dimension"))
    })?;
    let reference = var
        .values
        .index_axis(Axis(axis), ref_pos)
        .to_owned()
        .insert_axis(Axis(axis));
    let anomaly = &var.values - &reference;
    let anom = DataArray {
        dims: var.dims.clone(),
        values: anomaly,
        attrs: var.attrs.clone(),
    };
    dataset.insert_var(&format!("{varname}_anom"), anom)
}

/// Add `<var>_anom` for a regional time series: the series minus its mean
/// over the reference-period years, taken independently per member, filter
/// and region.
pub fn add_series_anomalies(
    dataset: &mut Dataset,
    reference: Period,
    varname: &str,
) -> EerieResult<()> {
    let axis_dates = dataset.time_axis()?.values().to_vec();
    let ref_idx: Vec<usize> = axis_dates
        .iter()
        .enumerate()
        .filter(|(_, d)| d.year() >= reference.start_year && d.year() <= reference.end_year)
        .map(|(i, _)| i)
        .collect();
    if ref_idx.is_empty() {
        warn!("no time steps fall in the reference period {}", reference.label());
    }

    let var = dataset.var(varname)?;
    let time_axis = var.axis_of("time").ok_or_else(|| {
        EerieError::Shape(format!("variable '{varname}' has no time dimension"))
    })?;
    let reference_mean = var
        .values
        .select(Axis(time_axis), &ref_idx)
        .map_axis(Axis(time_axis), |lane| {
            let (mut sum, mut count) = (0.0, 0usize);
            for &v in lane.iter() {
                if !v.is_nan() {
                    sum += v;
                    count += 1;
                }
            }
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .insert_axis(Axis(time_axis));
    let anomaly = &var.values - &reference_mean;
    let anom = DataArray {
        dims: var.dims.clone(),
        values: anomaly,
        attrs: var.attrs.clone(),
    };
    dataset.insert_var(&format!("{varname}_anom"), anom)
}

/// Placeholder fragment for a period with no data: the variable's spatial
/// field at the first time step, filled with NaN.
pub fn nan_filled_template(dataset: &Dataset, varname: &str) -> EerieResult<Dataset> {
    let mut out = dataset.select("time", &[0])?.mean_over("time")?;
    let var = out
        .vars
        .get_mut(varname)
        .ok_or_else(|| EerieError::Config(format!("dataset has no variable '{varname}'")))?;
    var.values.fill(f64::NAN);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::TimeAxis;
    use chrono::NaiveDate;
    use is_close::is_close;
    use ndarray::{ArrayD, IxDyn};
    use std::cell::RefCell;

    fn member(identifier: &str) -> MemberKey {
        MemberKey::parse(identifier).unwrap()
    }

    #[test]
    fn ocean_variables_switch_realm() {
        let m = member("icon-esm-er.hist-1950.v20240618.atmos.gr025.2d_monthly_mean");
        let derived = realm_for_variable(&m, "tos");
        assert_eq!(
            derived.to_string(),
            "icon-esm-er.hist-1950.v20240618.ocean.gr025.2d_monthly_mean"
        );
        // Atmospheric variables stay put.
        assert_eq!(realm_for_variable(&m, "tas"), m);
    }

    #[test]
    fn amip_members_never_switch_realm() {
        let m = member("ifs-amip-tco1279.hist.v20240901.atmos.gr025.2D_monthly");
        assert_eq!(realm_for_variable(&m, "tos"), m);
    }

    #[test]
    fn fesom_ocean_history_is_daily_with_year_range() {
        let m = member("ifs-fesom2-sr.hist-1950.v20240304.atmos.gr025.2D_monthly_avg");
        let derived = realm_for_variable(&m, "tos");
        assert_eq!(
            derived.to_string(),
            "ifs-fesom2-sr.hist-1950.v20240304.ocean.gr025.2D_daily_avg_1950-2014"
        );
    }

    #[test]
    fn icon_extrema_use_daily_streams() {
        let m = member("icon-esm-er.hist-1950.v20240618.atmos.gr025.2d_monthly_mean");
        let derived = realm_for_variable(&m, "tasmax");
        assert_eq!(
            derived.to_string(),
            "icon-esm-er.hist-1950.v20240618.atmos.gr025.2d_daily_max"
        );
    }

    struct ScriptedSource {
        accepted: String,
        calls: RefCell<Vec<String>>,
    }

    impl DataSource for ScriptedSource {
        fn fetch(&self, member: &MemberKey, raw_variable: &str) -> EerieResult<Dataset> {
            let key = format!("{member}/{raw_variable}");
            self.calls.borrow_mut().push(key.clone());
            if key == self.accepted {
                Ok(Dataset::new())
            } else {
                Err(EerieError::Lookup {
                    member: member.to_string(),
                    variable: raw_variable.to_string(),
                })
            }
        }
    }

    #[test]
    fn retry_rules_apply_in_order_and_accumulate() {
        let m = member("ifs-fesom2-sr.hist-1950.v20240304.atmos.gr025.2D_monthly_avg");
        let source = ScriptedSource {
            accepted: "ifs-fesom2-sr.hist-1950.v20240304.atmos.gr025.2D_daily_max/mx2t24"
                .to_string(),
            calls: RefCell::new(Vec::new()),
        };
        let (_, fixed, rawname) = fetch_with_fixes(&source, &m, "mx2t", "tasmax").unwrap();
        assert_eq!(rawname, "mx2t24");
        assert_eq!(
            fixed.to_string(),
            "ifs-fesom2-sr.hist-1950.v20240304.atmos.gr025.2D_daily_max"
        );
        // Original, after daily swap, after extremum fix.
        assert_eq!(source.calls.borrow().len(), 3);
    }

    #[test]
    fn exhausted_retries_report_the_lookup() {
        let m = member("icon-esm-er.hist-1950.v20240618.atmos.gr025.2d_monthly_mean");
        let source = ScriptedSource {
            accepted: "never".to_string(),
            calls: RefCell::new(Vec::new()),
        };
        let err = fetch_with_fixes(&source, &m, "pr", "pr").unwrap_err();
        assert!(matches!(err, EerieError::Lookup { .. }));
    }

    fn dataset_with(varname: &str, units: &str, values: Vec<f64>) -> Dataset {
        let dates = (0..values.len())
            .map(|i| NaiveDate::from_ymd_opt(2000 + i as i32, 7, 1).unwrap())
            .collect();
        let n = values.len();
        let mut ds = Dataset::new();
        ds.set_coord("time", Coord::Time(TimeAxis::new(dates).unwrap()));
        let mut var = DataArray::new(
            vec!["time".to_string()],
            ArrayD::from_shape_vec(IxDyn(&[n]), values).unwrap(),
        );
        var.attrs.insert("units".to_string(), units.to_string());
        ds.insert_var(varname, var).unwrap();
        ds
    }

    #[test]
    fn precipitation_flux_becomes_mm_per_day() {
        let mut ds = dataset_with("pr", "kg m-2 s-1", vec![1.0 / 86400.0]);
        fix_units(&mut ds, "pr", false).unwrap();
        assert!(is_close!(ds.vars["pr"].values[IxDyn(&[0])], 1.0));
        assert_eq!(ds.vars["pr"].attrs["units"], "mm day-1");

        let mut icon = dataset_with("pr", "m s**-1", vec![1.0 / 86400000.0]);
        fix_units(&mut icon, "pr", false).unwrap();
        assert!(is_close!(icon.vars["pr"].values[IxDyn(&[0])], 1.0));
    }

    #[test]
    fn kelvin_becomes_celsius_except_for_trends() {
        let mut ds = dataset_with("tas", "K", vec![273.15, 283.15]);
        fix_units(&mut ds, "tas", false).unwrap();
        assert!(is_close!(ds.vars["tas"].values[IxDyn(&[0])], 0.0));
        assert_eq!(ds.vars["tas"].attrs["units"], "degC");

        let mut trend = dataset_with("tas", "K", vec![273.15, 283.15]);
        fix_units(&mut trend, "tas", true).unwrap();
        assert!(is_close!(trend.vars["tas"].values[IxDyn(&[0])], 273.15));
        assert_eq!(trend.vars["tas"].attrs["units"], "degC");
    }

    #[test]
    fn celsius_data_is_left_alone() {
        let mut ds = dataset_with("tas", "degC", vec![10.0]);
        fix_units(&mut ds, "tas", false).unwrap();
        assert!(is_close!(ds.vars["tas"].values[IxDyn(&[0])], 10.0));
    }

    #[test]
    fn anomalies_vanish_over_the_reference_period() {
        let mut ds = Dataset::new();
        ds.set_coord(
            "period",
            Coord::Labels(vec!["1951-1970".to_string(), "1991-2010".to_string()]),
        );
        let values = ArrayD::from_shape_vec(IxDyn(&[2]), vec![10.0, 12.5]).unwrap();
        ds.insert_var("tas", DataArray::new(vec!["period".to_string()], values))
            .unwrap();
        let periods = PeriodsConfig {
            reference_period: Period::new(1951, 1970),
            periods: vec![Period::new(1991, 2010)],
        };
        add_anomalies(&mut ds, &periods, "tas").unwrap();
        let anom = &ds.vars["tas_anom"].values;
        assert!(is_close!(anom[IxDyn(&[0])], 0.0));
        assert!(is_close!(anom[IxDyn(&[1])], 2.5));
    }

    #[test]
    fn missing_reference_period_is_a_config_error() {
        let mut ds = Dataset::new();
        ds.set_coord("period", Coord::Labels(vec!["1991-2010".to_string()]));
        let values = ArrayD::from_shape_vec(IxDyn(&[1]), vec![10.0]).unwrap();
        ds.insert_var("tas", DataArray::new(vec!["period".to_string()], values))
            .unwrap();
        let periods = PeriodsConfig {
            reference_period: Period::new(1951, 1970),
            periods: vec![],
        };
        assert!(matches!(
            add_anomalies(&mut ds, &periods, "tas"),
            Err(EerieError::Config(_))
        ));
    }

    #[test]
    fn series_anomalies_subtract_the_reference_mean() {
        let mut ds = dataset_with("tas", "degC", vec![1.0, 3.0, 10.0]);
        // Years 2000..2002; reference covers the first two.
        add_series_anomalies(&mut ds, Period::new(2000, 2001), "tas").unwrap();
        let anom = &ds.vars["tas_anom"].values;
        assert!(is_close!(anom[IxDyn(&[0])], -1.0));
        assert!(is_close!(anom[IxDyn(&[1])], 1.0));
        assert!(is_close!(anom[IxDyn(&[2])], 8.0));
    }

    #[test]
    fn nan_template_matches_the_spatial_shape() {
        let ds = dataset_with("tas", "degC", vec![1.0, 2.0]);
        let filled = nan_filled_template(&ds, "tas").unwrap();
        assert!(filled.coords.get("time").is_none());
        assert!(filled.vars["tas"].values.iter().all(|v| v.is_nan()));
    }
}
