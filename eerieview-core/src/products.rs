//! Product orchestration.
//!
//! The two entry points here drive the whole pipeline for one variable over
//! an ensemble: decadal gridded products (period climatologies or decadal
//! trends) and regionally aggregated time series. Members are processed
//! independently; a member whose data cannot be resolved is skipped and
//! reported, never aborting the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use log::{info, warn};

use crate::access::{average_realizations, DataSource, RegionAggregator, Regridder};
use crate::dataset::{self, Coord, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::members::MemberKey;
use crate::naming::{raw_variable_name, rename_to_cmor};
use crate::periods::{aggregate_period, slice_period, Period, PeriodsConfig};
use crate::processing::{
    add_anomalies, add_series_anomalies, fetch_with_fixes, fix_units, nan_filled_template,
    realm_for_variable,
};
use crate::sink::write_product;
use crate::time_filters::{
    aggregate_time, filter_time_axis, min_valid_count, TimeFilter, TimeUnit,
};
use crate::timeseries::{Cadence, TimeAxis};
use crate::trends::compute_trend;

/// Kind of gridded decadal product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecadalProductKind {
    /// Mean over each period.
    Clim,
    /// Decadal trend and its p-value over each period.
    Trend,
}

impl DecadalProductKind {
    pub fn label(&self) -> &'static str {
        match self {
            DecadalProductKind::Clim => "clim",
            DecadalProductKind::Trend => "trend",
        }
    }
}

/// Members that could not be processed, with the reason.
#[derive(Debug, Default)]
pub struct FailureReport {
    pub failures: Vec<(String, String)>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, member: &str, error: &EerieError) {
        warn!("skipping member {member}: {error}");
        self.failures.push((member.to_string(), error.to_string()));
    }
}

/// One period's product from an already filtered dataset.
pub fn decadal_product(
    dataset: &Dataset,
    period: Period,
    kind: DecadalProductKind,
    varname: &str,
) -> EerieResult<Dataset> {
    match kind {
        DecadalProductKind::Clim => aggregate_period(dataset, period),
        DecadalProductKind::Trend => {
            let sliced = slice_period(dataset, period)?;
            let yearly = aggregate_time(&sliced, TimeUnit::Year, 1, varname)?;
            let (slope, p_value) = compute_trend(&yearly, varname, true)?;
            let mut out = Dataset {
                coords: yearly.coords.clone(),
                vars: BTreeMap::new(),
                attrs: yearly.attrs.clone(),
            };
            out.coords.remove("time");
            out.insert_var(varname, slope)?;
            out.insert_var(&format!("{varname}_pvalue"), p_value)?;
            Ok(out)
        }
    }
}

/// The product for a period, or a NaN placeholder when the period has no
/// data, so the member still appears in the merged output.
pub fn decadal_product_or_nan(
    dataset: &Dataset,
    period: Period,
    kind: DecadalProductKind,
    varname: &str,
) -> EerieResult<Dataset> {
    match decadal_product(dataset, period, kind, varname) {
        Ok(product) => Ok(product),
        Err(EerieError::EmptySlice(label)) => {
            warn!("no data for {varname} in {label}, filling with NaN");
            nan_filled_template(dataset, varname)
        }
        Err(err) => Err(err),
    }
}

fn resolve_member(
    source: &dyn DataSource,
    member_str: &str,
    varname: &str,
    for_trend: bool,
) -> EerieResult<(Dataset, String)> {
    let member = MemberKey::parse(member_str)?;
    let derived = realm_for_variable(&member, varname);
    let rawname = raw_variable_name(&derived, varname)?;
    let (dataset, resolved, rawname) = fetch_with_fixes(source, &derived, &rawname, varname)?;
    info!("resolved {member_str} as {resolved} / {rawname}");
    let mut dataset = average_realizations(&dataset)?;
    rename_to_cmor(&mut dataset, &rawname, varname)?;
    fix_units(&mut dataset, varname, for_trend)?;
    Ok((dataset, member.slug()))
}

/// Compute a gridded decadal product for an ensemble and write it out.
///
/// The output lands at `{varname}_{experiment}_EERIE_{kind}.json` inside
/// `output_dir`; when the file already exists and `clobber` is false the
/// computation is skipped. Returns the output path and the report of members
/// that were skipped.
#[allow(clippy::too_many_arguments)]
pub fn compute_decadal_product(
    source: &dyn DataSource,
    regridder: &dyn Regridder,
    varname: &str,
    members: &[String],
    periods: &PeriodsConfig,
    kind: DecadalProductKind,
    experiment: &str,
    output_dir: &Path,
    clobber: bool,
) -> EerieResult<(PathBuf, FailureReport)> {
    let output_path =
        output_dir.join(format!("{varname}_{experiment}_EERIE_{}.json", kind.label()));
    let mut report = FailureReport::default();
    if output_path.exists() && !clobber {
        info!("{} already exists, refusing to overwrite", output_path.display());
        return Ok((output_path, report));
    }

    let mut fragments = Vec::new();
    for member_str in members {
        let (dataset, slug) =
            match resolve_member(source, member_str, varname, kind == DecadalProductKind::Trend)
            {
                Ok(resolved) => resolved,
                Err(err) => {
                    report.record(member_str, &err);
                    continue;
                }
            };

        for filter in TimeFilter::catalog() {
            let filtered = filter_time_axis(&dataset, filter)?;
            for period in periods.all() {
                info!(
                    "computing {} for {varname} {slug} {} {}",
                    kind.label(),
                    period.label(),
                    filter.label()
                );
                let product = decadal_product_or_nan(&filtered, period, kind, varname)?;
                let product = regridder.regrid(&product)?;
                fragments.push(product.annotate(&slug, &period.label(), filter.label()));
            }
        }
    }

    if fragments.is_empty() {
        return Err(EerieError::Config(format!(
            "no member could be processed for {varname} {experiment}"
        )));
    }
    let mut final_dataset = dataset::merge(&fragments)?;
    if kind == DecadalProductKind::Clim {
        add_anomalies(&mut final_dataset, periods, varname)?;
    }
    final_dataset
        .attrs
        .insert("experiment".to_string(), experiment.to_string());
    write_product(&final_dataset, &output_path)?;
    Ok((output_path, report))
}

/// Align aggregated time labels to January 1st of the label year, so series
/// from different filters share one axis.
fn align_time_to_year_start(dataset: &Dataset) -> EerieResult<Dataset> {
    let dates: Vec<NaiveDate> = dataset
        .time_axis()?
        .values()
        .iter()
        .map(|d| {
            NaiveDate::from_ymd_opt(d.year(), 1, 1)
                .ok_or_else(|| EerieError::Config(format!("cannot align {d} to year start")))
        })
        .collect::<EerieResult<_>>()?;
    let mut out = dataset.clone();
    out.coords
        .insert("time".to_string(), Coord::Time(TimeAxis::new(dates)?));
    Ok(out)
}

/// Compute regional time series for an ensemble and write them out.
///
/// Each member is aggregated per time filter at its filter's resolution with
/// the monthly minimum-count thresholds, collapsed to one value per region,
/// and aligned to a common yearly axis. Anomalies are taken against the mean
/// over `reference_period`. Output lands at
/// `{varname}_{experiment}_{region_set}_ts.json`.
#[allow(clippy::too_many_arguments)]
pub fn compute_time_series(
    source: &dyn DataSource,
    regions: &dyn RegionAggregator,
    varname: &str,
    members: &[String],
    experiment: &str,
    reference_period: Period,
    region_set: &str,
    output_dir: &Path,
    clobber: bool,
) -> EerieResult<(PathBuf, FailureReport)> {
    let output_path = output_dir.join(format!("{varname}_{experiment}_{region_set}_ts.json"));
    let mut report = FailureReport::default();
    if output_path.exists() && !clobber {
        info!("{} already exists, refusing to overwrite", output_path.display());
        return Ok((output_path, report));
    }

    let mut fragments = Vec::new();
    for member_str in members {
        let (dataset, slug) = match resolve_member(source, member_str, varname, false) {
            Ok(resolved) => resolved,
            Err(err) => {
                report.record(member_str, &err);
                continue;
            }
        };

        for filter in TimeFilter::catalog() {
            info!("computing {region_set} series for {varname} {slug} {}", filter.label());
            let filtered = filter_time_axis(&dataset, filter)?;
            let min_count = min_valid_count(filter.unit(), Cadence::Monthly);
            let aggregated = aggregate_time(&filtered, filter.unit(), min_count, varname)?;
            let regional = regions.aggregate(&aggregated, region_set)?;
            let aligned = align_time_to_year_start(&regional)?;
            fragments
                .push(aligned.expand_dims(&[("member", &slug), ("time_filter", filter.label())]));
        }
    }

    if fragments.is_empty() {
        return Err(EerieError::Config(format!(
            "no member could be processed for {varname} {experiment}"
        )));
    }
    let mut final_dataset = dataset::merge(&fragments)?;
    add_series_anomalies(&mut final_dataset, reference_period, varname)?;
    final_dataset
        .attrs
        .insert("experiment".to_string(), experiment.to_string());
    write_product(&final_dataset, &output_path)?;
    Ok((output_path, report))
}
