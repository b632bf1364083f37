//! Gridded trend fields.
//!
//! Applies the scalar trend fit cell by cell over a gridded variable,
//! collapsing the time axis into a slope field and a p-value field. Cells are
//! independent, so the work is planned as chunks of flattened cells and
//! realized in parallel; the output never depends on the chunking.

use chrono::Datelike;
use ndarray::{ArrayD, IxDyn};

use crate::dataset::{DataArray, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::executor::ChunkPlan;
use crate::trends::regression::trend_with_autocorrelation;

const CONFIDENCE_LEVEL: f64 = 0.90;
const CELLS_PER_CHUNK: usize = 4096;

/// Fit a trend in every grid cell of `varname`.
///
/// Returns the slope field and the p-value field, both without the time
/// dimension. Where the p-value is defined but the slope is not, the slope is
/// reported as zero, so fully masked cells plot as "no trend" rather than as
/// missing. With `as_decadal` the slope is scaled to change per decade and
/// the units attribute is suffixed accordingly.
pub fn compute_trend(
    dataset: &Dataset,
    varname: &str,
    as_decadal: bool,
) -> EerieResult<(DataArray, DataArray)> {
    let var = dataset.var(varname)?;
    let time_pos = var
        .axis_of("time")
        .ok_or_else(|| EerieError::Shape(format!("variable '{varname}' has no time dimension")))?;
    let years: Vec<f64> = dataset
        .time_axis()?
        .values()
        .iter()
        .map(|date| date.year() as f64)
        .collect();

    let spatial_dims: Vec<String> = var
        .dims
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_pos)
        .map(|(_, d)| d.clone())
        .collect();
    let spatial_shape: Vec<usize> = var
        .values
        .shape()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_pos)
        .map(|(_, &s)| s)
        .collect();
    let n_cells: usize = spatial_shape.iter().product();

    let plan = ChunkPlan::partition(n_cells, CELLS_PER_CHUNK)?;
    let values = &var.values;
    let chunk_results: Vec<Vec<(f64, f64)>> = plan.realize(|chunk| {
        let mut out = Vec::with_capacity(chunk.len);
        for cell in chunk.start..chunk.end() {
            let mut index = full_index(cell, &spatial_shape, time_pos);
            let series: Vec<f64> = (0..years.len())
                .map(|t| {
                    index[time_pos] = t;
                    values[IxDyn(&index)]
                })
                .collect();
            let fit = trend_with_autocorrelation(&years, &series, CONFIDENCE_LEVEL)?;
            let slope = if fit.slope.is_nan() && !fit.p_value.is_nan() {
                0.0
            } else {
                fit.slope
            };
            out.push((slope, fit.p_value));
        }
        Ok(out)
    })?;

    let mut slopes = Vec::with_capacity(n_cells);
    let mut p_values = Vec::with_capacity(n_cells);
    for chunk in chunk_results {
        for (slope, p) in chunk {
            slopes.push(if as_decadal { slope * 10.0 } else { slope });
            p_values.push(p);
        }
    }

    let suffix = if as_decadal { "decade -1" } else { "year -1" };
    let mut attrs = var.attrs.clone();
    let units = match attrs.get("units") {
        Some(units) if !units.is_empty() => format!("{units} {suffix}"),
        _ => suffix.to_string(),
    };
    attrs.insert("units".to_string(), units);

    let slope_values = ArrayD::from_shape_vec(IxDyn(&spatial_shape), slopes)
        .map_err(|e| EerieError::Shape(e.to_string()))?;
    let p_value_values = ArrayD::from_shape_vec(IxDyn(&spatial_shape), p_values)
        .map_err(|e| EerieError::Shape(e.to_string()))?;

    let slope = DataArray {
        dims: spatial_dims.clone(),
        values: slope_values,
        attrs,
    };
    let p_value = DataArray {
        dims: spatial_dims,
        values: p_value_values,
        attrs: var.attrs.clone(),
    };
    Ok((slope, p_value))
}

/// Full index for a flattened cell, with a slot left for the time axis.
fn full_index(cell: usize, spatial_shape: &[usize], time_pos: usize) -> Vec<usize> {
    let mut spatial = vec![0usize; spatial_shape.len()];
    let mut rest = cell;
    for (i, &extent) in spatial_shape.iter().enumerate().rev() {
        spatial[i] = rest % extent;
        rest /= extent;
    }
    let mut index = Vec::with_capacity(spatial_shape.len() + 1);
    index.extend_from_slice(&spatial[..time_pos.min(spatial.len())]);
    index.push(0);
    index.extend_from_slice(&spatial[time_pos.min(spatial.len())..]);
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Coord;
    use crate::timeseries::TimeAxis;
    use chrono::NaiveDate;
    use is_close::is_close;

    fn yearly_grid(n_years: usize, slopes: &[f64]) -> Dataset {
        let dates = (0..n_years)
            .map(|i| NaiveDate::from_ymd_opt(1950 + i as i32, 7, 1).unwrap())
            .collect();
        let mut values = Vec::new();
        for t in 0..n_years {
            for &cell_slope in slopes {
                let year = (1950 + t) as f64;
                // Small wiggle keeps the residual autocorrelation estimable.
                values.push(5.0 + cell_slope * year + 0.001 * (year * 2.4).sin());
            }
        }
        let mut ds = Dataset::new();
        ds.set_coord("time", Coord::Time(TimeAxis::new(dates).unwrap()));
        ds.set_coord(
            "cell",
            Coord::Values((0..slopes.len()).map(|i| i as f64).collect()),
        );
        let mut var = DataArray::new(
            vec!["time".to_string(), "cell".to_string()],
            ArrayD::from_shape_vec(IxDyn(&[n_years, slopes.len()]), values).unwrap(),
        );
        var.attrs.insert("units".to_string(), "K".to_string());
        ds.insert_var("tas", var).unwrap();
        ds
    }

    #[test]
    fn recovers_per_cell_slopes() {
        let ds = yearly_grid(60, &[0.02, -0.01, 0.0]);
        let (slope, p_value) = compute_trend(&ds, "tas", false).unwrap();
        assert_eq!(slope.dims, vec!["cell".to_string()]);
        assert!(is_close!(slope.values[IxDyn(&[0])], 0.02, abs_tol = 0.01));
        assert!(is_close!(slope.values[IxDyn(&[1])], -0.01, abs_tol = 0.01));
        assert!(p_value.values[IxDyn(&[0])] < 0.05);
        assert_eq!(slope.attrs["units"], "K year -1");
    }

    #[test]
    fn decadal_scaling_multiplies_by_ten() {
        let ds = yearly_grid(60, &[0.02]);
        let (decadal, _) = compute_trend(&ds, "tas", true).unwrap();
        assert!(is_close!(decadal.values[IxDyn(&[0])], 0.2, abs_tol = 0.01));
        assert_eq!(decadal.attrs["units"], "K decade -1");
    }

    #[test]
    fn masked_cell_gets_zero_slope_when_p_is_defined() {
        let mut ds = yearly_grid(10, &[0.02, 0.0]);
        // Blank out the second cell entirely.
        let var = ds.vars.get_mut("tas").unwrap();
        for t in 0..10 {
            var.values[IxDyn(&[t, 1])] = f64::NAN;
        }
        let (slope, p_value) = compute_trend(&ds, "tas", false).unwrap();
        assert!(is_close!(slope.values[IxDyn(&[1])], 0.0));
        assert!(is_close!(p_value.values[IxDyn(&[1])], 1.0));
    }

    #[test]
    fn output_is_independent_of_chunking() {
        // More cells than one chunk would hold exercises the reassembly path.
        let slopes: Vec<f64> = (0..50).map(|i| 0.001 * i as f64).collect();
        let ds = yearly_grid(30, &slopes);
        let (slope, _) = compute_trend(&ds, "tas", false).unwrap();
        for (i, &expected) in slopes.iter().enumerate() {
            assert!(is_close!(slope.values[IxDyn(&[i])], expected, abs_tol = 1e-3));
        }
    }
}
