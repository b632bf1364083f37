//! Eddy kinetic energy from sea surface height.
//!
//! EKE is derived from daily SSH anomalies through the geostrophic balance:
//! the anomaly gradients give velocities u = -(g/f) dh/dy and v = (g/f) dh/dx
//! with f the Coriolis parameter. The equatorial band, where f vanishes, is
//! masked. Anomalies are taken against a smoothed day-of-year climatology.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ndarray::{ArrayD, Axis, IxDyn};

use crate::dataset::{Coord, DataArray, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::time_filters::{aggregate_time, TimeUnit};

const OMEGA: f64 = 7.2921e-5;
const GRAVITY: f64 = 9.81;
const EARTH_RADIUS: f64 = 6371.0e3;
/// Half width in days of the climatology smoothing window.
const SMOOTH_HALF_WIDTH: usize = 15;
/// Latitude band around the equator where the balance breaks down.
const EQUATOR_BAND_DEG: f64 = 3.0;

fn grid_coords(dataset: &Dataset) -> EerieResult<(Vec<f64>, Vec<f64>)> {
    let lats = match dataset.coords.get("lat") {
        Some(Coord::Values(values)) => values.clone(),
        _ => return Err(EerieError::Shape("dataset has no lat coordinate".to_string())),
    };
    let lons = match dataset.coords.get("lon") {
        Some(Coord::Values(values)) => values.clone(),
        _ => return Err(EerieError::Shape("dataset has no lon coordinate".to_string())),
    };
    Ok((lats, lons))
}

/// Daily SSH anomalies against a smoothed day-of-year climatology.
///
/// The climatology is the mean per day of year, smoothed with a centered
/// +-15 day window that wraps around the year boundary.
pub fn daily_anomalies(dataset: &Dataset, varname: &str) -> EerieResult<Dataset> {
    let axis = dataset.time_axis()?.values().to_vec();
    let var = dataset.var(varname)?;
    let time_ax = var.axis_of("time").ok_or_else(|| {
        EerieError::Shape(format!("variable '{varname}' has no time dimension"))
    })?;

    // Mean per day of year. Feb 29 folds onto day 59 with Feb 28.
    let doy_of = |date: &NaiveDate| (date.ordinal0() as usize).min(364);
    let mut day_groups: Vec<Vec<usize>> = vec![Vec::new(); 365];
    for (i, date) in axis.iter().enumerate() {
        day_groups[doy_of(date)].push(i);
    }

    let mut cell_shape: Vec<usize> = var.values.shape().to_vec();
    cell_shape.remove(time_ax);
    let mut climatology: Vec<ArrayD<f64>> = Vec::with_capacity(365);
    for indices in &day_groups {
        let mean = if indices.is_empty() {
            ArrayD::from_elem(IxDyn(&cell_shape), f64::NAN)
        } else {
            var.values
                .select(Axis(time_ax), indices)
                .map_axis(Axis(time_ax), |lane| {
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
        };
        climatology.push(mean);
    }

    // Smooth with periodic padding over the year.
    let mut smoothed: Vec<ArrayD<f64>> = Vec::with_capacity(365);
    for day in 0..365 {
        let mut sum = ArrayD::<f64>::zeros(IxDyn(&cell_shape));
        let mut count = ArrayD::<f64>::zeros(IxDyn(&cell_shape));
        for offset in -(SMOOTH_HALF_WIDTH as isize)..=(SMOOTH_HALF_WIDTH as isize) {
            let idx = (day as isize + offset).rem_euclid(365) as usize;
            ndarray::Zip::from(&mut sum)
                .and(&mut count)
                .and(&climatology[idx])
                .for_each(|s, c, &v| {
                    if !v.is_nan() {
                        *s += v;
                        *c += 1.0;
                    }
                });
        }
        let mean = ndarray::Zip::from(&sum)
            .and(&count)
            .map_collect(|&s, &c| if c > 0.0 { s / c } else { f64::NAN });
        smoothed.push(mean);
    }

    let mut out = dataset.clone();
    let anom = out
        .vars
        .get_mut(varname)
        .ok_or_else(|| EerieError::Config(format!("dataset has no variable '{varname}'")))?;
    for (t, date) in axis.iter().enumerate() {
        let clim = &smoothed[doy_of(date)];
        let mut slice = anom.values.index_axis_mut(Axis(time_ax), t);
        slice -= clim;
    }
    Ok(out)
}

/// Geostrophic velocities (u, v) from an SSH anomaly field on a regular
/// lat/lon grid, dims ordered [time, lat, lon].
///
/// Gradients are second-order centered differences with periodic padding in
/// longitude; the poleward neighbors at the grid edge wrap as the original
/// padding does.
pub fn geostrophic_velocities(
    ssh: &ArrayD<f64>,
    lats: &[f64],
    lons: &[f64],
) -> EerieResult<(ArrayD<f64>, ArrayD<f64>)> {
    let shape = ssh.shape();
    if shape.len() != 3 || shape[1] != lats.len() || shape[2] != lons.len() {
        return Err(EerieError::Shape(
            "geostrophic velocities expect a [time, lat, lon] field".to_string(),
        ));
    }
    let (nt, nlat, nlon) = (shape[0], shape[1], shape[2]);
    let dlat = if nlat > 1 { lats[1] - lats[0] } else { 1.0 };
    let dlon = if nlon > 1 { lons[1] - lons[0] } else { 1.0 };
    let deg = std::f64::consts::PI / 180.0;

    let mut u = ArrayD::from_elem(IxDyn(&[nt, nlat, nlon]), f64::NAN);
    let mut v = ArrayD::from_elem(IxDyn(&[nt, nlat, nlon]), f64::NAN);

    for t in 0..nt {
        for j in 0..nlat {
            let lat_rad = lats[j] * deg;
            if lats[j].abs() <= EQUATOR_BAND_DEG {
                continue;
            }
            let f = 2.0 * OMEGA * lat_rad.sin();
            let dx_dlon = EARTH_RADIUS * lat_rad.cos() * deg;
            let dy_dlat = EARTH_RADIUS * deg;
            let jm = if j == 0 { nlat - 1 } else { j - 1 };
            let jp = if j == nlat - 1 { 0 } else { j + 1 };
            for i in 0..nlon {
                let im = if i == 0 { nlon - 1 } else { i - 1 };
                let ip = if i == nlon - 1 { 0 } else { i + 1 };
                let dh_dlon =
                    (ssh[IxDyn(&[t, j, ip])] - ssh[IxDyn(&[t, j, im])]) / (2.0 * dlon);
                let dh_dlat =
                    (ssh[IxDyn(&[t, jp, i])] - ssh[IxDyn(&[t, jm, i])]) / (2.0 * dlat);
                let dh_dx = dh_dlon / dx_dlon;
                let dh_dy = dh_dlat / dy_dlat;
                u[IxDyn(&[t, j, i])] = -(GRAVITY / f) * dh_dy;
                v[IxDyn(&[t, j, i])] = (GRAVITY / f) * dh_dx;
            }
        }
    }
    Ok((u, v))
}

/// Monthly eddy kinetic energy from daily SSH.
///
/// EKE = (u^2 + v^2) / 2 from the geostrophic velocities of the daily SSH
/// anomalies, averaged to monthly means. Cells that are missing in the first
/// SSH field, and the equatorial band, stay NaN.
pub fn monthly_eke(dataset: &Dataset, ssh_varname: &str) -> EerieResult<Dataset> {
    let (lats, lons) = grid_coords(dataset)?;
    let anomalies = daily_anomalies(dataset, ssh_varname)?;
    let ssh = anomalies.var(ssh_varname)?;
    if ssh.dims != ["time", "lat", "lon"] {
        return Err(EerieError::Shape(
            "monthly EKE expects a [time, lat, lon] SSH field".to_string(),
        ));
    }
    let (u, v) = geostrophic_velocities(&ssh.values, &lats, &lons)?;
    let eke_values = ndarray::Zip::from(&u)
        .and(&v)
        .map_collect(|&a, &b| 0.5 * (a * a + b * b));

    let mut daily = Dataset {
        coords: anomalies.coords.clone(),
        vars: BTreeMap::new(),
        attrs: anomalies.attrs.clone(),
    };
    let eke_var = DataArray::new(ssh.dims.clone(), eke_values).with_attr("units", "m2 s-2");
    daily.insert_var("eke", eke_var)?;
    let mut monthly = aggregate_time(&daily, TimeUnit::Month, 1, "eke")?;

    // Mask where the source itself has no data at the first step.
    let first_field = dataset.var(ssh_varname)?.values.index_axis(Axis(0), 0).to_owned();
    let eke = monthly
        .vars
        .get_mut("eke")
        .ok_or_else(|| EerieError::Config("monthly EKE lost its variable".to_string()))?;
    let nt = eke.values.len_of(Axis(0));
    for t in 0..nt {
        let mut field = eke.values.index_axis_mut(Axis(0), t);
        ndarray::Zip::from(&mut field).and(&first_field).for_each(|e, &m| {
            if m.is_nan() {
                *e = f64::NAN;
            }
        });
    }
    Ok(monthly)
}
