//! External collaborator seams.
//!
//! Catalogue access, remapping and region geometry live outside this crate.
//! They are reached through traits so the product pipeline can be exercised
//! against in-memory implementations; an identity regridder and a
//! rectangular-region aggregator are provided.

use std::collections::BTreeMap;

use log::debug;
use ndarray::{ArrayD, Axis, Dimension, IxDyn};

use crate::dataset::{Coord, DataArray, Dataset};
use crate::errors::{EerieError, EerieResult};
use crate::members::MemberKey;

/// Source of raw member data.
///
/// A combination absent from the catalogue is an [`EerieError::Lookup`],
/// which the pipeline treats as retryable with name fixes.
pub trait DataSource {
    fn fetch(&self, member: &MemberKey, raw_variable: &str) -> EerieResult<Dataset>;
}

/// Remaps a dataset onto the common output grid.
pub trait Regridder {
    fn regrid(&self, dataset: &Dataset) -> EerieResult<Dataset>;
}

/// For data already on the common grid.
pub struct IdentityRegridder;

impl Regridder for IdentityRegridder {
    fn regrid(&self, dataset: &Dataset) -> EerieResult<Dataset> {
        Ok(dataset.clone())
    }
}

/// Collapses the spatial dimensions to one value per named region.
pub trait RegionAggregator {
    fn aggregate(&self, dataset: &Dataset, region_set: &str) -> EerieResult<Dataset>;
}

/// Average out an ensemble `realization` dimension if the source carries one.
pub fn average_realizations(dataset: &Dataset) -> EerieResult<Dataset> {
    if dataset.coords.contains_key("realization") {
        debug!("averaging out the realization dimension");
        dataset.mean_over("realization")
    } else {
        Ok(dataset.clone())
    }
}

/// A latitude/longitude rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct LatLonBox {
    pub name: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl LatLonBox {
    pub fn new(name: &str, lat: (f64, f64), lon: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            lat_min: lat.0,
            lat_max: lat.1,
            lon_min: lon.0,
            lon_max: lon.1,
        }
    }
}

/// Region aggregator over named sets of rectangles.
///
/// Means are cos(latitude) weighted and skip NaN cells; a region with no
/// valid cells yields NaN. An unknown set name is a configuration error.
#[derive(Debug, Default)]
pub struct BoxRegions {
    sets: BTreeMap<String, Vec<LatLonBox>>,
}

impl BoxRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(mut self, name: &str, boxes: Vec<LatLonBox>) -> Self {
        self.sets.insert(name.to_string(), boxes);
        self
    }
}

impl RegionAggregator for BoxRegions {
    fn aggregate(&self, dataset: &Dataset, region_set: &str) -> EerieResult<Dataset> {
        let boxes = self
            .sets
            .get(region_set)
            .ok_or_else(|| EerieError::Config(format!("unknown region set '{region_set}'")))?;
        let lats = match dataset.coords.get("lat") {
            Some(Coord::Values(values)) => values.clone(),
            _ => return Err(EerieError::Shape("dataset has no lat coordinate".to_string())),
        };
        let lons = match dataset.coords.get("lon") {
            Some(Coord::Values(values)) => values.clone(),
            _ => return Err(EerieError::Shape("dataset has no lon coordinate".to_string())),
        };

        let mut out = Dataset {
            coords: dataset.coords.clone(),
            vars: BTreeMap::new(),
            attrs: dataset.attrs.clone(),
        };
        out.coords.remove("lat");
        out.coords.remove("lon");
        out.coords.insert(
            "region".to_string(),
            Coord::Labels(boxes.iter().map(|b| b.name.clone()).collect()),
        );

        for (name, var) in &dataset.vars {
            let (Some(lat_ax), Some(lon_ax)) = (var.axis_of("lat"), var.axis_of("lon")) else {
                out.vars.insert(name.clone(), var.clone());
                continue;
            };
            let mut dims: Vec<String> = var
                .dims
                .iter()
                .filter(|d| *d != "lat" && *d != "lon")
                .cloned()
                .collect();
            dims.push("region".to_string());
            let mut shape: Vec<usize> = var
                .values
                .shape()
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != lat_ax && *i != lon_ax)
                .map(|(_, &s)| s)
                .collect();
            shape.push(boxes.len());
            let mut values = ArrayD::from_elem(IxDyn(&shape), f64::NAN);

            for (r, region) in boxes.iter().enumerate() {
                let lat_idx: Vec<usize> = lats
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v >= region.lat_min && v <= region.lat_max)
                    .map(|(i, _)| i)
                    .collect();
                let lon_idx: Vec<usize> = lons
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v >= region.lon_min && v <= region.lon_max)
                    .map(|(i, _)| i)
                    .collect();
                let sub = var
                    .values
                    .select(Axis(lat_ax), &lat_idx)
                    .select(Axis(lon_ax), &lon_idx);

                // Accumulate weighted sums keyed by the non-spatial index.
                let reduced_shape = &shape[..shape.len() - 1];
                let mut weighted = ArrayD::<f64>::zeros(IxDyn(reduced_shape));
                let mut weights = ArrayD::<f64>::zeros(IxDyn(reduced_shape));
                for (index, &value) in sub.indexed_iter() {
                    if value.is_nan() {
                        continue;
                    }
                    let weight = lats[lat_idx[index[lat_ax]]].to_radians().cos();
                    let reduced: Vec<usize> = index
                        .slice()
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != lat_ax && *i != lon_ax)
                        .map(|(_, &v)| v)
                        .collect();
                    weighted[IxDyn(&reduced)] += weight * value;
                    weights[IxDyn(&reduced)] += weight;
                }
                for (index, &total) in weights.indexed_iter() {
                    if total > 0.0 {
                        let mut target: Vec<usize> = index.slice().to_vec();
                        target.push(r);
                        values[IxDyn(&target)] = weighted[index.clone()] / total;
                    }
                }
            }

            out.vars.insert(
                name.clone(),
                DataArray {
                    dims,
                    values,
                    attrs: var.attrs.clone(),
                },
            );
        }
        Ok(out)
    }
}
