//! Labeled n-dimensional arrays for product assembly.
//!
//! [`Dataset`] is a small dimension-labeled container: named variables over
//! named dimensions, each dimension carrying coordinate values (calendar
//! dates, string labels, or numeric positions). It covers the operations the
//! product pipeline needs: selection along a dimension, NaN-aware means,
//! size-1 annotation dimensions, and an outer-join merge over label and time
//! dimensions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use crate::errors::{EerieError, EerieResult};
use crate::timeseries::TimeAxis;

/// Coordinate values along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coord {
    /// Calendar dates (the `time` dimension).
    Time(TimeAxis),
    /// String labels (member, period, time_filter, region).
    Labels(Vec<String>),
    /// Numeric positions (latitude, longitude).
    Values(Vec<f64>),
}

impl Coord {
    pub fn len(&self) -> usize {
        match self {
            Coord::Time(axis) => axis.len(),
            Coord::Labels(labels) => labels.len(),
            Coord::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single variable: values plus the ordered names of its dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    pub dims: Vec<String>,
    #[serde(deserialize_with = "values_from_nullable")]
    pub values: ArrayD<f64>,
    pub attrs: BTreeMap<String, String>,
}

/// JSON cannot represent NaN, so serde_json writes it as `null`; read it
/// back as NaN so deserialization inverts serialization.
fn values_from_nullable<'de, D>(deserializer: D) -> Result<ArrayD<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = ArrayD::<Option<f64>>::deserialize(deserializer)?;
    Ok(values.mapv(|v| v.unwrap_or(f64::NAN)))
}

impl DataArray {
    pub fn new(dims: Vec<String>, values: ArrayD<f64>) -> Self {
        Self {
            dims,
            values,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    /// Position of `dim` among this variable's axes.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }
}

/// A collection of variables sharing coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub coords: BTreeMap<String, Coord>,
    pub vars: BTreeMap<String, DataArray>,
    pub attrs: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_coord(&mut self, name: &str, coord: Coord) {
        self.coords.insert(name.to_string(), coord);
    }

    /// Insert a variable, checking its shape against the coordinates.
    pub fn insert_var(&mut self, name: &str, var: DataArray) -> EerieResult<()> {
        if var.dims.len() != var.values.ndim() {
            return Err(EerieError::Shape(format!(
                "variable '{name}' names {} dims for {} axes",
                var.dims.len(),
                var.values.ndim()
            )));
        }
        for (axis, dim) in var.dims.iter().enumerate() {
            let coord = self.coords.get(dim).ok_or_else(|| {
                EerieError::Shape(format!("variable '{name}' uses unknown dimension '{dim}'"))
            })?;
            if coord.len() != var.values.len_of(Axis(axis)) {
                return Err(EerieError::Shape(format!(
                    "variable '{name}' has {} entries along '{dim}' but the coordinate has {}",
                    var.values.len_of(Axis(axis)),
                    coord.len()
                )));
            }
        }
        self.vars.insert(name.to_string(), var);
        Ok(())
    }

    pub fn var(&self, name: &str) -> EerieResult<&DataArray> {
        self.vars
            .get(name)
            .ok_or_else(|| EerieError::Config(format!("dataset has no variable '{name}'")))
    }

    pub fn var_names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn rename_var(&mut self, from: &str, to: &str) -> EerieResult<()> {
        let var = self
            .vars
            .remove(from)
            .ok_or_else(|| EerieError::Config(format!("dataset has no variable '{from}'")))?;
        self.vars.insert(to.to_string(), var);
        Ok(())
    }

    pub fn time_axis(&self) -> EerieResult<&TimeAxis> {
        match self.coords.get("time") {
            Some(Coord::Time(axis)) => Ok(axis),
            _ => Err(EerieError::Shape("dataset has no time coordinate".to_string())),
        }
    }

    /// Keep only the given positions along `dim`, in the given order.
    pub fn select(&self, dim: &str, indices: &[usize]) -> EerieResult<Dataset> {
        let coord = self
            .coords
            .get(dim)
            .ok_or_else(|| EerieError::Shape(format!("dataset has no dimension '{dim}'")))?;
        let selected = match coord {
            Coord::Time(axis) => {
                let dates: Vec<NaiveDate> =
                    indices.iter().map(|&i| axis.values()[i]).collect();
                Coord::Time(TimeAxis::new(dates)?)
            }
            Coord::Labels(labels) => {
                Coord::Labels(indices.iter().map(|&i| labels[i].clone()).collect())
            }
            Coord::Values(values) => {
                Coord::Values(indices.iter().map(|&i| values[i]).collect())
            }
        };

        let mut out = Dataset {
            coords: self.coords.clone(),
            vars: BTreeMap::new(),
            attrs: self.attrs.clone(),
        };
        out.coords.insert(dim.to_string(), selected);
        for (name, var) in &self.vars {
            let picked = match var.axis_of(dim) {
                Some(axis) => DataArray {
                    dims: var.dims.clone(),
                    values: var.values.select(Axis(axis), indices),
                    attrs: var.attrs.clone(),
                },
                None => var.clone(),
            };
            out.vars.insert(name.clone(), picked);
        }
        Ok(out)
    }

    /// NaN-aware mean collapsing `dim`; variables without the dimension pass
    /// through unchanged.
    pub fn mean_over(&self, dim: &str) -> EerieResult<Dataset> {
        let mut out = Dataset {
            coords: self.coords.clone(),
            vars: BTreeMap::new(),
            attrs: self.attrs.clone(),
        };
        out.coords.remove(dim);
        for (name, var) in &self.vars {
            let reduced = match var.axis_of(dim) {
                Some(axis) => {
                    let values = var.values.map_axis(Axis(axis), |lane| nan_mean(lane.iter()));
                    let mut dims = var.dims.clone();
                    dims.remove(axis);
                    DataArray {
                        dims,
                        values,
                        attrs: var.attrs.clone(),
                    }
                }
                None => var.clone(),
            };
            out.vars.insert(name.clone(), reduced);
        }
        Ok(out)
    }

    /// Prepend size-1 label dimensions to every variable, so fragments can be
    /// merged into an ensemble product.
    pub fn expand_dims(&self, labels: &[(&str, &str)]) -> Dataset {
        let mut out = self.clone();
        for (dim, label) in labels {
            out.coords
                .insert(dim.to_string(), Coord::Labels(vec![label.to_string()]));
        }
        for var in out.vars.values_mut() {
            let mut dims: Vec<String> = labels.iter().map(|(d, _)| d.to_string()).collect();
            dims.extend(var.dims.iter().cloned());
            let mut shape = vec![1; labels.len()];
            shape.extend(var.values.shape());
            // A size-1 prefix never fails to reshape.
            var.values = var
                .values
                .clone()
                .into_shape(IxDyn(&shape))
                .unwrap_or_else(|_| unreachable!());
            var.dims = dims;
        }
        out
    }

    /// The decadal-product annotation: member, period and time filter.
    pub fn annotate(&self, member: &str, period: &str, time_filter: &str) -> Dataset {
        self.expand_dims(&[
            ("member", member),
            ("period", period),
            ("time_filter", time_filter),
        ])
    }
}

fn nan_mean<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
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
}

/// Outer-join merge of product fragments.
///
/// Time and label dimensions are joined on coordinate value (sorted union,
/// missing combinations NaN); numeric dimensions must agree exactly across
/// fragments. Sorting the unions makes the merge associative and commutative.
pub fn merge(fragments: &[Dataset]) -> EerieResult<Dataset> {
    let mut out = Dataset::new();
    if fragments.is_empty() {
        return Ok(out);
    }

    // Union coordinates.
    for fragment in fragments {
        for (dim, coord) in &fragment.coords {
            match out.coords.get_mut(dim) {
                None => {
                    out.coords.insert(dim.clone(), coord.clone());
                }
                Some(existing) => union_coord(dim, existing, coord)?,
            }
        }
        for (key, value) in &fragment.attrs {
            out.attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    // Allocate each variable at the union shape and copy fragments in.
    let mut names: Vec<String> = Vec::new();
    for fragment in fragments {
        for name in fragment.vars.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names.sort();

    for name in &names {
        let template = fragments
            .iter()
            .find_map(|f| f.vars.get(name))
            .unwrap_or_else(|| unreachable!());
        let dims = template.dims.clone();
        let shape: Vec<usize> = dims.iter().map(|d| out.coords[d].len()).collect();
        let mut values = ArrayD::from_elem(IxDyn(&shape), f64::NAN);

        for fragment in fragments {
            let Some(var) = fragment.vars.get(name) else {
                continue;
            };
            if var.dims != dims {
                return Err(EerieError::Shape(format!(
                    "variable '{name}' has inconsistent dimensions across fragments"
                )));
            }
            // Per-dimension map from fragment position to union position.
            let maps: Vec<Vec<usize>> = dims
                .iter()
                .map(|d| position_map(&fragment.coords[d], &out.coords[d]))
                .collect::<EerieResult<_>>()?;
            for (index, &value) in var.values.indexed_iter() {
                let target: Vec<usize> = index
                    .slice()
                    .iter()
                    .enumerate()
                    .map(|(axis, &i)| maps[axis][i])
                    .collect();
                values[IxDyn(&target)] = value;
            }
        }

        out.vars.insert(
            name.clone(),
            DataArray {
                dims,
                values,
                attrs: template.attrs.clone(),
            },
        );
    }
    Ok(out)
}

fn union_coord(dim: &str, existing: &mut Coord, incoming: &Coord) -> EerieResult<()> {
    match (existing, incoming) {
        (Coord::Time(a), Coord::Time(b)) => {
            let mut dates: Vec<NaiveDate> = a.values().to_vec();
            for date in b.values() {
                if !dates.contains(date) {
                    dates.push(*date);
                }
            }
            dates.sort();
            *a = TimeAxis::new(dates)?;
            Ok(())
        }
        (Coord::Labels(a), Coord::Labels(b)) => {
            for label in b {
                if !a.contains(label) {
                    a.push(label.clone());
                }
            }
            a.sort();
            Ok(())
        }
        (Coord::Values(a), Coord::Values(b)) => {
            if a != b {
                return Err(EerieError::Shape(format!(
                    "numeric coordinate '{dim}' differs between fragments"
                )));
            }
            Ok(())
        }
        _ => Err(EerieError::Shape(format!(
            "coordinate '{dim}' has mixed kinds across fragments"
        ))),
    }
}

fn position_map(fragment: &Coord, union: &Coord) -> EerieResult<Vec<usize>> {
    let find = |missing: &str| EerieError::Shape(format!("merge lost coordinate value {missing}"));
    match (fragment, union) {
        (Coord::Time(a), Coord::Time(b)) => a
            .values()
            .iter()
            .map(|date| {
                b.values()
                    .iter()
                    .position(|d| d == date)
                    .ok_or_else(|| find(&date.to_string()))
            })
            .collect(),
        (Coord::Labels(a), Coord::Labels(b)) => a
            .iter()
            .map(|label| b.iter().position(|l| l == label).ok_or_else(|| find(label)))
            .collect(),
        (Coord::Values(a), _) => Ok((0..a.len()).collect()),
        _ => Err(EerieError::Shape("coordinate kinds differ in merge".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scalar_fragment(member: &str, value: f64) -> Dataset {
        let mut ds = Dataset::new();
        ds.set_coord("lat", Coord::Values(vec![0.0]));
        ds.insert_var(
            "tas",
            DataArray::new(vec!["lat".to_string()], ArrayD::from_elem(IxDyn(&[1]), value)),
        )
        .unwrap();
        ds.annotate(member, "1991-2020", "year")
    }

    #[test]
    fn insert_var_checks_shape() {
        let mut ds = Dataset::new();
        ds.set_coord("lat", Coord::Values(vec![0.0, 1.0]));
        let bad = DataArray::new(
            vec!["lat".to_string()],
            ArrayD::from_elem(IxDyn(&[3]), 1.0),
        );
        assert!(ds.insert_var("tas", bad).is_err());
    }

    #[test]
    fn mean_over_time_skips_nan() {
        let mut ds = Dataset::new();
        ds.set_coord(
            "time",
            Coord::Time(
                TimeAxis::new(vec![date(2000, 1, 1), date(2000, 2, 1), date(2000, 3, 1)])
                    .unwrap(),
            ),
        );
        let values = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, f64::NAN, 3.0]).unwrap();
        ds.insert_var("tas", DataArray::new(vec!["time".to_string()], values))
            .unwrap();
        let mean = ds.mean_over("time").unwrap();
        let value = mean.var("tas").unwrap().values.iter().copied().next().unwrap();
        assert!(is_close!(value, 2.0));
        assert!(mean.coords.get("time").is_none());
    }

    #[test]
    fn merge_is_commutative_over_members() {
        let a = scalar_fragment("model-b", 2.0);
        let b = scalar_fragment("model-a", 1.0);
        let ab = merge(&[a.clone(), b.clone()]).unwrap();
        let ba = merge(&[b, a]).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(
            ab.coords["member"],
            Coord::Labels(vec!["model-a".to_string(), "model-b".to_string()])
        );
    }

    #[test]
    fn merge_is_associative() {
        let a = scalar_fragment("m1", 1.0);
        let b = scalar_fragment("m2", 2.0);
        let c = scalar_fragment("m3", 3.0);
        let left = merge(&[merge(&[a.clone(), b.clone()]).unwrap(), c.clone()]).unwrap();
        let right = merge(&[a, merge(&[b, c]).unwrap()]).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn merge_fills_missing_combinations_with_nan() {
        let mut a = scalar_fragment("m1", 1.0);
        // Second fragment has a second variable the first lacks.
        let mut b = scalar_fragment("m2", 2.0);
        let extra = b.vars["tas"].clone();
        b.vars.insert("tas_pvalue".to_string(), extra);
        a = merge(&[a, b]).unwrap();

        let pvals = &a.vars["tas_pvalue"];
        let member_axis = pvals.axis_of("member").unwrap();
        let m1 = pvals.values.index_axis(Axis(member_axis), 0);
        assert!(m1.iter().all(|v| v.is_nan()));
        let m2 = pvals.values.index_axis(Axis(member_axis), 1);
        assert!(m2.iter().all(|v| is_close!(*v, 2.0)));
    }

    #[test]
    fn select_reorders_time() {
        let mut ds = Dataset::new();
        ds.set_coord(
            "time",
            Coord::Time(TimeAxis::new(vec![date(2000, 1, 1), date(2000, 2, 1)]).unwrap()),
        );
        let values = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).unwrap();
        ds.insert_var("tas", DataArray::new(vec!["time".to_string()], values))
            .unwrap();
        let picked = ds.select("time", &[1]).unwrap();
        assert_eq!(picked.time_axis().unwrap().len(), 1);
        assert!(is_close!(picked.vars["tas"].values[IxDyn(&[0])], 2.0));
    }
}
