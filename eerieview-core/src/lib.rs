//! Derived comparison products for heterogeneous climate-model ensembles.
//!
//! Raw model output is harmonized onto common variable names, units and
//! coordinates, then reduced to the products the data viewer serves: period
//! climatologies, decadal trends with significance, and regionally averaged
//! time series.

pub mod access;
pub mod dataset;
pub mod eke;
pub mod executor;
pub mod members;
pub mod naming;
pub mod periods;
pub mod processing;
pub mod products;
pub mod sink;
pub mod time_filters;
pub mod timeseries;
pub mod trends;

pub mod errors;
