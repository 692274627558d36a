//! Domain models
//!
//! Study units and the catalog that holds them for one run.

pub mod unit;

pub use unit::{CovariateKind, CovariateSpec, CovariateValue, Unit, UnitCatalog, UnitCatalogBuilder};
