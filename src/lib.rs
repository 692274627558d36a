//! Optimal stratification for matched observational studies.
//!
//! Units are loaded into a [`UnitCatalog`], distances between treated and
//! comparison units are constrained by calipers and exact matching, and a
//! minimum-cost flow places units into strata minimising total
//! within-stratum distance. The resulting [`MatchedDesign`] can be assessed
//! for covariate balance with a [`StrataEvaluator`].

pub mod algorithm;
pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::{
    BalanceConfig, CaliperSpec, DesignConfig, DesignConfigBuilder, DistanceMetric, DistanceSpec,
    MatchMode, StratumWeighting,
};
pub use error::{MatchError, Result};
pub use models::{CovariateKind, CovariateSpec, CovariateValue, Unit, UnitCatalog};

// Pipeline
pub use algorithm::matching::{
    Assignment, BalanceMetric, BalanceReport, BlockSolution, ConstrainedDistance, Constraint,
    ConstraintApplier, DistanceMatrix, DistanceMatrixBuilder, MatchedDesign, Matcher,
    MatchingResult, OptimalMatchSolver, StrataEvaluator, Stratum, StratumId,
};

// Input loading
pub use loader::{CatalogSchema, catalog_from_batches, load_catalog_from_parquet};
