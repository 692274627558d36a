//! Error handling for the stratification engine.
//!
//! Every stage fails closed: errors carry the offending unit ids,
//! covariate names or blocking keys so a design can be corrected without
//! re-deriving which input caused the failure.

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use std::io;

/// Specialized error type for building and assessing matched designs
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Rank covariance matrix could not be inverted
    #[error("Singular covariance: rank covariance of [{}] is not invertible", .covariates.join(", "))]
    SingularCovariance {
        /// Covariates involved in the singular matrix
        covariates: Vec<String>,
    },

    /// No covariates were supplied for a distance
    #[error("Empty covariate set: at least one covariate is required")]
    EmptyCovariateSet,

    /// Propensity score has zero pooled variance
    #[error("Degenerate score: propensity score has zero pooled variance")]
    DegenerateScore,

    /// Exact-match block lacks one side
    #[error("Empty block '{key}': {treated} treated and {controls} comparison units")]
    EmptyBlock {
        /// Blocking key of the offending block
        key: String,
        /// Number of treated units carrying the key
        treated: usize,
        /// Number of comparison units carrying the key
        controls: usize,
    },

    /// Treated units could not be placed under the requested bounds
    #[error("Infeasible: no admissible stratum for units [{}]", .units.join(", "))]
    Infeasible {
        /// Ids of the unsatisfiable units
        units: Vec<String>,
    },

    /// No stratum contains both treated and comparison units
    #[error("Degenerate stratification: no stratum contains both treated and comparison units")]
    DegenerateStratification,

    /// The design assigns zero units
    #[error("Empty design: no units are assigned to a stratum")]
    EmptyDesign,

    /// Covariate name not present in the catalog schema
    #[error("Unknown covariate: {0}")]
    UnknownCovariate(String),

    /// Numeric covariate required but categorical found
    #[error("Covariate {0} is categorical where a numeric covariate is required")]
    NonNumericCovariate(String),

    /// Duplicate unit identifier
    #[error("Duplicate unit id: {0}")]
    DuplicateUnit(String),

    /// Unit does not conform to the catalog schema
    #[error("Schema mismatch for unit {unit}: {message}")]
    SchemaMismatch {
        /// Offending unit id
        unit: String,
        /// What did not match
        message: String,
    },

    /// Propensity score missing for a unit
    #[error("Missing propensity score for unit {0}")]
    MissingScore(String),

    /// Propensity score is not a finite number
    #[error("Invalid propensity score for unit {0}")]
    InvalidScore(String),

    /// Two distance matrices do not cover the same units
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected shape
        expected: String,
        /// Actual shape
        found: String,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Solve abandoned between blocks
    #[error("Cancelled after {completed_blocks} blocks")]
    Cancelled {
        /// Blocks solved before cancellation was observed
        completed_blocks: usize,
    },

    /// Error processing Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Error processing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error opening or writing a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error (de)serialising configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, MatchError>;
