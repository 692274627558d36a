//! Optimal stratification of treated and comparison units
//!
//! This module builds matched designs for observational studies. It includes:
//!
//! 1. Distance matrices between treated and comparison units
//! 2. Caliper and exact-match constraints with blocking
//! 3. Optimal pair and full matching by minimum-cost flow
//! 4. Covariate balance assessment for the resulting strata
//!
//! Blocks created by exact matching are solved independently, in parallel
//! when configured to.

pub mod balance;
pub mod constraints;
pub mod distance;
pub mod flow;
pub mod matcher;
pub mod parallel;
pub mod sequential;
pub mod solver;
pub mod types;

// Re-export key types
pub use balance::{BalanceMetric, BalanceReport, OverallBalance, StrataEvaluator};
pub use constraints::{Block, ConstrainedDistance, Constraint, ConstraintApplier};
pub use distance::{DistanceMatrix, DistanceMatrixBuilder};
pub use matcher::{Matcher, MatchingResult};
pub use solver::OptimalMatchSolver;
pub use types::{Assignment, BlockSolution, MatchedDesign, Stratum, StratumId};
