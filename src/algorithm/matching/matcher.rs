//! Core matching pipeline
//!
//! This module implements the Matcher struct which orchestrates the design
//! process: base distance, constraints, optimal solve and balance assessment.

use crate::algorithm::matching::balance::{BalanceReport, StrataEvaluator};
use crate::algorithm::matching::constraints::{Constraint, ConstraintApplier};
use crate::algorithm::matching::distance::{DistanceMatrix, DistanceMatrixBuilder};
use crate::algorithm::matching::solver::OptimalMatchSolver;
use crate::algorithm::matching::types::MatchedDesign;
use crate::config::{BalanceConfig, DesignConfig};
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use log::info;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// Result of a matching run
#[derive(Debug, Clone)]
pub struct MatchingResult {
    /// The optimal design
    pub design: MatchedDesign,
    /// Wall-clock time spent building the design
    pub matching_time: Duration,
}

/// Matcher building optimal designs for one configuration
#[derive(Debug, Clone)]
pub struct Matcher {
    /// Design configuration
    config: DesignConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl Matcher {
    /// Create a new matcher with the given configuration
    #[must_use]
    pub const fn new(config: DesignConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Abandon solving between blocks once `flag` is set
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &DesignConfig {
        &self.config
    }

    /// Build the optimal matched design for `catalog`
    ///
    /// # Arguments
    ///
    /// * `catalog` - Units to stratify
    ///
    /// # Returns
    ///
    /// Result containing the design and the time it took
    pub fn perform_matching(&self, catalog: &UnitCatalog) -> Result<MatchingResult> {
        let start_time = Instant::now();
        self.config.validate()?;

        let treated = catalog.treated_positions().len();
        let controls = catalog.control_positions().len();
        if treated == 0 || controls == 0 {
            return Err(MatchError::InvalidConfig(format!(
                "catalog needs treated and comparison units, found {treated} and {controls}"
            )));
        }

        info!(
            "Matching {treated} treated units against a pool of {controls} comparison units"
        );

        let base = DistanceMatrixBuilder::build(catalog, &self.config.distance)?;
        let constraints = self.constraints(catalog, &base)?;
        let constrained = ConstraintApplier::apply(catalog, &base, &constraints)?;

        let mut solver = OptimalMatchSolver::from_config(&self.config);
        if let Some(flag) = &self.cancel {
            solver = solver.with_cancellation(Arc::clone(flag));
        }
        let design = solver.solve(catalog, &constrained)?;

        let elapsed = start_time.elapsed();
        info!(
            "Design complete: {} strata over {} units in {:.2?}",
            design.strata().len(),
            design.assigned_units(),
            elapsed
        );

        Ok(MatchingResult {
            design,
            matching_time: elapsed,
        })
    }

    /// Assess covariate balance of a design built from `catalog`
    pub fn assess_balance(
        catalog: &UnitCatalog,
        design: &MatchedDesign,
        config: &BalanceConfig,
    ) -> Result<BalanceReport> {
        StrataEvaluator::new(config.clone()).evaluate(catalog, design)
    }

    /// Resolve configured calipers and exact matches into constraints
    fn constraints(&self, catalog: &UnitCatalog, base: &DistanceMatrix) -> Result<Vec<Constraint>> {
        let mut constraints = Vec::with_capacity(
            self.config.calipers.len() + self.config.exact_match.len(),
        );

        for caliper in &self.config.calipers {
            let distances = match &caliper.source {
                Some(source) => DistanceMatrixBuilder::build(catalog, source)?,
                None => base.clone(),
            };
            constraints.push(Constraint::caliper(distances, caliper.threshold));
        }

        for covariate in &self.config.exact_match {
            // Unknown names fail here rather than inside a block
            catalog.covariate_index(covariate)?;
            constraints.push(Constraint::exact_match(covariate.clone()));
        }

        Ok(constraints)
    }
}
