//! Optimal matching by reduction to minimum-cost flow
//!
//! Each block becomes a bipartite network:
//!
//! ```text
//! source ──[min, -bonus]──▶ treated ──[1, d(t,c)]──▶ comparison ──[1, 0]──▶ sink
//!        ──[max-min, 0]───▶
//! ```
//!
//! When `min < max` the bonus edges carry each treated unit's required
//! comparison count at a large negative cost, so a minimum-cost maximum
//! flow saturates every lower bound whenever some flow can. Among those
//! flows it minimises the total matched distance. With `min == max` a
//! single zero-cost edge suffices. Forbidden pairs have no edge.

use super::constraints::ConstrainedDistance;
use super::distance::DistanceMatrix;
use super::flow::FlowNetwork;
use super::parallel::solve_blocks_parallel;
use super::sequential::solve_blocks_sequential;
use super::types::{BlockSolution, MatchedDesign, Stratum, StratumId};
use crate::config::{DesignConfig, MatchMode};
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// Solver turning a constrained distance into a matched design
#[derive(Debug, Clone)]
pub struct OptimalMatchSolver {
    mode: MatchMode,
    allow_exclusions: bool,
    tolerance: f64,
    use_parallel: bool,
    num_threads: usize,
    show_progress: bool,
    cancel: Option<Arc<AtomicBool>>,
}

/// Flow outcome for the active rows of one block
struct FlowAssignment {
    /// Matched column indices per active row
    matched: Vec<SmallVec<[usize; 4]>>,
    augmentations: usize,
}

impl OptimalMatchSolver {
    /// Create a sequential solver for the given mode
    #[must_use]
    pub const fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            allow_exclusions: false,
            tolerance: 1e-9,
            use_parallel: false,
            num_threads: 1,
            show_progress: false,
            cancel: None,
        }
    }

    /// Create a solver from a design configuration
    #[must_use]
    pub fn from_config(config: &DesignConfig) -> Self {
        Self {
            mode: config.mode,
            allow_exclusions: config.allow_exclusions,
            tolerance: config.tolerance,
            use_parallel: config.use_parallel,
            num_threads: config.effective_threads(),
            show_progress: config.show_progress,
            cancel: None,
        }
    }

    /// Permit excluding treated units that cannot be placed
    #[must_use]
    pub const fn with_exclusions(mut self, allow: bool) -> Self {
        self.allow_exclusions = allow;
        self
    }

    /// Set the tie tolerance for path costs
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Solve blocks on `threads` worker threads
    #[must_use]
    pub const fn with_parallelism(mut self, threads: usize) -> Self {
        self.use_parallel = true;
        self.num_threads = threads;
        self
    }

    /// Abandon the solve between blocks once `flag` is set
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Matching mode
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    pub(crate) fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancel.as_deref()
    }

    pub(crate) const fn show_progress(&self) -> bool {
        self.show_progress
    }

    /// Solve every block of `constrained` and merge the results
    pub fn solve(
        &self,
        catalog: &UnitCatalog,
        constrained: &ConstrainedDistance,
    ) -> Result<MatchedDesign> {
        let start = Instant::now();
        let blocks = constrained.blocks();

        let solutions = if self.use_parallel && self.num_threads > 1 && blocks.len() > 1 {
            info!(
                "Solving {} blocks in parallel on {} threads",
                blocks.len(),
                self.num_threads
            );
            solve_blocks_parallel(self, catalog, constrained, self.num_threads)?
        } else {
            solve_blocks_sequential(self, catalog, constrained)?
        };

        let design = MatchedDesign::from_blocks(solutions);

        info!(
            "Matching complete: {} strata, {} excluded units, objective {:.6} in {:.2?}",
            design.strata().len(),
            design.excluded().len(),
            design.objective(),
            start.elapsed()
        );

        Ok(design)
    }

    /// Solve a single block's distance matrix
    pub fn solve_block(
        &self,
        catalog: &UnitCatalog,
        matrix: &DistanceMatrix,
        block: Option<&str>,
    ) -> Result<BlockSolution> {
        let (min_controls, max_controls) = self.mode.bounds();
        if min_controls == 0 || max_controls < min_controls {
            return Err(MatchError::InvalidConfig(format!(
                "invalid comparison bounds [{min_controls}, {max_controls}]"
            )));
        }

        let mut active: Vec<usize> = (0..matrix.rows()).collect();
        let mut dropped: Vec<usize> = Vec::new();

        let assignment = loop {
            let assignment = self.run_flow(matrix, &active, min_controls, max_controls);
            let short: Vec<usize> = active
                .iter()
                .zip(&assignment.matched)
                .filter(|(_, cols)| cols.len() < min_controls)
                .map(|(&row, _)| row)
                .collect();

            if short.is_empty() {
                break assignment;
            }

            let ids: Vec<String> = short
                .iter()
                .map(|&row| catalog.unit(matrix.treated()[row]).id().to_string())
                .collect();
            if !self.allow_exclusions {
                return Err(MatchError::Infeasible { units: ids });
            }

            warn!(
                "Excluding {} treated units without an admissible stratum{}: {}",
                ids.len(),
                block.map(|b| format!(" in block {b}")).unwrap_or_default(),
                ids.join(", ")
            );
            dropped.extend(short.iter().copied());
            let short: FxHashSet<usize> = short.into_iter().collect();
            active.retain(|row| !short.contains(row));
        };

        let mut used = vec![false; matrix.cols()];
        let mut strata = Vec::with_capacity(active.len());
        for (index, (&row, cols)) in active.iter().zip(&assignment.matched).enumerate() {
            let mut distance = 0.0;
            let mut controls = Vec::with_capacity(cols.len());
            for &col in cols {
                used[col] = true;
                distance += matrix.get(row, col);
                controls.push(catalog.unit(matrix.controls()[col]).id().to_string());
            }
            strata.push(Stratum {
                id: StratumId::new(block, index + 1),
                treated: vec![catalog.unit(matrix.treated()[row]).id().to_string()],
                controls,
                distance,
            });
        }

        let mut excluded: Vec<String> = dropped
            .iter()
            .map(|&row| catalog.unit(matrix.treated()[row]).id().to_string())
            .collect();
        excluded.extend(
            used.iter()
                .enumerate()
                .filter(|(_, used)| !**used)
                .map(|(col, _)| catalog.unit(matrix.controls()[col]).id().to_string()),
        );

        debug!(
            "Block {}: {} strata, {} excluded, {} augmenting paths",
            block.unwrap_or("<all>"),
            strata.len(),
            excluded.len(),
            assignment.augmentations
        );

        Ok(BlockSolution { strata, excluded })
    }

    /// Build and solve the flow network over the active rows
    fn run_flow(
        &self,
        matrix: &DistanceMatrix,
        active: &[usize],
        min_controls: usize,
        max_controls: usize,
    ) -> FlowAssignment {
        let rows = active.len();
        let cols = matrix.cols();
        let source = 0;
        let sink = rows + cols + 1;
        let col_node = |col: usize| rows + 1 + col;

        // Any two maximum flows differ in distance by less than `bonus`
        let largest = active
            .iter()
            .flat_map(|&row| matrix.row(row).iter())
            .filter(|d| d.is_finite())
            .fold(0.0_f64, |acc, &d| acc.max(d));
        let flow_bound = cols.min(rows.saturating_mul(max_controls));
        let bonus = (flow_bound as f64 + 1.0) * (largest + 1.0);

        let mut network = FlowNetwork::new(rows + cols + 2, self.tolerance);
        let mut pair_edges: Vec<Vec<(usize, usize)>> = Vec::with_capacity(rows);

        for (i, &row) in active.iter().enumerate() {
            if max_controls > min_controls {
                network.add_edge(source, i + 1, min_controls, -bonus);
                network.add_edge(source, i + 1, max_controls - min_controls, 0.0);
            } else {
                // Uniform bonus would not change which maximum flow is cheapest
                network.add_edge(source, i + 1, min_controls, 0.0);
            }

            let edges = matrix
                .row(row)
                .iter()
                .enumerate()
                .filter(|(_, d)| d.is_finite())
                .map(|(col, &d)| (col, network.add_edge(i + 1, col_node(col), 1, d)))
                .collect();
            pair_edges.push(edges);
        }
        for col in 0..cols {
            network.add_edge(col_node(col), sink, 1, 0.0);
        }

        let summary = network.min_cost_max_flow(source, sink);

        let matched = pair_edges
            .iter()
            .map(|edges| {
                edges
                    .iter()
                    .filter(|&&(_, edge)| network.flow(edge) > 0)
                    .map(|&(col, _)| col)
                    .collect()
            })
            .collect();

        FlowAssignment {
            matched,
            augmentations: summary.augmentations,
        }
    }
}

/// Merge per-block results in block order
///
/// Infeasible blocks do not stop the merge: their unit ids are concatenated
/// into a single `Infeasible` error. Any other error is returned as is.
pub(crate) fn merge_block_results(
    results: impl IntoIterator<Item = Result<BlockSolution>>,
) -> Result<Vec<BlockSolution>> {
    let mut solutions = Vec::new();
    let mut infeasible: Vec<String> = Vec::new();

    for result in results {
        match result {
            Ok(solution) => solutions.push(solution),
            Err(MatchError::Infeasible { units }) => infeasible.extend(units),
            Err(other) => return Err(other),
        }
    }

    if infeasible.is_empty() {
        Ok(solutions)
    } else {
        Err(MatchError::Infeasible { units: infeasible })
    }
}
