//! Sequential block solving
//!
//! Solves the blocks of a constrained distance one after the other on the
//! calling thread. Used for unblocked designs and single-threaded runs.

use super::constraints::ConstrainedDistance;
use super::solver::{OptimalMatchSolver, merge_block_results};
use super::types::BlockSolution;
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use crate::utils::logging::progress;
use log::info;
use std::sync::atomic::Ordering;

/// Solve every block in order on the current thread
pub fn solve_blocks_sequential(
    solver: &OptimalMatchSolver,
    catalog: &UnitCatalog,
    constrained: &ConstrainedDistance,
) -> Result<Vec<BlockSolution>> {
    let blocks = constrained.blocks();
    info!("Using sequential processing for {} blocks", blocks.len());

    let pb = progress::create_block_progress_bar(
        blocks.len() as u64,
        Some("Solving blocks"),
        solver.show_progress(),
    );

    let mut results = Vec::with_capacity(blocks.len());
    for (completed, block) in blocks.iter().enumerate() {
        if solver
            .cancel_flag()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            progress::finish_and_clear(&pb);
            return Err(MatchError::Cancelled {
                completed_blocks: completed,
            });
        }

        let matrix = constrained.block_matrix(block);
        let result = solver.solve_block(catalog, &matrix, block.key());
        pb.inc(1);

        // Keep going past infeasible blocks so every short unit is reported
        let fatal = matches!(&result, Err(e) if !matches!(e, MatchError::Infeasible { .. }));
        results.push(result);
        if fatal {
            break;
        }
    }

    progress::finish_progress_bar(&pb, Some("Blocks solved"));
    merge_block_results(results)
}
