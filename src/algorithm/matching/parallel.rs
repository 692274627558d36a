//! Parallel block solving
//!
//! Exact-match blocks share no units, so each block's flow problem is
//! solved independently on a Rayon worker. Results are collected in block
//! order, which keeps stratum labels and the merged design identical to a
//! sequential run.

use super::constraints::ConstrainedDistance;
use super::solver::{OptimalMatchSolver, merge_block_results};
use super::types::BlockSolution;
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use crate::utils::logging::progress;
use log::{debug, info};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Solve every block on a dedicated pool of `num_threads` workers
pub fn solve_blocks_parallel(
    solver: &OptimalMatchSolver,
    catalog: &UnitCatalog,
    constrained: &ConstrainedDistance,
    num_threads: usize,
) -> Result<Vec<BlockSolution>> {
    let blocks = constrained.blocks();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| MatchError::InvalidConfig(format!("failed to build thread pool: {e}")))?;

    let (mp, main_pb) = progress::create_multi_progress(
        blocks.len() as u64,
        Some("Solving blocks"),
        solver.show_progress(),
    );
    let completed = AtomicUsize::new(0);

    let results: Vec<Result<BlockSolution>> = pool.install(|| {
        blocks
            .par_iter()
            .map(|block| {
                if solver
                    .cancel_flag()
                    .is_some_and(|flag| flag.load(Ordering::Relaxed))
                {
                    return Err(MatchError::Cancelled {
                        completed_blocks: completed.load(Ordering::Relaxed),
                    });
                }

                let block_pb = progress::add_block_progress_bar(
                    &mp,
                    block.rows().len() as u64,
                    block.key(),
                    solver.show_progress(),
                );
                let matrix = constrained.block_matrix(block);
                let solution = solver.solve_block(catalog, &matrix, block.key());

                block_pb.set_position(block.rows().len() as u64);
                progress::finish_and_clear(&block_pb);
                completed.fetch_add(1, Ordering::Relaxed);
                main_pb.inc(1);

                debug!(
                    "Solved block {} on worker {:?}",
                    block.key().unwrap_or("<all>"),
                    rayon::current_thread_index()
                );
                solution
            })
            .collect()
    });

    progress::finish_progress_bar(&main_pb, Some("Blocks solved"));

    let solutions = merge_block_results(results)?;
    info!("Solved {} blocks in parallel", solutions.len());
    Ok(solutions)
}
