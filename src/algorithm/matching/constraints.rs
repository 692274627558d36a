//! Caliper and exact-match constraints
//!
//! Constraints fold left to right into one forbidding mask over a base
//! distance matrix. A pair forbidden by any constraint is forbidden
//! overall, so the order in which constraints are listed never changes
//! the result. Exact-match constraints also split the problem into
//! independent blocks, one per blocking key.

use super::distance::DistanceMatrix;
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use itertools::Itertools;
use log::{debug, info};
use std::collections::BTreeMap;

/// Separator between covariate values in a composite block label
pub const KEY_SEPARATOR: char = '/';

/// Escape prefix for separators occurring inside a covariate value
const KEY_ESCAPE: char = '\\';

/// A structural restriction on which units may share a stratum
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Forbid pairs whose distance on `distances` exceeds `threshold`
    Caliper {
        /// Distance the threshold is applied to
        distances: DistanceMatrix,
        /// Largest admissible distance
        threshold: f64,
    },
    /// Forbid pairs whose values on `covariate` differ
    ExactMatch {
        /// Blocking covariate
        covariate: String,
    },
}

impl Constraint {
    /// Caliper on a distance matrix
    #[must_use]
    pub const fn caliper(distances: DistanceMatrix, threshold: f64) -> Self {
        Self::Caliper {
            distances,
            threshold,
        }
    }

    /// Exact matching on a covariate
    #[must_use]
    pub fn exact_match(covariate: impl Into<String>) -> Self {
        Self::ExactMatch {
            covariate: covariate.into(),
        }
    }
}

/// An independent sub-problem: rows and columns sharing one blocking key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    key: Option<String>,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl Block {
    /// Blocking key, `None` when no exact matching is active
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Row indices (treated units) of the constrained matrix in this block
    #[must_use]
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Column indices (comparison units) of the constrained matrix in this block
    #[must_use]
    pub fn cols(&self) -> &[usize] {
        &self.cols
    }
}

/// A constrained distance matrix and its partition into blocks
#[derive(Debug, Clone)]
pub struct ConstrainedDistance {
    matrix: DistanceMatrix,
    blocks: Vec<Block>,
}

impl ConstrainedDistance {
    /// Matrix with forbidden pairs set to the sentinel
    #[must_use]
    pub fn matrix(&self) -> &DistanceMatrix {
        &self.matrix
    }

    /// Independent blocks, ordered by key
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Distance sub-matrix of one block
    #[must_use]
    pub fn block_matrix(&self, block: &Block) -> DistanceMatrix {
        self.matrix.submatrix(&block.rows, &block.cols)
    }
}

/// Applies constraints to a base distance matrix
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintApplier;

impl ConstraintApplier {
    /// Apply `constraints` to `base`, leaving `base` untouched
    pub fn apply(
        catalog: &UnitCatalog,
        base: &DistanceMatrix,
        constraints: &[Constraint],
    ) -> Result<ConstrainedDistance> {
        let mut matrix = base.clone();
        let mut exact_covariates = Vec::new();

        for constraint in constraints {
            match constraint {
                Constraint::Caliper {
                    distances,
                    threshold,
                } => Self::apply_caliper(&mut matrix, distances, *threshold)?,
                Constraint::ExactMatch { covariate } => exact_covariates.push(covariate.as_str()),
            }
        }

        // Canonical key order keeps the block labels independent of listing order
        let exact_covariates = exact_covariates
            .into_iter()
            .sorted()
            .dedup()
            .collect_vec();

        let blocks = if exact_covariates.is_empty() {
            vec![Block {
                key: None,
                rows: (0..matrix.rows()).collect(),
                cols: (0..matrix.cols()).collect(),
            }]
        } else {
            Self::apply_exact_match(catalog, &mut matrix, &exact_covariates)?
        };

        info!(
            "Applied {} constraints: {} of {} pairs remain feasible across {} blocks",
            constraints.len(),
            matrix.feasible_pairs(),
            matrix.rows() * matrix.cols(),
            blocks.len()
        );

        Ok(ConstrainedDistance { matrix, blocks })
    }

    fn apply_caliper(
        matrix: &mut DistanceMatrix,
        distances: &DistanceMatrix,
        threshold: f64,
    ) -> Result<()> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "caliper threshold must be non-negative, got {threshold}"
            )));
        }
        if !matrix.same_units(distances) {
            return Err(MatchError::DimensionMismatch {
                expected: matrix.shape(),
                found: distances.shape(),
            });
        }

        let mut forbidden = 0;
        for row in 0..matrix.rows() {
            for col in 0..matrix.cols() {
                if distances.get(row, col) > threshold && !matrix.is_forbidden(row, col) {
                    matrix.forbid(row, col);
                    forbidden += 1;
                }
            }
        }
        debug!("Caliper {threshold} forbade {forbidden} additional pairs");
        Ok(())
    }

    fn apply_exact_match(
        catalog: &UnitCatalog,
        matrix: &mut DistanceMatrix,
        covariates: &[&str],
    ) -> Result<Vec<Block>> {
        let columns: Vec<Vec<String>> = covariates
            .iter()
            .map(|name| catalog.key_column(name))
            .collect::<Result<_>>()?;
        // Keys compare level by level; only the label is joined
        let key_of = |pos: usize| columns.iter().map(|c| c[pos].as_str()).collect_vec();

        let row_keys = matrix.treated().iter().map(|&p| key_of(p)).collect_vec();
        let col_keys = matrix.controls().iter().map(|&p| key_of(p)).collect_vec();

        for (row, row_key) in row_keys.iter().enumerate() {
            for (col, col_key) in col_keys.iter().enumerate() {
                if row_key != col_key {
                    matrix.forbid(row, col);
                }
            }
        }

        let mut grouped: BTreeMap<&[&str], (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (row, key) in row_keys.iter().enumerate() {
            grouped.entry(key.as_slice()).or_default().0.push(row);
        }
        for (col, key) in col_keys.iter().enumerate() {
            grouped.entry(key.as_slice()).or_default().1.push(col);
        }

        if let Some((key, (rows, cols))) = grouped
            .iter()
            .find(|(_, (rows, cols))| rows.is_empty() || cols.is_empty())
        {
            return Err(MatchError::EmptyBlock {
                key: key_label(key),
                treated: rows.len(),
                controls: cols.len(),
            });
        }

        Ok(grouped
            .into_iter()
            .map(|(key, (rows, cols))| Block {
                key: Some(key_label(key)),
                rows,
                cols,
            })
            .collect())
    }
}

/// Label of a composite key, levels joined by [`KEY_SEPARATOR`]
///
/// Separators and escapes inside a level are escaped, so distinct keys
/// always get distinct labels.
#[must_use]
pub fn key_label(levels: &[&str]) -> String {
    levels
        .iter()
        .map(|level| {
            level
                .chars()
                .flat_map(|ch| {
                    let escaped = ch == KEY_SEPARATOR || ch == KEY_ESCAPE;
                    escaped.then_some(KEY_ESCAPE).into_iter().chain([ch])
                })
                .collect::<String>()
        })
        .join(&KEY_SEPARATOR.to_string())
}
