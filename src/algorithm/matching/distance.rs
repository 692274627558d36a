//! Treated×comparison distance matrices
//!
//! This module provides the dense distance matrix consumed by the
//! constraint applier and the solver, and the stateless builder turning
//! catalog covariates (or an external propensity score) into distances.

use crate::config::{DistanceMetric, DistanceSpec};
use crate::error::{MatchError, Result};
use crate::models::unit::UnitCatalog;
use itertools::Itertools;
use log::debug;
use nalgebra::{Cholesky, DMatrix};
use std::time::Instant;

/// Rank variance at or below this marks a constant covariate
const ZERO_VARIANCE: f64 = 1e-12;

/// Squared Cholesky pivots below this share of the rank variance mark a
/// rank-deficient covariance
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Distances between every treated and every comparison unit
///
/// Rows are treated units and columns comparison units, both in unit-id
/// order. Forbidden pairs hold [`DistanceMatrix::FORBIDDEN`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    treated: Vec<usize>,
    controls: Vec<usize>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Sentinel for pairs that may not share a stratum
    pub const FORBIDDEN: f64 = f64::INFINITY;

    /// Build a matrix by evaluating `distance` on catalog positions
    pub fn from_fn<F>(treated: Vec<usize>, controls: Vec<usize>, mut distance: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut values = Vec::with_capacity(treated.len() * controls.len());
        for &t in &treated {
            for &c in &controls {
                values.push(distance(t, c));
            }
        }
        Self {
            treated,
            controls,
            values,
        }
    }

    /// Catalog positions of the treated units (rows)
    #[must_use]
    pub fn treated(&self) -> &[usize] {
        &self.treated
    }

    /// Catalog positions of the comparison units (columns)
    #[must_use]
    pub fn controls(&self) -> &[usize] {
        &self.controls
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.treated.len()
    }

    /// Number of columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.controls.len()
    }

    /// Distance between row `row` and column `col`
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.controls.len() + col]
    }

    /// All distances of one treated unit
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.controls.len();
        &self.values[row * width..(row + 1) * width]
    }

    /// Whether a pair is forbidden
    #[must_use]
    pub fn is_forbidden(&self, row: usize, col: usize) -> bool {
        !self.get(row, col).is_finite()
    }

    /// Number of pairs that are not forbidden
    #[must_use]
    pub fn feasible_pairs(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Whether `other` covers the same treated and comparison units
    #[must_use]
    pub fn same_units(&self, other: &Self) -> bool {
        self.treated == other.treated && self.controls == other.controls
    }

    /// Shape description used in error messages
    #[must_use]
    pub fn shape(&self) -> String {
        format!("{}x{}", self.rows(), self.cols())
    }

    pub(crate) fn forbid(&mut self, row: usize, col: usize) {
        let width = self.controls.len();
        self.values[row * width + col] = Self::FORBIDDEN;
    }

    /// Restrict to the given row and column indices
    #[must_use]
    pub fn submatrix(&self, rows: &[usize], cols: &[usize]) -> Self {
        let mut values = Vec::with_capacity(rows.len() * cols.len());
        for &r in rows {
            for &c in cols {
                values.push(self.get(r, c));
            }
        }
        Self {
            treated: rows.iter().map(|&r| self.treated[r]).collect(),
            controls: cols.iter().map(|&c| self.controls[c]).collect(),
            values,
        }
    }
}

/// Stateless builder of distance matrices
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMatrixBuilder;

impl DistanceMatrixBuilder {
    /// Build the distance matrix described by `spec` over `catalog`
    pub fn build(catalog: &UnitCatalog, spec: &DistanceSpec) -> Result<DistanceMatrix> {
        let start = Instant::now();
        let matrix = match spec.metric {
            DistanceMetric::Absolute => Self::absolute(catalog, &spec.covariates)?,
            DistanceMetric::RankMahalanobis => Self::rank_mahalanobis(catalog, &spec.covariates)?,
            DistanceMetric::Propensity => Self::propensity(catalog, spec)?,
        };

        debug!(
            "Built {:?} distance matrix {} ({} feasible pairs) in {:.2?}",
            spec.metric,
            matrix.shape(),
            matrix.feasible_pairs(),
            start.elapsed()
        );

        Ok(matrix)
    }

    /// `|x_a - x_b|` on a single covariate
    fn absolute(catalog: &UnitCatalog, covariates: &[String]) -> Result<DistanceMatrix> {
        let covariate = match covariates {
            [] => return Err(MatchError::EmptyCovariateSet),
            [single] => single,
            _ => {
                return Err(MatchError::InvalidConfig(format!(
                    "absolute distance takes a single covariate, got [{}]",
                    covariates.join(", ")
                )));
            }
        };

        let values = catalog.numeric_column(covariate)?;
        Ok(DistanceMatrix::from_fn(
            catalog.treated_positions(),
            catalog.control_positions(),
            |t, c| (values[t] - values[c]).abs(),
        ))
    }

    /// Mahalanobis distance between rank-transformed covariate vectors
    fn rank_mahalanobis(catalog: &UnitCatalog, covariates: &[String]) -> Result<DistanceMatrix> {
        if covariates.is_empty() {
            return Err(MatchError::EmptyCovariateSet);
        }

        let n = catalog.len();
        let ranks: Vec<Vec<f64>> = covariates
            .iter()
            .map(|name| catalog.numeric_column(name).map(|col| average_ranks(&col)))
            .collect::<Result<_>>()?;

        if n < 2 {
            return Err(MatchError::SingularCovariance {
                covariates: covariates.to_vec(),
            });
        }

        let covariance = covariance_matrix(&ranks);

        let constant: Vec<String> = covariates
            .iter()
            .enumerate()
            .filter(|(k, _)| covariance[(*k, *k)] <= ZERO_VARIANCE)
            .map(|(_, name)| name.clone())
            .collect();
        if !constant.is_empty() {
            return Err(MatchError::SingularCovariance {
                covariates: constant,
            });
        }

        // Rescale so every column carries the variance of untied ranks 1..n
        let n_f = n as f64;
        let untied_variance = n_f * (n_f + 1.0) / 12.0;
        let ratios = covariance
            .diagonal()
            .map(|variance| (untied_variance / variance).sqrt());
        let scaled = DMatrix::from_fn(covariates.len(), covariates.len(), |k, l| {
            ratios[k] * covariance[(k, l)] * ratios[l]
        });

        // Whitening by the Cholesky factor turns the quadratic form into a
        // Euclidean norm: (a - b)ᵀ Σ⁻¹ (a - b) = |L⁻¹a - L⁻¹b|²
        let singular = || MatchError::SingularCovariance {
            covariates: covariates.to_vec(),
        };
        let factor = Cholesky::new(scaled).ok_or_else(singular)?;
        let lower = factor.l();
        if lower
            .diagonal()
            .iter()
            .any(|pivot| pivot * pivot <= PIVOT_TOLERANCE * untied_variance)
        {
            return Err(singular());
        }
        let rank_matrix = DMatrix::from_fn(covariates.len(), n, |k, i| ranks[k][i]);
        let whitened = lower
            .solve_lower_triangular(&rank_matrix)
            .ok_or_else(singular)?;

        Ok(DistanceMatrix::from_fn(
            catalog.treated_positions(),
            catalog.control_positions(),
            |t, c| {
                whitened
                    .column(t)
                    .iter()
                    .zip(whitened.column(c).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            },
        ))
    }

    /// Absolute score difference over the pooled within-group score SD
    fn propensity(catalog: &UnitCatalog, spec: &DistanceSpec) -> Result<DistanceMatrix> {
        let scores = spec.scores.as_ref().ok_or_else(|| {
            MatchError::InvalidConfig("propensity distance requires scores".to_string())
        })?;

        let values: Vec<f64> = catalog
            .units()
            .iter()
            .map(|unit| {
                let score = *scores
                    .get(unit.id())
                    .ok_or_else(|| MatchError::MissingScore(unit.id().to_string()))?;
                if score.is_finite() {
                    Ok(score)
                } else {
                    Err(MatchError::InvalidScore(unit.id().to_string()))
                }
            })
            .collect::<Result<_>>()?;

        let treated = catalog.treated_positions();
        let controls = catalog.control_positions();

        let (n_t, var_t) = sample_variance(treated.iter().map(|&i| values[i]));
        let (n_c, var_c) = sample_variance(controls.iter().map(|&i| values[i]));
        let dof = (n_t + n_c).saturating_sub(2);
        if dof == 0 {
            return Err(MatchError::DegenerateScore);
        }

        let pooled_sd = ((n_t.saturating_sub(1) as f64).mul_add(
            var_t,
            n_c.saturating_sub(1) as f64 * var_c,
        ) / dof as f64)
            .sqrt();
        if !(pooled_sd.is_finite() && pooled_sd > 0.0) {
            return Err(MatchError::DegenerateScore);
        }

        Ok(DistanceMatrix::from_fn(treated, controls, |t, c| {
            (values[t] - values[c]).abs() / pooled_sd
        }))
    }
}

/// Ranks 1..n with ties receiving the average of their positions
#[must_use]
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let order = (0..values.len())
        .sorted_by(|&a, &b| values[a].total_cmp(&values[b]))
        .collect_vec();

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end are tied; 1-based average rank
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

/// Sample covariance (n - 1 denominator) between columns
fn covariance_matrix(columns: &[Vec<f64>]) -> DMatrix<f64> {
    let n = columns.first().map_or(0, Vec::len) as f64;
    let means: Vec<f64> = columns.iter().map(|c| c.iter().sum::<f64>() / n).collect();

    DMatrix::from_fn(columns.len(), columns.len(), |k, l| {
        columns[k]
            .iter()
            .zip(&columns[l])
            .map(|(a, b)| (a - means[k]) * (b - means[l]))
            .sum::<f64>()
            / (n - 1.0)
    })
}

/// Count and sample variance of an iterator of values
fn sample_variance(values: impl Iterator<Item = f64>) -> (usize, f64) {
    let values: Vec<f64> = values.collect();
    let n = values.len();
    if n < 2 {
        return (n, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (n, variance)
}
