//! Balance assessment for matched designs
//!
//! This module compares treated and comparison covariate values within
//! strata against what within-stratum randomisation would produce.
//!
//! For a covariate `x` and stratum `s` with `nT` treated and `nC`
//! comparison units, the stratum difference `mean_T - mean_C` is combined
//! across strata with weights `w_s` (by default `2·nT·nC/(nT+nC)`). Under
//! the stratified-randomisation null each stratum is a finite population
//! from which `nT` units are drawn as treated, so
//! `Var(mean_T - mean_C) = S²_s · (nT + nC)/(nT·nC)` with `S²_s` the
//! within-stratum variance. The per-covariate statistics are combined into
//! one χ² quadratic form through the pseudo-inverse of their null
//! covariance.

use super::types::{MatchedDesign, escape_csv};
use crate::config::{BalanceConfig, StratumWeighting};
use crate::error::{MatchError, Result};
use crate::models::unit::{CovariateKind, CovariateValue, UnitCatalog};
use itertools::Itertools;
use log::info;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::erf::erfc;
use std::collections::BTreeSet;
use std::f64::consts::SQRT_2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Balance of a single covariate (or categorical level)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceMetric {
    /// Covariate name, `name=level` for categorical indicators
    pub name: String,

    /// Whether this is an indicator of a categorical level
    pub categorical: bool,

    /// Stratum-weighted treated mean
    pub treated_mean: f64,

    /// Stratum-weighted comparison mean
    pub control_mean: f64,

    /// Stratum-weighted treated minus comparison difference
    pub adjusted_difference: f64,

    /// Null standard deviation of the adjusted difference
    pub std_error: f64,

    /// `adjusted_difference / std_error`
    pub z: f64,

    /// Two-sided normal p-value
    pub p_value: f64,

    /// Holm step-down adjusted p-value
    pub adjusted_p_value: f64,

    /// Adjusted difference over the pooled treated/comparison SD
    pub standardized_difference: f64,
}

/// Multi-covariate summary statistic
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallBalance {
    /// `dᵀ V⁺ d` over the adjusted differences
    pub chi_square: f64,
    /// Rank of the null covariance
    pub degrees_of_freedom: usize,
    /// Upper-tail χ² probability
    pub p_value: f64,
}

/// Report on covariate balance within a matched design
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    /// Balance metrics for each covariate
    pub metrics: Vec<BalanceMetric>,

    /// Overall statistic
    pub overall: OverallBalance,

    /// Strata with both treated and comparison units
    pub informative_strata: usize,

    /// Units in informative strata
    pub units: usize,

    /// Weighting used to combine strata
    pub weighting: StratumWeighting,

    /// Level at which adjusted p-values are flagged
    pub alpha: f64,
}

impl BalanceReport {
    /// Metric for a covariate by name
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&BalanceMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Covariates whose adjusted p-value falls below `alpha`
    #[must_use]
    pub fn imbalanced(&self) -> Vec<&BalanceMetric> {
        self.metrics
            .iter()
            .filter(|m| m.adjusted_p_value < self.alpha)
            .collect()
    }

    /// Generate a string representation of the report
    #[must_use]
    pub fn to_string_representation(&self) -> String {
        let mut output = format!(
            "Balance Summary:\n\
             - Informative strata: {}\n\
             - Units: {}\n\
             - Weighting: {:?}\n\
             - Overall χ² = {:.4} on {} df, p = {:.4}\n\
             - Imbalanced covariates (adjusted p < {}): {}\n\n",
            self.informative_strata,
            self.units,
            self.weighting,
            self.overall.chi_square,
            self.overall.degrees_of_freedom,
            self.overall.p_value,
            self.alpha,
            self.imbalanced().len()
        );

        output.push_str(
            "Covariate                      | Treated   | Control   | Adj Diff  | Std Err  | z        | Adj p    | Std Diff\n\
             -------------------------------|-----------|-----------|-----------|----------|----------|----------|---------\n",
        );

        for metric in &self.metrics {
            output.push_str(&format!(
                "{:<30} | {:>9.4} | {:>9.4} | {:>9.4} | {:>8.4} | {:>8.4} | {:>8.4} | {:>8.4}\n",
                truncate_string(&metric.name, 30),
                metric.treated_mean,
                metric.control_mean,
                metric.adjusted_difference,
                metric.std_error,
                metric.z,
                metric.adjusted_p_value,
                metric.standardized_difference
            ));
        }

        output
    }

    /// Write the report to a CSV file
    pub fn write_to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        writeln!(
            writer,
            "Covariate,Treated Mean,Control Mean,Adj Diff,Std Err,z,p,Adj p,Std Diff"
        )?;
        for metric in &self.metrics {
            writeln!(
                writer,
                "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
                escape_csv(&metric.name),
                metric.treated_mean,
                metric.control_mean,
                metric.adjusted_difference,
                metric.std_error,
                metric.z,
                metric.p_value,
                metric.adjusted_p_value,
                metric.standardized_difference
            )?;
        }

        writeln!(writer)?;
        writeln!(writer, "Overall chi-square,{:.6}", self.overall.chi_square)?;
        writeln!(writer, "Degrees of freedom,{}", self.overall.degrees_of_freedom)?;
        writeln!(writer, "Overall p,{:.6}", self.overall.p_value)?;
        writer.flush()?;

        Ok(())
    }
}

/// One analysed column: a numeric covariate or a categorical level indicator
struct Column {
    name: String,
    categorical: bool,
    values: Vec<f64>,
}

/// A stratum resolved to catalog positions
struct ResolvedStratum {
    treated: Vec<usize>,
    controls: Vec<usize>,
    weight: f64,
}

impl ResolvedStratum {
    fn size(&self) -> usize {
        self.treated.len() + self.controls.len()
    }

    fn members(&self) -> impl Iterator<Item = usize> + '_ {
        self.treated.iter().chain(&self.controls).copied()
    }
}

/// Evaluator of covariate balance for matched designs
#[derive(Debug, Clone, Default)]
pub struct StrataEvaluator {
    config: BalanceConfig,
}

impl StrataEvaluator {
    /// Create an evaluator
    #[must_use]
    pub const fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    /// Assess balance of `design` on the configured covariates
    pub fn evaluate(&self, catalog: &UnitCatalog, design: &MatchedDesign) -> Result<BalanceReport> {
        if design.assigned_units() == 0 {
            return Err(MatchError::EmptyDesign);
        }

        let strata = self.resolve_strata(catalog, design)?;
        if strata.is_empty() {
            return Err(MatchError::DegenerateStratification);
        }

        let columns = self.columns(catalog, &strata)?;
        let total_weight: f64 = strata.iter().map(|s| s.weight).sum();

        let k = columns.len();
        let mut treated_means = vec![0.0; k];
        let mut control_means = vec![0.0; k];
        let mut covariance = DMatrix::<f64>::zeros(k, k);

        for stratum in &strata {
            let n_t = stratum.treated.len() as f64;
            let n_c = stratum.controls.len() as f64;
            let n = n_t + n_c;
            let w = stratum.weight / total_weight;

            let centered: Vec<Vec<f64>> = columns
                .iter()
                .enumerate()
                .map(|(j, column)| {
                    let mean_t = stratum.treated.iter().map(|&i| column.values[i]).sum::<f64>() / n_t;
                    let mean_c = stratum.controls.iter().map(|&i| column.values[i]).sum::<f64>() / n_c;
                    treated_means[j] += w * mean_t;
                    control_means[j] += w * mean_c;

                    let mean = stratum.members().map(|i| column.values[i]).sum::<f64>() / n;
                    stratum.members().map(|i| column.values[i] - mean).collect()
                })
                .collect();

            // w² · (1/nT + 1/nC) · S_jl with S the within-stratum covariance
            let factor = w * w * n / (n_t * n_c) / (n - 1.0);
            for a in 0..k {
                for b in a..k {
                    let s_ab: f64 = centered[a].iter().zip(&centered[b]).map(|(x, y)| x * y).sum();
                    covariance[(a, b)] += factor * s_ab;
                    if a != b {
                        covariance[(b, a)] += factor * s_ab;
                    }
                }
            }
        }

        let differences: Vec<f64> = treated_means
            .iter()
            .zip(&control_means)
            .map(|(t, c)| t - c)
            .collect();

        let p_values: Vec<f64> = (0..k)
            .map(|j| {
                let se = covariance[(j, j)].max(0.0).sqrt();
                if se > 0.0 {
                    erfc((differences[j] / se).abs() / SQRT_2)
                } else {
                    1.0
                }
            })
            .collect();
        let adjusted = holm_adjust(&p_values);

        let metrics = columns
            .iter()
            .enumerate()
            .map(|(j, column)| {
                let se = covariance[(j, j)].max(0.0).sqrt();
                let pooled_sd = pooled_sd(&column.values, &strata);
                BalanceMetric {
                    name: column.name.clone(),
                    categorical: column.categorical,
                    treated_mean: treated_means[j],
                    control_mean: control_means[j],
                    adjusted_difference: differences[j],
                    std_error: se,
                    z: if se > 0.0 { differences[j] / se } else { 0.0 },
                    p_value: p_values[j],
                    adjusted_p_value: adjusted[j],
                    standardized_difference: if pooled_sd > 0.0 {
                        differences[j] / pooled_sd
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let (chi_square, rank) = pseudo_inverse_form(covariance, &differences);
        let overall = OverallBalance {
            chi_square,
            degrees_of_freedom: rank,
            p_value: chi_square_upper_tail(chi_square, rank),
        };

        let report = BalanceReport {
            metrics,
            overall,
            informative_strata: strata.len(),
            units: strata.iter().map(ResolvedStratum::size).sum(),
            weighting: self.config.weighting,
            alpha: self.config.alpha,
        };

        info!(
            "Balance assessment complete: {} of {} covariates imbalanced, overall χ² = {:.4} on {} df (p = {:.4})",
            report.imbalanced().len(),
            report.metrics.len(),
            overall.chi_square,
            overall.degrees_of_freedom,
            overall.p_value
        );

        Ok(report)
    }

    /// Map stratum members to catalog positions and keep informative strata
    fn resolve_strata(
        &self,
        catalog: &UnitCatalog,
        design: &MatchedDesign,
    ) -> Result<Vec<ResolvedStratum>> {
        let position = |id: &String| {
            catalog.position(id).ok_or_else(|| MatchError::SchemaMismatch {
                unit: id.clone(),
                message: "unit is not in the catalog".to_string(),
            })
        };

        let mut resolved = Vec::with_capacity(design.strata().len());
        for stratum in design.strata() {
            let treated = stratum.treated.iter().map(position).collect::<Result<Vec<_>>>()?;
            let controls = stratum.controls.iter().map(position).collect::<Result<Vec<_>>>()?;
            if treated.is_empty() || controls.is_empty() {
                continue;
            }

            let n_t = treated.len() as f64;
            let n_c = controls.len() as f64;
            let weight = match self.config.weighting {
                StratumWeighting::Harmonic => 2.0 * n_t * n_c / (n_t + n_c),
                StratumWeighting::BlockSize => n_t + n_c,
            };
            resolved.push(ResolvedStratum {
                treated,
                controls,
                weight,
            });
        }
        Ok(resolved)
    }

    /// Numeric covariates as-is, categorical covariates as level indicators
    fn columns(&self, catalog: &UnitCatalog, strata: &[ResolvedStratum]) -> Result<Vec<Column>> {
        let names: Vec<String> = if self.config.covariates.is_empty() {
            catalog.schema().iter().map(|c| c.name.clone()).collect()
        } else {
            self.config.covariates.clone()
        };
        if names.is_empty() {
            return Err(MatchError::EmptyCovariateSet);
        }

        let mut columns = Vec::new();
        for name in names {
            match catalog.covariate_kind(&name)? {
                CovariateKind::Numeric => {
                    let values = catalog.numeric_column(&name)?;
                    columns.push(Column {
                        name,
                        categorical: false,
                        values,
                    });
                }
                CovariateKind::Categorical => {
                    let idx = catalog.covariate_index(&name)?;
                    let level_of = |pos: usize| match &catalog.unit(pos).covariates()[idx] {
                        CovariateValue::Categorical(level) => level.as_str(),
                        CovariateValue::Numeric(_) => "",
                    };
                    let levels: BTreeSet<&str> = strata
                        .iter()
                        .flat_map(ResolvedStratum::members)
                        .map(level_of)
                        .collect();
                    for level in levels {
                        let values = (0..catalog.len())
                            .map(|pos| if level_of(pos) == level { 1.0 } else { 0.0 })
                            .collect();
                        columns.push(Column {
                            name: format!("{name}={level}"),
                            categorical: true,
                            values,
                        });
                    }
                }
            }
        }
        Ok(columns)
    }
}

/// Pooled SD `sqrt((s²_T + s²_C) / 2)` over units in informative strata
fn pooled_sd(values: &[f64], strata: &[ResolvedStratum]) -> f64 {
    let treated = strata.iter().flat_map(|s| s.treated.iter()).map(|&i| values[i]).collect_vec();
    let controls = strata.iter().flat_map(|s| s.controls.iter()).map(|&i| values[i]).collect_vec();
    ((sample_variance(&treated) + sample_variance(&controls)) / 2.0).sqrt()
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Holm step-down adjustment, returned in input order
#[must_use]
pub fn holm_adjust(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let order = (0..m)
        .sorted_by(|&a, &b| p_values[a].total_cmp(&p_values[b]))
        .collect_vec();

    let mut adjusted = vec![0.0; m];
    let mut running = 0.0_f64;
    for (rank, &i) in order.iter().enumerate() {
        running = running.max(((m - rank) as f64 * p_values[i]).min(1.0));
        adjusted[i] = running;
    }
    adjusted
}

/// `dᵀ V⁺ d` for a positive semi-definite `V`, with the numerical rank of `V`
///
/// Eigenvalues below `largest · 1e-10 · k` count as zero.
fn pseudo_inverse_form(covariance: DMatrix<f64>, differences: &[f64]) -> (f64, usize) {
    let k = differences.len();
    if k == 0 {
        return (0.0, 0);
    }

    let eigen = SymmetricEigen::new(covariance);
    let largest = eigen.eigenvalues.amax();
    let cutoff = largest * 1e-10 * k as f64;
    let projected = eigen.eigenvectors.tr_mul(&DVector::from_column_slice(differences));

    let (form, rank) = eigen
        .eigenvalues
        .iter()
        .zip(projected.iter())
        .filter(|&(&lambda, _)| lambda > cutoff)
        .fold((0.0, 0), |(form, rank), (lambda, v)| (form + v * v / lambda, rank + 1));
    (form.max(0.0), rank)
}

/// `P(χ²_df > x)`
fn chi_square_upper_tail(x: f64, df: usize) -> f64 {
    if df == 0 {
        return 1.0;
    }
    ChiSquared::new(df as f64).map_or(1.0, |dist| dist.sf(x))
}

/// Truncate a string to a maximum length
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    }
}
