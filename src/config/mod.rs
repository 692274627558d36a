//! Configuration for building and assessing matched designs.
//!
//! All options live in explicit immutable structs passed by value into
//! each component; there is no process-wide state.

use crate::error::{MatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric used to turn covariates into treated×comparison distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `|x_a - x_b|` on a single numeric covariate
    Absolute,
    /// Mahalanobis distance on rank-transformed covariates
    #[default]
    RankMahalanobis,
    /// Absolute score difference standardised by the pooled score SD
    Propensity,
}

/// Source of a distance matrix: metric, covariates and optional scores
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistanceSpec {
    /// Metric to apply
    pub metric: DistanceMetric,
    /// Covariate subset the metric is computed on
    #[serde(default)]
    pub covariates: Vec<String>,
    /// Fitted score per unit id, required by the propensity metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
}

impl DistanceSpec {
    /// Absolute difference on one covariate
    #[must_use]
    pub fn absolute(covariate: impl Into<String>) -> Self {
        Self {
            metric: DistanceMetric::Absolute,
            covariates: vec![covariate.into()],
            scores: None,
        }
    }

    /// Rank-based Mahalanobis distance over the given covariates
    #[must_use]
    pub fn rank_mahalanobis<I, S>(covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric: DistanceMetric::RankMahalanobis,
            covariates: covariates.into_iter().map(Into::into).collect(),
            scores: None,
        }
    }

    /// Standardised propensity-score distance
    #[must_use]
    pub fn propensity(scores: BTreeMap<String, f64>) -> Self {
        Self {
            metric: DistanceMetric::Propensity,
            covariates: Vec::new(),
            scores: Some(scores),
        }
    }
}

/// A caliper: pairs further apart than `threshold` on `source` are forbidden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaliperSpec {
    /// Distance the threshold applies to; `None` uses the base distance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DistanceSpec>,
    /// Largest admissible distance
    pub threshold: f64,
}

impl CaliperSpec {
    /// Caliper on the base distance
    #[must_use]
    pub const fn on_base(threshold: f64) -> Self {
        Self {
            source: None,
            threshold,
        }
    }

    /// Caliper on a separately computed distance
    #[must_use]
    pub const fn on(source: DistanceSpec, threshold: f64) -> Self {
        Self {
            source: Some(source),
            threshold,
        }
    }
}

/// Shape of the strata the solver builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchMode {
    /// One treated and one comparison unit per stratum
    #[default]
    Pair,
    /// One treated unit and between `min_controls` and `max_controls` comparison units
    Full {
        /// Fewest comparison units per stratum
        min_controls: usize,
        /// Most comparison units per stratum
        max_controls: usize,
    },
}

impl MatchMode {
    /// Comparison-unit bounds per stratum as `(min, max)`
    #[must_use]
    pub const fn bounds(&self) -> (usize, usize) {
        match *self {
            Self::Pair => (1, 1),
            Self::Full {
                min_controls,
                max_controls,
            } => (min_controls, max_controls),
        }
    }
}

/// Configuration for one design run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Base distance the solver minimises
    pub distance: DistanceSpec,
    /// Calipers forbidding distant pairs
    pub calipers: Vec<CaliperSpec>,
    /// Covariates whose values must agree within a stratum
    pub exact_match: Vec<String>,
    /// Stratum shape
    pub mode: MatchMode,
    /// Whether unsatisfiable treated units are excluded instead of failing
    pub allow_exclusions: bool,
    /// Path costs closer than this are treated as tied
    pub tolerance: f64,
    /// Whether independent blocks are solved in parallel
    pub use_parallel: bool,
    /// Worker threads for parallel block solves
    pub num_threads: Option<usize>,
    /// Whether to render progress bars for multi-block solves
    pub show_progress: bool,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            distance: DistanceSpec::default(),
            calipers: Vec::new(),
            exact_match: Vec::new(),
            mode: MatchMode::Pair,
            allow_exclusions: false,
            tolerance: 1e-9,
            use_parallel: true,
            num_threads: None,
            show_progress: false,
        }
    }
}

impl DesignConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for constructing a design configuration
    #[must_use]
    pub fn builder() -> DesignConfigBuilder {
        DesignConfigBuilder::new()
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Worker threads to use for parallel solves
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if let MatchMode::Full {
            min_controls,
            max_controls,
        } = self.mode
        {
            if min_controls == 0 {
                return Err(MatchError::InvalidConfig(
                    "min_controls must be at least 1".to_string(),
                ));
            }
            if max_controls < min_controls {
                return Err(MatchError::InvalidConfig(format!(
                    "max_controls ({max_controls}) is below min_controls ({min_controls})"
                )));
            }
        }

        for caliper in &self.calipers {
            if caliper.threshold.is_nan() || caliper.threshold < 0.0 {
                return Err(MatchError::InvalidConfig(format!(
                    "caliper threshold must be non-negative, got {}",
                    caliper.threshold
                )));
            }
        }

        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "tolerance must be a finite non-negative number, got {}",
                self.tolerance
            )));
        }

        if self.num_threads == Some(0) {
            return Err(MatchError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Convert to a human-readable string representation
    #[must_use]
    pub fn to_string_representation(&self) -> String {
        let calipers = if self.calipers.is_empty() {
            "none".to_string()
        } else {
            self.calipers
                .iter()
                .map(|c| match &c.source {
                    Some(src) => format!("{:?} ≤ {}", src.metric, c.threshold),
                    None => format!("base ≤ {}", c.threshold),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "Design Configuration:\n\
             - Distance: {:?} on [{}]\n\
             - Calipers: {}\n\
             - Exact match: [{}]\n\
             - Mode: {:?}\n\
             - Allow exclusions: {}\n\
             - Tolerance: {:e}\n\
             - Parallel: {} ({} threads)",
            self.distance.metric,
            self.distance.covariates.join(", "),
            calipers,
            self.exact_match.join(", "),
            self.mode,
            self.allow_exclusions,
            self.tolerance,
            self.use_parallel,
            self.effective_threads()
        )
    }
}

/// Builder for constructing a design configuration
#[derive(Debug, Clone, Default)]
pub struct DesignConfigBuilder {
    config: DesignConfig,
}

impl DesignConfigBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base distance
    #[must_use]
    pub fn distance(mut self, distance: DistanceSpec) -> Self {
        self.config.distance = distance;
        self
    }

    /// Add a caliper
    #[must_use]
    pub fn caliper(mut self, caliper: CaliperSpec) -> Self {
        self.config.calipers.push(caliper);
        self
    }

    /// Add an exact-match covariate
    #[must_use]
    pub fn exact_match(mut self, covariate: impl Into<String>) -> Self {
        self.config.exact_match.push(covariate.into());
        self
    }

    /// Set the matching mode
    #[must_use]
    pub const fn mode(mut self, mode: MatchMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set whether unsatisfiable treated units may be excluded
    #[must_use]
    pub const fn allow_exclusions(mut self, allow: bool) -> Self {
        self.config.allow_exclusions = allow;
        self
    }

    /// Set the solver tolerance
    #[must_use]
    pub const fn tolerance(mut self, tolerance: f64) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Set whether to use parallel processing
    #[must_use]
    pub const fn use_parallel(mut self, parallel: bool) -> Self {
        self.config.use_parallel = parallel;
        self
    }

    /// Set the number of worker threads
    #[must_use]
    pub const fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = Some(threads);
        self
    }

    /// Set whether to show progress bars
    #[must_use]
    pub const fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DesignConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How stratum-level differences are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StratumWeighting {
    /// `2·nT·nC/(nT+nC)`, the precision weight of a stratum
    #[default]
    Harmonic,
    /// Number of units in the stratum
    BlockSize,
}

/// Configuration for balance assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Covariates to assess; empty means every covariate in the catalog
    pub covariates: Vec<String>,
    /// Stratum weighting
    pub weighting: StratumWeighting,
    /// Level at which an adjusted p-value flags a covariate
    pub alpha: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            covariates: Vec::new(),
            weighting: StratumWeighting::Harmonic,
            alpha: 0.05,
        }
    }
}

impl BalanceConfig {
    /// Assess the given covariates with default settings
    #[must_use]
    pub fn for_covariates<I, S>(covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            covariates: covariates.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the stratum weighting
    #[must_use]
    pub const fn with_weighting(mut self, weighting: StratumWeighting) -> Self {
        self.weighting = weighting;
        self
    }
}
