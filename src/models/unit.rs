//! Unit catalog: the immutable table of study units
//!
//! A catalog holds every unit of a study with its treatment label and a
//! covariate vector conforming to a schema fixed for the whole run.

use crate::error::{MatchError, Result};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Kind of a covariate column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CovariateKind {
    /// Real-valued covariate
    Numeric,
    /// Covariate with unordered levels
    Categorical,
}

/// Name and kind of one covariate column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovariateSpec {
    /// Column name
    pub name: String,
    /// Column kind
    pub kind: CovariateKind,
}

impl CovariateSpec {
    /// Numeric covariate named `name`
    #[must_use]
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CovariateKind::Numeric,
        }
    }

    /// Categorical covariate named `name`
    #[must_use]
    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CovariateKind::Categorical,
        }
    }
}

/// A single covariate value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CovariateValue {
    /// Numeric value
    Numeric(f64),
    /// Categorical level
    Categorical(String),
}

impl CovariateValue {
    /// Kind of this value
    #[must_use]
    pub const fn kind(&self) -> CovariateKind {
        match self {
            Self::Numeric(_) => CovariateKind::Numeric,
            Self::Categorical(_) => CovariateKind::Categorical,
        }
    }

    /// Numeric value, if this is a numeric covariate
    #[must_use]
    pub const fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    /// Blocking key used by exact matching
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            // -0.0 and 0.0 block together
            Self::Numeric(v) if *v == 0.0 => "0".to_string(),
            Self::Numeric(v) => format!("{v}"),
            Self::Categorical(level) => level.clone(),
        }
    }
}

impl From<f64> for CovariateValue {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for CovariateValue {
    fn from(value: &str) -> Self {
        Self::Categorical(value.to_string())
    }
}

impl From<String> for CovariateValue {
    fn from(value: String) -> Self {
        Self::Categorical(value)
    }
}

/// A study unit
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    id: String,
    treated: bool,
    covariates: Vec<CovariateValue>,
}

impl Unit {
    /// Create a unit
    #[must_use]
    pub fn new(id: impl Into<String>, treated: bool, covariates: Vec<CovariateValue>) -> Self {
        Self {
            id: id.into(),
            treated,
            covariates,
        }
    }

    /// Unit identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the unit received the treatment
    #[must_use]
    pub const fn is_treated(&self) -> bool {
        self.treated
    }

    /// Covariate values in schema order
    #[must_use]
    pub fn covariates(&self) -> &[CovariateValue] {
        &self.covariates
    }
}

/// Immutable table of units sharing one covariate schema
#[derive(Debug, Clone)]
pub struct UnitCatalog {
    schema: Vec<CovariateSpec>,
    units: Vec<Unit>,
    positions: FxHashMap<String, usize>,
}

impl UnitCatalog {
    /// Create a catalog, validating ids and covariate values against the schema
    pub fn new(schema: Vec<CovariateSpec>, units: Vec<Unit>) -> Result<Self> {
        if let Some(name) = schema.iter().map(|c| &c.name).duplicates().next() {
            return Err(MatchError::InvalidConfig(format!(
                "covariate {name} declared more than once"
            )));
        }

        let mut positions = FxHashMap::default();
        positions.reserve(units.len());

        for (pos, unit) in units.iter().enumerate() {
            if positions.insert(unit.id.clone(), pos).is_some() {
                return Err(MatchError::DuplicateUnit(unit.id.clone()));
            }

            if unit.covariates.len() != schema.len() {
                return Err(MatchError::SchemaMismatch {
                    unit: unit.id.clone(),
                    message: format!(
                        "expected {} covariates, found {}",
                        schema.len(),
                        unit.covariates.len()
                    ),
                });
            }

            for (spec, value) in schema.iter().zip(&unit.covariates) {
                if spec.kind != value.kind() {
                    return Err(MatchError::SchemaMismatch {
                        unit: unit.id.clone(),
                        message: format!("covariate {} expected {:?}", spec.name, spec.kind),
                    });
                }
                if let CovariateValue::Numeric(v) = value {
                    if !v.is_finite() {
                        return Err(MatchError::SchemaMismatch {
                            unit: unit.id.clone(),
                            message: format!("covariate {} is not finite", spec.name),
                        });
                    }
                }
            }
        }

        Ok(Self {
            schema,
            units,
            positions,
        })
    }

    /// Create a new builder for constructing a catalog
    #[must_use]
    pub fn builder() -> UnitCatalogBuilder {
        UnitCatalogBuilder::new()
    }

    /// Covariate schema
    #[must_use]
    pub fn schema(&self) -> &[CovariateSpec] {
        &self.schema
    }

    /// All units in load order
    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Unit at a catalog position
    #[must_use]
    pub fn unit(&self, pos: usize) -> &Unit {
        &self.units[pos]
    }

    /// Number of units
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Catalog position of a unit id
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Schema index of a covariate
    pub fn covariate_index(&self, name: &str) -> Result<usize> {
        self.schema
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MatchError::UnknownCovariate(name.to_string()))
    }

    /// Kind of a covariate
    pub fn covariate_kind(&self, name: &str) -> Result<CovariateKind> {
        Ok(self.schema[self.covariate_index(name)?].kind)
    }

    /// Positions of treated units, ordered by unit id
    #[must_use]
    pub fn treated_positions(&self) -> Vec<usize> {
        self.positions_where(true)
    }

    /// Positions of comparison units, ordered by unit id
    #[must_use]
    pub fn control_positions(&self) -> Vec<usize> {
        self.positions_where(false)
    }

    fn positions_where(&self, treated: bool) -> Vec<usize> {
        (0..self.units.len())
            .filter(|&i| self.units[i].treated == treated)
            .sorted_by(|&a, &b| self.units[a].id.cmp(&self.units[b].id))
            .collect()
    }

    /// Values of a numeric covariate for every unit, in load order
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.covariate_index(name)?;
        if self.schema[idx].kind != CovariateKind::Numeric {
            return Err(MatchError::NonNumericCovariate(name.to_string()));
        }
        Ok(self
            .units
            .iter()
            .map(|u| u.covariates[idx].as_numeric().unwrap_or(f64::NAN))
            .collect())
    }

    /// Blocking keys of a covariate for every unit, in load order
    pub fn key_column(&self, name: &str) -> Result<Vec<String>> {
        let idx = self.covariate_index(name)?;
        Ok(self.units.iter().map(|u| u.covariates[idx].key()).collect())
    }
}

/// Builder for constructing a catalog row by row
#[derive(Debug, Clone, Default)]
pub struct UnitCatalogBuilder {
    schema: Vec<CovariateSpec>,
    units: Vec<Unit>,
}

impl UnitCatalogBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a numeric covariate
    #[must_use]
    pub fn numeric(mut self, name: impl Into<String>) -> Self {
        self.schema.push(CovariateSpec::numeric(name));
        self
    }

    /// Declare a categorical covariate
    #[must_use]
    pub fn categorical(mut self, name: impl Into<String>) -> Self {
        self.schema.push(CovariateSpec::categorical(name));
        self
    }

    /// Add a unit
    #[must_use]
    pub fn unit(
        mut self,
        id: impl Into<String>,
        treated: bool,
        covariates: Vec<CovariateValue>,
    ) -> Self {
        self.units.push(Unit::new(id, treated, covariates));
        self
    }

    /// Build the catalog
    pub fn build(self) -> Result<UnitCatalog> {
        UnitCatalog::new(self.schema, self.units)
    }
}
