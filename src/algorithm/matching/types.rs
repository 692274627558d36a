//! Type definitions for matched designs
//!
//! A design is immutable once produced: every re-solve yields a new one.

use crate::error::Result;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Stratum identifier, qualified by its exact-match block when one exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StratumId {
    block: Option<String>,
    index: usize,
}

impl StratumId {
    /// Create an identifier for the `index`-th stratum (1-based) of a block
    #[must_use]
    pub fn new(block: Option<&str>, index: usize) -> Self {
        Self {
            block: block.map(str::to_string),
            index,
        }
    }

    /// Blocking key of the stratum
    #[must_use]
    pub fn block(&self) -> Option<&str> {
        self.block.as_deref()
    }

    /// Position of the stratum within its block, starting at 1
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for StratumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block {
            Some(block) => write!(f, "{block}.{}", self.index),
            None => write!(f, "{}", self.index),
        }
    }
}

impl Serialize for StratumId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a unit ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Member of a stratum
    Stratum(StratumId),
    /// Left out of every stratum
    Excluded,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stratum(id) => write!(f, "{id}"),
            Self::Excluded => f.write_str("excluded"),
        }
    }
}

/// A matched set of treated and comparison units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stratum {
    /// Identifier
    pub id: StratumId,
    /// Treated unit ids
    pub treated: Vec<String>,
    /// Comparison unit ids
    pub controls: Vec<String>,
    /// Sum of treated×comparison distances within the stratum
    pub distance: f64,
}

impl Stratum {
    /// Number of units in the stratum
    #[must_use]
    pub fn len(&self) -> usize {
        self.treated.len() + self.controls.len()
    }

    /// Check if the stratum has no units
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Solution of one block: its strata and the units it left out
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockSolution {
    /// Strata in treated-unit id order
    pub strata: Vec<Stratum>,
    /// Excluded unit ids
    pub excluded: Vec<String>,
}

/// Complete stratum assignment over all units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedDesign {
    strata: Vec<Stratum>,
    excluded: Vec<String>,
    assignments: BTreeMap<String, Assignment>,
    objective: f64,
}

impl MatchedDesign {
    /// Merge block solutions, in block order, into one design
    #[must_use]
    pub fn from_blocks(blocks: Vec<BlockSolution>) -> Self {
        let mut strata = Vec::new();
        let mut excluded = Vec::new();
        for block in blocks {
            strata.extend(block.strata);
            excluded.extend(block.excluded);
        }
        excluded.sort();

        let mut assignments = BTreeMap::new();
        for stratum in &strata {
            for id in stratum.treated.iter().chain(&stratum.controls) {
                assignments.insert(id.clone(), Assignment::Stratum(stratum.id.clone()));
            }
        }
        for id in &excluded {
            assignments.insert(id.clone(), Assignment::Excluded);
        }

        let objective = strata.iter().map(|s| s.distance).sum();

        Self {
            strata,
            excluded,
            assignments,
            objective,
        }
    }

    /// Strata in block order, then treated-unit id order
    #[must_use]
    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    /// Ids of excluded units, sorted
    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Sum of within-stratum distances
    #[must_use]
    pub const fn objective(&self) -> f64 {
        self.objective
    }

    /// Assignment of a unit
    #[must_use]
    pub fn assignment(&self, id: &str) -> Option<&Assignment> {
        self.assignments.get(id)
    }

    /// Unit id → assignment, ordered by unit id
    #[must_use]
    pub fn assignments(&self) -> &BTreeMap<String, Assignment> {
        &self.assignments
    }

    /// Stratum by identifier
    #[must_use]
    pub fn stratum(&self, id: &StratumId) -> Option<&Stratum> {
        self.strata.iter().find(|s| &s.id == id)
    }

    /// Number of units placed in a stratum
    #[must_use]
    pub fn assigned_units(&self) -> usize {
        self.strata.iter().map(Stratum::len).sum()
    }

    /// Generate a string representation of the design
    #[must_use]
    pub fn to_string_representation(&self) -> String {
        let mut output = format!(
            "Matched Design:\n\
             - Strata: {}\n\
             - Assigned units: {}\n\
             - Excluded units: {}\n\
             - Objective: {:.6}\n\n",
            self.strata.len(),
            self.assigned_units(),
            self.excluded.len(),
            self.objective
        );

        for stratum in &self.strata {
            output.push_str(&format!(
                "{:<12} | T: {:<20} | C: {:<40} | d = {:.4}\n",
                stratum.id.to_string(),
                stratum.treated.join(" "),
                stratum.controls.join(" "),
                stratum.distance
            ));
        }

        output
    }

    /// Write `unit_id,stratum` rows to a CSV file
    pub fn write_to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "unit_id,stratum")?;
        for (id, assignment) in &self.assignments {
            writeln!(writer, "{},{}", escape_csv(id), escape_csv(&assignment.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Escape a string for CSV output
pub(crate) fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
