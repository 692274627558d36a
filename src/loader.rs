//! Unit catalog loading from Arrow and Parquet
//!
//! Integer and float columns become numeric covariates, string columns
//! become categorical ones. The treatment column may be Boolean or an
//! integer column holding 0/1.

use arrow::array::{Array, ArrayRef, AsArray, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

use crate::error::{MatchError, Result};
use crate::models::unit::{CovariateKind, CovariateSpec, CovariateValue, Unit, UnitCatalog};
use crate::utils::logging::{log_stage_complete, log_stage_start, log_stage_warning};

/// Column roles in a unit table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSchema {
    /// Column holding unit ids
    pub id_column: String,
    /// Column holding the treatment label
    pub treatment_column: String,
    /// Covariate columns; empty means every other column
    pub covariates: Vec<String>,
}

impl CatalogSchema {
    /// Schema with the given id and treatment columns and all other columns as covariates
    #[must_use]
    pub fn new(id_column: impl Into<String>, treatment_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            treatment_column: treatment_column.into(),
            covariates: Vec::new(),
        }
    }

    /// Restrict the covariate columns
    #[must_use]
    pub fn with_covariates<I, S>(mut self, covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covariates = covariates.into_iter().map(Into::into).collect();
        self
    }

    /// Covariate specs resolved against an Arrow schema
    pub fn resolve(&self, arrow_schema: &Schema) -> Result<Vec<CovariateSpec>> {
        for column in [&self.id_column, &self.treatment_column] {
            if arrow_schema.index_of(column).is_err() {
                return Err(MatchError::InvalidConfig(format!(
                    "column {column} not found in input"
                )));
            }
        }

        let names: Vec<String> = if self.covariates.is_empty() {
            arrow_schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .filter(|name| name != &self.id_column && name != &self.treatment_column)
                .collect()
        } else {
            self.covariates.clone()
        };

        names
            .into_iter()
            .map(|name| {
                let field = arrow_schema
                    .field_with_name(&name)
                    .map_err(|_| MatchError::UnknownCovariate(name.clone()))?;
                let kind = covariate_kind(field.data_type()).ok_or_else(|| {
                    MatchError::InvalidConfig(format!(
                        "column {name} has unsupported type {}",
                        field.data_type()
                    ))
                })?;
                Ok(CovariateSpec { name, kind })
            })
            .collect()
    }
}

fn covariate_kind(data_type: &DataType) -> Option<CovariateKind> {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float16
        | DataType::Float32
        | DataType::Float64 => Some(CovariateKind::Numeric),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            Some(CovariateKind::Categorical)
        }
        _ => None,
    }
}

/// Build a unit catalog from record batches sharing `arrow_schema`
pub fn catalog_from_batches(
    arrow_schema: &Schema,
    batches: &[RecordBatch],
    schema: &CatalogSchema,
) -> Result<UnitCatalog> {
    let covariates = schema.resolve(arrow_schema)?;
    let mut units = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());

    for batch in batches {
        let ids = cast(column(batch, &schema.id_column)?, &DataType::Utf8)?;
        let ids = ids.as_string::<i32>();
        let treatment = column(batch, &schema.treatment_column)?;

        let columns: Vec<ArrayRef> = covariates
            .iter()
            .map(|spec| {
                let target = match spec.kind {
                    CovariateKind::Numeric => DataType::Float64,
                    CovariateKind::Categorical => DataType::Utf8,
                };
                Ok(cast(column(batch, &spec.name)?, &target)?)
            })
            .collect::<Result<_>>()?;

        let treated = treatment_flags(treatment, ids)?;

        for row in 0..batch.num_rows() {
            if ids.is_null(row) {
                return Err(MatchError::SchemaMismatch {
                    unit: format!("<row {}>", units.len()),
                    message: format!("null in id column {}", schema.id_column),
                });
            }
            let id = ids.value(row);

            let values = covariates
                .iter()
                .zip(&columns)
                .map(|(spec, array)| {
                    if array.is_null(row) {
                        return Err(MatchError::SchemaMismatch {
                            unit: id.to_string(),
                            message: format!("null in covariate {}", spec.name),
                        });
                    }
                    Ok(match spec.kind {
                        CovariateKind::Numeric => {
                            CovariateValue::Numeric(array.as_primitive::<Float64Type>().value(row))
                        }
                        CovariateKind::Categorical => {
                            CovariateValue::Categorical(array.as_string::<i32>().value(row).to_string())
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            units.push(Unit::new(id, treated[row], values));
        }
    }

    UnitCatalog::new(covariates, units)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| MatchError::InvalidConfig(format!("column {name} not found in batch")))
}

/// Treatment labels from a Boolean or 0/1 integer column
fn treatment_flags(array: &ArrayRef, ids: &StringArray) -> Result<Vec<bool>> {
    let unit = |row: usize| ids.value(row).to_string();
    let null = |row: usize| MatchError::SchemaMismatch {
        unit: unit(row),
        message: "null treatment label".to_string(),
    };

    if let DataType::Boolean = array.data_type() {
        let flags = array.as_boolean();
        return (0..flags.len())
            .map(|row| {
                if flags.is_null(row) {
                    Err(null(row))
                } else {
                    Ok(flags.value(row))
                }
            })
            .collect();
    }

    if !array.data_type().is_integer() {
        return Err(MatchError::InvalidConfig(format!(
            "treatment column has unsupported type {}",
            array.data_type()
        )));
    }

    let labels = cast(array, &DataType::Int64)?;
    let labels = labels.as_primitive::<Int64Type>();
    (0..labels.len())
        .map(|row| {
            if labels.is_null(row) {
                return Err(null(row));
            }
            match labels.value(row) {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(MatchError::SchemaMismatch {
                    unit: unit(row),
                    message: format!("treatment label must be 0 or 1, got {other}"),
                }),
            }
        })
        .collect()
}

/// Read a Parquet file into a unit catalog
///
/// # Arguments
/// * `path` - Path to the Parquet file
/// * `schema` - Column roles
pub fn load_catalog_from_parquet(path: &Path, schema: &CatalogSchema) -> Result<UnitCatalog> {
    let start = Instant::now();
    let subject = path.display().to_string();
    log_stage_start("Loading unit catalog from", &subject);

    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let arrow_schema = builder.schema().clone();

    let covariates = schema.resolve(&arrow_schema)?;
    let wanted: Vec<usize> = [&schema.id_column, &schema.treatment_column]
        .into_iter()
        .chain(covariates.iter().map(|c| &c.name))
        .filter_map(|name| arrow_schema.index_of(name).ok())
        .collect();
    debug!(
        "Reading {} of {} columns from {subject}",
        wanted.len(),
        arrow_schema.fields().len()
    );

    let mask = ProjectionMask::roots(builder.parquet_schema(), wanted);
    let reader = builder.with_projection(mask).build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

    let catalog = catalog_from_batches(&arrow_schema, &batches, schema)?;
    if catalog.is_empty() {
        log_stage_warning("No units found in", Some(&subject));
    }
    log_stage_complete("Loaded", &subject, catalog.len(), Some(start.elapsed()));
    Ok(catalog)
}
