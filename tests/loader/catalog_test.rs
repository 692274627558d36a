#[cfg(test)]
mod tests {
    use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::fs::File;
    use std::sync::Arc;
    use stratamatch::{
        CatalogSchema, CovariateKind, CovariateValue, MatchError, catalog_from_batches,
        load_catalog_from_parquet,
    };

    fn units_batch(treatment: ArrayRef, age: Vec<Option<f64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("treated", treatment.data_type().clone(), true),
            Field::new("age", DataType::Float64, true),
            Field::new("visits", DataType::Int32, false),
            Field::new("sex", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
                treatment,
                Arc::new(Float64Array::from(age)),
                Arc::new(Int32Array::from(vec![1, 4, 2])),
                Arc::new(StringArray::from(vec!["F", "M", "F"])),
            ],
        )
        .unwrap()
    }

    fn boolean_treatment() -> ArrayRef {
        Arc::new(BooleanArray::from(vec![true, false, false]))
    }

    #[test]
    fn test_catalog_from_batches() {
        let batch = units_batch(boolean_treatment(), vec![Some(30.0), Some(41.5), Some(29.0)]);
        let catalog =
            catalog_from_batches(&batch.schema(), &[batch], &CatalogSchema::new("id", "treated"))
                .unwrap();

        assert_eq!(catalog.len(), 3);
        let names: Vec<&str> = catalog.schema().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["age", "visits", "sex"]);
        assert_eq!(catalog.covariate_kind("visits").unwrap(), CovariateKind::Numeric);
        assert_eq!(catalog.covariate_kind("sex").unwrap(), CovariateKind::Categorical);

        let b = catalog.unit(catalog.position("b").unwrap());
        assert!(!b.is_treated());
        assert_eq!(
            b.covariates(),
            &[
                CovariateValue::Numeric(41.5),
                CovariateValue::Numeric(4.0),
                CovariateValue::Categorical("M".to_string()),
            ]
        );
        assert_eq!(catalog.treated_positions().len(), 1);
    }

    #[test]
    fn test_integer_treatment_and_covariate_subset() {
        let treatment: ArrayRef = Arc::new(Int32Array::from(vec![0, 1, 1]));
        let batch = units_batch(treatment, vec![Some(30.0), Some(41.5), Some(29.0)]);
        let schema = CatalogSchema::new("id", "treated").with_covariates(["sex"]);

        let catalog = catalog_from_batches(&batch.schema(), &[batch], &schema).unwrap();
        assert_eq!(catalog.schema().len(), 1);
        assert_eq!(catalog.treated_positions().len(), 2);
    }

    #[test]
    fn test_invalid_inputs() {
        let with_null = units_batch(boolean_treatment(), vec![Some(30.0), None, Some(29.0)]);
        let err = catalog_from_batches(
            &with_null.schema(),
            &[with_null],
            &CatalogSchema::new("id", "treated"),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::SchemaMismatch { unit, .. } if unit == "b"));

        let treatment: ArrayRef = Arc::new(Int32Array::from(vec![0, 2, 1]));
        let bad_label = units_batch(treatment, vec![Some(1.0), Some(2.0), Some(3.0)]);
        let err = catalog_from_batches(
            &bad_label.schema(),
            &[bad_label],
            &CatalogSchema::new("id", "treated"),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::SchemaMismatch { unit, .. } if unit == "b"));

        let batch = units_batch(boolean_treatment(), vec![Some(1.0), Some(2.0), Some(3.0)]);
        let err = catalog_from_batches(
            &batch.schema(),
            &[batch.clone()],
            &CatalogSchema::new("id", "treated").with_covariates(["height"]),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::UnknownCovariate(name) if name == "height"));

        let err = catalog_from_batches(&batch.schema(), &[batch], &CatalogSchema::new("pnr", "treated"))
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_catalog_from_parquet() {
        let batch = units_batch(boolean_treatment(), vec![Some(30.0), Some(41.5), Some(29.0)]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.parquet");
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let schema = CatalogSchema::new("id", "treated").with_covariates(["age", "sex"]);
        let catalog = load_catalog_from_parquet(&path, &schema).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.schema().len(), 2);
        let a = catalog.unit(catalog.position("a").unwrap());
        assert!(a.is_treated());
        assert_eq!(a.covariates()[0], CovariateValue::Numeric(30.0));
        assert_eq!(a.covariates()[1], CovariateValue::Categorical("F".to_string()));
    }
}
