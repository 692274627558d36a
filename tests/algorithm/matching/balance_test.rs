#[cfg(test)]
mod tests {
    use crate::utils::{assert_close, line_catalog, manual_design, sexed_catalog};
    use statrs::distribution::{ContinuousCDF, Normal};
    use stratamatch::algorithm::matching::balance::holm_adjust;
    use stratamatch::{
        BalanceConfig, MatchError, MatchedDesign, StrataEvaluator, StratumWeighting, UnitCatalog,
    };

    fn two_strata() -> (UnitCatalog, MatchedDesign) {
        let catalog = sexed_catalog(
            &[(1.0, "F"), (4.0, "F"), (10.0, "M")],
            &[(2.0, "F"), (2.0, "F"), (5.0, "F"), (7.0, "M"), (8.0, "M")],
        );
        let design = manual_design(&[
            (vec!["t01", "t02"], vec!["c01", "c02", "c03"]),
            (vec!["t03"], vec!["c04", "c05"]),
        ]);
        (catalog, design)
    }

    #[test]
    fn test_single_stratum_statistics() {
        let catalog = line_catalog(&[1.0, 3.0], &[2.0, 6.0]);
        let design = manual_design(&[(vec!["t01", "t02"], vec!["c01", "c02"])]);

        let report = StrataEvaluator::new(BalanceConfig::default())
            .evaluate(&catalog, &design)
            .unwrap();
        let x = report.metric("x").unwrap();

        assert_close(x.treated_mean, 2.0, 1e-12);
        assert_close(x.control_mean, 4.0, 1e-12);
        assert_close(x.adjusted_difference, -2.0, 1e-12);

        // S² = 14/3 over the four units, times 1/nT + 1/nC = 1
        let se = (14.0_f64 / 3.0).sqrt();
        assert_close(x.std_error, se, 1e-12);
        assert_close(x.z, -2.0 / se, 1e-12);

        let normal = Normal::new(0.0, 1.0).unwrap();
        assert_close(x.p_value, 2.0 * (1.0 - normal.cdf(2.0 / se)), 1e-9);
        assert_close(x.adjusted_p_value, x.p_value, 1e-15);

        // Pooled SD from group variances 2 and 8
        assert_close(x.standardized_difference, -2.0 / 5.0_f64.sqrt(), 1e-12);

        // One covariate: the overall statistic is z²
        assert_eq!(report.overall.degrees_of_freedom, 1);
        assert_close(report.overall.chi_square, x.z * x.z, 1e-9);
        assert_close(report.overall.p_value, x.p_value, 1e-9);
        assert_eq!(report.informative_strata, 1);
        assert_eq!(report.units, 4);
    }

    #[test]
    fn test_harmonic_weighting_matches_fixed_effects_regression() {
        let (catalog, design) = two_strata();
        let report = StrataEvaluator::new(BalanceConfig::for_covariates(["x"]))
            .evaluate(&catalog, &design)
            .unwrap();

        // Regress x on treatment with stratum fixed effects by demeaning within strata
        let x = catalog.numeric_column("x").unwrap();
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for stratum in design.strata() {
            let members: Vec<(f64, f64)> = stratum
                .treated
                .iter()
                .map(|id| (1.0, x[catalog.position(id).unwrap()]))
                .chain(
                    stratum
                        .controls
                        .iter()
                        .map(|id| (0.0, x[catalog.position(id).unwrap()])),
                )
                .collect();
            let n = members.len() as f64;
            let z_mean = members.iter().map(|m| m.0).sum::<f64>() / n;
            let x_mean = members.iter().map(|m| m.1).sum::<f64>() / n;
            for (z, v) in members {
                sxy += (z - z_mean) * (v - x_mean);
                sxx += (z - z_mean) * (z - z_mean);
            }
        }

        let metric = report.metric("x").unwrap();
        assert_close(metric.adjusted_difference, sxy / sxx, 1e-9);
        assert_eq!(report.weighting, StratumWeighting::Harmonic);
    }

    #[test]
    fn test_block_size_weighting() {
        let (catalog, design) = two_strata();
        let config = BalanceConfig::for_covariates(["x"]).with_weighting(StratumWeighting::BlockSize);
        let report = StrataEvaluator::new(config).evaluate(&catalog, &design).unwrap();

        // Stratum differences -0.5 (5 units) and 2.5 (3 units)
        let expected = (5.0 * -0.5 + 3.0 * 2.5) / 8.0;
        assert_close(report.metric("x").unwrap().adjusted_difference, expected, 1e-12);
    }

    #[test]
    fn test_exactly_matched_covariate_has_no_null_variance() {
        let (catalog, design) = two_strata();
        let report = StrataEvaluator::new(BalanceConfig::for_covariates(["sex"]))
            .evaluate(&catalog, &design)
            .unwrap();

        let names: Vec<&str> = report.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sex=F", "sex=M"]);
        for metric in &report.metrics {
            assert!(metric.categorical);
            assert_close(metric.adjusted_difference, 0.0, 1e-12);
            assert_eq!(metric.std_error, 0.0);
            assert_eq!(metric.z, 0.0);
            assert_eq!(metric.p_value, 1.0);
        }
        assert_eq!(report.overall.degrees_of_freedom, 0);
        assert_eq!(report.overall.chi_square, 0.0);
        assert_eq!(report.overall.p_value, 1.0);
        assert!(report.imbalanced().is_empty());
    }

    #[test]
    fn test_categorical_levels_share_one_degree_of_freedom() {
        let catalog = sexed_catalog(
            &[(1.0, "a"), (2.0, "b")],
            &[(3.0, "a"), (4.0, "a"), (5.0, "b")],
        );
        let design = manual_design(&[(vec!["t01", "t02"], vec!["c01", "c02", "c03"])]);

        let report = StrataEvaluator::new(BalanceConfig::for_covariates(["sex"]))
            .evaluate(&catalog, &design)
            .unwrap();

        let a = report.metric("sex=a").unwrap();
        let b = report.metric("sex=b").unwrap();
        assert_close(a.adjusted_difference, 0.5 - 2.0 / 3.0, 1e-12);
        assert_close(b.adjusted_difference, -a.adjusted_difference, 1e-12);
        assert_eq!(report.overall.degrees_of_freedom, 1);
        assert_close(report.overall.chi_square, a.z * a.z, 1e-9);
    }

    #[test]
    fn test_strata_without_both_groups_are_skipped() {
        let catalog = line_catalog(&[1.0, 3.0], &[2.0, 6.0]);
        let design = manual_design(&[
            (vec!["t01"], vec!["c01"]),
            (vec!["t02"], vec![]),
            (vec![], vec!["c02"]),
        ]);

        let report = StrataEvaluator::default().evaluate(&catalog, &design).unwrap();
        assert_eq!(report.informative_strata, 1);
        assert_eq!(report.units, 2);
        assert_close(report.metric("x").unwrap().adjusted_difference, -1.0, 1e-12);
    }

    #[test]
    fn test_degenerate_designs() {
        let catalog = line_catalog(&[1.0, 3.0], &[2.0, 6.0]);
        let evaluator = StrataEvaluator::default();

        let empty = MatchedDesign::from_blocks(Vec::new());
        assert!(matches!(
            evaluator.evaluate(&catalog, &empty),
            Err(MatchError::EmptyDesign)
        ));

        let one_sided = manual_design(&[(vec!["t01", "t02"], vec![])]);
        assert!(matches!(
            evaluator.evaluate(&catalog, &one_sided),
            Err(MatchError::DegenerateStratification)
        ));

        let stranger = manual_design(&[(vec!["t99"], vec!["c01"])]);
        assert!(matches!(
            evaluator.evaluate(&catalog, &stranger),
            Err(MatchError::SchemaMismatch { unit, .. }) if unit == "t99"
        ));

        let design = manual_design(&[(vec!["t01"], vec!["c01"])]);
        let unknown = StrataEvaluator::new(BalanceConfig::for_covariates(["age"]));
        assert!(matches!(
            unknown.evaluate(&catalog, &design),
            Err(MatchError::UnknownCovariate(name)) if name == "age"
        ));
    }

    #[test]
    fn test_holm_adjustment() {
        let adjusted = holm_adjust(&[0.01, 0.04, 0.03]);
        assert_close(adjusted[0], 0.03, 1e-15);
        assert_close(adjusted[1], 0.06, 1e-15);
        assert_close(adjusted[2], 0.06, 1e-15);

        let capped = holm_adjust(&[0.6, 0.9]);
        assert_eq!(capped, vec![1.0, 1.0]);
        assert!(holm_adjust(&[]).is_empty());
    }

    #[test]
    fn test_report_outputs() {
        let (catalog, design) = two_strata();
        let report = StrataEvaluator::default().evaluate(&catalog, &design).unwrap();

        let text = report.to_string_representation();
        assert!(text.contains("Balance Summary"));
        assert!(text.contains("sex=M"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balance.csv");
        report.write_to_csv(&path).unwrap();
        let csv = std::fs::read_to_string(&path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Covariate,Treated Mean,Control Mean,Adj Diff,Std Err,z,p,Adj p,Std Diff")
        );
        assert!(lines.next().unwrap().starts_with("x,"));
        assert!(csv.contains("Degrees of freedom,"));
    }
}
