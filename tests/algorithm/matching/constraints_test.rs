#[cfg(test)]
mod tests {
    use crate::utils::{line_catalog, sexed_catalog};
    use stratamatch::algorithm::matching::constraints::key_label;
    use stratamatch::{
        Constraint, ConstraintApplier, DistanceMatrix, DistanceMatrixBuilder, DistanceSpec,
        MatchError, UnitCatalog,
    };

    fn base(catalog: &UnitCatalog) -> DistanceMatrix {
        DistanceMatrixBuilder::build(catalog, &DistanceSpec::absolute("x")).unwrap()
    }

    #[test]
    fn test_caliper_keeps_pairs_at_threshold() {
        let catalog = line_catalog(&[0.0], &[1.0, 2.0, 3.0]);
        let base = base(&catalog);

        let constrained =
            ConstraintApplier::apply(&catalog, &base, &[Constraint::caliper(base.clone(), 2.0)])
                .unwrap();
        let matrix = constrained.matrix();
        assert!(!matrix.is_forbidden(0, 0));
        assert!(!matrix.is_forbidden(0, 1));
        assert!(matrix.is_forbidden(0, 2));
        assert_eq!(matrix.get(0, 2), DistanceMatrix::FORBIDDEN);
        assert_eq!(constrained.blocks().len(), 1);
        assert_eq!(constrained.blocks()[0].key(), None);

        // The input matrix is left untouched
        assert_eq!(base.feasible_pairs(), 3);
    }

    #[test]
    fn test_constraint_order_does_not_matter() {
        let catalog = sexed_catalog(
            &[(0.0, "F"), (5.0, "M"), (9.0, "F")],
            &[(1.0, "F"), (2.0, "M"), (6.0, "M"), (8.0, "F"), (20.0, "F")],
        );
        let base = base(&catalog);
        let wide = Constraint::caliper(base.clone(), 4.0);
        let narrow = Constraint::caliper(base.clone(), 1.5);
        let exact = Constraint::exact_match("sex");

        let a = ConstraintApplier::apply(
            &catalog,
            &base,
            &[wide.clone(), narrow.clone(), exact.clone()],
        )
        .unwrap();
        let b = ConstraintApplier::apply(&catalog, &base, &[exact, narrow, wide]).unwrap();

        assert_eq!(a.matrix(), b.matrix());
        assert_eq!(a.blocks(), b.blocks());
    }

    #[test]
    fn test_exact_match_partitions_into_blocks() {
        let catalog = sexed_catalog(
            &[(0.0, "M"), (1.0, "F"), (2.0, "M")],
            &[(3.0, "F"), (4.0, "M"), (5.0, "F"), (6.0, "M")],
        );
        let base = base(&catalog);

        let constrained =
            ConstraintApplier::apply(&catalog, &base, &[Constraint::exact_match("sex")]).unwrap();
        let blocks = constrained.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].key(), Some("F"));
        assert_eq!(blocks[0].rows(), &[1]);
        assert_eq!(blocks[0].cols(), &[0, 2]);
        assert_eq!(blocks[1].key(), Some("M"));
        assert_eq!(blocks[1].rows(), &[0, 2]);
        assert_eq!(blocks[1].cols(), &[1, 3]);

        // Cross-key pairs are forbidden
        let matrix = constrained.matrix();
        assert!(matrix.is_forbidden(0, 0));
        assert!(!matrix.is_forbidden(0, 1));
        assert_eq!(matrix.feasible_pairs(), 6);

        let sub = constrained.block_matrix(&blocks[1]);
        assert_eq!(sub.rows(), 2);
        assert_eq!(sub.cols(), 2);
        assert_eq!(sub.get(0, 0), 4.0);
        assert_eq!(sub.get(1, 1), 4.0);
    }

    #[test]
    fn test_composite_blocking_key() {
        let catalog = UnitCatalog::builder()
            .numeric("x")
            .categorical("sex")
            .categorical("region")
            .unit("t1", true, vec![1.0.into(), "F".into(), "north".into()])
            .unit("t2", true, vec![2.0.into(), "F".into(), "south".into()])
            .unit("c1", false, vec![1.5.into(), "F".into(), "north".into()])
            .unit("c2", false, vec![2.5.into(), "F".into(), "south".into()])
            .build()
            .unwrap();
        let base = base(&catalog);

        let constrained = ConstraintApplier::apply(
            &catalog,
            &base,
            &[Constraint::exact_match("sex"), Constraint::exact_match("region")],
        )
        .unwrap();

        // Covariates join in name order, whatever order they were listed in
        let keys: Vec<_> = constrained.blocks().iter().map(|b| b.key()).collect();
        assert_eq!(keys, vec![Some("north/F"), Some("south/F")]);
    }

    #[test]
    fn test_levels_containing_the_separator_stay_apart() {
        let catalog = UnitCatalog::builder()
            .numeric("x")
            .categorical("a")
            .categorical("b")
            .unit("t1", true, vec![1.0.into(), "x/y".into(), "z".into()])
            .unit("t2", true, vec![2.0.into(), "x".into(), "y/z".into()])
            .unit("c1", false, vec![1.0.into(), "x".into(), "y/z".into()])
            .unit("c2", false, vec![2.0.into(), "x/y".into(), "z".into()])
            .build()
            .unwrap();
        let base = base(&catalog);

        let constrained = ConstraintApplier::apply(
            &catalog,
            &base,
            &[Constraint::exact_match("a"), Constraint::exact_match("b")],
        )
        .unwrap();

        // Both level tuples would read "x/y/z" if simply joined
        let matrix = constrained.matrix();
        assert!(matrix.is_forbidden(0, 0));
        assert!(!matrix.is_forbidden(0, 1));
        assert!(!matrix.is_forbidden(1, 0));
        assert!(matrix.is_forbidden(1, 1));

        let blocks = constrained.blocks();
        assert_eq!(blocks.len(), 2);
        assert_ne!(blocks[0].key(), blocks[1].key());
        assert_eq!(blocks[0].key(), Some("x/y\\/z"));
        assert_eq!(blocks[1].key(), Some("x\\/y/z"));
    }

    #[test]
    fn test_key_labels_escape_separators() {
        assert_eq!(key_label(&["north", "F"]), "north/F");
        assert_eq!(key_label(&["x/y", "z"]), "x\\/y/z");
        assert_eq!(key_label(&["x", "y/z"]), "x/y\\/z");
        assert_eq!(key_label(&["a\\", "b"]), "a\\\\/b");
        assert_ne!(key_label(&["a\\/", "b"]), key_label(&["a", "/b"]));
    }

    #[test]
    fn test_signed_zero_shares_a_block() {
        let catalog = UnitCatalog::builder()
            .numeric("x")
            .numeric("dose")
            .unit("t1", true, vec![1.0.into(), (-0.0).into()])
            .unit("c1", false, vec![2.0.into(), 0.0.into()])
            .unit("c2", false, vec![3.0.into(), 1.0.into()])
            .build()
            .unwrap();
        let base = base(&catalog);

        let constrained =
            ConstraintApplier::apply(&catalog, &base, &[Constraint::exact_match("dose")]);
        // Dose 1 has no treated unit, but -0 and 0 land in the same block
        match constrained.unwrap_err() {
            MatchError::EmptyBlock {
                key,
                treated,
                controls,
            } => {
                assert_eq!(key, "1");
                assert_eq!(treated, 0);
                assert_eq!(controls, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_block_is_reported() {
        let catalog = sexed_catalog(&[(0.0, "F"), (1.0, "M")], &[(2.0, "F"), (3.0, "F")]);
        let base = base(&catalog);

        let err = ConstraintApplier::apply(&catalog, &base, &[Constraint::exact_match("sex")])
            .unwrap_err();
        match err {
            MatchError::EmptyBlock {
                key,
                treated,
                controls,
            } => {
                assert_eq!(key, "M");
                assert_eq!(treated, 1);
                assert_eq!(controls, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_caliper_shape_must_match() {
        let catalog = line_catalog(&[0.0, 1.0], &[1.0, 2.0]);
        let base = base(&catalog);
        let other = base.submatrix(&[0], &[0, 1]);

        let err = ConstraintApplier::apply(&catalog, &base, &[Constraint::caliper(other, 1.0)])
            .unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_negative_caliper_is_rejected() {
        let catalog = line_catalog(&[0.0], &[1.0]);
        let base = base(&catalog);

        let err = ConstraintApplier::apply(&catalog, &base, &[Constraint::caliper(base.clone(), -1.0)])
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_exact_match_covariate() {
        let catalog = line_catalog(&[0.0], &[1.0]);
        let base = base(&catalog);

        let err = ConstraintApplier::apply(&catalog, &base, &[Constraint::exact_match("sex")])
            .unwrap_err();
        assert!(matches!(err, MatchError::UnknownCovariate(name) if name == "sex"));
    }
}
