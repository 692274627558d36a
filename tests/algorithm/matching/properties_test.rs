#[cfg(test)]
mod tests {
    use crate::utils::{
        absolute_config, assert_close, brute_force_full_cost, brute_force_pair_cost, line_catalog,
    };
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rustc_hash::FxHashSet;
    use stratamatch::{Assignment, CaliperSpec, MatchError, MatchMode, Matcher};

    fn random_line(rng: &mut StdRng, n: usize) -> Vec<f64> {
        // Coarse grid so that ties between pairings actually occur
        (0..n).map(|_| f64::from(rng.random_range(0..40_i32)) / 4.0).collect()
    }

    #[test]
    fn test_pair_matching_is_optimal_on_small_instances() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..60 {
            let n_treated = rng.random_range(1..=4);
            let n_controls = rng.random_range(n_treated..=6);
            let treated = random_line(&mut rng, n_treated);
            let controls = random_line(&mut rng, n_controls);
            let catalog = line_catalog(&treated, &controls);

            let result = Matcher::new(absolute_config(MatchMode::Pair))
                .perform_matching(&catalog)
                .unwrap();
            assert_close(
                result.design.objective(),
                brute_force_pair_cost(&treated, &controls),
                1e-9,
            );
        }
    }

    #[test]
    fn test_full_matching_is_optimal_on_small_instances() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..40 {
            let n_treated = rng.random_range(1..=3);
            let n_controls = rng.random_range(n_treated..=6);
            let max_controls = rng.random_range(1..=3);
            let min_controls = rng.random_range(1..=max_controls);
            if n_treated * min_controls > n_controls {
                continue;
            }
            let treated = random_line(&mut rng, n_treated);
            let controls = random_line(&mut rng, n_controls);
            let catalog = line_catalog(&treated, &controls);
            let mode = MatchMode::Full {
                min_controls,
                max_controls,
            };

            let result = Matcher::new(absolute_config(mode))
                .perform_matching(&catalog)
                .unwrap();
            assert_close(
                result.design.objective(),
                brute_force_full_cost(&treated, &controls, min_controls, max_controls),
                1e-9,
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_every_unit_has_one_assignment(
            treated in prop::collection::vec(0.0..100.0_f64, 1..6),
            extra in prop::collection::vec(0.0..100.0_f64, 0..6),
            max_controls in 1_usize..4,
        ) {
            let controls: Vec<f64> = treated.iter().map(|x| x + 1.0).chain(extra).collect();
            let catalog = line_catalog(&treated, &controls);
            let mode = MatchMode::Full { min_controls: 1, max_controls };

            let design = Matcher::new(absolute_config(mode))
                .perform_matching(&catalog)
                .unwrap()
                .design;

            prop_assert_eq!(design.assignments().len(), catalog.len());

            let mut seen = FxHashSet::default();
            let mut objective = 0.0;
            for stratum in design.strata() {
                prop_assert_eq!(stratum.treated.len(), 1);
                prop_assert!((1..=max_controls).contains(&stratum.controls.len()));
                for id in stratum.treated.iter().chain(&stratum.controls) {
                    prop_assert!(seen.insert(id.clone()), "unit {} placed twice", id);
                    prop_assert_eq!(
                        design.assignment(id),
                        Some(&Assignment::Stratum(stratum.id.clone()))
                    );
                }
                objective += stratum.distance;
            }
            for id in design.excluded() {
                prop_assert!(!seen.contains(id));
                prop_assert_eq!(design.assignment(id), Some(&Assignment::Excluded));
            }
            prop_assert!((design.objective() - objective).abs() < 1e-9);
        }

        #[test]
        fn prop_tightening_a_caliper_never_lowers_the_objective(
            treated in prop::collection::vec(0.0..20.0_f64, 1..5),
            controls in prop::collection::vec(0.0..20.0_f64, 5..8),
            loose in 2.0..20.0_f64,
            shrink in 0.1..1.0_f64,
        ) {
            let catalog = line_catalog(&treated, &controls);
            let run = |threshold: f64| {
                let mut config = absolute_config(MatchMode::Pair);
                config.calipers.push(CaliperSpec::on_base(threshold));
                Matcher::new(config).perform_matching(&catalog).map(|r| r.design.objective())
            };

            match (run(loose), run(loose * shrink)) {
                (Ok(wide), Ok(narrow)) => prop_assert!(narrow >= wide - 1e-9),
                (Err(MatchError::Infeasible { .. }), Ok(_)) => {
                    prop_assert!(false, "narrower caliper solved where the wider one failed");
                }
                (_, Err(MatchError::Infeasible { .. })) | (Err(MatchError::Infeasible { .. }), _) => {}
                (Err(other), _) | (_, Err(other)) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
