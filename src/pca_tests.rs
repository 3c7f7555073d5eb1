use crate::components::variance_threshold_percent;
use crate::error::RobustPcaError;
use crate::options::{PcaOptions, SubsetSpec};
use crate::pca::{robust_pca, RobustPca};
use crate::result::RobustPcaResult;
use crate::subset::OutlierDetector;

use approx::assert_abs_diff_eq;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const TOL: f64 = 1e-9;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// n x v data driven by two latent factors plus independent noise.
fn generate_factor_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let factors = Array2::random_using((n_samples, 2), normal, &mut rng);
    let weights = Array2::random_using((2, n_features), normal, &mut rng);
    let noise = Array2::random_using((n_samples, n_features), normal, &mut rng);
    let offsets = Array1::from_shape_fn(n_features, |j| 10.0 * j as f64);
    factors.dot(&weights) + noise * 0.5 + &offsets
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let ma = a.mean().unwrap();
    let mb = b.mean().unwrap();
    let da = a.mapv(|x| x - ma);
    let db = b.mapv(|x| x - mb);
    da.dot(&db) / (da.dot(&da).sqrt() * db.dot(&db).sqrt())
}

fn assert_matrices_close(a: ArrayView2<f64>, b: ArrayView2<f64>, tol: f64, context: &str) {
    assert_eq!(a.dim(), b.dim(), "shape mismatch for {}", context);
    for ((idx, x), y) in a.indexed_iter().zip(b.iter()) {
        assert!((x - y).abs() < tol, "{} differs at {:?}: {} vs {}", context, idx, x, y);
    }
}

fn assert_vectors_close(a: ArrayView1<f64>, b: ArrayView1<f64>, tol: f64, context: &str) {
    assert_eq!(a.len(), b.len(), "length mismatch for {}", context);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() < tol, "{} differs at {}: {} vs {}", context, i, x, y);
    }
}

fn expected_component_count(result: &RobustPcaResult) -> usize {
    let v = result.eigenvalues.len();
    let threshold = variance_threshold_percent(v);
    let first = result
        .explained_variance
        .column(2)
        .iter()
        .position(|&c| c > threshold)
        .map(|i| i + 1)
        .unwrap_or(v);
    if first == 1 && v > 1 {
        2
    } else {
        first
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn default_run_on_six_variables() {
        init_logging();
        let x = generate_factor_data(100, 6, 42);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();

        assert!(!result.robust);
        assert_eq!(result.n_subset(), 100);
        assert_eq!(result.covariance.dim(), (6, 6));
        for j in 0..6 {
            assert_abs_diff_eq!(result.covariance[[j, j]], 1.0, epsilon = TOL);
        }
        assert_eq!(result.num_components, expected_component_count(&result));
        assert_eq!(result.orthogonal_distance.len(), 100);
        assert_eq!(result.score_distance.len(), 100);
        assert!(result.orthogonal_distance.iter().all(|d| d.is_finite() && *d >= 0.0));
        assert!(result.score_distance.iter().all(|d| d.is_finite() && *d >= 0.0));
        assert_eq!(result.scores.dim(), (100, result.num_components));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn covariance_mode_keeps_subset_variances_on_the_diagonal() {
        let x = generate_factor_data(100, 6, 7);
        let result = robust_pca(x.view(), &PcaOptions::new().with_standardize(false)).unwrap();
        let variances = x.var_axis(Axis(0), 1.0);
        for j in 0..6 {
            assert_abs_diff_eq!(result.covariance[[j, j]], variances[j], epsilon = 1e-8);
        }
        assert!(variances.iter().any(|v| (v - 1.0).abs() > 1e-3));
        assert_eq!(result.scale, Array1::<f64>::ones(6));
    }

    #[test]
    fn retained_eigenvectors_are_orthonormal_and_trace_matches() {
        let x = generate_factor_data(80, 5, 3);
        let mut mask = vec![true; 80];
        for i in (0..80).step_by(7) {
            mask[i] = false;
        }
        for k in 1..=5 {
            let opts = PcaOptions::new()
                .with_num_components(k)
                .with_bsb(SubsetSpec::Mask(mask.clone()));
            let result = robust_pca(x.view(), &opts).unwrap();
            let gram = result.eigenvectors.t().dot(&result.eigenvectors);
            assert_matrices_close(gram.view(), Array2::<f64>::eye(k).view(), 1e-10, "V_k^T V_k");
            let trace = result.covariance.diag().sum();
            assert_abs_diff_eq!(result.eigenvalues.sum(), trace, epsilon = 1e-9);
        }
    }

    #[test]
    fn explained_variance_table_is_well_formed() {
        let x = generate_factor_data(60, 4, 11);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        let table = &result.explained_variance;
        assert_eq!(table.dim(), (4, 3));
        assert!(table.column(1).iter().all(|&p| p >= 0.0));
        assert_abs_diff_eq!(table.column(1).sum(), 100.0, epsilon = 1e-9);
        for i in 1..4 {
            assert!(table[[i, 2]] >= table[[i - 1, 2]]);
        }
        assert_vectors_close(table.column(0), result.eigenvalues.view(), 1e-12, "eigenvalue column");
    }

    #[test]
    fn loadings_equal_variable_score_correlations() {
        for standardize in [true, false] {
            let x = generate_factor_data(90, 5, 19);
            let mut mask = vec![true; 90];
            mask[4] = false;
            mask[50] = false;
            let opts = PcaOptions::new()
                .with_standardize(standardize)
                .with_num_components(3)
                .with_bsb(SubsetSpec::Mask(mask));
            let result = robust_pca(x.view(), &opts).unwrap();
            let rows = (0..90).filter(|&i| result.subset_mask[i]).collect::<Vec<_>>();
            let xs = x.select(Axis(0), &rows);
            let ss = result.scores.select(Axis(0), &rows);
            for j in 0..5 {
                for i in 0..3 {
                    let r = pearson(xs.column(j), ss.column(i));
                    assert_abs_diff_eq!(r, result.loadings[[j, i]], epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn communalities_follow_the_documented_layout() {
        let x = generate_factor_data(70, 5, 23);
        let result = robust_pca(x.view(), &PcaOptions::new().with_num_components(3)).unwrap();
        assert_eq!(result.communalities.dim(), (5, 5));
        let squared = result.loadings.mapv(|l| l * l);
        assert_matrices_close(
            result.communalities.slice(s![.., ..3]),
            squared.view(),
            1e-12,
            "individual communalities",
        );
        let cum2 = &squared.column(0) + &squared.column(1);
        let cum3 = &cum2 + &squared.column(2);
        assert_vectors_close(result.communalities.column(3), cum2.view(), 1e-12, "cumulative 1..2");
        assert_vectors_close(result.communalities.column(4), cum3.view(), 1e-12, "cumulative 1..3");

        let single = robust_pca(x.view(), &PcaOptions::new().with_num_components(1)).unwrap();
        assert_eq!(single.communalities.dim(), (5, 1));
    }

    #[test]
    fn full_rank_fit_has_zero_orthogonal_distance() {
        let x = generate_factor_data(50, 4, 5);
        let result = robust_pca(x.view(), &PcaOptions::new().with_num_components(4)).unwrap();
        for d in result.orthogonal_distance.iter() {
            assert_abs_diff_eq!(*d, 0.0, epsilon = 1e-9);
        }
        // With every component retained, the communality of each standardized variable is one.
        for j in 0..4 {
            assert_abs_diff_eq!(result.communalities[[j, 6]], 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn dominant_first_component_is_promoted_to_two() {
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let f = Array2::random_using((100, 1), normal, &mut rng);
        let noise = Array2::random_using((100, 5), normal, &mut rng);
        let x = &f.dot(&Array2::<f64>::ones((1, 5))) + &(noise * 0.1);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        assert!(result.explained_variance[[0, 2]] > variance_threshold_percent(5));
        assert_eq!(result.num_components, 2);
        assert!(result.components_promoted);
    }

    #[test]
    fn single_variable_keeps_one_component() {
        let x = generate_factor_data(30, 1, 8);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        assert_eq!(result.num_components, 1);
        assert_eq!(result.communalities.dim(), (1, 1));
        assert!(!result.components_promoted);
    }
}

#[cfg(test)]
mod subset_tests {
    use super::*;

    struct StubDetector(Vec<usize>);

    impl OutlierDetector for StubDetector {
        fn detect_outliers(
            &self,
            _data: ArrayView2<f64>,
            bdp: f64,
            confidence_level: f64,
        ) -> crate::error::Result<Vec<usize>> {
            assert!(bdp > 0.0 && bdp <= 0.5);
            assert!(confidence_level > 0.99);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn excluded_row_is_projected_but_does_not_shape_the_fit() {
        let x = generate_factor_data(100, 6, 13);
        let mut mask = vec![true; 100];
        mask[13] = false;
        let masked = robust_pca(x.view(), &PcaOptions::new().with_bsb(SubsetSpec::Mask(mask))).unwrap();

        assert!(masked.robust);
        assert!(!masked.subset_mask[13]);
        assert_eq!(masked.scores.nrows(), 100);
        assert_eq!(masked.orthogonal_distance.len(), 100);
        assert_eq!(masked.score_distance.len(), 100);
        assert_eq!(masked.excluded_rows(), vec![13]);

        let others: Vec<usize> = (0..100).filter(|&i| i != 13).collect();
        let reduced = x.select(Axis(0), &others);
        let reference = robust_pca(reduced.view(), &PcaOptions::default()).unwrap();

        assert_eq!(masked.num_components, reference.num_components);
        assert_vectors_close(masked.eigenvalues.view(), reference.eigenvalues.view(), TOL, "eigenvalues");
        assert_matrices_close(masked.eigenvectors.view(), reference.eigenvectors.view(), TOL, "eigenvectors");
        assert_matrices_close(masked.loadings.view(), reference.loadings.view(), TOL, "loadings");
        assert_matrices_close(masked.communalities.view(), reference.communalities.view(), TOL, "communalities");
        assert_matrices_close(
            masked.scores.select(Axis(0), &others).view(),
            reference.scores.view(),
            TOL,
            "scores of fitting rows",
        );

        // Moving the excluded row leaves the fit untouched.
        let mut shifted = x.clone();
        shifted.row_mut(13).mapv_inplace(|v| v * 50.0 + 1e3);
        let mut mask = vec![true; 100];
        mask[13] = false;
        let shifted_fit = robust_pca(shifted.view(), &PcaOptions::new().with_bsb(SubsetSpec::Mask(mask))).unwrap();
        assert_vectors_close(shifted_fit.eigenvalues.view(), masked.eigenvalues.view(), TOL, "eigenvalues");
        assert!(shifted_fit.orthogonal_distance[13] + shifted_fit.score_distance[13]
            > masked.orthogonal_distance[13] + masked.score_distance[13]);
    }

    #[test]
    fn index_list_and_mask_give_identical_fits() {
        let x = generate_factor_data(40, 3, 2);
        let indices: Vec<usize> = (0..40).filter(|i| i % 5 != 0).collect();
        let mask: Vec<bool> = (0..40).map(|i| i % 5 != 0).collect();
        let a = robust_pca(x.view(), &PcaOptions::new().with_bsb(SubsetSpec::Indices(indices))).unwrap();
        let b = robust_pca(x.view(), &PcaOptions::new().with_bsb(SubsetSpec::Mask(mask))).unwrap();
        assert_eq!(a.subset_mask, b.subset_mask);
        assert_matrices_close(a.scores.view(), b.scores.view(), 1e-12, "scores");
    }

    #[test]
    fn breakdown_point_excludes_planted_outliers() {
        init_logging();
        let mut x = generate_factor_data(100, 6, 99);
        let planted = [5, 21, 48, 73, 94];
        for &i in &planted {
            x.row_mut(i).mapv_inplace(|v| v + 60.0);
        }
        let robust = robust_pca(x.view(), &PcaOptions::new().with_bdp(0.4)).unwrap();
        assert!(robust.robust);
        for &i in &planted {
            assert!(!robust.subset_mask[i], "planted outlier {} kept in the subset", i);
        }

        let mask: Vec<bool> = robust.subset_mask.to_vec();
        let explicit = robust_pca(x.view(), &PcaOptions::new().with_bsb(SubsetSpec::Mask(mask))).unwrap();
        assert_eq!(robust.num_components, explicit.num_components);
        assert_vectors_close(robust.eigenvalues.view(), explicit.eigenvalues.view(), 1e-12, "eigenvalues");
        assert_matrices_close(robust.loadings.view(), explicit.loadings.view(), 1e-12, "loadings");
        assert_vectors_close(
            robust.orthogonal_distance.view(),
            explicit.orthogonal_distance.view(),
            1e-12,
            "orthogonal distance",
        );

        // The planted rows stand out in the robust fit.
        let clean_max = |d: &Array1<f64>| {
            (0..100)
                .filter(|i| !planted.contains(i))
                .map(|i| d[i])
                .fold(0.0_f64, f64::max)
        };
        let max_od = clean_max(&robust.orthogonal_distance);
        let max_sd = clean_max(&robust.score_distance);
        for &i in &planted {
            assert!(robust.orthogonal_distance[i] > max_od || robust.score_distance[i] > max_sd);
        }
    }

    #[test]
    fn rows_off_a_majority_hyperplane_are_trimmed() {
        // 70 of 100 rows satisfy x2 = x0 + x1 exactly; the other 30 do not.
        let mut rng = ChaCha8Rng::seed_from_u64(55);
        let normal = Normal::<f64>::new(0.0, 1.0).unwrap();
        let mut x = Array2::random_using((100, 3), normal, &mut rng);
        let shifts = Array1::random_using(100, normal, &mut rng);
        let off_plane: Vec<usize> = (0..100).filter(|i| i % 10 < 3).collect();
        for i in 0..100 {
            let on_plane = x[[i, 0]] + x[[i, 1]];
            x[[i, 2]] = on_plane;
            if off_plane.contains(&i) {
                x[[i, 2]] += shifts[i] + shifts[i].signum();
            }
        }

        let classical = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        assert!(!classical.robust);

        let trimmed = robust_pca(x.view(), &PcaOptions::new().with_bdp(0.5)).unwrap();
        assert!(trimmed.robust);
        assert_eq!(trimmed.excluded_rows(), off_plane);
        assert_eq!(trimmed.num_components, 2);
        for &i in &off_plane {
            assert!(trimmed.orthogonal_distance[i] > 1e-3);
        }
        for i in (0..100).filter(|i| !off_plane.contains(i)) {
            assert_abs_diff_eq!(trimmed.orthogonal_distance[i], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn majority_constant_column_reports_zero_variance_after_trimming() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut x = Array2::random_using((100, 3), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        for i in 0..100 {
            if i % 10 < 7 {
                x[[i, 2]] = 0.0;
            } else {
                let value: f64 = x[[i, 2]];
                x[[i, 2]] = value + value.signum();
            }
        }
        assert!(robust_pca(x.view(), &PcaOptions::default()).is_ok());
        match robust_pca(x.view(), &PcaOptions::new().with_bdp(0.5)) {
            Err(RobustPcaError::ZeroVariance { column }) => assert_eq!(column, 2),
            other => panic!("expected ZeroVariance, got {:?}", other.map(|r| r.excluded_rows())),
        }
    }

    #[test]
    fn injected_detector_controls_the_subset() {
        let x = generate_factor_data(30, 3, 4);
        let runner = RobustPca::new(PcaOptions::new().with_bdp(0.25)).with_outlier_detector(StubDetector(vec![0, 29]));
        let result = runner.fit(x.view()).unwrap();
        assert!(result.robust);
        assert_eq!(result.excluded_rows(), vec![0, 29]);
        assert_eq!(result.n_subset(), 28);
    }

    #[test]
    fn detector_is_not_consulted_without_bdp() {
        let x = generate_factor_data(30, 3, 4);
        let runner = RobustPca::new(PcaOptions::default()).with_outlier_detector(StubDetector(vec![1, 2, 3]));
        let result = runner.fit(x.view()).unwrap();
        assert!(!result.robust);
        assert_eq!(result.n_subset(), 30);
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn bdp_with_bsb_fails_before_looking_at_the_data() {
        let empty = Array2::<f64>::zeros((0, 0));
        for bdp in [0.05, 0.3, 0.5] {
            let opts = PcaOptions {
                bdp: Some(bdp),
                bsb: Some(SubsetSpec::Indices(vec![0])),
                ..PcaOptions::default()
            };
            let err = robust_pca(empty.view(), &opts).unwrap_err();
            assert!(matches!(err, RobustPcaError::MutuallyExclusiveOptions { .. }));
            assert!(err.is_configuration_error());
        }
    }

    #[test]
    fn constant_column_cannot_be_standardized() {
        let mut x = generate_factor_data(20, 3, 1);
        x.column_mut(1).fill(4.0);
        match robust_pca(x.view(), &PcaOptions::default()) {
            Err(RobustPcaError::ZeroVariance { column }) => assert_eq!(column, 1),
            other => panic!("expected ZeroVariance, got {:?}", other.map(|r| r.num_components)),
        }
    }

    #[test]
    fn subset_with_no_more_rows_than_variables_is_rejected() {
        let x = generate_factor_data(20, 4, 1);
        let opts = PcaOptions::new().with_bsb(SubsetSpec::Indices(vec![0, 1, 2, 3]));
        assert!(matches!(
            robust_pca(x.view(), &opts),
            Err(RobustPcaError::SubsetTooSmall { selected: 4, required: 5 })
        ));
    }

    #[test]
    fn requesting_a_zero_variance_component_fails_cleanly() {
        // The third variable is an exact combination of the first two.
        let base = generate_factor_data(30, 2, 6);
        let mut x = Array2::<f64>::zeros((30, 3));
        x.slice_mut(s![.., ..2]).assign(&base);
        let combo = &base.column(0) + &base.column(1);
        x.column_mut(2).assign(&combo);
        let err = robust_pca(x.view(), &PcaOptions::new().with_num_components(3).with_standardize(false)).unwrap_err();
        assert!(matches!(err, RobustPcaError::DegenerateInput(_)));
    }

    #[test]
    fn too_many_components_is_a_configuration_error() {
        let x = generate_factor_data(20, 3, 1);
        let err = robust_pca(x.view(), &PcaOptions::new().with_num_components(4)).unwrap_err();
        assert!(err.is_configuration_error());
    }
}

#[cfg(test)]
mod cleaning_tests {
    use super::*;

    #[test]
    fn non_finite_rows_are_dropped_before_fitting() {
        let mut x = generate_factor_data(50, 3, 12);
        x[[3, 0]] = f64::NAN;
        x[[10, 2]] = f64::INFINITY;
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        assert_eq!(result.n_input_rows, 50);
        assert_eq!(result.kept_rows.len(), 48);
        assert!(!result.kept_rows.contains(&3) && !result.kept_rows.contains(&10));
        assert_eq!(result.scores.nrows(), 48);
        assert!(result.scores.iter().all(|v| v.is_finite()));
        assert!(result.loadings.iter().all(|v| v.is_finite()));

        let clean = x.select(Axis(0), &result.kept_rows);
        let reference = robust_pca(clean.view(), &PcaOptions::default()).unwrap();
        assert_vectors_close(result.eigenvalues.view(), reference.eigenvalues.view(), TOL, "eigenvalues");
    }

    #[test]
    fn explicit_subset_refers_to_input_rows() {
        let mut x = generate_factor_data(30, 2, 12);
        x[[0, 1]] = f64::NAN;
        let mut mask = vec![true; 30];
        mask[5] = false;
        let result = robust_pca(x.view(), &PcaOptions::new().with_bsb(SubsetSpec::Mask(mask))).unwrap();
        assert_eq!(result.excluded_rows(), vec![5]);
        assert_eq!(result.n_subset(), 28);
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;
    use crate::data::LabelledMatrix;
    use tempfile::NamedTempFile;

    #[test]
    fn projecting_the_training_data_reproduces_the_fit() {
        let x = generate_factor_data(60, 4, 31);
        let result = robust_pca(x.view(), &PcaOptions::new().with_num_components(2)).unwrap();
        let projected = result.project(x.view()).unwrap();
        assert_matrices_close(projected.scores.view(), result.scores.view(), 1e-10, "scores");
        assert_vectors_close(
            projected.orthogonal_distance.view(),
            result.orthogonal_distance.view(),
            1e-10,
            "orthogonal distance",
        );
        assert_vectors_close(projected.score_distance.view(), result.score_distance.view(), 1e-10, "score distance");
        assert!(result.project(x.slice(s![.., ..3])).is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let x = generate_factor_data(40, 3, 17);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        let file = NamedTempFile::new().unwrap();
        result.save_model(file.path()).unwrap();
        let loaded = RobustPcaResult::load_model(file.path()).unwrap();
        assert_eq!(loaded.num_components, result.num_components);
        assert_eq!(loaded.kept_rows, result.kept_rows);
        assert_matrices_close(loaded.loadings.view(), result.loadings.view(), 1e-15, "loadings");
        assert_vectors_close(loaded.score_distance.view(), result.score_distance.view(), 1e-15, "score distance");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_on_flush_is_reported() {
        // /dev/full accepts the open but fails every write with ENOSPC; a small
        // model fits in the write buffer, so the failure surfaces on flush.
        let x = generate_factor_data(20, 3, 17);
        let result = robust_pca(x.view(), &PcaOptions::default()).unwrap();
        assert!(matches!(
            result.save_model("/dev/full"),
            Err(RobustPcaError::Persistence(_))
        ));
    }

    #[test]
    fn loading_garbage_is_a_persistence_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a model").unwrap();
        assert!(matches!(
            RobustPcaResult::load_model(file.path()),
            Err(RobustPcaError::Persistence(_))
        ));
    }

    #[test]
    fn labels_follow_kept_rows() {
        let mut x = generate_factor_data(25, 3, 3);
        x[[2, 1]] = f64::NAN;
        let table = LabelledMatrix::with_default_names(x);
        let mut mask = vec![true; 25];
        mask[7] = false;
        let labelled = RobustPca::new(PcaOptions::new().with_bsb(SubsetSpec::Mask(mask)))
            .fit_labelled(&table)
            .unwrap();
        assert_eq!(labelled.row_names.len(), 24);
        assert!(!labelled.row_names.iter().any(|n| n == "Obs3"));
        assert_eq!(labelled.excluded_row_names(), vec!["Obs8"]);
        assert_eq!(labelled.column_names, vec!["X1", "X2", "X3"]);
        assert_eq!(labelled.component_names().len(), labelled.result.num_components);
    }
}
