//! Pairwise similarity and distance properties.

use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

use isoforest_rs::{
    calc_similarity, fit_iforest, predict_iforest, tmat_to_dense, InputData, ModelParams,
    PredictionData,
};

fn two_clusters(n_per: usize) -> Array2<f64> {
    let n = 2 * n_per;
    let noise = Array2::random((n, 2), Normal::new(0.0, 0.05).unwrap());
    let mut x = Array2::zeros((n, 2));
    for i in 0..n_per {
        x[[i, 0]] = noise[[i, 0]];
        x[[i, 1]] = noise[[i, 1]];
        x[[n_per + i, 0]] = 8.0 + noise[[n_per + i, 0]];
        x[[n_per + i, 1]] = 8.0 + noise[[n_per + i, 1]];
    }
    x
}

#[test]
fn dense_distance_matrix_shape_and_bounds() {
    let x = two_clusters(30);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let params = ModelParams {
        ntrees: 60,
        sample_size: 0,
        random_seed: 10,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();

    let data = PredictionData::from_dense(Some(x.view()), None).unwrap();
    let tmat = calc_similarity(&out.model, &data, true, true, 0).unwrap();
    assert_eq!(tmat.len(), 60 * 59 / 2);
    let dense = tmat_to_dense(&tmat, 60, true);

    for i in 0..60 {
        assert_eq!(dense[[i, i]], 1.0);
        for j in 0..60 {
            assert_eq!(dense[[i, j]], dense[[j, i]]);
            assert!((0.0..=1.0).contains(&dense[[i, j]]));
        }
    }
}

#[test]
fn within_cluster_pairs_are_closer_than_across() {
    let x = two_clusters(25);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let params = ModelParams {
        ntrees: 100,
        sample_size: 0,
        random_seed: 15,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();
    let data = PredictionData::from_dense(Some(x.view()), None).unwrap();
    // distances: larger across clusters
    let tmat = calc_similarity(&out.model, &data, true, true, 0).unwrap();
    let dense = tmat_to_dense(&tmat, 50, true);

    let mut within = 0.0;
    let mut n_within = 0.0;
    let mut across = 0.0;
    let mut n_across = 0.0;
    for i in 0..50 {
        for j in (i + 1)..50 {
            let same = (i < 25) == (j < 25);
            if same {
                within += dense[[i, j]];
                n_within += 1.0;
            } else {
                across += dense[[i, j]];
                n_across += 1.0;
            }
        }
    }
    assert!(within / n_within < across / n_across);
}

#[test]
fn on_the_fly_training_tmat_matches_shape_and_bounds() {
    let x = two_clusters(20);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let params = ModelParams {
        ntrees: 30,
        sample_size: 0,
        calc_dist: true,
        standardize_dist: false,
        random_seed: 20,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();
    let tmat = out.tmat.unwrap();
    assert_eq!(tmat.len(), 40 * 39 / 2);
    for &v in &tmat {
        assert!((0.0..=1.0).contains(&v));
    }

    // similarities: within-cluster pairs higher than across
    let dense = tmat_to_dense(&tmat, 40, true);
    let within = dense[[0, 1]] + dense[[20, 21]];
    let across = dense[[0, 20]] + dense[[1, 21]];
    assert!(within > across);
}

#[test]
fn retrospective_similarity_agrees_with_depth_intuition() {
    // similarity of a row with itself (duplicated) is the maximum
    let mut x = two_clusters(15);
    for j in 0..2 {
        x[[1, j]] = x[[0, j]];
    }
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let params = ModelParams {
        ntrees: 80,
        sample_size: 0,
        random_seed: 30,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();
    let data = PredictionData::from_dense(Some(x.view()), None).unwrap();
    let tmat = calc_similarity(&out.model, &data, true, false, 0).unwrap();
    let dense = tmat_to_dense(&tmat, 30, true);

    // the duplicated pair never separates before a leaf, so its
    // similarity dominates every other pair involving row 0
    for j in 2..30 {
        assert!(dense[[0, 1]] >= dense[[0, j]]);
    }

    // sanity: predictions still work on the same model
    let pred = predict_iforest(&out.model, &data, true, 0, false).unwrap();
    assert_eq!(pred.depths.len(), 30);
}
