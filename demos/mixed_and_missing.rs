//! Mixed numeric + categorical data with missing values: fit under the
//! Divide policy, score rows with holes in them, and print a small
//! pairwise distance matrix.
//!
//! Run with: cargo run --example mixed_and_missing

use isoforest_rs::{
    fit_iforest, predict_iforest, tmat_to_dense, InputData, ModelParams, PredictionData,
};
use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

fn main() {
    let n = 600;
    let mut numeric = Array2::random((n, 2), Normal::new(0.0, 1.0).unwrap());
    let mut categ = Array2::zeros((n, 1));
    for i in 0..n {
        categ[[i, 0]] = (i % 3) as i32;
        if i % 17 == 0 {
            numeric[[i, 0]] = f64::NAN; // missing
        }
    }
    // one rare category and one far-out numeric row
    categ[[n - 1, 0]] = 2;
    numeric[[n - 1, 0]] = 14.0;
    numeric[[n - 1, 1]] = -14.0;

    let ncat = [3i32];
    let input = InputData::from_dense(Some(numeric.view()), Some(categ.view()), &ncat)
        .expect("bad input");

    let params = ModelParams {
        ntrees: 150,
        sample_size: 256,
        random_seed: 7,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).expect("fitting failed");
    println!("built {} trees", out.trees_built);

    let data = PredictionData::from_dense(Some(numeric.view()), Some(categ.view()))
        .expect("bad prediction data");
    let pred = predict_iforest(&out.model, &data, true, 0, false).expect("prediction failed");
    println!("score of the planted outlier: {:.4}", pred.depths[n - 1]);
    println!("median-ish inlier score:      {:.4}", pred.depths[n / 2]);

    // distances between the first few rows
    let head_num = numeric.slice(ndarray::s![0..5, ..]).to_owned();
    let head_cat = categ.slice(ndarray::s![0..5, ..]).to_owned();
    let head = PredictionData::from_dense(Some(head_num.view()), Some(head_cat.view()))
        .expect("bad prediction data");
    let tmat =
        isoforest_rs::calc_similarity(&out.model, &head, true, true, 0).expect("similarity failed");
    let dense = tmat_to_dense(&tmat, 5, true);
    println!("pairwise distances over the first 5 rows:");
    for i in 0..5 {
        let row: Vec<String> = (0..5).map(|j| format!("{:.3}", dense[[i, j]])).collect();
        println!("  {}", row.join("  "));
    }
}
