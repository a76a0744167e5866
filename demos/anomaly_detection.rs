//! Basic anomaly detection on a numeric dataset: fit a forest, score the
//! training rows and print the most anomalous ones.
//!
//! Run with: cargo run --example anomaly_detection

use isoforest_rs::IsolationForest;
use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

fn main() {
    let n = 1000;
    let mut x = Array2::random((n + 3, 2), Normal::new(0.0, 1.0).unwrap());
    // plant three obvious outliers
    for (k, &(a, b)) in [(8.0, 8.0), (-9.0, 7.5), (10.0, -10.0)].iter().enumerate() {
        x[[n + k, 0]] = a;
        x[[n + k, 1]] = b;
    }

    let mut model = IsolationForest::new(100, 256);
    model.params.random_seed = 42;
    model.fit(x.view()).expect("fitting failed");

    let scores = model.score_samples(x.view()).expect("scoring failed");

    let mut ranked: Vec<(usize, f64)> = scores.iter().cloned().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    println!("top 5 anomalies (row, score, coordinates):");
    for &(row, score) in ranked.iter().take(5) {
        println!(
            "  row {:4}  score {:.4}  ({:+.2}, {:+.2})",
            row,
            score,
            x[[row, 0]],
            x[[row, 1]]
        );
    }

    let planted: Vec<usize> = ranked.iter().take(3).map(|&(r, _)| r).collect();
    println!(
        "planted outliers recovered in the top 3: {}",
        planted.iter().all(|&r| r >= n)
    );
}
