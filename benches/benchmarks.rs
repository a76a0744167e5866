//! Benchmarks for forest construction, prediction and similarity.
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- fit_forest

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

use isoforest_rs::{
    calc_similarity, fit_iforest, predict_iforest, InputData, MissingAction, ModelParams,
    PredictionData,
};

// ============================================================================
// Data Generation Utilities
// ============================================================================

/// Gaussian bulk plus a sprinkling of inflated outliers
fn generate_anomaly_data(n_samples: usize, n_features: usize) -> Array2<f64> {
    let mut x = Array2::random((n_samples, n_features), Normal::new(0.0, 1.0).unwrap());
    for i in (0..n_samples).step_by(97) {
        for j in 0..n_features {
            x[[i, j]] *= 12.0;
        }
    }
    x
}

fn base_params(ntrees: usize) -> ModelParams {
    ModelParams {
        ntrees,
        sample_size: 256,
        random_seed: 1,
        nthreads: 1,
        ..ModelParams::default()
    }
}

// ============================================================================
// Fitting
// ============================================================================

fn bench_fit_forest(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_forest");
    for &n in &[1_000usize, 10_000] {
        let x = generate_anomaly_data(n, 8);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("single", n), &x, |b, x| {
            let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
            let params = base_params(50);
            b.iter(|| black_box(fit_iforest(&input, &params, None).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("extended_ndim2", n), &x, |b, x| {
            let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
            let params = ModelParams {
                ndim: 2,
                missing_action: MissingAction::Impute,
                ..base_params(50)
            };
            b.iter(|| black_box(fit_iforest(&input, &params, None).unwrap()));
        });
    }
    group.finish();
}

fn bench_guided_splits(c: &mut Criterion) {
    let x = generate_anomaly_data(5_000, 8);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let params = ModelParams {
        prob_pick_by_gain_pl: 1.0,
        ..base_params(20)
    };
    c.bench_function("fit_forest_pooled_gain", |b| {
        b.iter(|| black_box(fit_iforest(&input, &params, None).unwrap()));
    });
}

// ============================================================================
// Prediction and similarity
// ============================================================================

fn bench_predict(c: &mut Criterion) {
    let x = generate_anomaly_data(10_000, 8);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let out = fit_iforest(&input, &base_params(100), None).unwrap();
    let data = PredictionData::from_dense(Some(x.view()), None).unwrap();

    let mut group = c.benchmark_group("predict");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("standardized", |b| {
        b.iter(|| black_box(predict_iforest(&out.model, &data, true, 1, false).unwrap()));
    });
    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let x = generate_anomaly_data(300, 4);
    let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
    let out = fit_iforest(&input, &base_params(50), None).unwrap();
    let data = PredictionData::from_dense(Some(x.view()), None).unwrap();

    c.bench_function("similarity_300_rows", |b| {
        b.iter(|| black_box(calc_similarity(&out.model, &data, true, true, 1).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_fit_forest,
    bench_guided_splits,
    bench_predict,
    bench_similarity
);
criterion_main!(benches);
