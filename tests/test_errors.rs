//! Parameter and schema validation: contradictory settings fail before
//! any work happens, and prediction rejects inputs the policies disallow.

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use isoforest_rs::{
    fit_iforest, predict_iforest, CategSplit, ForestError, InputData, MissingAction, ModelParams,
    NewCategAction, PredictionData,
};

fn numeric_input(x: &Array2<f64>) -> InputData<'_> {
    InputData::from_dense(Some(x.view()), None, &[]).unwrap()
}

fn expect_invalid(result: Result<isoforest_rs::FitOutput, ForestError>) {
    match result {
        Err(ForestError::InvalidArgument(_)) => {}
        Err(other) => panic!("expected InvalidArgument, got {:?}", other),
        Ok(_) => panic!("expected InvalidArgument, got a fitted model"),
    }
}

#[test]
fn divide_is_rejected_for_the_extended_model() {
    let x = Array2::random((100, 3), Uniform::new(0.0, 1.0));
    let input = numeric_input(&x);
    let params = ModelParams {
        ndim: 2,
        missing_action: MissingAction::Divide,
        ..ModelParams::default()
    };
    expect_invalid(fit_iforest(&input, &params, None));
}

#[test]
fn gain_probabilities_must_sum_to_at_most_one() {
    let x = Array2::random((100, 2), Uniform::new(0.0, 1.0));
    let input = numeric_input(&x);
    let params = ModelParams {
        prob_pick_by_gain_avg: 0.5,
        prob_pick_by_gain_pl: 0.4,
        prob_split_by_gain_avg: 0.3,
        ..ModelParams::default()
    };
    expect_invalid(fit_iforest(&input, &params, None));
}

#[test]
fn oversized_sample_without_replacement_is_rejected() {
    let x = Array2::random((50, 2), Uniform::new(0.0, 1.0));
    let input = numeric_input(&x);
    let params = ModelParams {
        sample_size: 100,
        with_replacement: false,
        ..ModelParams::default()
    };
    expect_invalid(fit_iforest(&input, &params, None));
}

#[test]
fn ndim_larger_than_the_column_count_is_rejected() {
    let x = Array2::random((80, 2), Uniform::new(0.0, 1.0));
    let input = numeric_input(&x);
    let params = ModelParams {
        ndim: 3,
        missing_action: MissingAction::Impute,
        ..ModelParams::default()
    };
    expect_invalid(fit_iforest(&input, &params, None));
}

#[test]
fn unseen_category_is_rejected_under_the_random_policy() {
    let mut categ = Array2::zeros((120, 1));
    for i in 0..120 {
        categ[[i, 0]] = (i % 3) as i32;
    }
    let ncat = [3i32];
    let input = InputData::from_dense(None, Some(categ.view()), &ncat).unwrap();
    let params = ModelParams {
        ntrees: 10,
        sample_size: 64,
        new_cat_action: NewCategAction::Random,
        cat_split_type: CategSplit::SubSet,
        random_seed: 1,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();

    let probe = Array2::from_shape_vec((1, 1), vec![7i32]).unwrap();
    let data = PredictionData::from_dense(None, Some(probe.view())).unwrap();
    match predict_iforest(&out.model, &data, true, 0, false) {
        Err(ForestError::InputSchema(_)) => {}
        other => panic!("expected InputSchema, got {:?}", other.map(|p| p.depths)),
    }
}

#[test]
fn unseen_category_is_tolerated_under_the_smallest_policy() {
    let mut categ = Array2::zeros((120, 1));
    for i in 0..120 {
        categ[[i, 0]] = (i % 3) as i32;
    }
    let ncat = [3i32];
    let input = InputData::from_dense(None, Some(categ.view()), &ncat).unwrap();
    let params = ModelParams {
        ntrees: 10,
        sample_size: 64,
        new_cat_action: NewCategAction::Smallest,
        random_seed: 1,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();

    let probe = Array2::from_shape_vec((1, 1), vec![7i32]).unwrap();
    let data = PredictionData::from_dense(None, Some(probe.view())).unwrap();
    let pred = predict_iforest(&out.model, &data, true, 0, false).unwrap();
    assert!(pred.depths[0] > 0.0 && pred.depths[0] <= 1.0);
}

#[test]
fn prediction_with_too_few_columns_is_a_schema_error() {
    let x = Array2::random((100, 3), Uniform::new(0.0, 1.0));
    let input = numeric_input(&x);
    let params = ModelParams {
        ntrees: 10,
        sample_size: 64,
        random_seed: 1,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();

    let narrow = Array2::random((5, 1), Uniform::new(0.0, 1.0));
    let data = PredictionData::from_dense(Some(narrow.view()), None).unwrap();
    match predict_iforest(&out.model, &data, true, 0, false) {
        Err(ForestError::InputSchema(_)) => {}
        other => panic!("expected InputSchema, got {:?}", other.map(|p| p.depths)),
    }
}

#[test]
fn malformed_sparse_input_is_rejected() {
    let values = [1.0, 2.0];
    let indices = [0usize, 99]; // row out of range for nrows = 10
    let indptr = [0usize, 2];
    let sparse = isoforest_rs::SparseColumns {
        values: &values,
        indices: &indices,
        indptr: &indptr,
    };
    match InputData::from_sparse(sparse, 10, None, &[]) {
        Err(ForestError::InvalidArgument(_)) => {}
        _ => panic!("expected InvalidArgument for a malformed matrix"),
    }
}
