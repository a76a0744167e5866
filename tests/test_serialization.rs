//! Model persistence round-trips byte-identically, including every policy
//! field and the precomputed normalizers.

use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use tempfile::tempdir;

use isoforest_rs::{
    fit_iforest, predict_iforest, CategSplit, ExtendedIsolationForest, InputData, IsolationForest,
    Model, ModelParams, PredictionData,
};

#[test]
fn single_model_file_round_trip_preserves_scores() {
    let x = Array2::random((300, 3), Normal::new(0.0, 1.0).unwrap());
    let mut model = IsolationForest::new(30, 128);
    model.params.random_seed = 42;
    model.fit(x.view()).unwrap();
    let before = model.score_samples(x.view()).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("forest.bin");
    let path = path.to_str().unwrap();
    model.save_model(path).unwrap();

    let restored = IsolationForest::load_model(path, model.params.clone()).unwrap();
    let after = restored.score_samples(x.view()).unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.to_bits(), b.to_bits(), "scores drifted across the round trip");
    }
}

#[test]
fn extended_model_file_round_trip_preserves_scores() {
    let x = Array2::random((250, 4), Normal::new(0.0, 1.0).unwrap());
    let mut model = ExtendedIsolationForest::new(25, 128, 3);
    model.params.random_seed = 9;
    model.fit(x.view()).unwrap();
    let before = model.score_samples(x.view()).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("ext_forest.bin");
    let path = path.to_str().unwrap();
    model.save_model(path).unwrap();

    let restored = ExtendedIsolationForest::load_model(path, model.params.clone()).unwrap();
    let after = restored.score_samples(x.view()).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn policy_fields_survive_in_memory_round_trip() {
    let mut categ = Array2::zeros((200, 1));
    for i in 0..200 {
        categ[[i, 0]] = (i % 4) as i32;
    }
    let ncat = [4i32];
    let input = InputData::from_dense(None, Some(categ.view()), &ncat).unwrap();
    let params = ModelParams {
        ntrees: 10,
        sample_size: 64,
        cat_split_type: CategSplit::SingleCateg,
        random_seed: 3,
        ..ModelParams::default()
    };
    let out = fit_iforest(&input, &params, None).unwrap();

    let bytes = bincode::serialize(&out.model).unwrap();
    let restored: Model = bincode::deserialize(&bytes).unwrap();

    match (&out.model, &restored) {
        (Model::Single(a), Model::Single(b)) => {
            assert_eq!(a.new_cat_action, b.new_cat_action);
            assert_eq!(a.cat_split_type, b.cat_split_type);
            assert_eq!(a.missing_action, b.missing_action);
            assert_eq!(a.ncat, b.ncat);
            assert_eq!(a.exp_avg_depth.to_bits(), b.exp_avg_depth.to_bits());
            assert_eq!(a.exp_avg_sep.to_bits(), b.exp_avg_sep.to_bits());
            assert_eq!(a.orig_sample_size, b.orig_sample_size);
            assert_eq!(a.trees.len(), b.trees.len());
        }
        _ => panic!("model kind changed across serialization"),
    }

    let data = PredictionData::from_dense(None, Some(categ.view())).unwrap();
    let before = predict_iforest(&out.model, &data, true, 0, false).unwrap();
    let after = predict_iforest(&restored, &data, true, 0, false).unwrap();
    for (a, b) in before.depths.iter().zip(after.depths.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}
