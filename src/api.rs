//! High-level estimators wrapping the fitting and prediction entry
//! points: `IsolationForest` for the single-variable model and
//! `ExtendedIsolationForest` for hyperplane splits, both with
//! bincode-backed model persistence.

use ndarray::{Array1, Array2, ArrayView2};

use crate::data::{InputData, PredictionData};
use crate::errors::{ForestError, Result};
use crate::fit::{add_tree, fit_iforest};
use crate::forest::{ExtIsoForest, IsoForest, Model};
use crate::params::{MissingAction, ModelParams};
use crate::predict::predict_iforest;
use crate::similarity::{calc_similarity, tmat_to_dense};

/// Single-variable isolation forest with an sklearn-like surface.
///
/// ```
/// use isoforest_rs::IsolationForest;
/// use ndarray::Array2;
///
/// let x = Array2::from_shape_vec((4, 1), vec![0.0, 0.1, 0.2, 50.0]).unwrap();
/// let mut model = IsolationForest::new(50, 4);
/// model.params.random_seed = 42;
/// let scores = model.fit(x.view()).unwrap().score_samples(x.view()).unwrap();
/// assert!(scores[3] > scores[0]);
/// ```
pub struct IsolationForest {
    pub params: ModelParams,
    model: Option<Model>,
}

impl IsolationForest {
    pub fn new(ntrees: usize, sample_size: usize) -> Self {
        IsolationForest {
            params: ModelParams {
                ntrees,
                sample_size,
                ndim: 1,
                ..ModelParams::default()
            },
            model: None,
        }
    }

    /// Use a fully spelled-out parameter set; `ndim` must be 1.
    pub fn with_params(params: ModelParams) -> Result<Self> {
        if params.ndim != 1 {
            return Err(ForestError::InvalidArgument(
                "IsolationForest requires ndim = 1; use ExtendedIsolationForest".into(),
            ));
        }
        Ok(IsolationForest {
            params,
            model: None,
        })
    }

    /// Fit on numeric data only (NaN = missing).
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<&mut Self> {
        let input = InputData::from_dense(Some(x), None, &[])?;
        self.fit_input(&input)
    }

    /// Fit on any supported input layout (mixed columns, sparse, weights).
    pub fn fit_input(&mut self, input: &InputData<'_>) -> Result<&mut Self> {
        let out = fit_iforest(input, &self.params, None)?;
        self.model = Some(out.model);
        Ok(self)
    }

    /// Standardized anomaly scores in (0, 1]; higher is more anomalous.
    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        self.score_data(&data)
    }

    pub fn score_data(&self, data: &PredictionData<'_>) -> Result<Array1<f64>> {
        let pred = predict_iforest(self.trained()?, data, true, self.params.nthreads, false)?;
        Ok(pred.depths)
    }

    /// Raw mean depths instead of standardized scores.
    pub fn predict_depths(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        let pred = predict_iforest(self.trained()?, &data, false, self.params.nthreads, false)?;
        Ok(pred.depths)
    }

    /// Terminal leaf per (row, tree).
    pub fn decision_leaves(&self, x: ArrayView2<'_, f64>) -> Result<Array2<usize>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        let pred = predict_iforest(self.trained()?, &data, true, self.params.nthreads, true)?;
        Ok(pred.tree_num.expect("tree_num was requested"))
    }

    /// Dense pairwise similarity (or distance when the parameters say
    /// `standardize_dist`) between the rows of `x`.
    pub fn similarity(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        let tmat = calc_similarity(
            self.trained()?,
            &data,
            self.params.assume_full_distr,
            self.params.standardize_dist,
            self.params.nthreads,
        )?;
        Ok(tmat_to_dense(&tmat, data.nrows, true))
    }

    /// Grow the fitted forest by one tree.
    pub fn add_tree_input(&mut self, input: &InputData<'_>) -> Result<&mut Self> {
        let model = self.model.as_mut().ok_or_else(not_fitted)?;
        add_tree(model, input, &self.params)?;
        Ok(self)
    }

    pub fn model(&self) -> Option<&IsoForest> {
        match &self.model {
            Some(Model::Single(forest)) => Some(forest),
            _ => None,
        }
    }

    /// Adopt an already-built forest (e.g. one deserialized elsewhere).
    pub fn from_model(params: ModelParams, forest: IsoForest) -> Result<Self> {
        let mut out = Self::with_params(params)?;
        out.model = Some(Model::Single(forest));
        Ok(out)
    }

    /// Save the fitted model with bincode.
    pub fn save_model(&self, path: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let forest = self.model().ok_or("model has not been fitted")?;
        let encoded = bincode::serialize(forest)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Load a model saved by `save_model`.
    pub fn load_model(
        path: &str,
        params: ModelParams,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let encoded = std::fs::read(path)?;
        let forest: IsoForest = bincode::deserialize(&encoded)?;
        Ok(Self::from_model(params, forest)?)
    }

    fn trained(&self) -> Result<&Model> {
        self.model.as_ref().ok_or_else(not_fitted)
    }
}

/// Extended isolation forest: splits on random hyperplanes over `ndim`
/// columns.
pub struct ExtendedIsolationForest {
    pub params: ModelParams,
    model: Option<Model>,
}

impl ExtendedIsolationForest {
    pub fn new(ntrees: usize, sample_size: usize, ndim: usize) -> Self {
        ExtendedIsolationForest {
            params: ModelParams {
                ntrees,
                sample_size,
                ndim: ndim.max(2),
                missing_action: MissingAction::Impute,
                ..ModelParams::default()
            },
            model: None,
        }
    }

    /// Use a fully spelled-out parameter set; `ndim` must be at least 2.
    pub fn with_params(params: ModelParams) -> Result<Self> {
        if params.ndim < 2 {
            return Err(ForestError::InvalidArgument(
                "ExtendedIsolationForest requires ndim >= 2".into(),
            ));
        }
        Ok(ExtendedIsolationForest {
            params,
            model: None,
        })
    }

    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<&mut Self> {
        let input = InputData::from_dense(Some(x), None, &[])?;
        self.fit_input(&input)
    }

    pub fn fit_input(&mut self, input: &InputData<'_>) -> Result<&mut Self> {
        let out = fit_iforest(input, &self.params, None)?;
        self.model = Some(out.model);
        Ok(self)
    }

    pub fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        self.score_data(&data)
    }

    pub fn score_data(&self, data: &PredictionData<'_>) -> Result<Array1<f64>> {
        let pred = predict_iforest(self.trained()?, data, true, self.params.nthreads, false)?;
        Ok(pred.depths)
    }

    pub fn predict_depths(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        let pred = predict_iforest(self.trained()?, &data, false, self.params.nthreads, false)?;
        Ok(pred.depths)
    }

    pub fn similarity(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let data = PredictionData::from_dense(Some(x), None)?;
        let tmat = calc_similarity(
            self.trained()?,
            &data,
            self.params.assume_full_distr,
            self.params.standardize_dist,
            self.params.nthreads,
        )?;
        Ok(tmat_to_dense(&tmat, data.nrows, true))
    }

    /// Grow the fitted forest by one tree.
    pub fn add_tree_input(&mut self, input: &InputData<'_>) -> Result<&mut Self> {
        let model = self.model.as_mut().ok_or_else(not_fitted)?;
        add_tree(model, input, &self.params)?;
        Ok(self)
    }

    pub fn model(&self) -> Option<&ExtIsoForest> {
        match &self.model {
            Some(Model::Extended(forest)) => Some(forest),
            _ => None,
        }
    }

    pub fn from_model(params: ModelParams, forest: ExtIsoForest) -> Result<Self> {
        let mut out = Self::with_params(params)?;
        out.model = Some(Model::Extended(forest));
        Ok(out)
    }

    pub fn save_model(&self, path: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let forest = self.model().ok_or("model has not been fitted")?;
        let encoded = bincode::serialize(forest)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    pub fn load_model(
        path: &str,
        params: ModelParams,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let encoded = std::fs::read(path)?;
        let forest: ExtIsoForest = bincode::deserialize(&encoded)?;
        Ok(Self::from_model(params, forest)?)
    }

    fn trained(&self) -> Result<&Model> {
        self.model.as_ref().ok_or_else(not_fitted)
    }
}

fn not_fitted() -> ForestError {
    ForestError::InvalidArgument("model has not been fitted".into())
}
