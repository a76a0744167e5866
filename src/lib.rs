pub mod api;
pub mod build;
pub mod data;
pub mod errors;
pub mod ext;
pub mod fit;
pub mod forest;
pub mod gain;
pub mod math;
pub mod params;
pub mod partition;
pub mod predict;
pub mod sampler;
pub mod similarity;
pub mod workspace;

// Re-export commonly used types at crate root
pub use api::{ExtendedIsolationForest, IsolationForest};
pub use data::{InputData, PredictionData, SparseColumns, SparseRows};
pub use errors::ForestError;
pub use fit::{add_tree, fit_iforest, FitOutput};
pub use forest::{
    standardized_score, ExtIsoForest, HPlaneNode, IsoForest, Model, Node, ProjectionTerm, Split,
};
pub use params::{
    CategSplit, CoefType, GainCriterion, MissingAction, ModelParams, NewCategAction,
};
pub use predict::{predict_iforest, Predictions};
pub use similarity::{calc_similarity, tmat_to_dense};

// Re-export the depth and separation constants used in score normalization
pub use math::{expected_avg_depth, expected_separation_depth, harmonic};
