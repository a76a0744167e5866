use std::collections::TryReserveError;
use thiserror::Error;

/// Errors reported by the fitting, prediction and similarity entry points.
///
/// Numeric edge cases (a constant column, an all-missing column, a column
/// with a single category) are not errors: the column is marked unsplittable
/// and control returns to column selection.
#[derive(Debug, Error)]
pub enum ForestError {
    /// Contradictory or out-of-range parameters, detected before any
    /// allocation takes place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Prediction input that does not match the schema the model was
    /// trained on.
    #[error("input schema mismatch: {0}")]
    InputSchema(String),

    /// The stop flag was raised before all trees were built. Trees that
    /// completed are kept; the partial forest is consistent and usable.
    #[error("fitting was interrupted before all trees were built")]
    Interrupted,

    /// A buffer allocation failed. No partial output is produced.
    #[error("buffer allocation failed")]
    OutOfMemory,
}

impl From<TryReserveError> for ForestError {
    fn from(_: TryReserveError) -> Self {
        ForestError::OutOfMemory
    }
}

pub type Result<T> = std::result::Result<T, ForestError>;
