use thiserror::Error;

use crate::parameters::{BoundsError, ParameterError};

/// Error types for the specfit-rs library.
#[derive(Error, Debug)]
pub enum SpecFitError {
    /// Invalid setup detected before or at the start of an operation
    /// (missing external resource, mask/navigation shape mismatch, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error indicating a mismatch in array dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A dataset-wide pass was stopped because a position failed to converge
    /// and abort-on-failure was requested.
    #[error(
        "Fit did not converge at position {position:?}: {message} \
         ({fitted} fitted, {failed} failed, {skipped} skipped before aborting)"
    )]
    ConvergenceFailure {
        position: Vec<usize>,
        message: String,
        fitted: usize,
        failed: usize,
        skipped: usize,
    },

    /// The optimizer could not produce a usable step.
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// Parameter not found.
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// Error for parameter-related problems.
    #[error("Parameter error: {0}")]
    ParameterError(#[from] ParameterError),

    /// Error for invalid bounds.
    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for specfit-rs operations.
pub type Result<T> = std::result::Result<T, SpecFitError>;
