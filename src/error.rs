//! Error types for layers, networks and training.

use thiserror::Error;

/// Errors raised by the numeric engine.
///
/// Shape mismatches and unknown configuration names are caller errors and are
/// always surfaced. Numerical degeneracy (zero denominators in Hessian updates,
/// non-descent directions, vanishing step sizes) is handled inside the
/// optimizer and never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown activation function: {0}")]
    UnknownActivationFunction(String),

    #[error("Unknown probabilistic activation function: {0}")]
    UnknownProbabilisticActivation(String),

    #[error("Unknown inverse hessian approximation method: {0}")]
    UnknownInverseHessianMethod(String),

    #[error("Unknown learning rate method: {0}")]
    UnknownLearningRateMethod(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Optimization algorithm has no loss index attached")]
    MissingLossIndex,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Builds a [`Error::DimensionMismatch`] from any displayable shapes.
    pub fn dimension(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::DimensionMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// True for contract violations on tensor shapes.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, Error::DimensionMismatch { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
