//! Error types for modelflow

use thiserror::Error;

/// Result type alias for modelflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for the workflow library
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Schema mismatch for column '{column}': expected {expected}, found {found}")]
    SchemaMismatch {
        column: String,
        expected: String,
        found: String,
    },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Hyperparameter '{0}' has no concrete value")]
    UnresolvedParameter(String),

    #[error("Stratification error: {0}")]
    Stratification(String),

    #[error("Not fitted: {0}")]
    NotFitted(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Metric error: {0}")]
    Metric(String),

    #[error("Test set of this split has already been used by last_fit; create a fresh split to evaluate again")]
    TestSetReused,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    pub(crate) fn invalid(name: &str, value: impl ToString, reason: &str) -> Self {
        FlowError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for FlowError {
    fn from(err: polars::error::PolarsError) -> Self {
        FlowError::Data(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(err: reqwest::Error) -> Self {
        FlowError::Http(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FlowError {
    fn from(err: ndarray::ShapeError) -> Self {
        FlowError::Data(format!("invalid shape: {}", err))
    }
}
