//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type AoResult<T> = Result<T, AoError>;

#[derive(Debug, Error)]
pub enum AoError {
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("depth must be strictly positive, found {value} at ({row}, {col})")]
    NonPositiveDepth { row: usize, col: usize, value: f64 },
    #[error("{what} contains a non-finite value at ({row}, {col})")]
    NonFiniteValue {
        what: &'static str,
        row: usize,
        col: usize,
    },
    #[error("frame '{id}' is unavailable")]
    FrameUnavailable { id: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("missing parameter '{0}'")]
    MissingParameter(String),
    #[error("batch contains no frames")]
    EmptyBatch,
    #[error("no checkpoint has been stored")]
    NoCheckpoint,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl AoError {
    /// Whether a driver iterating many frames may skip this error and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AoError::FrameUnavailable { .. })
    }
}
