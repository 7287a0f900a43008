//! Error type shared by every stage of the layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SoftMoeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SoftMoeError {
    #[error("input expected to have 3 dimensions but has {actual}")]
    InvalidRank { actual: usize },

    #[error("input feature dim of {actual} does not match layer dim of {expected}")]
    DimMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {context}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid reduction axes: {0}")]
    InvalidAxes(String),

    #[error("expert {index} failed: {reason}")]
    Expert { index: usize, reason: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl SoftMoeError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        SoftMoeError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl From<bincode::Error> for SoftMoeError {
    fn from(err: bincode::Error) -> Self {
        SoftMoeError::Checkpoint(err.to_string())
    }
}
