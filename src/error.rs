use burn::record::RecorderError;
use thiserror::Error;

pub type UNetResult<T> = Result<T, UNetError>;

#[derive(Debug, Error)]
pub enum UNetError {
    #[error("invalid U-Net configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("artifact i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read model config: {0}")]
    Config(String),

    #[error("failed to record weights: {0}")]
    Record(#[from] RecorderError),
}

impl UNetError {
    pub(crate) fn shape_mismatch(
        context: &'static str,
        expected: impl Into<Vec<usize>>,
        actual: impl Into<Vec<usize>>,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
