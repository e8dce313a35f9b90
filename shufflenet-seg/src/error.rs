//! Error types for the segmentation network.

use shufflenet_v2::ShuffleNetError;
use thiserror::Error;

/// Errors raised while building, loading or exporting a network.
#[derive(Error, Debug)]
pub enum ShuffleSegError {
    /// The backbone rejected its configuration.
    #[error(transparent)]
    Backbone(#[from] ShuffleNetError),

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape { expected: String, actual: String },

    #[error("pretrained {arch} is not supported as of now")]
    UnsupportedPretrained { arch: String },

    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed { reason: String },

    /// A loaded parameter does not have the shape the architecture requires.
    #[error("Incompatible weights for `{name}`: expected shape {expected:?}, got {actual}")]
    IncompatibleWeights {
        name: String,
        expected: Vec<usize>,
        actual: String,
    },

    #[error("Export failed: {reason}")]
    ExportFailed { reason: String },
}

impl ShuffleSegError {
    /// Reports a record-layout mismatch of the backbone under `prefix`.
    pub(crate) fn from_backbone_record(prefix: &str, error: ShuffleNetError) -> Self {
        match error {
            ShuffleNetError::RecordLayout {
                path,
                expected,
                actual,
            } => Self::IncompatibleWeights {
                name: format!("{prefix}{path}"),
                expected: vec![expected],
                actual: format!("[{actual}]"),
            },
            other => other.into(),
        }
    }
}

pub type ShuffleSegResult<T> = Result<T, ShuffleSegError>;
