use thiserror::Error;

/// Errors of the ShuffleNetV2 backbone.
///
/// All but `RecordLayout` describe a structural defect in the requested
/// architecture and are reported before any parameter is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShuffleNetError {
    /// A channel-shuffle unit was requested with a stride outside `1..=3`.
    #[error("illegal stride value: {stride}, expected 1, 2 or 3")]
    InvalidStride {
        /// The rejected stride.
        stride: usize,
    },

    /// A stride-1 unit cannot split its input into two equal branch halves.
    #[error(
        "stride-1 unit requires inp == 2 * (oup / 2), got inp = {inp}, oup = {oup}"
    )]
    UnevenSplit {
        /// Input channel count.
        inp: usize,
        /// Output channel count.
        oup: usize,
    },

    /// The stage repeat or width lists are malformed.
    #[error("Invalid backbone configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// A record holds a different number of stages or units than the backbone
    /// it is loaded into.
    #[error("record layout differs at `{path}`: expected {expected} entries, got {actual}")]
    RecordLayout {
        /// Module path of the differing list, e.g. `stages.1.units`.
        path: String,
        expected: usize,
        actual: usize,
    },
}

/// A specialized `Result` type for the backbone.
pub type ShuffleNetResult<T> = Result<T, ShuffleNetError>;
