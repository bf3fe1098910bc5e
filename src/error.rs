use burn::record::RecorderError;

/// Result alias used across the crate.
///
/// The error parameter stays open so derived code spelling `Result<T, E>` still resolves.
pub type Result<T, E = VggError> = std::result::Result<T, E>;

/// Errors raised while building, persisting or training a VGG network.
#[derive(thiserror::Error, Debug)]
pub enum VggError {
    #[error("unknown preset `{name}`, expected one of: {known}")]
    UnknownPreset { name: String, known: String },

    #[error("stage config must have exactly {expected} entries, got {found}")]
    InvalidStageCount { expected: usize, found: usize },

    #[error("stage {stage} must contain at least one convolution sub-block")]
    InvalidStageDepth { stage: usize },

    #[error("class count must be positive")]
    InvalidClassCount,

    #[error("invalid input shape {shape:?}: {reason}")]
    InvalidInputShape { shape: [usize; 3], reason: String },

    #[error(
        "input shape {shape:?} has a spatial size not divisible by {divisor}; \
         enable `allow_truncation` to reproduce the legacy floor division"
    )]
    InputNotDivisible { shape: [usize; 3], divisor: usize },

    #[error("checkpoint does not match the network topology at `{name}`: expected {expected}, found {found}")]
    TopologyMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("config error: {0}")]
    Config(String),
}
