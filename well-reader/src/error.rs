//! Error type shared by every well-processing stage.

use plate_math::{ICPError, ParticleFilterError};
use thiserror::Error;

/// Errors raised while turning a well image into a spot grid.
///
/// Any of these aborts the current well only; the caller decides whether to
/// skip it or halt the batch.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("unsupported threshold method: {0}")]
    UnsupportedMethod(String),

    #[error("threshold could not be computed: {0}")]
    ThresholdFailed(String),

    #[error("no well found: {0}")]
    NoWellFound(String),

    #[error("invalid crop: {reason}")]
    InvalidCrop { reason: String },

    #[error("registration failed: {0}")]
    RegistrationFailed(#[from] ICPError),

    #[error("particle filter failed: {0}")]
    ParticleFilter(#[from] ParticleFilterError),

    #[error("more than one region assigned to cell ({row}, {col})")]
    DuplicateAssignment { row: usize, col: usize },

    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReaderError>;
