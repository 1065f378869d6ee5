//! Error types for dataset splitting and streaming.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the splitter and the batch pipeline.
#[derive(Debug, Error)]
pub enum DataError {
    /// The input record set has no records.
    #[error("the record set is empty")]
    EmptyDataset,

    /// The validation fraction is outside the open interval (0, 1).
    #[error("validation fraction {fraction} is out of range, expect 0 < fraction < 1")]
    InvalidFraction { fraction: f64 },

    /// The path and label inputs do not describe a consistent record set.
    #[error("{message}")]
    InvalidInput { message: String },

    /// One record's image file is missing or malformed.
    #[error("failed to decode image '{}': {}", .path.display(), .message)]
    Decode { path: PathBuf, message: String },

    /// The target image size is not supported.
    #[error("unsupported target image size {size}")]
    Resize { size: usize },
}
