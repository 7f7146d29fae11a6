//! Error types for the chunked analysis pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using PipelineError.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // === Validation ===
    /// Terminal: the task cannot proceed. Marks the task ERROR.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    // === Fan-in ===
    /// Every sibling in a fan-in group produced no data. Recoverable
    /// signal for the caller, never an unchecked dereference.
    #[error("all geographic chunks for time chunk {time_chunk} were empty")]
    AllEmptyGroup { time_chunk: usize },

    // === Data access ===
    #[error("data source error: {0}")]
    Source(String),

    // === Storage & encoding ===
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("artifact encoding error: {0}")]
    Encoding(String),

    // === Raster output ===
    #[error("raster write error: {0}")]
    RasterWrite(String),

    // === Analysis plug points ===
    #[error("analysis '{analysis}' does not support {operation}")]
    UnsupportedOperation {
        analysis: String,
        operation: &'static str,
    },

    #[error("unknown analysis: {0}")]
    UnknownAnalysis(String),

    #[error("cube shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl From<bincode::Error> for PipelineError {
    fn from(err: bincode::Error) -> Self {
        PipelineError::Encoding(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::RasterWrite(err.to_string())
    }
}

impl From<tiff::TiffError> for PipelineError {
    fn from(err: tiff::TiffError) -> Self {
        PipelineError::RasterWrite(err.to_string())
    }
}

impl PipelineError {
    /// Whether this error should terminate the whole task (as opposed to
    /// a single recombination group).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineError::AllEmptyGroup { .. })
    }
}
