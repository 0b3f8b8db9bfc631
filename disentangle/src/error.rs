//! Error types for the disentangled-attention kernels

use thiserror::Error;

use crate::dtype::DType;

/// Result type alias using the crate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kernel construction, validation and execution
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: DType, got: DType },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Unsupported tensor format: {0}")]
    UnsupportedFormat(String),

    #[error("Expected {expected} input tensors, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("Expected {expected} output tensors, got {got}")]
    OutputCount { expected: usize, got: usize },

    #[error("Invalid span: {0}")]
    InvalidSpan(String),

    #[error("Invalid tile configuration: {0}")]
    InvalidTile(String),

    #[error("Serialized config must be exactly {expected} bytes, got {got}")]
    Deserialize { expected: usize, got: usize },

    #[error("Invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("Gather index {index} out of range [0, {bound}) at element {position}")]
    IndexOutOfRange {
        index: i64,
        bound: usize,
        position: usize,
    },

    #[error("Output buffer aliases input {0}")]
    Aliased(usize),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CUDA error: {0}")]
    Cuda(String),
}

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Cuda(e.to_string())
    }
}
