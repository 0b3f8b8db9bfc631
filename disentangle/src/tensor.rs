//! Tensor trait and host-side tensor descriptors

use std::fmt;

use crate::dtype::DType;

/// Memory layout of a tensor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TensorFormat {
    /// Row-major, densely packed
    #[default]
    Linear,
    /// Channel-vectorized layout (e.g. 4 or 32 elements packed per channel group)
    Vectorized(usize),
    /// Arbitrary per-dimension strides
    Strided,
}

impl fmt::Display for TensorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Vectorized(width) => write!(f, "vectorized({width})"),
            Self::Strided => write!(f, "strided"),
        }
    }
}

/// Core tensor trait that defines the interface for all tensor implementations
///
/// Backends (CPU, CUDA) implement this trait so validation and dispatch can
/// inspect shape and element type without touching the data.
pub trait Tensor {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the memory layout of the tensor buffer
    fn format(&self) -> TensorFormat {
        TensorFormat::Linear
    }

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }

    /// Snapshot of shape, dtype and format for validation
    fn desc(&self) -> TensorDesc {
        TensorDesc {
            shape: self.shape().to_vec(),
            dtype: self.dtype(),
            format: self.format(),
        }
    }
}

/// Shape, element type and layout of one kernel input or output
///
/// Descriptors are what the validator and the format negotiation see; they
/// carry no data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub format: TensorFormat,
}

impl TensorDesc {
    /// Row-major descriptor
    #[must_use]
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            format: TensorFormat::Linear,
        }
    }

    /// Same descriptor with a different memory layout
    #[must_use]
    pub fn with_format(mut self, format: TensorFormat) -> Self {
        self.format = format;
        self
    }
}

impl Tensor for TensorDesc {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn format(&self) -> TensorFormat {
        self.format
    }

    fn desc(&self) -> TensorDesc {
        self.clone()
    }
}
