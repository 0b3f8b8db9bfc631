//! CUDA backend: device tensors and PTX kernel launches

pub mod context;
pub mod ops;
pub mod tensor;

pub use context::CudaContext;
pub use tensor::{CudaTensor, DeviceBuffer, DeviceElement};

use crate::backend::Backend;

/// Marker type for the CUDA backend. Launches are queued on the
/// context's stream.
pub struct CudaBackend;

impl Backend for CudaBackend {
    type Tensor = CudaTensor;
    type Stream = CudaContext;
}
