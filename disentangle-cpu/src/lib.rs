//! CPU backend for the disentangled-attention kernels.
//!
//! Runs the same tile decomposition as the device kernels on host threads:
//! launches are queued on a [`CpuStream`] and each job fills its output
//! bands in parallel with rayon. Arithmetic happens in the tensor's own
//! precision (f32, f16 or wrapping i8), so results match the device
//! kernels bit for bit.
//!
//! This backend is intended for testing and for machines without a GPU.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ops;
pub mod stream;
pub mod tensor;

use disentangle::backend::Backend;

pub use stream::CpuStream;
pub use tensor::{CpuTensor, HostElement, Storage};

/// Marker type for the CPU backend.
///
/// The op trait impls live on this type, so a kernel driven through
/// `ComputeKernel<CpuBackend>` runs on the host.
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Tensor = CpuTensor;
    type Stream = CpuStream;
}
