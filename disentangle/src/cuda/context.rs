//! CUDA context management

use std::sync::Arc;

use cudarc::driver::CudaDevice;

use crate::Result;

/// One CUDA device and its launch stream.
///
/// Clones share the device. Launches issued through the same context run in
/// submission order; failures during execution surface at
/// [`synchronize`](Self::synchronize).
#[derive(Clone)]
pub struct CudaContext {
    device: Arc<CudaDevice>,
}

impl CudaContext {
    /// Create a new CUDA context for the specified device ordinal
    ///
    /// # Errors
    /// Returns an error if CUDA device initialization fails
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new_with_stream(ordinal)?;
        Ok(Self { device })
    }

    /// Get a reference to the underlying CUDA device
    #[must_use]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    /// Block until all queued work has finished.
    ///
    /// # Errors
    /// Returns the first asynchronous failure reported by the driver.
    pub fn synchronize(&self) -> Result<()> {
        self.device.synchronize()?;
        Ok(())
    }
}
