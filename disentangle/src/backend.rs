//! Backend trait and the fused-kernel op trait.
//!
//! A backend supplies its tensor type and an execution stream. Launches are
//! queued on the stream and return as soon as the work is submitted;
//! failures that happen while the work runs are reported by the stream, not
//! by the launch call.

use crate::config::DisentangledConfig;
use crate::tensor::Tensor;
use crate::tile::TileConfig;
use crate::Result;

/// A compute backend (CPU, CUDA, ...).
pub trait Backend: 'static {
    /// Tensor handle. Cloning a handle shares the underlying buffer.
    type Tensor: Tensor + Clone + Send + Sync;

    /// FIFO execution queue. Work submitted to one stream runs in order.
    type Stream;
}

/// The two fused disentangled-attention kernels.
///
/// Both validate their operands, then queue the work on `stream`. An error
/// returned here means nothing was queued; asynchronous failures surface
/// through the stream.
pub trait DisentangledOps: Backend {
    /// Variant 1: `out[b, i, j] = data1[b, i, index2[b, i, j]] + data2[b, i, index1[b, i, j]]`.
    #[allow(clippy::too_many_arguments)]
    fn gather_combine(
        data1: &Self::Tensor,
        index1: &Self::Tensor,
        data2: &Self::Tensor,
        index2: &Self::Tensor,
        output: &mut Self::Tensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Variant 2: `out[b, i, j] = c2c[b, i, j] + factor * (c2p[b, i, r] + p2c[b, j, r])`
    /// with `r = clamp(j - i + span, 0, 2 * span - 1)`.
    fn bias_add(
        c2c: &Self::Tensor,
        c2p: &Self::Tensor,
        p2c: &Self::Tensor,
        output: &mut Self::Tensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &Self::Stream,
    ) -> Result<()>;
}
