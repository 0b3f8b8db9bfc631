//! Disentangled-attention kernels on the GPU

#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, LaunchAsync, LaunchConfig};

use crate::backend::DisentangledOps;
use crate::config::DisentangledConfig;
use crate::cuda::{CudaBackend, CudaContext, CudaTensor, DeviceElement};
use crate::dtype::DType;
use crate::element::Element;
use crate::tensor::{Tensor, TensorDesc};
use crate::tile::{LaunchGrid, TileConfig};
use crate::validate::validate;
use crate::variant::Variant;
use crate::{Error, Result};

const PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/kernels/disentangled.ptx"));
const MODULE_NAME: &str = "disentangled";
const KERNEL_NAMES: &[&str] = &[
    "disentangled_gather_combine_f16",
    "disentangled_bias_add_f32",
    "disentangled_bias_add_f16",
    "disentangled_bias_add_i8",
];

fn load_func(device: &Arc<CudaDevice>, kernel_name: &str) -> Result<CudaFunction> {
    if !device.has_func(MODULE_NAME, kernel_name) {
        device.load_ptx(cudarc::nvrtc::Ptx::from_src(PTX), MODULE_NAME, KERNEL_NAMES)?;
    }
    device
        .get_func(MODULE_NAME, kernel_name)
        .ok_or_else(|| Error::Cuda(format!("kernel {kernel_name} missing from PTX module")))
}

fn to_i32(v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::InvalidShape(format!("dimension {v} exceeds i32")))
}

fn prepare(
    variant: Variant,
    inputs: &[&CudaTensor],
    output: &CudaTensor,
    config: &DisentangledConfig,
    tile: TileConfig,
) -> Result<(LaunchGrid, LaunchConfig)> {
    let input_descs: Vec<TensorDesc> = inputs.iter().map(|t| t.desc()).collect();
    let shape = validate(variant, config, &input_descs, &[output.desc()])?;
    if let Some(pos) = inputs.iter().position(|t| t.shares_storage(output)) {
        return Err(Error::Aliased(pos));
    }
    let grid = LaunchGrid::new(shape, tile)?;
    let (grid_dim, block_dim) = grid.launch_dims()?;
    let cfg = LaunchConfig {
        grid_dim,
        block_dim,
        shared_mem_bytes: 0,
    };
    Ok((grid, cfg))
}

#[allow(clippy::too_many_arguments)]
fn launch_bias_add<T: DeviceElement + Element>(
    c2c: &CudaTensor,
    c2p: &CudaTensor,
    p2c: &CudaTensor,
    output: &mut CudaTensor,
    config: &DisentangledConfig,
    grid: &LaunchGrid,
    cfg: LaunchConfig,
    stream: &CudaContext,
) -> Result<()> {
    let kernel_name = format!("disentangled_bias_add_{}", T::DTYPE);
    let func = load_func(stream.device(), &kernel_name)?;
    let seq_len = to_i32(grid.shape().seq_len)?;
    let factor = T::from_factor(config.factor);

    unsafe {
        func.launch(
            cfg,
            (
                output.cuda_slice_mut::<T>()?,
                c2c.cuda_slice::<T>()?,
                c2p.cuda_slice::<T>()?,
                p2c.cuda_slice::<T>()?,
                factor,
                seq_len,
                config.span,
            ),
        )?;
    }
    Ok(())
}

impl DisentangledOps for CudaBackend {
    fn gather_combine(
        data1: &CudaTensor,
        index1: &CudaTensor,
        data2: &CudaTensor,
        index2: &CudaTensor,
        output: &mut CudaTensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &CudaContext,
    ) -> Result<()> {
        let (grid, cfg) = prepare(
            Variant::GatherCombine,
            &[data1, index1, data2, index2],
            output,
            config,
            tile,
        )?;
        log::debug!(
            "cuda gather_combine: {:?} grid={:?} block={:?}",
            grid.shape().dims(),
            cfg.grid_dim,
            cfg.block_dim
        );
        if grid.num_tiles() == 0 {
            return Ok(());
        }

        let func = load_func(stream.device(), "disentangled_gather_combine_f16")?;
        let seq_len = to_i32(grid.shape().seq_len)?;
        let data_width = to_i32(config.span_width()?)?;
        unsafe {
            func.launch(
                cfg,
                (
                    output.cuda_slice_mut::<half::f16>()?,
                    data1.cuda_slice::<half::f16>()?,
                    index1.cuda_slice::<i32>()?,
                    data2.cuda_slice::<half::f16>()?,
                    index2.cuda_slice::<i32>()?,
                    seq_len,
                    data_width,
                ),
            )?;
        }
        Ok(())
    }

    fn bias_add(
        c2c: &CudaTensor,
        c2p: &CudaTensor,
        p2c: &CudaTensor,
        output: &mut CudaTensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &CudaContext,
    ) -> Result<()> {
        let (grid, cfg) = prepare(Variant::BiasAdd, &[c2c, c2p, p2c], output, config, tile)?;
        log::debug!(
            "cuda bias_add {}: {:?} grid={:?} block={:?}",
            output.dtype(),
            grid.shape().dims(),
            cfg.grid_dim,
            cfg.block_dim
        );
        if grid.num_tiles() == 0 {
            return Ok(());
        }

        match output.dtype() {
            DType::F32 => {
                launch_bias_add::<f32>(c2c, c2p, p2c, output, config, &grid, cfg, stream)
            }
            DType::F16 => {
                launch_bias_add::<half::f16>(c2c, c2p, p2c, output, config, &grid, cfg, stream)
            }
            DType::I8 => launch_bias_add::<i8>(c2c, c2p, p2c, output, config, &grid, cfg, stream),
            other => Err(Error::UnsupportedDtype(format!(
                "bias_add does not compute in {other}"
            ))),
        }
    }
}
