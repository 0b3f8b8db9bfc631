//! DisentangledOps implementation for CpuBackend.
//!
//! Each launch validates synchronously, then queues one job on the stream.
//! Inside the job every `bn` plane is split into bands of `tile_size` rows
//! and the bands are filled in parallel with rayon.

use std::sync::RwLockReadGuard;

use disentangle::backend::DisentangledOps;
use disentangle::config::DisentangledConfig;
use disentangle::dtype::DType;
use disentangle::element::Element;
use disentangle::fused::{bias_add_band, gather_combine_band, BiasAddInputs, GatherCombineInputs};
use disentangle::tensor::{Tensor, TensorDesc};
use disentangle::tile::{LaunchGrid, TileConfig};
use disentangle::validate::validate;
use disentangle::variant::Variant;
use disentangle::{Error, Result};
use half::f16;
use rayon::prelude::*;

use crate::stream::CpuStream;
use crate::tensor::{CpuTensor, HostElement, Storage};
use crate::CpuBackend;

/// Read locks over a set of inputs, taking each distinct buffer once.
struct ReadSet<'a> {
    guards: Vec<RwLockReadGuard<'a, Storage>>,
    slots: Vec<usize>,
}

impl<'a> ReadSet<'a> {
    fn lock(tensors: &'a [CpuTensor]) -> Self {
        let mut guards = Vec::with_capacity(tensors.len());
        let mut slots: Vec<usize> = Vec::with_capacity(tensors.len());
        for (i, t) in tensors.iter().enumerate() {
            if let Some(prev) = tensors[..i].iter().position(|p| p.shares_storage(t)) {
                slots.push(slots[prev]);
            } else {
                slots.push(guards.len());
                guards.push(t.read());
            }
        }
        Self { guards, slots }
    }

    fn slice<T: HostElement>(&self, pos: usize) -> Result<&[T]> {
        self.guards[self.slots[pos]].as_slice()
    }
}

fn check_aliasing(output: &CpuTensor, inputs: &[&CpuTensor]) -> Result<()> {
    match inputs.iter().position(|t| t.shares_storage(output)) {
        Some(pos) => Err(Error::Aliased(pos)),
        None => Ok(()),
    }
}

fn prepare(
    variant: Variant,
    inputs: &[&CpuTensor],
    output: &CpuTensor,
    config: &DisentangledConfig,
    tile: TileConfig,
) -> Result<LaunchGrid> {
    let input_descs: Vec<TensorDesc> = inputs.iter().map(|t| t.desc()).collect();
    let shape = validate(variant, config, &input_descs, &[output.desc()])?;
    check_aliasing(output, inputs)?;
    LaunchGrid::new(shape, tile)
}

fn run_bias_add<T: Element + HostElement>(
    grid: &LaunchGrid,
    inputs: &[CpuTensor],
    output: &CpuTensor,
    config: &DisentangledConfig,
) -> Result<()> {
    let reads = ReadSet::lock(inputs);
    let args = BiasAddInputs {
        c2c: reads.slice::<T>(0)?,
        c2p: reads.slice::<T>(1)?,
        p2c: reads.slice::<T>(2)?,
        factor: T::from_factor(config.factor),
        span: config.span_width()? / 2,
    };

    let mut storage = output.write();
    let out = storage.as_mut_slice::<T>()?;
    if out.is_empty() {
        return Ok(());
    }
    let plane_len = grid.shape().plane_len();
    let band_len = grid.band_len();
    out.par_chunks_mut(plane_len)
        .enumerate()
        .for_each(|(bn, plane)| {
            plane
                .par_chunks_mut(band_len)
                .enumerate()
                .for_each(|(tile_row, band)| bias_add_band(grid, &args, bn, tile_row, band));
        });
    Ok(())
}

fn run_gather_combine<T: Element + HostElement>(
    grid: &LaunchGrid,
    inputs: &[CpuTensor],
    output: &CpuTensor,
    data_width: usize,
) -> Result<()> {
    let reads = ReadSet::lock(inputs);
    let args = GatherCombineInputs {
        data1: reads.slice::<T>(0)?,
        index1: reads.slice::<i32>(1)?,
        data2: reads.slice::<T>(2)?,
        index2: reads.slice::<i32>(3)?,
        data_width,
    };

    let mut storage = output.write();
    let out = storage.as_mut_slice::<T>()?;
    if out.is_empty() {
        return Ok(());
    }
    let plane_len = grid.shape().plane_len();
    let band_len = grid.band_len();
    out.par_chunks_mut(plane_len)
        .enumerate()
        .try_for_each(|(bn, plane)| {
            plane
                .par_chunks_mut(band_len)
                .enumerate()
                .try_for_each(|(tile_row, band)| {
                    gather_combine_band(grid, &args, bn, tile_row, band)
                })
        })
}

impl DisentangledOps for CpuBackend {
    fn gather_combine(
        data1: &CpuTensor,
        index1: &CpuTensor,
        data2: &CpuTensor,
        index2: &CpuTensor,
        output: &mut CpuTensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &CpuStream,
    ) -> Result<()> {
        let grid = prepare(
            Variant::GatherCombine,
            &[data1, index1, data2, index2],
            output,
            config,
            tile,
        )?;
        let data_width = config.span_width()?;
        let inputs = [data1.clone(), index1.clone(), data2.clone(), index2.clone()];
        let out = output.clone();
        log::debug!(
            "cpu gather_combine {}: {:?} grid={:?}",
            output.dtype(),
            grid.shape().dims(),
            grid.grid_dim()
        );

        match output.dtype() {
            DType::F16 => stream.submit(move || {
                run_gather_combine::<f16>(&grid, &inputs, &out, data_width)
            }),
            other => Err(Error::UnsupportedDtype(format!(
                "gather_combine does not compute in {other}"
            ))),
        }
    }

    fn bias_add(
        c2c: &CpuTensor,
        c2p: &CpuTensor,
        p2c: &CpuTensor,
        output: &mut CpuTensor,
        config: &DisentangledConfig,
        tile: TileConfig,
        stream: &CpuStream,
    ) -> Result<()> {
        let grid = prepare(Variant::BiasAdd, &[c2c, c2p, p2c], output, config, tile)?;
        let inputs = [c2c.clone(), c2p.clone(), p2c.clone()];
        let out = output.clone();
        let config = *config;
        log::debug!(
            "cpu bias_add {}: {:?} grid={:?}",
            output.dtype(),
            grid.shape().dims(),
            grid.grid_dim()
        );

        match output.dtype() {
            DType::F32 => {
                stream.submit(move || run_bias_add::<f32>(&grid, &inputs, &out, &config))
            }
            DType::F16 => {
                stream.submit(move || run_bias_add::<f16>(&grid, &inputs, &out, &config))
            }
            DType::I8 => stream.submit(move || run_bias_add::<i8>(&grid, &inputs, &out, &config)),
            other => Err(Error::UnsupportedDtype(format!(
                "bias_add does not compute in {other}"
            ))),
        }
    }
}
