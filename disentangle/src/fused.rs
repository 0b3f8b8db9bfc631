//! Host kernel bodies for both fusion variants
//!
//! A backend hands each worker one band: the `tile_size` output rows of one
//! `bn` plane that a row of blocks covers. Bands never overlap, so they can
//! be filled in any order or concurrently. Inside a band the tiles are
//! visited left to right in device thread order.

use crate::element::{bias_combine, gather_combine, Element};
use crate::error::{Error, Result};
use crate::position::{relative_offset, LogicalShape};
use crate::tile::{LaunchGrid, TileCoord};

/// Read-only operands of the relative-position bias add (Variant 2)
#[derive(Debug, Clone, Copy)]
pub struct BiasAddInputs<'a, T> {
    /// Content-to-content scores `(bn, s, s)`
    pub c2c: &'a [T],
    /// Content-to-position bias `(bn, s, 2 * span)`
    pub c2p: &'a [T],
    /// Position-to-content bias `(bn, s, 2 * span)`
    pub p2c: &'a [T],
    /// Factor already converted to the compute precision
    pub factor: T,
    pub span: usize,
}

/// Read-only operands of the gather-combine kernel (Variant 1)
#[derive(Debug, Clone, Copy)]
pub struct GatherCombineInputs<'a, T> {
    /// First score table `(bn, s, 2 * span)`
    pub data1: &'a [T],
    /// Offsets into `data2`, `(bn, s, s)`
    pub index1: &'a [i32],
    /// Second score table `(bn, s, 2 * span)`
    pub data2: &'a [T],
    /// Offsets into `data1`, `(bn, s, s)`
    pub index2: &'a [i32],
    /// Innermost width of `data1`/`data2`
    pub data_width: usize,
}

fn band_tiles(grid: &LaunchGrid, bn: usize, tile_row: usize) -> impl Iterator<Item = TileCoord> {
    let (grid_x, _, _) = grid.grid_dim();
    (0..grid_x).map(move |col| TileCoord {
        col,
        row: tile_row,
        bn,
    })
}

/// Compute one band of the bias-add output.
///
/// `out[bn, i, j] = c2c[bn, i, j] + factor * (c2p[bn, i, r] + p2c[bn, j, r])`
/// with `r = relative_offset(i, j, span)`. `band` starts at row
/// `tile_row * tile_size` of plane `bn`.
pub fn bias_add_band<T: Element>(
    grid: &LaunchGrid,
    inputs: &BiasAddInputs<'_, T>,
    bn: usize,
    tile_row: usize,
    band: &mut [T],
) {
    let out_shape = grid.shape();
    let aux = LogicalShape::new(out_shape.bn, out_shape.seq_len, 2 * inputs.span);
    let row0 = tile_row * grid.tile().tile_size;

    for coord in band_tiles(grid, bn, tile_row) {
        grid.for_each_in_tile(coord, |row, col| {
            let r = relative_offset(row, col, inputs.span);
            let c2c = inputs.c2c[out_shape.index(bn, row, col)];
            let c2p = inputs.c2p[aux.index(bn, row, r)];
            let p2c = inputs.p2c[aux.index(bn, col, r)];
            band[(row - row0) * out_shape.width + col] = bias_combine(c2c, c2p, p2c, inputs.factor);
        });
    }
}

/// Compute one band of the gather-combine output.
///
/// `out[bn, i, j] = data1[bn, i, index2[bn, i, j]] + data2[bn, i, index1[bn, i, j]]`
///
/// # Errors
/// Returns `IndexOutOfRange` for the first index outside `[0, data_width)`.
/// Elements visited before the failure are already written.
pub fn gather_combine_band<T: Element>(
    grid: &LaunchGrid,
    inputs: &GatherCombineInputs<'_, T>,
    bn: usize,
    tile_row: usize,
    band: &mut [T],
) -> Result<()> {
    let out_shape = grid.shape();
    let data = LogicalShape::new(out_shape.bn, out_shape.seq_len, inputs.data_width);
    let row0 = tile_row * grid.tile().tile_size;

    let checked = |index: i32, position: usize| -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < inputs.data_width)
            .ok_or(Error::IndexOutOfRange {
                index: i64::from(index),
                bound: inputs.data_width,
                position,
            })
    };

    for coord in band_tiles(grid, bn, tile_row) {
        grid.try_for_each_in_tile::<_, Error>(coord, |row, col| {
            let pos = out_shape.index(bn, row, col);
            let first = checked(inputs.index2[pos], pos)?;
            let second = checked(inputs.index1[pos], pos)?;
            band[(row - row0) * out_shape.width + col] = gather_combine(
                inputs.data1[data.index(bn, row, first)],
                inputs.data2[data.index(bn, row, second)],
            );
            Ok(())
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;
    use crate::tile::TileConfig;

    fn run_bias_add<T: Element>(grid: &LaunchGrid, inputs: &BiasAddInputs<'_, T>) -> Vec<T> {
        let shape = grid.shape();
        let mut out = vec![T::default(); shape.numel()];
        for (bn, plane) in out.chunks_mut(shape.plane_len()).enumerate() {
            for (tile_row, band) in plane.chunks_mut(grid.band_len()).enumerate() {
                bias_add_band(grid, inputs, bn, tile_row, band);
            }
        }
        out
    }

    fn naive_bias_add(
        c2c: &[f32],
        c2p: &[f32],
        p2c: &[f32],
        shape: LogicalShape,
        span: usize,
        factor: f32,
    ) -> Vec<f32> {
        let aux = LogicalShape::new(shape.bn, shape.seq_len, 2 * span);
        let mut out = vec![0.0; shape.numel()];
        for b in 0..shape.bn {
            for i in 0..shape.seq_len {
                for j in 0..shape.seq_len {
                    let r = relative_offset(i, j, span);
                    out[shape.index(b, i, j)] = c2c[shape.index(b, i, j)]
                        + factor * (c2p[aux.index(b, i, r)] + p2c[aux.index(b, j, r)]);
                }
            }
        }
        out
    }

    #[allow(clippy::cast_precision_loss)]
    fn ramp(n: usize, scale: f32) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * scale).sin()).collect()
    }

    #[test]
    fn test_bias_add_matches_naive() {
        let span = 3;
        let shape = LogicalShape::new(2, 9, 9);
        let c2c = ramp(shape.numel(), 0.1);
        let c2p = ramp(2 * 9 * 2 * span, 0.37);
        let p2c = ramp(2 * 9 * 2 * span, 0.71);
        let inputs = BiasAddInputs {
            c2c: &c2c,
            c2p: &c2p,
            p2c: &p2c,
            factor: 0.25,
            span,
        };
        let grid = LaunchGrid::new(shape, TileConfig::new(4, 2).unwrap()).unwrap();
        let got = run_bias_add(&grid, &inputs);
        let expected = naive_bias_add(&c2c, &c2p, &p2c, shape, span, 0.25);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_bias_add_constant_bias() {
        let shape = LogicalShape::new(1, 4, 4);
        let c2c = vec![0.0f32; 16];
        let c2p = vec![1.5f32; 16];
        let p2c = vec![2.0f32; 16];
        let inputs = BiasAddInputs {
            c2c: &c2c,
            c2p: &c2p,
            p2c: &p2c,
            factor: 1.0,
            span: 2,
        };
        let grid = LaunchGrid::new(shape, TileConfig::default()).unwrap();
        assert!(run_bias_add(&grid, &inputs).iter().all(|&v| v == 3.5));
    }

    #[test]
    fn test_bias_add_i8_wraps() {
        let shape = LogicalShape::new(1, 2, 2);
        let c2c = vec![10i8; 4];
        let c2p = vec![100i8; 4];
        let p2c = vec![100i8; 4];
        let inputs = BiasAddInputs {
            c2c: &c2c,
            c2p: &c2p,
            p2c: &p2c,
            factor: 1,
            span: 1,
        };
        let grid = LaunchGrid::new(shape, TileConfig::default()).unwrap();
        // 10 + (100 + 100) = 210 -> -46
        assert!(run_bias_add(&grid, &inputs).iter().all(|&v| v == -46));
    }

    #[test]
    fn test_gather_combine_selects_by_index() {
        let shape = LogicalShape::new(1, 2, 2);
        let data1: Vec<f16> = [1.0, 2.0, 3.0, 4.0].map(f16::from_f32).to_vec();
        let data2: Vec<f16> = [10.0, 20.0, 30.0, 40.0].map(f16::from_f32).to_vec();
        let index1 = vec![0, 1, 1, 0];
        let index2 = vec![1, 0, 0, 1];
        let inputs = GatherCombineInputs {
            data1: &data1,
            index1: &index1,
            data2: &data2,
            index2: &index2,
            data_width: 2,
        };
        let grid = LaunchGrid::new(shape, TileConfig::default()).unwrap();
        let mut out = vec![f16::ZERO; 4];
        gather_combine_band(&grid, &inputs, 0, 0, &mut out).unwrap();
        // (0,0): data1[0,0,1] + data2[0,0,0] = 2 + 10
        // (0,1): data1[0,0,0] + data2[0,0,1] = 1 + 20
        // (1,0): data1[0,1,0] + data2[0,1,1] = 3 + 40
        // (1,1): data1[0,1,1] + data2[0,1,0] = 4 + 30
        let expected: Vec<f16> = [12.0, 21.0, 43.0, 34.0].map(f16::from_f32).to_vec();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_gather_combine_rejects_out_of_range_index() {
        let shape = LogicalShape::new(1, 1, 1);
        let data = vec![f16::ONE; 2];
        let inputs = GatherCombineInputs {
            data1: &data,
            index1: &[0],
            data2: &data,
            index2: &[-1],
            data_width: 2,
        };
        let grid = LaunchGrid::new(shape, TileConfig::default()).unwrap();
        let mut out = vec![f16::ZERO; 1];
        let err = gather_combine_band(&grid, &inputs, 0, 0, &mut out).unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfRange {
                index: -1,
                bound: 2,
                position: 0
            }
        ));
    }
}
