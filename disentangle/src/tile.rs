//! Tile/grid decomposition of the `(bn, seq_len, width)` iteration space
//!
//! A block covers a `tile_size × tile_size` square of one `bn` plane with
//! `tile_size × block_dim_y` threads; each thread walks
//! `tile_size / block_dim_y` rows of its column. The grid is
//! `(ceil(width / tile_size), ceil(seq_len / tile_size), bn)`.
//!
//! The grid is recomputed for every launch because shapes change per call.

use crate::error::{Error, Result};
use crate::position::LogicalShape;

/// Default tile edge (threads along x per block)
pub const TILE_SIZE: usize = 32;

/// Default block height (threads along y per block)
pub const BLOCK_DIM_Y: usize = 8;

/// Device limit on grid x
pub const MAX_GRID_X: usize = (1 << 31) - 1;

/// Device limit on grid y and z
pub const MAX_GRID_YZ: usize = 65_535;

/// Tile geometry used by one launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileConfig {
    pub tile_size: usize,
    pub block_dim_y: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            block_dim_y: BLOCK_DIM_Y,
        }
    }
}

impl TileConfig {
    /// # Errors
    /// Returns `InvalidTile` unless `tile_size` is a positive multiple of a
    /// positive `block_dim_y`.
    pub fn new(tile_size: usize, block_dim_y: usize) -> Result<Self> {
        if block_dim_y == 0 || tile_size == 0 || tile_size % block_dim_y != 0 {
            return Err(Error::InvalidTile(format!(
                "tile size {tile_size} must be a positive multiple of block height {block_dim_y}"
            )));
        }
        Ok(Self {
            tile_size,
            block_dim_y,
        })
    }

    /// Rows each thread handles inside its tile
    #[must_use]
    pub const fn rows_per_thread(&self) -> usize {
        self.tile_size / self.block_dim_y
    }
}

/// Position of one tile in the launch grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Grid x: tile column
    pub col: usize,
    /// Grid y: tile row
    pub row: usize,
    /// Grid z: batch × head
    pub bn: usize,
}

/// Grid and block dimensions for one launch over a logical output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    shape: LogicalShape,
    tile: TileConfig,
}

impl LaunchGrid {
    /// # Errors
    /// Returns `InvalidTile` if the tile configuration is malformed.
    pub fn new(shape: LogicalShape, tile: TileConfig) -> Result<Self> {
        let tile = TileConfig::new(tile.tile_size, tile.block_dim_y)?;
        Ok(Self { shape, tile })
    }

    #[must_use]
    pub const fn shape(&self) -> LogicalShape {
        self.shape
    }

    #[must_use]
    pub const fn tile(&self) -> TileConfig {
        self.tile
    }

    /// Threads per block as `(x, y, z)`
    #[must_use]
    pub const fn block_dim(&self) -> (usize, usize, usize) {
        (self.tile.tile_size, self.tile.block_dim_y, 1)
    }

    /// Blocks per grid as `(x, y, z)`
    #[must_use]
    pub const fn grid_dim(&self) -> (usize, usize, usize) {
        (
            self.shape.width.div_ceil(self.tile.tile_size),
            self.shape.seq_len.div_ceil(self.tile.tile_size),
            self.shape.bn,
        )
    }

    #[must_use]
    pub const fn num_tiles(&self) -> usize {
        let (x, y, z) = self.grid_dim();
        x * y * z
    }

    /// Elements in one band of tile rows (full width, `tile_size` rows).
    /// The last band of a plane may be shorter.
    #[must_use]
    pub const fn band_len(&self) -> usize {
        self.tile.tile_size * self.shape.width
    }

    /// All tiles in grid order (x fastest, then y, then z)
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> {
        let (gx, gy, gz) = self.grid_dim();
        (0..gz).flat_map(move |bn| {
            (0..gy).flat_map(move |row| (0..gx).map(move |col| TileCoord { col, row, bn }))
        })
    }

    /// Visit every in-bounds `(row, col)` covered by a tile in thread order.
    ///
    /// Thread `(tx, ty)` handles column `col0 + tx` and rows
    /// `row0 + ty + k * block_dim_y` for `k < rows_per_thread`.
    pub fn for_each_in_tile<F>(&self, coord: TileCoord, mut f: F)
    where
        F: FnMut(usize, usize),
    {
        let _ = self.try_for_each_in_tile(coord, |row, col| {
            f(row, col);
            Ok::<(), std::convert::Infallible>(())
        });
    }

    /// Fallible [`for_each_in_tile`](Self::for_each_in_tile); stops at the
    /// first error.
    ///
    /// # Errors
    /// Returns the first error produced by `f`.
    pub fn try_for_each_in_tile<F, E>(&self, coord: TileCoord, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(usize, usize) -> std::result::Result<(), E>,
    {
        let TileConfig {
            tile_size,
            block_dim_y,
        } = self.tile;
        let row0 = coord.row * tile_size;
        let col0 = coord.col * tile_size;
        for k in 0..self.tile.rows_per_thread() {
            for ty in 0..block_dim_y {
                let row = row0 + k * block_dim_y + ty;
                if row >= self.shape.seq_len {
                    continue;
                }
                for tx in 0..tile_size {
                    let col = col0 + tx;
                    if col >= self.shape.width {
                        break;
                    }
                    f(row, col)?;
                }
            }
        }
        Ok(())
    }

    /// Device launch dimensions `(grid, block)`.
    ///
    /// # Errors
    /// Returns `InvalidShape` if the grid exceeds the device limits
    /// (`MAX_GRID_X` along x, `MAX_GRID_YZ` along y and z, so at most
    /// 65535 `bn` planes per launch) or a block dimension does not fit in `u32`.
    pub fn launch_dims(&self) -> Result<((u32, u32, u32), (u32, u32, u32))> {
        let to_u32 = |v: usize, limit: usize, axis: &str| {
            if v > limit {
                return Err(Error::InvalidShape(format!(
                    "launch {axis} dimension {v} exceeds device limit {limit}"
                )));
            }
            u32::try_from(v)
                .map_err(|_| Error::InvalidShape(format!("launch dimension {v} exceeds u32")))
        };
        let (gx, gy, gz) = self.grid_dim();
        let (bx, by, bz) = self.block_dim();
        Ok((
            (
                to_u32(gx, MAX_GRID_X, "grid x")?,
                to_u32(gy, MAX_GRID_YZ, "grid y")?,
                to_u32(gz, MAX_GRID_YZ, "grid z")?,
            ),
            (
                to_u32(bx, usize::MAX, "block x")?,
                to_u32(by, usize::MAX, "block y")?,
                to_u32(bz, usize::MAX, "block z")?,
            ),
        ))
    }
}
