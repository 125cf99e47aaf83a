//! Tile partitioning arithmetic
//!
//! Maps a logical compute grid (output tile coordinates) onto a physical
//! execution grid (block indices). Two partitioners cover the two backend
//! shapes: [`Tile2dPartitioner`] when the backend exposes a 2-D grid, and
//! [`Tile1dPartitioner`] when only a single flattened dimension is
//! available. [`OffsetTilePartitioner`] adapts any flat partitioner to
//! grids sub-divided across multiple logical launches.

use serde::{Deserialize, Serialize};

use crate::error::{ElegirError, Result};

/// Per-block tile extents of a kernel
///
/// All extents are validated non-zero at construction; the partitioning
/// arithmetic divides by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockTileShape {
    /// Output tile rows computed per block
    pub m_per_block: u32,
    /// Output tile columns computed per block
    pub n_per_block: u32,
    /// Reduction extent consumed per loop iteration
    pub k_per_block: u32,
}

impl BlockTileShape {
    /// Create a validated tile shape
    ///
    /// # Errors
    ///
    /// Returns [`ElegirError::InvalidTileShape`] if any extent is zero.
    pub fn new(m_per_block: u32, n_per_block: u32, k_per_block: u32) -> Result<Self> {
        if m_per_block == 0 || n_per_block == 0 || k_per_block == 0 {
            return Err(ElegirError::InvalidTileShape {
                m_per_block,
                n_per_block,
                k_per_block,
            });
        }
        Ok(Self {
            m_per_block,
            n_per_block,
            k_per_block,
        })
    }
}

impl std::fmt::Display for BlockTileShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.m_per_block, self.n_per_block, self.k_per_block
        )
    }
}

/// Physical launch dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    /// Blocks along X
    pub dim_x: u32,
    /// Blocks along Y
    pub dim_y: u32,
    /// Blocks along Z (batch)
    pub dim_z: u32,
}

impl GridShape {
    /// Total number of blocks in the grid
    #[must_use]
    pub fn block_count(&self) -> u64 {
        u64::from(self.dim_x) * u64::from(self.dim_y) * u64::from(self.dim_z)
    }
}

/// Logical output tile coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoordinate {
    /// Tile row index, bounded by the number of M-tiles
    pub i_m: u32,
    /// Tile column index, bounded by the number of N-tiles
    pub i_n: u32,
}

/// Maps 2-D block indices to output tiles
#[derive(Debug, Clone, Copy)]
pub struct Tile2dPartitioner {
    tile: BlockTileShape,
}

impl Tile2dPartitioner {
    /// Create a partitioner for the given tile extents
    #[must_use]
    pub fn new(tile: BlockTileShape) -> Self {
        Self { tile }
    }

    /// Tile extents this partitioner divides by
    #[must_use]
    pub fn tile(&self) -> BlockTileShape {
        self.tile
    }

    /// Launch dimensions covering an `m` x `n` problem over `batch` slices
    #[must_use]
    pub fn grid_size(&self, m: u32, n: u32, batch: u32) -> GridShape {
        GridShape {
            dim_x: m.div_ceil(self.tile.m_per_block),
            dim_y: n.div_ceil(self.tile.n_per_block),
            dim_z: batch,
        }
    }

    /// Number of reduction-loop iterations a kernel body executes
    #[must_use]
    pub fn loop_num(&self, k: u32) -> u32 {
        k.div_ceil(self.tile.k_per_block)
    }

    /// Output tile for a 2-D block index
    ///
    /// Identity mapping; present for interface uniformity with the 1-D
    /// variant.
    #[must_use]
    pub fn output_tile_index(&self, block_x: u32, block_y: u32) -> TileCoordinate {
        TileCoordinate {
            i_m: block_x,
            i_n: block_y,
        }
    }
}

/// Unflattens a single grid dimension into an output tile coordinate
///
/// Any type exposing this single-argument mapping can be wrapped by
/// [`OffsetTilePartitioner`]; types without it cannot, enforced by the
/// trait bound.
pub trait FlatTileIndex {
    /// Output tile for a flat block index
    fn output_tile_index(&self, flat: u32) -> TileCoordinate;
}

/// Maps flat 1-D block indices to output tiles
///
/// Holds `n` as construction-time state: one partitioner is valid for
/// exactly one N value.
#[derive(Debug, Clone, Copy)]
pub struct Tile1dPartitioner {
    tile: BlockTileShape,
    n: u32,
}

impl Tile1dPartitioner {
    /// Create a partitioner for the given tile extents and problem N
    #[must_use]
    pub fn new(tile: BlockTileShape, n: u32) -> Self {
        Self { tile, n }
    }

    /// Tile extents this partitioner divides by
    #[must_use]
    pub fn tile(&self) -> BlockTileShape {
        self.tile
    }

    /// Number of tile columns covering N
    #[must_use]
    pub fn n_blocks(&self) -> u32 {
        self.n.div_ceil(self.tile.n_per_block)
    }

    /// Flattened launch dimensions covering an `m` x N problem
    #[must_use]
    pub fn grid_size(&self, m: u32) -> GridShape {
        GridShape {
            dim_x: m.div_ceil(self.tile.m_per_block) * self.n_blocks(),
            dim_y: 1,
            dim_z: 1,
        }
    }

    /// Number of reduction-loop iterations a kernel body executes
    #[must_use]
    pub fn loop_num(&self, k: u32) -> u32 {
        k.div_ceil(self.tile.k_per_block)
    }
}

impl FlatTileIndex for Tile1dPartitioner {
    /// Row-major unflattening: `i_m = flat / n_blocks`, `i_n = remainder`
    ///
    /// No bounds check is performed. A flat index outside
    /// `[0, grid_size(m).dim_x)` yields a meaningless but non-crashing
    /// coordinate; staying in range is a caller precondition.
    fn output_tile_index(&self, flat: u32) -> TileCoordinate {
        // n == 0 means an empty grid with no valid flat index at all;
        // clamp the divisor so the precondition violation stays non-fatal.
        let n_blocks = self.n_blocks().max(1);
        let i_m = flat / n_blocks;
        TileCoordinate {
            i_m,
            i_n: flat - i_m * n_blocks,
        }
    }
}

/// Offsetting adapter for grids shared across multiple logical launches
///
/// Subtracts the wrapped launch's starting block from the raw flat index
/// before unflattening. Only types implementing [`FlatTileIndex`] can be
/// wrapped.
#[derive(Debug, Clone, Copy)]
pub struct OffsetTilePartitioner<P: FlatTileIndex> {
    inner: P,
    block_start: u32,
}

impl<P: FlatTileIndex> OffsetTilePartitioner<P> {
    /// Wrap a flat partitioner with a launch offset
    pub fn new(inner: P, block_start: u32) -> Self {
        Self { inner, block_start }
    }

    /// Output tile for a raw (un-offset) flat block index
    ///
    /// Precondition: `raw >= block_start`. A smaller raw index wraps and
    /// yields a meaningless but non-crashing coordinate, mirroring the
    /// unchecked 1-D mapping.
    pub fn offset_tile_index(&self, raw: u32) -> TileCoordinate {
        self.inner.output_tile_index(raw.wrapping_sub(self.block_start))
    }
}

impl<P: FlatTileIndex> FlatTileIndex for OffsetTilePartitioner<P> {
    fn output_tile_index(&self, flat: u32) -> TileCoordinate {
        self.offset_tile_index(flat)
    }
}
