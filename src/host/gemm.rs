//! CPU reference GEMM instances
//!
//! Five interchangeable implementations of [`Gemm`], differing in blocking
//! strategy and in which problems they accept. The blocked variants walk
//! the grid exactly as an accelerator launch would — through the tile
//! partitioners — so the index arithmetic is the shared code under test.
//!
//! Host buffers store elements widened to f32; stores round through the
//! signature's element type.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ElegirError, Result};
use crate::host::HostChunk;
use crate::instance::{ArgumentHandle, Element, InstanceId, KernelInstance, StreamConfig};
use crate::memory::DeviceBuffer;
use crate::ops::gemm::{Gemm, GemmBuffers, GemmProblem};
use crate::registry::StaticRegistry;
use crate::tile::{
    BlockTileShape, FlatTileIndex, OffsetTilePartitioner, Tile1dPartitioner, Tile2dPartitioner,
};

/// Bound argument shared by the host GEMM instances
struct BoundGemm {
    problem: GemmProblem,
    a: Option<HostChunk>,
    b: Option<HostChunk>,
    c: Option<HostChunk>,
    workspace: Option<HostChunk>,
}

impl BoundGemm {
    fn bind(problem: &GemmProblem, buffers: &GemmBuffers) -> Self {
        Self {
            problem: *problem,
            a: buffers.a.downcast_ref::<HostChunk>().cloned(),
            b: buffers.b.downcast_ref::<HostChunk>().cloned(),
            c: buffers.c.downcast_ref::<HostChunk>().cloned(),
            workspace: None,
        }
    }

    /// All three buffers are host-backed and large enough for the strides
    fn host_backed(&self) -> bool {
        let p = &self.problem;
        let fits = |chunk: &Option<HostChunk>, rows: u32, stride: u32, row_len: u32| {
            chunk.as_ref().is_some_and(|c| {
                let needed = if rows == 0 || row_len == 0 {
                    0
                } else {
                    (rows as usize - 1) * stride as usize + row_len as usize
                };
                c.len_words() >= needed
            })
        };
        fits(&self.a, p.m, p.stride_a, p.k)
            && fits(&self.b, p.k, p.stride_b, p.n)
            && fits(&self.c, p.m, p.stride_c, p.n)
    }
}

fn elapsed_ms(start: Instant, stream: &StreamConfig) -> f32 {
    if stream.time_kernel {
        start.elapsed().as_secs_f32() * 1.0e3
    } else {
        0.0
    }
}

fn foreign_argument(id: &InstanceId) -> ElegirError {
    ElegirError::Launch {
        id: id.clone(),
        reason: "argument was bound by a different instance family".to_string(),
    }
}

/// Compute one output tile, accumulating in f32 and rounding stores
/// through `E`
fn compute_tile<E: Element>(
    arg: &BoundGemm,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    row0: u32,
    col0: u32,
    tile: BlockTileShape,
    loop_num: u32,
) {
    let p = &arg.problem;
    let rows = tile.m_per_block.min(p.m.saturating_sub(row0));
    let cols = tile.n_per_block.min(p.n.saturating_sub(col0));

    for r in 0..rows {
        let i = (row0 + r) as usize;
        for col in 0..cols {
            let j = (col0 + col) as usize;
            let mut acc = 0.0f32;
            for lp in 0..loop_num {
                let k0 = lp * tile.k_per_block;
                let k1 = (k0 + tile.k_per_block).min(p.k);
                for l in k0 as usize..k1 as usize {
                    acc += a[i * p.stride_a as usize + l] * b[l * p.stride_b as usize + j];
                }
            }
            c[i * p.stride_c as usize + j] = E::from_f32(acc).to_f32();
        }
    }
}

/// Straightforward triple loop; accepts any packed or strided problem
/// without a reduction split
pub struct NaiveGemm<E: Element>(PhantomData<E>);

impl<E: Element> NaiveGemm<E> {
    /// Create the naive instance
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E: Element> Default for NaiveGemm<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> KernelInstance<Gemm<E>> for NaiveGemm<E> {
    fn bind_argument(&self, problem: &GemmProblem, buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(BoundGemm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundGemm>()
            .is_some_and(|arg| arg.host_backed() && arg.problem.k_batch == 1)
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundGemm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(a), Some(b), Some(c)) = (&arg.a, &arg.b, &arg.c) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;

        let start = Instant::now();
        let a = a.lock();
        let b = b.lock();
        let mut c = c.lock();
        for i in 0..p.m as usize {
            for j in 0..p.n as usize {
                let mut acc = 0.0f32;
                for l in 0..p.k as usize {
                    acc += a[i * p.stride_a as usize + l] * b[l * p.stride_b as usize + j];
                }
                c[i * p.stride_c as usize + j] = E::from_f32(acc).to_f32();
            }
        }
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("naive_gemm_{}", E::DATA_TYPE))
    }
}

/// Tile-blocked GEMM walking a 2-D grid through [`Tile2dPartitioner`]
pub struct BlockedGemm<E: Element> {
    tile: BlockTileShape,
    _element: PhantomData<E>,
}

impl<E: Element> BlockedGemm<E> {
    /// Create a blocked instance with the given tile extents
    #[must_use]
    pub fn new(tile: BlockTileShape) -> Self {
        Self {
            tile,
            _element: PhantomData,
        }
    }
}

impl<E: Element> KernelInstance<Gemm<E>> for BlockedGemm<E> {
    fn bind_argument(&self, problem: &GemmProblem, buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(BoundGemm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundGemm>()
            .is_some_and(|arg| arg.host_backed() && arg.problem.k_batch == 1)
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundGemm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(a), Some(b), Some(c)) = (&arg.a, &arg.b, &arg.c) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;
        let partitioner = Tile2dPartitioner::new(self.tile);
        let grid = partitioner.grid_size(p.m, p.n, 1);
        let loop_num = partitioner.loop_num(p.k);

        let start = Instant::now();
        let a = a.lock();
        let b = b.lock();
        let mut c = c.lock();
        for block_x in 0..grid.dim_x {
            for block_y in 0..grid.dim_y {
                let coord = partitioner.output_tile_index(block_x, block_y);
                compute_tile::<E>(
                    arg,
                    &a,
                    &b,
                    &mut c,
                    coord.i_m * self.tile.m_per_block,
                    coord.i_n * self.tile.n_per_block,
                    self.tile,
                    loop_num,
                );
            }
        }
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("blocked_gemm_{}_{}", E::DATA_TYPE, self.tile))
    }
}

/// Tile-blocked GEMM over a flattened 1-D grid
///
/// Splits the grid into two logical launches at the midpoint; the second
/// half runs through [`OffsetTilePartitioner`], the way a sub-divided
/// physical grid would.
pub struct FlatBlockedGemm<E: Element> {
    tile: BlockTileShape,
    _element: PhantomData<E>,
}

impl<E: Element> FlatBlockedGemm<E> {
    /// Create a flat-grid instance with the given tile extents
    #[must_use]
    pub fn new(tile: BlockTileShape) -> Self {
        Self {
            tile,
            _element: PhantomData,
        }
    }
}

impl<E: Element> KernelInstance<Gemm<E>> for FlatBlockedGemm<E> {
    fn bind_argument(&self, problem: &GemmProblem, buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(BoundGemm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundGemm>()
            .is_some_and(|arg| arg.host_backed() && arg.problem.k_batch == 1)
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundGemm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(a), Some(b), Some(c)) = (&arg.a, &arg.b, &arg.c) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;
        let partitioner = Tile1dPartitioner::new(self.tile, p.n);
        let grid = partitioner.grid_size(p.m).dim_x;
        let loop_num = partitioner.loop_num(p.k);
        let split = grid / 2;

        let start = Instant::now();
        let a = a.lock();
        let b = b.lock();
        let mut c = c.lock();

        let mut process = |coord: crate::tile::TileCoordinate| {
            compute_tile::<E>(
                arg,
                &a,
                &b,
                &mut c,
                coord.i_m * self.tile.m_per_block,
                coord.i_n * self.tile.n_per_block,
                self.tile,
                loop_num,
            );
        };

        for flat in 0..split {
            process(partitioner.output_tile_index(flat));
        }
        // second logical launch shares the physical grid; raw indexes
        // continue from `split` and are shifted back by the adapter
        let tail = OffsetTilePartitioner::new(partitioner, split);
        for raw in split..grid {
            process(tail.offset_tile_index(raw));
        }
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("flat_blocked_gemm_{}_{}", E::DATA_TYPE, self.tile))
    }
}

/// Split-K GEMM accumulating partial products in workspace
///
/// Requires `k_batch >= 2`; the only host instance with a non-zero
/// workspace requirement.
pub struct SplitKGemm<E: Element>(PhantomData<E>);

impl<E: Element> SplitKGemm<E> {
    /// Create the split-K instance
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }

    fn partial_words(problem: &GemmProblem) -> usize {
        problem.k_batch as usize * problem.m as usize * problem.n as usize
    }
}

impl<E: Element> Default for SplitKGemm<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> KernelInstance<Gemm<E>> for SplitKGemm<E> {
    fn bind_argument(&self, problem: &GemmProblem, buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(BoundGemm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundGemm>()
            .is_some_and(|arg| arg.host_backed() && arg.problem.k_batch >= 2)
    }

    fn workspace_size(&self, argument: &ArgumentHandle) -> usize {
        argument
            .downcast_ref::<BoundGemm>()
            .map_or(0, |arg| {
                Self::partial_words(&arg.problem) * std::mem::size_of::<f32>()
            })
    }

    fn bind_workspace(&self, argument: &mut ArgumentHandle, workspace: &DeviceBuffer) {
        if let Some(arg) = argument.downcast_mut::<BoundGemm>() {
            arg.workspace = workspace.downcast_ref::<HostChunk>().cloned();
        }
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundGemm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(a), Some(b), Some(c)) = (&arg.a, &arg.b, &arg.c) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let workspace = arg.workspace.as_ref().ok_or_else(|| ElegirError::Launch {
            id: self.instance_id(),
            reason: "workspace was not bound before run".to_string(),
        })?;
        let p = &arg.problem;
        let (m, n, k) = (p.m as usize, p.n as usize, p.k as usize);
        let k_chunk = p.k.div_ceil(p.k_batch) as usize;

        let start = Instant::now();
        let a = a.lock();
        let b = b.lock();
        let mut c = c.lock();
        let mut ws = workspace.lock();

        for kb in 0..p.k_batch as usize {
            let k0 = kb * k_chunk;
            let k1 = (k0 + k_chunk).min(k);
            let slab = kb * m * n;
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0f32;
                    for l in k0..k1 {
                        acc += a[i * p.stride_a as usize + l] * b[l * p.stride_b as usize + j];
                    }
                    ws[slab + i * n + j] = acc;
                }
            }
        }
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for kb in 0..p.k_batch as usize {
                    acc += ws[kb * m * n + i * n + j];
                }
                c[i * p.stride_c as usize + j] = E::from_f32(acc).to_f32();
            }
        }
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("splitk_gemm_{}", E::DATA_TYPE))
    }
}

/// Alignment-specialized blocked GEMM
///
/// Accepts only packed problems with M, N multiples of 64 and K a multiple
/// of 8 — the kind of shape constraint a vectorized kernel imposes. The
/// rejection path is what the profiling loop's skip handling exists for.
pub struct AlignedGemm<E: Element>(PhantomData<E>);

const ALIGNED_TILE: BlockTileShape = BlockTileShape {
    m_per_block: 64,
    n_per_block: 64,
    k_per_block: 8,
};

impl<E: Element> AlignedGemm<E> {
    /// Create the alignment-specialized instance
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E: Element> Default for AlignedGemm<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> KernelInstance<Gemm<E>> for AlignedGemm<E> {
    fn bind_argument(&self, problem: &GemmProblem, buffers: &GemmBuffers) -> ArgumentHandle {
        ArgumentHandle::new(BoundGemm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument.downcast_ref::<BoundGemm>().is_some_and(|arg| {
            let p = &arg.problem;
            arg.host_backed()
                && p.k_batch == 1
                && p.is_packed()
                && p.m.is_multiple_of(ALIGNED_TILE.m_per_block)
                && p.n.is_multiple_of(ALIGNED_TILE.n_per_block)
                && p.k.is_multiple_of(ALIGNED_TILE.k_per_block)
        })
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundGemm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(a), Some(b), Some(c)) = (&arg.a, &arg.b, &arg.c) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;
        let partitioner = Tile2dPartitioner::new(ALIGNED_TILE);
        let grid = partitioner.grid_size(p.m, p.n, 1);
        let loop_num = partitioner.loop_num(p.k);

        let start = Instant::now();
        let a = a.lock();
        let b = b.lock();
        let mut c = c.lock();
        for block_x in 0..grid.dim_x {
            for block_y in 0..grid.dim_y {
                let coord = partitioner.output_tile_index(block_x, block_y);
                compute_tile::<E>(
                    arg,
                    &a,
                    &b,
                    &mut c,
                    coord.i_m * ALIGNED_TILE.m_per_block,
                    coord.i_n * ALIGNED_TILE.n_per_block,
                    ALIGNED_TILE,
                    loop_num,
                );
            }
        }
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("aligned_gemm_{}_{}", E::DATA_TYPE, ALIGNED_TILE))
    }
}

/// The full CPU reference instance list for [`Gemm<E>`]
///
/// Mirrors a kernel library's per-signature instance factory: one naive
/// fallback, blocked variants at several tile shapes, a flat-grid variant,
/// the alignment specialization and the split-K path.
#[must_use]
pub fn gemm_instances<E: Element>() -> StaticRegistry<Gemm<E>> {
    let tiles = [
        BlockTileShape {
            m_per_block: 128,
            n_per_block: 128,
            k_per_block: 32,
        },
        BlockTileShape {
            m_per_block: 64,
            n_per_block: 64,
            k_per_block: 16,
        },
        BlockTileShape {
            m_per_block: 256,
            n_per_block: 128,
            k_per_block: 64,
        },
    ];

    let mut registry = StaticRegistry::new();
    registry.push(Arc::new(NaiveGemm::<E>::new()));
    for tile in tiles {
        registry.push(Arc::new(BlockedGemm::<E>::new(tile)));
    }
    registry.push(Arc::new(FlatBlockedGemm::<E>::new(tiles[1])));
    registry.push(Arc::new(AlignedGemm::<E>::new()));
    registry.push(Arc::new(SplitKGemm::<E>::new()));
    registry
}
