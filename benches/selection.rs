//! Benchmark suite for tile arithmetic and instance selection
//!
//! Measures the per-block index math used on the hot path and the full
//! cold-path profiling scan over the CPU reference registry.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use elegir::host::{gemm_instances, host_buffer, HostAllocator};
use elegir::ops::gemm::{GemmBuffers, GemmProblem};
use elegir::tile::{
    BlockTileShape, FlatTileIndex, OffsetTilePartitioner, Tile1dPartitioner, Tile2dPartitioner,
};
use elegir::{dispatch, select_best, StreamConfig};

const BENCH_TILE: BlockTileShape = BlockTileShape {
    m_per_block: 128,
    n_per_block: 128,
    k_per_block: 32,
};

fn benchmark_grid_size(c: &mut Criterion) {
    let partitioner = Tile2dPartitioner::new(BENCH_TILE);
    let mut group = c.benchmark_group("grid_size");

    for dim in [256u32, 1024, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            b.iter(|| {
                let grid = partitioner.grid_size(black_box(dim), black_box(dim), 1);
                black_box(grid)
            });
        });
    }

    group.finish();
}

fn benchmark_flat_unflatten(c: &mut Criterion) {
    let partitioner = Tile1dPartitioner::new(BENCH_TILE, 4096);

    c.bench_function("flat_unflatten_row_major", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for flat in 0..1024u32 {
                let coord = partitioner.output_tile_index(black_box(flat));
                acc = acc.wrapping_add(coord.i_m ^ coord.i_n);
            }
            black_box(acc)
        });
    });

    let offset = OffsetTilePartitioner::new(Tile1dPartitioner::new(BENCH_TILE, 4096), 512);
    c.bench_function("flat_unflatten_offset", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for raw in 512..1536u32 {
                let coord = offset.offset_tile_index(black_box(raw));
                acc = acc.wrapping_add(coord.i_m ^ coord.i_n);
            }
            black_box(acc)
        });
    });
}

fn gemm_fixture(m: u32, n: u32, k: u32) -> (GemmProblem, GemmBuffers) {
    let problem = GemmProblem::new(m, n, k);
    let buffers = GemmBuffers {
        a: host_buffer((0..m * k).map(|i| (i % 7) as f32 * 0.25).collect()),
        b: host_buffer((0..k * n).map(|i| (i % 5) as f32 * 0.5).collect()),
        c: host_buffer(vec![0.0; (m * n) as usize]),
    };
    (problem, buffers)
}

fn benchmark_select_best(c: &mut Criterion) {
    let registry = gemm_instances::<f32>();
    let allocator = HostAllocator::new();
    let (problem, buffers) = gemm_fixture(64, 64, 32);

    c.bench_function("select_best_gemm_64", |b| {
        b.iter(|| {
            let selection = select_best(&registry, &problem, &buffers, &allocator).unwrap();
            black_box(selection)
        });
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let registry = gemm_instances::<f32>();
    let allocator = HostAllocator::new();
    let (problem, buffers) = gemm_fixture(64, 64, 32);
    let selection = select_best(&registry, &problem, &buffers, &allocator)
        .unwrap()
        .unwrap();
    let stream = StreamConfig::default();

    c.bench_function("dispatch_gemm_64", |b| {
        b.iter(|| {
            let report =
                dispatch(&registry, &selection, &problem, &buffers, &allocator, &stream).unwrap();
            black_box(report)
        });
    });
}

criterion_group!(
    benches,
    benchmark_grid_size,
    benchmark_flat_unflatten,
    benchmark_select_best,
    benchmark_dispatch,
);
criterion_main!(benches);
