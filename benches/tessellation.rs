//! Benchmarks for the geometry kernel and the multi-block pipeline.
//!
//! - `kernel/*`: one kernel call on uniform random points, with and without
//!   Hilbert-ordered insertion
//! - `pipeline/*`: full exchange rounds over a jittered lattice, in one
//!   process and over in-process ranks
//!
//! Set `TESS_BENCH_SEED` to change the point sets.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tess::geometry::kernel::LabeledPoint;
use tess::geometry::point::particle_to_point;
use tess::geometry::util::point_generation::random_particles_seeded;
use tess::prelude::*;

const KERNEL_COUNTS: &[usize] = &[1_000, 5_000, 20_000];

fn bench_seed() -> u64 {
    std::env::var("TESS_BENCH_SEED")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(42)
}

fn labeled(n: usize, seed: u64) -> Vec<LabeledPoint> {
    let bounds = Aabb::new([0.0; 3], [1.0; 3]);
    random_particles_seeded(&bounds, n, seed)
        .expect("unit box is valid")
        .iter()
        .zip(0_u32..)
        .map(|(p, label)| LabeledPoint {
            point: particle_to_point(p),
            label,
        })
        .collect()
}

fn benchmark_kernel(c: &mut Criterion) {
    let seed = bench_seed();
    let mut group = c.benchmark_group("kernel");
    for &n in KERNEL_COUNTS {
        let points = labeled(n, seed.wrapping_add(n as u64));
        group.throughput(Throughput::Elements(n as u64));
        for spatial_sort in [true, false] {
            let kernel = KernelChoice::BowyerWatson { spatial_sort }.build();
            let name = if spatial_sort { "hilbert" } else { "input_order" };
            group.bench_with_input(BenchmarkId::new(name, n), &points, |b, points| {
                b.iter(|| black_box(kernel.triangulate(black_box(points)).unwrap()));
            });
        }
    }
    group.finish();
}

fn lattice(tot_blocks: usize, side: usize, wrap: bool) -> TessConfig {
    TessConfig {
        tot_blocks,
        domain_size: [side; 3],
        domain_max: [side as f64; 3],
        jitter: 0.3,
        wrap,
        max_rounds: 12,
        seed: bench_seed(),
        ..TessConfig::default()
    }
}

fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    for (tot_blocks, side) in [(8, 16), (27, 24)] {
        let particles = (side * side * side) as u64;
        group.throughput(Throughput::Elements(particles));
        for wrap in [false, true] {
            let config = lattice(tot_blocks, side, wrap);
            let label = format!("{tot_blocks}blocks_{}", if wrap { "periodic" } else { "open" });
            group.bench_with_input(BenchmarkId::new(label, side), &config, |b, config| {
                b.iter(|| black_box(run(&SingleProcess, config).unwrap().total_tets));
            });
        }
        let config = lattice(tot_blocks, side, true);
        group.bench_with_input(
            BenchmarkId::new(format!("{tot_blocks}blocks_4ranks"), side),
            &config,
            |b, config| {
                b.iter(|| {
                    ThreadWorld::run(4, |comm| run(&comm, config).unwrap().total_tets)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = benchmark_kernel, benchmark_pipeline
);
criterion_main!(benches);
