//! Benchmarks for the batch-knn-wgpu library.
//!
//! Compares the execution strategies on the same random inputs across a
//! range of reference set sizes. Device benchmarks are skipped when no GPU
//! adapter is available.

use batch_knn_wgpu::{
    search_cpu, CompiledBackend, GpuContext, KnnCompute, Metric, PointSet, ShardedSearch,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use std::time::Duration;

const N_QUERIES: usize = 256;
const DIM: usize = 3;
const K: usize = 4;

/// Generates a random point set in `[-100, 100)^dim`.
fn generate_random_points(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * dim).map(|_| rng.gen_range(-100.0..100.0)).collect();
    PointSet::new(data, dim).unwrap()
}

fn benchmark_cpu_backends(c: &mut Criterion) {
    let compiled = CompiledBackend::new();
    let sharded = ShardedSearch::new(0, 0).unwrap();
    let queries = generate_random_points(N_QUERIES, DIM, 7);

    let mut group = c.benchmark_group("search_cpu_backends");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for &n_reference in &[1_000, 10_000, 50_000] {
        let reference = generate_random_points(n_reference, DIM, 42);

        group.bench_with_input(BenchmarkId::new("baseline", n_reference), &reference, |b, reference| {
            b.iter(|| black_box(search_cpu(&queries, black_box(reference), K, Metric::Euclidean).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("compiled", n_reference), &reference, |b, reference| {
            b.iter(|| black_box(compiled.search(&queries, black_box(reference), K, Metric::Euclidean).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("sharded", n_reference), &reference, |b, reference| {
            b.iter(|| black_box(sharded.search(&queries, black_box(reference), K, Metric::Euclidean).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_device(c: &mut Criterion) {
    let Ok(gpu) = pollster::block_on(GpuContext::new()) else {
        eprintln!("No GPU adapter available, skipping device benchmarks");
        return;
    };
    println!("Benchmarking on: {}", gpu.device_description());
    let compute = KnnCompute::new(gpu).unwrap();
    let queries = generate_random_points(N_QUERIES, DIM, 7);

    let mut group = c.benchmark_group("search_device");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for &n_reference in &[1_000, 10_000, 50_000] {
        let reference = generate_random_points(n_reference, DIM, 42);
        group.bench_with_input(BenchmarkId::from_parameter(n_reference), &reference, |b, reference| {
            b.iter(|| {
                let pending = compute
                    .dispatch_search(&queries, black_box(reference), K, Metric::Euclidean)
                    .unwrap();
                black_box(pending.wait_blocking().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let queries = generate_random_points(N_QUERIES, 8, 7);
    let reference = generate_random_points(10_000, 8, 42);

    let mut group = c.benchmark_group("distance_metrics");
    group.sample_size(20);

    for metric in Metric::ALL {
        group.bench_function(BenchmarkId::from_parameter(metric), |b| {
            b.iter(|| black_box(search_cpu(&queries, &reference, K, metric).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_cpu_backends, benchmark_device, benchmark_metrics);
criterion_main!(benches);
