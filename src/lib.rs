//! Exact batch k-nearest-neighbour search on the CPU and on wgpu devices.
//!
//! Every query is compared against every reference point under a chosen
//! [`Metric`]; the `k` closest reference indices per query are picked with a
//! linear-time partial selection. Four execution strategies share that
//! contract:
//!
//! - **baseline**: eager single-threaded evaluation ([`cpu`])
//! - **compiled**: shape-specialised kernels cached per input shape ([`compiled`])
//! - **device**: a wgpu compute shader returning an awaitable handle ([`knn`])
//! - **sharded**: query shards fanned out over a rayon pool ([`shard`])
//!
//! On top of the search sit neighbour-based attribute estimation
//! ([`estimate`]), query grids ([`grid`]), a synthetic house-price model
//! ([`city`]) and a benchmark harness ([`bench`]).
//!
//! # Example
//!
//! ```rust
//! use batch_knn_wgpu::{search, Metric, PointSet};
//!
//! # fn example() -> batch_knn_wgpu::Result<()> {
//! let reference = PointSet::from_rows(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]])?;
//! let queries = PointSet::from_rows(&[[1.0, 1.0]])?;
//!
//! let neighbours = search(&queries, &reference, 1, Metric::Euclidean)?;
//! assert_eq!(neighbours.row(0), &[0]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]

pub mod bench;
pub mod city;
pub mod compiled;
pub mod cpu;
pub mod device;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod grid;
pub mod knn;
pub mod metric;
pub mod select;
pub mod shaders;
pub mod shard;
pub mod types;

pub use bench::{BenchCase, BenchHarness, BenchRecord, BenchTable};
pub use city::{CityParams, HighEndCenter};
pub use compiled::{CacheStats, CompiledBackend, KernelCache};
pub use cpu::{compute_distances_cpu, compute_distances_with, search_cpu, search_with};
pub use device::GpuContext;
pub use engine::BatchKnn;
pub use error::{KnnError, Result};
pub use estimate::{estimate, estimate_sharded, Aggregate, AttributedPoints};
pub use grid::{create_grid, create_query_points};
pub use knn::{KnnCompute, PendingDistances, PendingSearch};
pub use metric::{DistanceMetric, Metric};
pub use shard::{split_into_batches, ShardedSearch};
pub use types::{Backend, DistanceMatrix, KnnConfig, NeighbourIndices, PointSet, QuerySet};

/// Computes the `(n_queries, n_reference)` distance matrix on the CPU.
pub fn compute_distances(queries: &QuerySet, reference: &PointSet, metric: Metric) -> Result<DistanceMatrix> {
    compute_distances_cpu(queries, reference, metric)
}

/// Finds the `k` nearest reference indices for every query on the CPU.
///
/// # Errors
/// [`KnnError::DimensionMismatch`], [`KnnError::EmptyInput`] or
/// [`KnnError::InvalidK`] when the inputs do not describe a valid search.
pub fn search(queries: &QuerySet, reference: &PointSet, k: usize, metric: Metric) -> Result<NeighbourIndices> {
    search_cpu(queries, reference, k, metric)
}

/// Computes distances on the GPU if one is available, otherwise on the CPU.
pub async fn compute_distances_auto(
    queries: &QuerySet,
    reference: &PointSet,
    metric: Metric,
) -> Result<DistanceMatrix> {
    match GpuContext::new().await {
        Ok(ctx) => {
            let compute = KnnCompute::new(ctx)?;
            compute.compute_distances(queries, reference, metric).await
        }
        Err(e) => {
            log::info!("GPU unavailable ({}), using CPU", e);
            compute_distances_cpu(queries, reference, metric)
        }
    }
}

/// Searches on the GPU if one is available, otherwise on the CPU.
pub async fn search_auto(
    queries: &QuerySet,
    reference: &PointSet,
    k: usize,
    metric: Metric,
) -> Result<NeighbourIndices> {
    match GpuContext::new().await {
        Ok(ctx) => {
            let compute = KnnCompute::new(ctx)?;
            compute.search(queries, reference, k, metric).await
        }
        Err(e) => {
            log::info!("GPU unavailable ({}), using CPU", e);
            search_cpu(queries, reference, k, metric)
        }
    }
}

/// Library version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
