//! Sharded fan-out over independent query batches.
//!
//! Queries are cut into contiguous shards; each shard runs the baseline
//! search against the shared, read-only reference set on a rayon pool.
//! Shards may finish in any order, but results are reassembled in shard
//! order so row `i` of the output still belongs to query `i`.

use crate::{
    cpu::{compute_distances_cpu, search_cpu, validate_pair, validate_search},
    error::{KnnError, Result},
    metric::Metric,
    types::{DistanceMatrix, NeighbourIndices, PointSet, QuerySet},
};
use log::{debug, info};
use rayon::prelude::*;
use std::time::Instant;

/// Splits `points` into consecutive batches of at most `batch_size` rows.
///
/// The result has `ceil(n / batch_size)` batches; only the last may be short.
pub fn split_into_batches(points: &PointSet, batch_size: usize) -> Result<Vec<PointSet>> {
    if batch_size == 0 {
        return Err(KnnError::InvalidInput("batch_size must be greater than 0".to_string()));
    }
    let n = points.len();
    Ok((0..n)
        .step_by(batch_size)
        .map(|start| points.slice_rows(start, (start + batch_size).min(n)))
        .collect())
}

/// Splits `points` into at most `shards` batches of near-equal size.
pub fn split_evenly(points: &PointSet, shards: usize) -> Result<Vec<PointSet>> {
    if shards == 0 {
        return Err(KnnError::InvalidInput("shard count must be greater than 0".to_string()));
    }
    let batch_size = points.len().div_ceil(shards).max(1);
    split_into_batches(points, batch_size)
}

/// How queries are cut into shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardPlan {
    /// Fixed number of rows per shard.
    BatchSize(usize),
    /// Fixed number of shards.
    Shards(usize),
}

/// Fan-out executor with its own worker pool.
pub struct ShardedSearch {
    pool: rayon::ThreadPool,
    plan: ShardPlan,
}

impl ShardedSearch {
    /// Creates an executor with `workers` threads (0 = one per core).
    ///
    /// `batch_size` of 0 splits queries evenly, one shard per worker.
    pub fn new(workers: usize, batch_size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("knn-shard-{}", i))
            .build()
            .map_err(|e| KnnError::ComputeError(format!("Failed to build worker pool: {}", e)))?;
        let plan = if batch_size > 0 {
            ShardPlan::BatchSize(batch_size)
        } else {
            ShardPlan::Shards(pool.current_num_threads())
        };
        debug!(
            "Sharded executor: {} workers, plan {:?}",
            pool.current_num_threads(),
            plan
        );
        Ok(Self { pool, plan })
    }

    /// The active shard plan.
    pub fn plan(&self) -> ShardPlan {
        self.plan
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn shards(&self, queries: &QuerySet) -> Result<Vec<QuerySet>> {
        match self.plan {
            ShardPlan::BatchSize(size) => split_into_batches(queries, size),
            ShardPlan::Shards(count) => split_evenly(queries, count),
        }
    }

    /// Runs `task` on every shard and returns the outputs in shard order.
    ///
    /// The first failing shard is reported as [`KnnError::ShardFailed`];
    /// shards not yet started when it fails may be skipped.
    pub fn fan_out<T, F>(&self, queries: &QuerySet, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&QuerySet) -> Result<T> + Sync,
    {
        let shards = self.shards(queries)?;
        let start = Instant::now();
        let outputs = self.pool.install(|| {
            shards
                .par_iter()
                .enumerate()
                .map(|(shard, batch)| {
                    task(batch).map_err(|e| KnnError::ShardFailed {
                        shard,
                        source: Box::new(e),
                    })
                })
                .collect::<Result<Vec<T>>>()
        })?;
        info!(
            "Fan-out over {} shards finished in {:.2} ms",
            outputs.len(),
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(outputs)
    }

    /// Distance matrix computed shard by shard.
    pub fn compute_distances(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        metric: Metric,
    ) -> Result<DistanceMatrix> {
        validate_pair(queries, reference)?;
        let parts = self.fan_out(queries, |batch| {
            compute_distances_cpu(batch, reference, metric)
        })?;
        let data = parts.iter().flat_map(|part| part.as_slice().iter().copied()).collect();
        DistanceMatrix::from_vec(data, queries.len(), reference.len())
    }

    /// Search computed shard by shard.
    pub fn search(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        k: usize,
        metric: Metric,
    ) -> Result<NeighbourIndices> {
        validate_search(queries, reference, k)?;
        let parts = self.fan_out(queries, |batch| search_cpu(batch, reference, k, metric))?;
        NeighbourIndices::concat(parts)
    }
}
