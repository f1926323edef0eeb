//! Configured search engine dispatching to one execution strategy.

use crate::{
    compiled::CompiledBackend,
    cpu::{compute_distances_cpu, search_cpu},
    device::GpuContext,
    error::{KnnError, Result},
    knn::KnnCompute,
    shard::ShardedSearch,
    types::{Backend, DistanceMatrix, KnnConfig, NeighbourIndices, PointSet, QuerySet},
};
use log::{debug, info};
use std::time::Instant;

/// Batch kNN engine bound to a [`KnnConfig`].
///
/// Backend state (kernel cache, device pipeline, worker pool) is created
/// once and reused across calls.
pub struct BatchKnn {
    config: KnnConfig,
    compiled: CompiledBackend,
    device: Option<KnnCompute>,
    sharded: Option<ShardedSearch>,
}

impl BatchKnn {
    /// Creates an engine for a CPU backend.
    ///
    /// # Errors
    /// Fails on an invalid configuration, or when the configuration asks
    /// for the device backend (use [`BatchKnn::with_gpu`]).
    pub fn new(config: KnnConfig) -> Result<Self> {
        if config.backend == Backend::Device {
            return Err(KnnError::ConfigError(
                "the device backend needs a GPU context; use BatchKnn::with_gpu".to_string(),
            ));
        }
        Self::build(config, None)
    }

    /// Creates an engine that can also dispatch to `context`.
    pub fn with_gpu(config: KnnConfig, context: GpuContext) -> Result<Self> {
        let device = KnnCompute::new(context)?;
        Self::build(config, Some(device))
    }

    fn build(config: KnnConfig, device: Option<KnnCompute>) -> Result<Self> {
        config.validate().map_err(KnnError::ConfigError)?;
        let sharded = match config.backend {
            Backend::Sharded => Some(ShardedSearch::new(config.workers, config.batch_size)?),
            _ => None,
        };
        debug!("BatchKnn configured: {:?}", config);
        Ok(Self {
            config,
            compiled: CompiledBackend::new(),
            device,
            sharded,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    /// The compiled backend, exposing its kernel cache.
    pub fn compiled(&self) -> &CompiledBackend {
        &self.compiled
    }

    fn device(&self) -> Result<&KnnCompute> {
        self.device
            .as_ref()
            .ok_or_else(|| KnnError::NotSupported("no GPU context attached".to_string()))
    }

    fn sharded(&self) -> Result<&ShardedSearch> {
        self.sharded
            .as_ref()
            .ok_or_else(|| KnnError::NotSupported("no worker pool configured".to_string()))
    }

    /// Distance matrix under the configured metric and backend.
    pub fn compute_distances(&self, queries: &QuerySet, reference: &PointSet) -> Result<DistanceMatrix> {
        let metric = self.config.metric;
        let start = Instant::now();
        let distances = match self.config.backend {
            Backend::Baseline => compute_distances_cpu(queries, reference, metric)?,
            Backend::Compiled => self.compiled.compute_distances(queries, reference, metric)?,
            Backend::Device => self
                .device()?
                .dispatch_distances(queries, reference, metric)?
                .wait_blocking()?,
            Backend::Sharded => self.sharded()?.compute_distances(queries, reference, metric)?,
        };
        info!(
            "{} distances {}x{} in {:.2} ms",
            self.config.backend,
            queries.len(),
            reference.len(),
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(distances)
    }

    /// The configured `k` nearest reference indices for every query.
    pub fn search(&self, queries: &QuerySet, reference: &PointSet) -> Result<NeighbourIndices> {
        let KnnConfig { k, metric, backend, .. } = self.config;
        let start = Instant::now();
        let indices = match backend {
            Backend::Baseline => search_cpu(queries, reference, k, metric)?,
            Backend::Compiled => self.compiled.search(queries, reference, k, metric)?,
            Backend::Device => self
                .device()?
                .dispatch_search(queries, reference, k, metric)?
                .wait_blocking()?,
            Backend::Sharded => self.sharded()?.search(queries, reference, k, metric)?,
        };
        info!(
            "{} search of {} queries (k={}) in {:.2} ms",
            backend,
            queries.len(),
            k,
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(indices)
    }
}
