//! Benchmark harness comparing execution strategies.
//!
//! A [`BenchHarness`] takes an explicit list of [`BenchCase`]s and returns a
//! [`BenchTable`]; nothing is accumulated between runs. Each case generates
//! its own seeded data, times the first call separately (it pays for kernel
//! compilation or pipeline creation) and then times `repeats` further calls.
//! Device results are awaited inside the timed region.

use crate::{
    compiled::CompiledBackend,
    cpu::search_cpu,
    device::GpuContext,
    error::{KnnError, Result},
    knn::KnnCompute,
    metric::Metric,
    shard::ShardedSearch,
    types::{Backend, NeighbourIndices, PointSet},
};
use log::{info, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// One configuration to time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchCase {
    /// Label shown in the result table
    pub name: String,
    /// Execution strategy
    pub backend: Backend,
    /// Number of query rows
    pub n_queries: usize,
    /// Number of reference rows
    pub n_reference: usize,
    /// Coordinates per row
    pub dim: usize,
    /// Neighbours per query
    pub k: usize,
    /// Distance metric
    pub metric: Metric,
}

impl BenchCase {
    /// Euclidean case named `<backend>-<n_queries>x<n_reference>`.
    pub fn new(backend: Backend, n_queries: usize, n_reference: usize, dim: usize, k: usize) -> Self {
        Self {
            name: format!("{}-{}x{}", backend, n_queries, n_reference),
            backend,
            n_queries,
            n_reference,
            dim,
            k,
            metric: Metric::Euclidean,
        }
    }

    /// Every backend on the same `(n_queries, n_reference, dim, k)` shape.
    pub fn across_backends(n_queries: usize, n_reference: usize, dim: usize, k: usize) -> Vec<Self> {
        Backend::ALL
            .iter()
            .map(|&backend| Self::new(backend, n_queries, n_reference, dim, k))
            .collect()
    }
}

/// Timings for one case, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchRecord {
    /// The timed case
    pub case: BenchCase,
    /// First call, including any compilation
    pub first_call_ms: f64,
    /// Fastest repeat
    pub min_ms: f64,
    /// Mean over repeats
    pub mean_ms: f64,
    /// Number of repeats after the first call
    pub repeats: usize,
}

/// A case that could not run, with the reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedCase {
    /// Case label
    pub name: String,
    /// Why it was skipped
    pub reason: String,
}

/// Structured result of a harness run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchTable {
    /// Timed cases, in input order
    pub records: Vec<BenchRecord>,
    /// Cases that needed a device that was not available
    pub skipped: Vec<SkippedCase>,
}

impl BenchTable {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Record for the case labelled `name`.
    pub fn get(&self, name: &str) -> Option<&BenchRecord> {
        self.records.iter().find(|r| r.case.name == name)
    }
}

impl fmt::Display for BenchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<28} {:>9} {:>9} {:>5} {:>4} {:>12} {:>10} {:>10}",
            "case", "queries", "reference", "dim", "k", "first (ms)", "min (ms)", "mean (ms)"
        )?;
        for r in &self.records {
            writeln!(
                f,
                "{:<28} {:>9} {:>9} {:>5} {:>4} {:>12.3} {:>10.3} {:>10.3}",
                r.case.name,
                r.case.n_queries,
                r.case.n_reference,
                r.case.dim,
                r.case.k,
                r.first_call_ms,
                r.min_ms,
                r.mean_ms
            )?;
        }
        for s in &self.skipped {
            writeln!(f, "{:<28} skipped: {}", s.name, s.reason)?;
        }
        Ok(())
    }
}

/// Runs benchmark cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BenchHarness {
    /// Timed calls after the first one
    pub repeats: usize,
    /// Base seed for generated data
    pub seed: u64,
}

impl Default for BenchHarness {
    fn default() -> Self {
        Self { repeats: 5, seed: 42 }
    }
}

fn random_points(rng: &mut StdRng, n: usize, dim: usize) -> Result<PointSet> {
    let data = (0..n * dim).map(|_| rng.gen_range(-100.0..100.0)).collect();
    PointSet::new(data, dim)
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn timed<F>(mut call: F) -> Result<Duration>
where
    F: FnMut() -> Result<NeighbourIndices>,
{
    let start = Instant::now();
    call()?;
    Ok(start.elapsed())
}

impl BenchHarness {
    /// Times every case in order.
    ///
    /// Device cases are skipped when `gpu` is `None`; any other failure
    /// aborts the run.
    pub fn run(&self, cases: &[BenchCase], gpu: Option<&GpuContext>) -> Result<BenchTable> {
        let mut table = BenchTable::default();
        for (index, case) in cases.iter().enumerate() {
            if case.backend == Backend::Device && gpu.is_none() {
                warn!("Skipping {}: no GPU adapter", case.name);
                table.skipped.push(SkippedCase {
                    name: case.name.clone(),
                    reason: "no GPU adapter available".to_string(),
                });
                continue;
            }
            let record = self.run_case(case, index as u64, gpu)?;
            info!(
                "{}: first {:.3} ms, min {:.3} ms, mean {:.3} ms",
                case.name, record.first_call_ms, record.min_ms, record.mean_ms
            );
            table.records.push(record);
        }
        Ok(table)
    }

    fn run_case(&self, case: &BenchCase, index: u64, gpu: Option<&GpuContext>) -> Result<BenchRecord> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index));
        let reference = random_points(&mut rng, case.n_reference, case.dim)?;
        let queries = random_points(&mut rng, case.n_queries, case.dim)?;
        let (k, metric) = (case.k, case.metric);

        let (first, rest) = match case.backend {
            Backend::Baseline => {
                let call = || search_cpu(&queries, &reference, k, metric);
                (timed(call)?, self.repeat(call)?)
            }
            Backend::Compiled => {
                let backend = CompiledBackend::new();
                let call = || backend.search(&queries, &reference, k, metric);
                (timed(call)?, self.repeat(call)?)
            }
            Backend::Sharded => {
                let sharded = ShardedSearch::new(0, 0)?;
                let call = || sharded.search(&queries, &reference, k, metric);
                (timed(call)?, self.repeat(call)?)
            }
            Backend::Device => {
                let context = gpu.ok_or_else(|| KnnError::NotSupported("no GPU context".to_string()))?;
                let start = Instant::now();
                let compute = KnnCompute::new(context.clone())?;
                compute
                    .dispatch_search(&queries, &reference, k, metric)?
                    .wait_blocking()?;
                let first = start.elapsed();
                let call = || {
                    compute
                        .dispatch_search(&queries, &reference, k, metric)?
                        .wait_blocking()
                };
                (first, self.repeat(call)?)
            }
        };

        let mean = if rest.is_empty() {
            first
        } else {
            rest.iter().sum::<Duration>() / rest.len() as u32
        };
        let min = rest.iter().copied().min().unwrap_or(first);
        Ok(BenchRecord {
            case: case.clone(),
            first_call_ms: ms(first),
            min_ms: ms(min),
            mean_ms: ms(mean),
            repeats: self.repeats,
        })
    }

    fn repeat<F>(&self, mut call: F) -> Result<Vec<Duration>>
    where
        F: FnMut() -> Result<NeighbourIndices>,
    {
        (0..self.repeats).map(|_| timed(&mut call)).collect()
    }
}
