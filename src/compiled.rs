//! Shape-specialised CPU backend.
//!
//! The first call for a given `(n_queries, n_reference, dim, metric)` builds a
//! [`Kernel`]: a monomorphised distance routine chosen for the dimensionality
//! plus scratch buffers sized for the shape (the lane-packed reference block
//! and the per-query lane output). The kernel is cached and reused for every
//! later call with the same shape; those calls repack into the existing
//! buffers instead of allocating. A different shape,
//! even one query fewer, builds a new kernel, so callers issuing repeated
//! searches should batch or pad to a fixed shape.
//!
//! Kernels sum coordinate terms in the same order and precision as the
//! baseline, so the two backends agree to the last bit for built-in metrics.

use crate::{
    cpu::{validate_pair, validate_k},
    error::{KnnError, Result},
    metric::Metric,
    select::select_neighbours,
    types::{DistanceMatrix, NeighbourIndices, PointSet, QuerySet},
};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Reference points processed together per inner iteration.
pub const LANES: usize = 8;

/// Cache key: everything a kernel is specialised on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    /// Query rows
    pub n_queries: usize,
    /// Reference rows
    pub n_reference: usize,
    /// Coordinates per row
    pub dim: usize,
    /// Distance metric
    pub metric: Metric,
}

impl ShapeKey {
    fn of(queries: &QuerySet, reference: &PointSet, metric: Metric) -> Self {
        Self {
            n_queries: queries.len(),
            n_reference: reference.len(),
            dim: reference.dim(),
            metric,
        }
    }
}

type KernelFn = fn(usize, &[f32], &PackedReference, &mut [f32]);

/// A compiled distance routine for one [`ShapeKey`].
pub struct Kernel {
    key: ShapeKey,
    eval: KernelFn,
    specialised: bool,
    blocks: usize,
    scratch: Mutex<Scratch>,
    compile_time: Duration,
}

/// Buffers owned by a kernel and reused across its calls.
struct Scratch {
    packed: PackedReference,
    lane_out: Vec<f32>,
}

impl Kernel {
    fn compile(key: ShapeKey) -> Self {
        let start = Instant::now();
        let (eval, specialised) = match key.metric {
            Metric::Euclidean => select_for::<Euclidean>(key.dim),
            Metric::SquaredEuclidean => select_for::<SquaredEuclidean>(key.dim),
            Metric::Manhattan => select_for::<Manhattan>(key.dim),
            Metric::Chebyshev => select_for::<Chebyshev>(key.dim),
        };
        let blocks = key.n_reference.div_ceil(LANES);
        let scratch = Mutex::new(Scratch {
            packed: PackedReference::with_blocks(blocks, key.dim),
            lane_out: vec![0.0f32; blocks * LANES],
        });
        let compile_time = start.elapsed();
        debug!(
            "Compiled {} kernel for {:?} ({} lane blocks)",
            if specialised { "fixed-dim" } else { "dynamic-dim" },
            key,
            blocks
        );
        Self {
            key,
            eval,
            specialised,
            blocks,
            scratch,
            compile_time,
        }
    }

    /// The shape this kernel was built for.
    pub fn key(&self) -> ShapeKey {
        self.key
    }

    /// Whether a const-dimension kernel was selected.
    pub fn is_specialised(&self) -> bool {
        self.specialised
    }

    /// Bytes of scratch space allocated for this shape.
    pub fn scratch_bytes(&self) -> usize {
        (self.blocks * self.key.dim * LANES + self.blocks * LANES) * std::mem::size_of::<f32>()
    }

    /// Time spent building the kernel.
    pub fn compile_time(&self) -> Duration {
        self.compile_time
    }

    /// Runs the kernel. The inputs must match [`Kernel::key`].
    pub fn run(&self, queries: &QuerySet, reference: &PointSet) -> Result<DistanceMatrix> {
        validate_pair(queries, reference)?;
        let key = ShapeKey::of(queries, reference, self.key.metric);
        if key != self.key {
            return Err(KnnError::InvalidInput(format!(
                "kernel compiled for {:?} called with {:?}",
                self.key, key
            )));
        }
        // Concurrent callers of one kernel serialise here; a poisoned lock
        // still holds correctly sized buffers and every call repacks them.
        let mut scratch = self.scratch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Scratch { packed, lane_out } = &mut *scratch;
        packed.repack(reference);
        let n = reference.len();
        let mut data = vec![0.0f32; queries.len() * n];
        for (query, out) in queries.rows().zip(data.chunks_exact_mut(n)) {
            (self.eval)(self.key.dim, query, packed, lane_out);
            out.copy_from_slice(&lane_out[..n]);
        }
        DistanceMatrix::from_vec(data, queries.len(), n)
    }
}

/// Reference coordinates in lane-blocked structure-of-arrays layout:
/// block `b` holds `dim` runs of `LANES` values, one run per coordinate.
pub struct PackedReference {
    data: Vec<f32>,
    dim: usize,
}

impl PackedReference {
    fn with_blocks(blocks: usize, dim: usize) -> Self {
        Self {
            data: vec![0.0f32; blocks * dim * LANES],
            dim,
        }
    }

    /// Overwrites every real lane with `reference`. Padding lanes past the
    /// last point are never written and stay zero.
    fn repack(&mut self, reference: &PointSet) {
        let dim = self.dim;
        for (i, point) in reference.rows().enumerate() {
            let block = i / LANES;
            let lane = i % LANES;
            for (c, &value) in point.iter().enumerate() {
                self.data[(block * dim + c) * LANES + lane] = value;
            }
        }
    }

    #[inline]
    fn blocks(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dim * LANES)
    }
}

/// Per-coordinate accumulation rule of a metric.
trait Accumulate {
    fn step(acc: f64, diff: f64) -> f64;
    fn finish(acc: f64) -> f64;
}

struct Euclidean;
struct SquaredEuclidean;
struct Manhattan;
struct Chebyshev;

impl Accumulate for Euclidean {
    #[inline(always)]
    fn step(acc: f64, diff: f64) -> f64 {
        acc + diff * diff
    }
    #[inline(always)]
    fn finish(acc: f64) -> f64 {
        acc.sqrt()
    }
}

impl Accumulate for SquaredEuclidean {
    #[inline(always)]
    fn step(acc: f64, diff: f64) -> f64 {
        acc + diff * diff
    }
    #[inline(always)]
    fn finish(acc: f64) -> f64 {
        acc
    }
}

impl Accumulate for Manhattan {
    #[inline(always)]
    fn step(acc: f64, diff: f64) -> f64 {
        acc + diff.abs()
    }
    #[inline(always)]
    fn finish(acc: f64) -> f64 {
        acc
    }
}

impl Accumulate for Chebyshev {
    #[inline(always)]
    fn step(acc: f64, diff: f64) -> f64 {
        acc.max(diff.abs())
    }
    #[inline(always)]
    fn finish(acc: f64) -> f64 {
        acc
    }
}

fn select_for<A: Accumulate>(dim: usize) -> (KernelFn, bool) {
    let eval: KernelFn = match dim {
        1 => kernel_fixed::<1, A>,
        2 => kernel_fixed::<2, A>,
        3 => kernel_fixed::<3, A>,
        4 => kernel_fixed::<4, A>,
        8 => kernel_fixed::<8, A>,
        _ => return (kernel_dynamic::<A>, false),
    };
    (eval, true)
}

fn kernel_fixed<const D: usize, A: Accumulate>(
    _dim: usize,
    query: &[f32],
    packed: &PackedReference,
    out: &mut [f32],
) {
    let query: [f64; D] = std::array::from_fn(|c| f64::from(query[c]));
    for (block, dst) in packed.blocks().zip(out.chunks_exact_mut(LANES)) {
        let mut acc = [0.0f64; LANES];
        for (c, &q) in query.iter().enumerate() {
            let run = &block[c * LANES..(c + 1) * LANES];
            for (a, &r) in acc.iter_mut().zip(run) {
                *a = A::step(*a, q - f64::from(r));
            }
        }
        for (d, a) in dst.iter_mut().zip(acc) {
            *d = A::finish(a) as f32;
        }
    }
}

fn kernel_dynamic<A: Accumulate>(
    dim: usize,
    query: &[f32],
    packed: &PackedReference,
    out: &mut [f32],
) {
    for (block, dst) in packed.blocks().zip(out.chunks_exact_mut(LANES)) {
        let mut acc = [0.0f64; LANES];
        for (run, &q) in block.chunks_exact(LANES).zip(&query[..dim]) {
            let q = f64::from(q);
            for (a, &r) in acc.iter_mut().zip(run) {
                *a = A::step(*a, q - f64::from(r));
            }
        }
        for (d, a) in dst.iter_mut().zip(acc) {
            *d = A::finish(a) as f32;
        }
    }
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Kernels built
    pub compilations: usize,
    /// Calls served by an existing kernel
    pub hits: usize,
    /// Kernels currently cached
    pub entries: usize,
}

#[derive(Default)]
struct CacheState {
    kernels: HashMap<ShapeKey, Arc<Kernel>>,
    compilations: usize,
    hits: usize,
}

/// Shape-keyed kernel cache shared by every call through one backend.
#[derive(Default)]
pub struct KernelCache {
    state: Mutex<CacheState>,
}

impl KernelCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A poisoned lock only means another caller panicked mid-lookup;
        // the map itself is never left half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the kernel for `key`, compiling it on first use.
    pub fn get_or_compile(&self, key: ShapeKey) -> Arc<Kernel> {
        let mut state = self.lock();
        if let Some(kernel) = state.kernels.get(&key).cloned() {
            state.hits += 1;
            return kernel;
        }
        info!("Compiling kernel for new shape {:?}", key);
        let kernel = Arc::new(Kernel::compile(key));
        state.kernels.insert(key, Arc::clone(&kernel));
        state.compilations += 1;
        kernel
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            compilations: state.compilations,
            hits: state.hits,
            entries: state.kernels.len(),
        }
    }

    /// Drops every cached kernel. Counters are kept.
    pub fn clear(&self) {
        self.lock().kernels.clear();
    }
}

/// CPU backend that runs shape-specialised kernels from a [`KernelCache`].
#[derive(Default)]
pub struct CompiledBackend {
    cache: KernelCache,
}

impl CompiledBackend {
    /// Creates a backend with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The kernel cache.
    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    /// Computes the `(n_queries, n_reference)` distance matrix.
    pub fn compute_distances(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        metric: Metric,
    ) -> Result<DistanceMatrix> {
        validate_pair(queries, reference)?;
        let kernel = self
            .cache
            .get_or_compile(ShapeKey::of(queries, reference, metric));
        kernel.run(queries, reference)
    }

    /// Finds the `k` nearest reference indices for every query.
    pub fn search(
        &self,
        queries: &QuerySet,
        reference: &PointSet,
        k: usize,
        metric: Metric,
    ) -> Result<NeighbourIndices> {
        validate_pair(queries, reference)?;
        validate_k(k, reference)?;
        let distances = self.compute_distances(queries, reference, metric)?;
        select_neighbours(&distances, k)
    }
}
