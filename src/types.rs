//! Type definitions for point sets, search results and configuration.
//!
//! All matrices are dense and row-major. Distance matrices are query-major:
//! entry `(i, j)` is the distance from query `i` to reference point `j`.

use crate::error::{KnnError, Result, ValidationError};
use crate::metric::Metric;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dense `(n, d)` set of points with finite `f32` coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PointSet {
    data: Vec<f32>,
    dim: usize,
}

/// Query points share the reference point layout.
pub type QuerySet = PointSet;

impl PointSet {
    /// Creates a point set from a flat row-major buffer.
    ///
    /// # Errors
    /// Fails if `dim` is zero, the buffer length is not a multiple of `dim`,
    /// or any coordinate is NaN or infinite.
    pub fn new(data: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(ValidationError::ZeroDimension.into());
        }
        if data.len() % dim != 0 {
            return Err(ValidationError::InvalidShape(data.len(), dim).into());
        }
        if let Some(idx) = data.iter().position(|v| !v.is_finite()) {
            return Err(ValidationError::InvalidValues(idx / dim).into());
        }
        Ok(Self { data, dim })
    }

    /// Creates a point set from nested rows. All rows must share one length.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (row, values) in rows.iter().enumerate() {
            let values = values.as_ref();
            if values.len() != dim {
                return Err(ValidationError::RaggedRows {
                    row,
                    len: values.len(),
                    expected: dim,
                }
                .into());
            }
            data.extend_from_slice(values);
        }
        Self::new(data, dim)
    }

    /// An empty set with the given dimensionality.
    pub fn empty(dim: usize) -> Result<Self> {
        Self::new(Vec::new(), dim)
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    /// Whether the set has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Dimensionality of every point.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Coordinates of point `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Iterator over all points.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dim)
    }

    /// The flat row-major buffer.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copies rows `start..end` into a new set.
    pub fn slice_rows(&self, start: usize, end: usize) -> PointSet {
        PointSet {
            data: self.data[start * self.dim..end * self.dim].to_vec(),
            dim: self.dim,
        }
    }

    /// Copies the given columns, in order, into a new set.
    pub fn select_columns(&self, columns: &[usize]) -> Result<PointSet> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.dim) {
            return Err(KnnError::InvalidInput(format!(
                "column {} out of range for {}-dimensional points",
                bad, self.dim
            )));
        }
        let data = self
            .rows()
            .flat_map(|row| columns.iter().map(move |&c| row[c]))
            .collect();
        PointSet::new(data, columns.len())
    }

    /// Values of one column.
    pub fn column(&self, column: usize) -> Result<Vec<f32>> {
        if column >= self.dim {
            return Err(KnnError::InvalidInput(format!(
                "column {} out of range for {}-dimensional points",
                column, self.dim
            )));
        }
        Ok(self.rows().map(|row| row[column]).collect())
    }

    /// Stacks several sets with the same dimensionality, preserving order.
    pub fn concat(parts: &[PointSet]) -> Result<PointSet> {
        let dim = match parts.first() {
            Some(first) => first.dim,
            None => return Err(KnnError::EmptyInput("concatenated")),
        };
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.data.len()).sum());
        for part in parts {
            if part.dim != dim {
                return Err(KnnError::DimensionMismatch {
                    query_dim: part.dim,
                    reference_dim: dim,
                });
            }
            data.extend_from_slice(&part.data);
        }
        Ok(PointSet { data, dim })
    }
}

/// Dense `(n_queries, n_reference)` matrix of pairwise distances.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix {
    data: Vec<f32>,
    n_queries: usize,
    n_reference: usize,
}

impl DistanceMatrix {
    /// Wraps a row-major buffer of `n_queries * n_reference` distances.
    pub fn from_vec(data: Vec<f32>, n_queries: usize, n_reference: usize) -> Result<Self> {
        if data.len() != n_queries * n_reference {
            return Err(KnnError::InvalidInput(format!(
                "distance buffer has {} entries, expected {}x{}",
                data.len(),
                n_queries,
                n_reference
            )));
        }
        Ok(Self {
            data,
            n_queries,
            n_reference,
        })
    }

    /// `(n_queries, n_reference)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_queries, self.n_reference)
    }

    /// Number of query rows.
    pub fn n_queries(&self) -> usize {
        self.n_queries
    }

    /// Number of reference columns.
    pub fn n_reference(&self) -> usize {
        self.n_reference
    }

    /// Distance from query `i` to reference point `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n_reference + j]
    }

    /// Distances from query `i` to every reference point.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n_reference..(i + 1) * self.n_reference]
    }

    /// Iterator over query rows.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        // chunks_exact panics on zero; an empty reference yields no rows anyway
        self.data.chunks_exact(self.n_reference.max(1))
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The reference-major view of the same distances.
    pub fn transpose(&self) -> DistanceMatrix {
        let mut data = vec![0.0; self.data.len()];
        for i in 0..self.n_queries {
            for j in 0..self.n_reference {
                data[j * self.n_queries + i] = self.get(i, j);
            }
        }
        DistanceMatrix {
            data,
            n_queries: self.n_reference,
            n_reference: self.n_queries,
        }
    }

    /// Largest relative difference to `other`, with `atol` as the floor for
    /// near-zero entries. Returns `None` when the shapes differ.
    pub fn max_relative_error(&self, other: &DistanceMatrix, atol: f32) -> Option<f32> {
        if self.shape() != other.shape() {
            return None;
        }
        let worst = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| (a - b).abs() / a.abs().max(b.abs()).max(atol))
            .fold(0.0f32, f32::max);
        Some(worst)
    }

    /// Whether every entry agrees with `other` within `rtol`.
    pub fn approx_eq(&self, other: &DistanceMatrix, rtol: f32) -> bool {
        self.max_relative_error(other, f32::EPSILON)
            .map_or(false, |err| err <= rtol)
    }
}

/// Dense `(n_queries, k)` matrix of reference indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighbourIndices {
    data: Vec<usize>,
    n_queries: usize,
    k: usize,
}

impl NeighbourIndices {
    /// Wraps a row-major buffer of `n_queries * k` indices.
    pub fn from_vec(data: Vec<usize>, n_queries: usize, k: usize) -> Result<Self> {
        if data.len() != n_queries * k {
            return Err(KnnError::InvalidInput(format!(
                "index buffer has {} entries, expected {}x{}",
                data.len(),
                n_queries,
                k
            )));
        }
        Ok(Self { data, n_queries, k })
    }

    /// `(n_queries, k)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_queries, self.k)
    }

    /// Number of query rows.
    pub fn n_queries(&self) -> usize {
        self.n_queries
    }

    /// Neighbours per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Neighbour indices of query `i`, in unspecified order.
    #[inline]
    pub fn row(&self, i: usize) -> &[usize] {
        &self.data[i * self.k..(i + 1) * self.k]
    }

    /// Iterator over query rows.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, usize> {
        self.data.chunks_exact(self.k.max(1))
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[usize] {
        &self.data
    }

    /// Row `i` sorted ascending, for order-insensitive comparisons.
    pub fn sorted_row(&self, i: usize) -> Vec<usize> {
        let mut row = self.row(i).to_vec();
        row.sort_unstable();
        row
    }

    /// Stacks results of consecutive query shards.
    pub fn concat(parts: Vec<NeighbourIndices>) -> Result<NeighbourIndices> {
        let k = match parts.first() {
            Some(first) => first.k,
            None => return Err(KnnError::EmptyInput("query")),
        };
        let n_queries = parts.iter().map(|p| p.n_queries).sum();
        let mut data = Vec::with_capacity(n_queries * k);
        for part in parts {
            if part.k != k {
                return Err(KnnError::InvalidInput(format!(
                    "cannot stack results with k={} and k={}",
                    k, part.k
                )));
            }
            data.extend(part.data);
        }
        Ok(NeighbourIndices { data, n_queries, k })
    }
}

/// Execution strategy for distance computation and search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Eager single-threaded CPU evaluation.
    #[default]
    Baseline,
    /// Shape-specialised kernels cached per input shape.
    Compiled,
    /// wgpu compute shader dispatch.
    Device,
    /// Query shards fanned out over a rayon pool.
    Sharded,
}

impl Backend {
    /// All backends.
    pub const ALL: [Backend; 4] = [
        Backend::Baseline,
        Backend::Compiled,
        Backend::Device,
        Backend::Sharded,
    ];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Baseline => "baseline",
            Backend::Compiled => "compiled",
            Backend::Device => "device",
            Backend::Sharded => "sharded",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Backend {
    type Err = KnnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" | "cpu" => Ok(Backend::Baseline),
            "compiled" | "jit" => Ok(Backend::Compiled),
            "device" | "gpu" => Ok(Backend::Device),
            "sharded" | "distributed" => Ok(Backend::Sharded),
            other => Err(KnnError::ConfigError(format!("unknown backend '{}'", other))),
        }
    }
}

/// Configuration parameters for a batch search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KnnConfig {
    /// Number of nearest neighbours per query.
    pub k: usize,
    /// Distance metric.
    pub metric: Metric,
    /// Execution strategy.
    pub backend: Backend,
    /// Worker threads for the sharded backend (0 = rayon default).
    pub workers: usize,
    /// Queries per shard for the sharded backend (0 = split evenly across workers).
    pub batch_size: usize,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: 4,
            metric: Metric::Euclidean,
            backend: Backend::Baseline,
            workers: 0,
            batch_size: 0,
        }
    }
}

impl KnnConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.k == 0 {
            return Err("k must be greater than 0".to_string());
        }
        if self.backend != Backend::Sharded && (self.workers > 0 || self.batch_size > 0) {
            log::debug!(
                "workers/batch_size are ignored by the {} backend",
                self.backend
            );
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: KnnConfig = serde_json::from_str(json)?;
        config.validate().map_err(KnnError::ConfigError)?;
        Ok(config)
    }
}

/// Uniform block passed to the distance shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DistanceParams {
    /// Rows in the query buffer
    pub n_queries: u32,
    /// Rows in the reference buffer
    pub n_reference: u32,
    /// Coordinates per row
    pub dim: u32,
    /// [`Metric::shader_code`]
    pub metric: u32,
}
