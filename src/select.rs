//! Partial top-k selection over distance rows.

use crate::error::{KnnError, Result};
use crate::types::{DistanceMatrix, NeighbourIndices};

/// Indices of the `k` smallest values in `row`, in unspecified order.
///
/// Uses `select_nth_unstable_by` (introselect), so the cost is O(n) on
/// average instead of the O(n log n) of a full sort. Ties at the k-th
/// distance are broken arbitrarily.
///
/// # Errors
/// [`KnnError::InvalidK`] unless `1 <= k <= row.len()`.
pub fn k_smallest(row: &[f32], k: usize) -> Result<Vec<usize>> {
    check_k(k, row.len())?;
    let mut indices: Vec<usize> = (0..row.len()).collect();
    if k < row.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| row[a].total_cmp(&row[b]));
        indices.truncate(k);
    }
    Ok(indices)
}

/// Applies [`k_smallest`] to every query row.
///
/// # Errors
/// [`KnnError::InvalidK`] unless `1 <= k <= n_reference`.
pub fn select_neighbours(distances: &DistanceMatrix, k: usize) -> Result<NeighbourIndices> {
    check_k(k, distances.n_reference())?;
    let n_queries = distances.n_queries();
    let mut data = Vec::with_capacity(n_queries * k);
    for row in distances.rows() {
        data.extend(k_smallest(row, k)?);
    }
    NeighbourIndices::from_vec(data, n_queries, k)
}

fn check_k(k: usize, n_reference: usize) -> Result<()> {
    if k == 0 || k > n_reference {
        return Err(KnnError::InvalidK { k, n_reference });
    }
    Ok(())
}
