//! Baseline CPU backend.
//!
//! Eager, single-threaded and pure. Every other backend is checked against
//! the results produced here.

use crate::{
    error::{KnnError, Result},
    metric::{DistanceMetric, Metric},
    select::select_neighbours,
    types::{DistanceMatrix, NeighbourIndices, PointSet, QuerySet},
};
use log::debug;

/// Checks the query/reference pair before any distance work is done.
pub(crate) fn validate_pair(queries: &QuerySet, reference: &PointSet) -> Result<()> {
    if reference.is_empty() {
        return Err(KnnError::EmptyInput("reference"));
    }
    if queries.is_empty() {
        return Err(KnnError::EmptyInput("query"));
    }
    if queries.dim() != reference.dim() {
        return Err(KnnError::DimensionMismatch {
            query_dim: queries.dim(),
            reference_dim: reference.dim(),
        });
    }
    Ok(())
}

/// Checks `1 <= k <= n_reference`.
pub(crate) fn validate_k(k: usize, reference: &PointSet) -> Result<()> {
    if k == 0 || k > reference.len() {
        return Err(KnnError::InvalidK {
            k,
            n_reference: reference.len(),
        });
    }
    Ok(())
}

/// Validates a full search request.
pub(crate) fn validate_search(queries: &QuerySet, reference: &PointSet, k: usize) -> Result<()> {
    validate_pair(queries, reference)?;
    validate_k(k, reference)
}

/// Computes the `(n_queries, n_reference)` distance matrix with a built-in metric.
pub fn compute_distances_cpu(
    queries: &QuerySet,
    reference: &PointSet,
    metric: Metric,
) -> Result<DistanceMatrix> {
    compute_distances_with(queries, reference, &metric)
}

/// Computes the distance matrix with any [`DistanceMetric`].
pub fn compute_distances_with<M: DistanceMetric + ?Sized>(
    queries: &QuerySet,
    reference: &PointSet,
    metric: &M,
) -> Result<DistanceMatrix> {
    validate_pair(queries, reference)?;
    debug!(
        "Baseline distances: {}x{} points, d={}",
        queries.len(),
        reference.len(),
        queries.dim()
    );
    let data: Vec<f32> = queries
        .rows()
        .flat_map(|q| reference.rows().map(move |r| metric.distance(q, r)))
        .collect();
    DistanceMatrix::from_vec(data, queries.len(), reference.len())
}

/// Finds the `k` nearest reference indices for every query.
pub fn search_cpu(
    queries: &QuerySet,
    reference: &PointSet,
    k: usize,
    metric: Metric,
) -> Result<NeighbourIndices> {
    search_with(queries, reference, k, &metric)
}

/// Search with any [`DistanceMetric`].
pub fn search_with<M: DistanceMetric + ?Sized>(
    queries: &QuerySet,
    reference: &PointSet,
    k: usize,
    metric: &M,
) -> Result<NeighbourIndices> {
    validate_search(queries, reference, k)?;
    let distances = compute_distances_with(queries, reference, metric)?;
    select_neighbours(&distances, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference() -> PointSet {
        PointSet::from_rows(&[[0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [2.0, 2.0, 0.0], [1.0, 1.0, 1.0]])
            .unwrap()
    }

    #[test]
    fn test_calculate_distances() {
        let queries = PointSet::from_rows(&[[0.0, 0.0, 1.0], [1.0, 1.0, 1.0]]).unwrap();
        let distances = compute_distances_cpu(&queries, &reference(), Metric::Euclidean).unwrap();
        assert_eq!(distances.shape(), (2, 4));

        let expected = [
            [1.0, 3.0f32.sqrt(), 3.0, 2.0f32.sqrt()],
            [3.0f32.sqrt(), 1.0, 3.0f32.sqrt(), 0.0],
        ];
        for (i, row) in expected.iter().enumerate() {
            for (j, &want) in row.iter().enumerate() {
                assert_relative_eq!(distances.get(i, j), want, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_knn_search() {
        let queries = PointSet::from_rows(&[[0.0, 0.0, 1.0], [3.0, 3.0, 3.0]]).unwrap();
        let indices = search_cpu(&queries, &reference(), 2, Metric::Euclidean).unwrap();
        assert_eq!(indices.shape(), (2, 2));
        assert_eq!(indices.sorted_row(0), vec![0, 3]);
        assert_eq!(indices.sorted_row(1), vec![2, 3]);
    }

    #[test]
    fn test_validation_order() {
        let queries = PointSet::from_rows(&[[0.0, 0.0]]).unwrap();
        assert!(matches!(
            search_cpu(&queries, &reference(), 1, Metric::Euclidean),
            Err(KnnError::DimensionMismatch { query_dim: 2, reference_dim: 3 })
        ));

        let queries = PointSet::from_rows(&[[0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            search_cpu(&queries, &reference(), 0, Metric::Euclidean),
            Err(KnnError::InvalidK { k: 0, n_reference: 4 })
        ));
        assert!(matches!(
            search_cpu(&queries, &reference(), 5, Metric::Euclidean),
            Err(KnnError::InvalidK { k: 5, .. })
        ));

        let empty = PointSet::empty(3).unwrap();
        assert!(matches!(
            search_cpu(&queries, &empty, 1, Metric::Euclidean),
            Err(KnnError::EmptyInput("reference"))
        ));
        assert!(matches!(
            compute_distances_cpu(&empty, &reference(), Metric::Euclidean),
            Err(KnnError::EmptyInput("query"))
        ));
    }

    #[test]
    fn test_custom_metric() {
        let queries = PointSet::from_rows(&[[0.0, 0.0, 5.0]]).unwrap();
        let planar = |a: &[f32], b: &[f32]| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        let indices = search_with(&queries, &reference(), 1, &planar).unwrap();
        assert_eq!(indices.row(0), &[0]);
    }
}
