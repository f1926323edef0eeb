//! Attribute estimation from nearest neighbours.
//!
//! Each reference point carries one attribute value (a price, say). A query
//! is assigned an aggregate of the values carried by its `k` nearest
//! reference points. Aggregates are order-insensitive, so the unspecified
//! tie-breaking of the search does not change the result once the neighbour
//! set is fixed.

use crate::{
    cpu::search_cpu,
    error::{KnnError, Result},
    metric::Metric,
    shard::ShardedSearch,
    types::{NeighbourIndices, PointSet, QuerySet},
};
use serde::{Deserialize, Serialize};

/// Reference points paired with one attribute value each.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributedPoints {
    points: PointSet,
    values: Vec<f32>,
}

impl AttributedPoints {
    /// Pairs `points` with `values`; both must have the same length.
    pub fn new(points: PointSet, values: Vec<f32>) -> Result<Self> {
        if points.len() != values.len() {
            return Err(KnnError::InvalidInput(format!(
                "{} points but {} attribute values",
                points.len(),
                values.len()
            )));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(KnnError::InvalidInput(format!(
                "attribute value {} is not finite",
                idx
            )));
        }
        Ok(Self { points, values })
    }

    /// Splits `attribute_column` off a table; the remaining columns, in
    /// order, become the coordinates.
    ///
    /// A table of `(x, y, floor, price)` rows with `attribute_column = 3`
    /// yields `(x, y, floor)` points carrying prices.
    pub fn from_table(table: &PointSet, attribute_column: usize) -> Result<Self> {
        let values = table.column(attribute_column)?;
        let coords: Vec<usize> = (0..table.dim()).filter(|&c| c != attribute_column).collect();
        if coords.is_empty() {
            return Err(KnnError::InvalidInput(
                "table has no coordinate columns besides the attribute".to_string(),
            ));
        }
        Self::new(table.select_columns(&coords)?, values)
    }

    /// The coordinates.
    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// The attribute values, one per point.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// How neighbour values are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// Arithmetic mean.
    #[default]
    Mean,
    /// Median; the mean of the middle pair for even `k`.
    Median,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

impl Aggregate {
    /// Combines `values`. Returns NaN for an empty slice.
    pub fn apply(self, values: &mut [f32]) -> f32 {
        if values.is_empty() {
            return f32::NAN;
        }
        match self {
            Aggregate::Mean => {
                let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
                (sum / values.len() as f64) as f32
            }
            Aggregate::Median => {
                values.sort_unstable_by(f32::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    ((f64::from(values[mid - 1]) + f64::from(values[mid])) / 2.0) as f32
                } else {
                    values[mid]
                }
            }
            Aggregate::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
            Aggregate::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// Aggregates `reference` values over each query's neighbour row.
///
/// # Errors
/// [`KnnError::InvalidInput`] if a neighbour index is out of range for
/// `reference`.
pub fn aggregate_neighbours(
    neighbours: &NeighbourIndices,
    reference: &AttributedPoints,
    aggregate: Aggregate,
) -> Result<Vec<f32>> {
    let n = reference.values.len();
    if let Some(&bad) = neighbours.as_slice().iter().find(|&&j| j >= n) {
        return Err(KnnError::InvalidInput(format!(
            "neighbour index {} out of range for {} reference values",
            bad, n
        )));
    }
    let mut scratch = Vec::with_capacity(neighbours.k());
    Ok(neighbours
        .rows()
        .map(|row| {
            scratch.clear();
            scratch.extend(row.iter().map(|&j| reference.values[j]));
            aggregate.apply(&mut scratch)
        })
        .collect())
}

/// Estimates one value per query from its `k` nearest reference points.
pub fn estimate(
    queries: &QuerySet,
    reference: &AttributedPoints,
    k: usize,
    metric: Metric,
    aggregate: Aggregate,
) -> Result<Vec<f32>> {
    let neighbours = search_cpu(queries, &reference.points, k, metric)?;
    aggregate_neighbours(&neighbours, reference, aggregate)
}

/// [`estimate`] with the queries fanned out over `executor`'s shards.
pub fn estimate_sharded(
    executor: &ShardedSearch,
    queries: &QuerySet,
    reference: &AttributedPoints,
    k: usize,
    metric: Metric,
    aggregate: Aggregate,
) -> Result<Vec<f32>> {
    crate::cpu::validate_search(queries, &reference.points, k)?;
    let parts = executor.fan_out(queries, |batch| estimate(batch, reference, k, metric, aggregate))?;
    Ok(parts.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn priced_table() -> PointSet {
        PointSet::from_rows(&[
            [0.0, 0.0, 0.0, 7.0],
            [1.0, 1.0, 0.0, 2.0],
            [2.0, 2.0, 0.0, 5.0],
            [1.0, 1.0, 1.0, 6.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_compute_prices() {
        let reference = AttributedPoints::from_table(&priced_table(), 3).unwrap();
        let queries = PointSet::from_rows(&[[0.0, 0.0, 1.0], [3.0, 3.0, 3.0]]).unwrap();
        let prices = estimate(&queries, &reference, 2, Metric::Euclidean, Aggregate::Mean).unwrap();
        assert_eq!(prices.len(), 2);
        assert_relative_eq!(prices[0], 6.5);
        assert_relative_eq!(prices[1], 5.5);
    }

    #[test]
    fn test_square_centre_mean() {
        let corners = PointSet::from_rows(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).unwrap();
        let reference = AttributedPoints::new(corners, vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        let centre = PointSet::from_rows(&[[0.5, 0.5]]).unwrap();
        for metric in Metric::ALL {
            let mean = estimate(&centre, &reference, 4, metric, Aggregate::Mean).unwrap();
            assert_relative_eq!(mean[0], 25.0);
        }
    }

    #[test]
    fn test_aggregates() {
        assert_relative_eq!(Aggregate::Median.apply(&mut [4.0, 1.0, 3.0]), 3.0);
        assert_relative_eq!(Aggregate::Median.apply(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(Aggregate::Min.apply(&mut [4.0, 1.0, 3.0]), 1.0);
        assert_eq!(Aggregate::Max.apply(&mut [4.0, 1.0, 3.0]), 4.0);
        assert!(Aggregate::Mean.apply(&mut []).is_nan());
    }

    #[test]
    fn test_sharded_estimate_matches() {
        let reference = AttributedPoints::from_table(&priced_table(), 3).unwrap();
        let queries = PointSet::from_rows(&[
            [0.0, 0.0, 1.0],
            [3.0, 3.0, 3.0],
            [1.0, 1.0, 0.4],
            [2.0, 2.0, 0.0],
            [0.1, 0.0, 0.0],
        ])
        .unwrap();
        let executor = ShardedSearch::new(2, 2).unwrap();
        let sharded =
            estimate_sharded(&executor, &queries, &reference, 1, Metric::Euclidean, Aggregate::Mean)
                .unwrap();
        let direct = estimate(&queries, &reference, 1, Metric::Euclidean, Aggregate::Mean).unwrap();
        assert_eq!(sharded, direct);
        assert_eq!(sharded, vec![7.0, 5.0, 2.0, 5.0, 7.0]);
    }

    #[test]
    fn test_aggregate_rejects_out_of_range_indices() {
        let two = PointSet::from_rows(&[[0.0], [1.0]]).unwrap();
        let reference = AttributedPoints::new(two, vec![3.0, 4.0]).unwrap();
        let neighbours = NeighbourIndices::from_vec(vec![0, 5], 1, 2).unwrap();
        assert!(matches!(
            aggregate_neighbours(&neighbours, &reference, Aggregate::Mean),
            Err(KnnError::InvalidInput(_))
        ));

        let neighbours = NeighbourIndices::from_vec(vec![0, 1], 1, 2).unwrap();
        let mean = aggregate_neighbours(&neighbours, &reference, Aggregate::Mean).unwrap();
        assert_relative_eq!(mean[0], 3.5);
    }

    #[test]
    fn test_from_table_validation() {
        assert!(AttributedPoints::from_table(&priced_table(), 4).is_err());
        let single = PointSet::from_rows(&[[1.0], [2.0]]).unwrap();
        assert!(AttributedPoints::from_table(&single, 0).is_err());
        assert!(AttributedPoints::new(PointSet::from_rows(&[[0.0]]).unwrap(), vec![]).is_err());
    }
}
