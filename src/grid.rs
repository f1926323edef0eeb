//! Regular query grids over the city map.

use crate::{error::Result, types::PointSet};

/// Half-width of the square map, in map units.
pub const LIMIT: f32 = 10.0;

/// Default grid resolution per axis.
pub const N_POINTS: usize = 10;

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (f64::from(end) - f64::from(start)) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { (f64::from(start) + step * i as f64) as f32 })
                .collect()
        }
    }
}

/// Flattened `n_points x n_points` grid over `[-LIMIT, LIMIT]²`.
///
/// Returns `(x, y)` with x varying fastest: entry `row * n_points + col`
/// sits at `(xs[col], ys[row])`.
pub fn create_grid(n_points: usize) -> (Vec<f32>, Vec<f32>) {
    let axis = linspace(-LIMIT, LIMIT, n_points);
    let mut x = Vec::with_capacity(n_points * n_points);
    let mut y = Vec::with_capacity(n_points * n_points);
    for &yv in &axis {
        for &xv in &axis {
            x.push(xv);
            y.push(yv);
        }
    }
    (x, y)
}

/// `(n_points², 3)` query set of `(x, y, floor)` rows on the grid.
pub fn create_query_points(n_points: usize, floor: f32) -> Result<PointSet> {
    let (x, y) = create_grid(n_points);
    let data = x
        .into_iter()
        .zip(y)
        .flat_map(|(x, y)| [x, y, floor])
        .collect();
    PointSet::new(data, 3)
}
