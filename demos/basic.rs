//! Basic example demonstrating batch-knn-wgpu usage.
//!
//! Searches a small 2D reference set for the nearest corners of a handful of
//! queries, on the GPU when one is available and on the CPU otherwise.

use anyhow::Result;
use batch_knn_wgpu::{compute_distances, search_auto, Metric, PointSet};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // Corners of a 10x10 square
    let reference = PointSet::from_rows(&[
        [0.0, 0.0],
        [10.0, 0.0],
        [0.0, 10.0],
        [10.0, 10.0],
    ])?;
    let queries = PointSet::from_rows(&[[1.0, 1.0], [9.0, 2.0], [4.0, 8.0]])?;

    println!(
        "Searching {} queries against {} reference points...",
        queries.len(),
        reference.len()
    );
    let neighbours = search_auto(&queries, &reference, 2, Metric::Euclidean).await?;
    let distances = compute_distances(&queries, &reference, Metric::Euclidean)?;

    println!("\nResults:");
    println!("========");
    for (i, query) in queries.rows().enumerate() {
        let mut nearest = neighbours.row(i).to_vec();
        nearest.sort_by(|&a, &b| distances.get(i, a).total_cmp(&distances.get(i, b)));
        let described: Vec<String> = nearest
            .iter()
            .map(|&j| format!("#{} at {:.4}", j, distances.get(i, j)))
            .collect();
        println!("Query {:?}: {}", query, described.join(", "));
    }

    Ok(())
}
