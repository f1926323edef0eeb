//! Estimates a house-price map over a regular grid.
//!
//! Usage: `cargo run --example price_grid -- [city.json] [floor]`
//!
//! Reference homes are sampled from the synthetic city model; each grid cell
//! is priced as the mean of its `k` nearest homes.

use anyhow::{Context, Result};
use batch_knn_wgpu::{
    create_query_points, estimate_sharded, grid::N_POINTS, Aggregate, CityParams, KnnConfig,
    ShardedSearch,
};
use rand::prelude::*;
use std::time::Instant;

const N_HOMES: usize = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let city = match args.next() {
        Some(path) => CityParams::from_json_file(&path)
            .with_context(|| format!("loading city parameters from {}", path))?,
        None => CityParams::default(),
    };
    let floor: f32 = match args.next() {
        Some(f) => f.parse().context("floor must be a number")?,
        None => 1.0,
    };

    let config = KnnConfig::default();
    let mut rng = StdRng::seed_from_u64(42);
    let homes = city.sample_reference(N_HOMES, 10.0, 10, &mut rng)?;
    let queries = create_query_points(N_POINTS, floor)?;

    let executor = ShardedSearch::new(0, 0)?;
    let start = Instant::now();
    let prices = estimate_sharded(
        &executor,
        &queries,
        &homes,
        config.k,
        config.metric,
        Aggregate::Mean,
    )?;
    println!(
        "Priced {} grid cells from {} homes in {:.2} ms (floor {})\n",
        prices.len(),
        N_HOMES,
        start.elapsed().as_secs_f32() * 1000.0,
        floor
    );

    // Rows are printed top (y = +10) to bottom
    for row in prices.chunks(N_POINTS).rev() {
        let line: Vec<String> = row.iter().map(|p| format!("{:7.0}", p)).collect();
        println!("{}", line.join(""));
    }

    Ok(())
}
