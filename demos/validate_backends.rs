//! Validates every backend against the baseline on random data and prints a
//! timing table.
//!
//! Usage: `cargo run --release --example validate_backends -- [n_queries] [n_reference]`

use anyhow::{ensure, Result};
use batch_knn_wgpu::{
    compute_distances, BenchCase, BenchHarness, CompiledBackend, GpuContext, KnnCompute, Metric,
    PointSet, ShardedSearch,
};
use rand::prelude::*;

fn random_points(rng: &mut StdRng, n: usize, dim: usize) -> Result<PointSet> {
    let data = (0..n * dim).map(|_| rng.gen::<f32>()).collect();
    Ok(PointSet::new(data, dim)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let n_queries: usize = args.next().map(|a| a.parse()).transpose()?.unwrap_or(200);
    let n_reference: usize = args.next().map(|a| a.parse()).transpose()?.unwrap_or(2_000);

    let mut rng = StdRng::seed_from_u64(0);
    let reference = random_points(&mut rng, n_reference, 3)?;
    let queries = random_points(&mut rng, n_queries, 3)?;
    let gpu = GpuContext::new().await.ok();

    for metric in Metric::ALL {
        let baseline = compute_distances(&queries, &reference, metric)?;

        let compiled = CompiledBackend::new().compute_distances(&queries, &reference, metric)?;
        let sharded = ShardedSearch::new(0, 0)?.compute_distances(&queries, &reference, metric)?;
        let mut checks = vec![("compiled", compiled), ("sharded", sharded)];
        if let Some(gpu) = &gpu {
            let device = KnnCompute::new(gpu.clone())?
                .dispatch_distances(&queries, &reference, metric)?
                .wait()
                .await?;
            checks.push(("device", device));
        }

        for (name, distances) in &checks {
            let err = distances.max_relative_error(&baseline, 1e-6).unwrap_or(f32::INFINITY);
            println!("{:<18} {:<9} max relative error {:.3e}", metric, name, err);
            ensure!(err < 1e-4, "{} deviates from baseline under {}", name, metric);
        }
    }
    println!("\nValidation passed!\n");

    let cases = BenchCase::across_backends(n_queries, n_reference, 3, 4);
    let table = BenchHarness::default().run(&cases, gpu.as_ref())?;
    println!("{}", table);

    Ok(())
}
