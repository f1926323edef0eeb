//! Integration tests for batch-knn-wgpu.
//!
//! These tests check that every execution strategy produces the same
//! neighbours as a brute-force reference, and that the estimation pipeline
//! built on top of the search gives the expected prices.

use approx::assert_relative_eq;
use batch_knn_wgpu::{
    compute_distances, create_query_points, estimate, estimate_sharded, search, search_auto,
    Aggregate, AttributedPoints, Backend, BatchKnn, CityParams, CompiledBackend, GpuContext,
    KnnCompute, KnnConfig, KnnError, Metric, PointSet, ShardedSearch,
};
use rand::prelude::*;

fn random_points(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * dim).map(|_| rng.gen_range(-50.0..50.0)).collect();
    PointSet::new(data, dim).unwrap()
}

/// Indices of the `k` smallest distances by full sort.
fn brute_force(queries: &PointSet, reference: &PointSet, k: usize, metric: Metric) -> Vec<Vec<usize>> {
    let distances = compute_distances(queries, reference, metric).unwrap();
    distances
        .rows()
        .map(|row| {
            let mut order: Vec<usize> = (0..row.len()).collect();
            order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));
            let mut nearest = order[..k].to_vec();
            nearest.sort_unstable();
            nearest
        })
        .collect()
}

#[test]
fn test_k_smallest_matches_brute_force() {
    let reference = random_points(200, 5, 1);
    let queries = random_points(30, 5, 2);
    for metric in Metric::ALL {
        let expected = brute_force(&queries, &reference, 7, metric);
        let indices = search(&queries, &reference, 7, metric).unwrap();
        assert_eq!(indices.shape(), (30, 7));
        for (i, nearest) in expected.iter().enumerate() {
            assert_eq!(&indices.sorted_row(i), nearest, "metric {} query {}", metric, i);
        }
    }
}

#[test]
fn test_cpu_backends_agree() {
    let reference = random_points(120, 3, 3);
    let queries = random_points(45, 3, 4);
    let compiled = CompiledBackend::new();
    let sharded = ShardedSearch::new(3, 8).unwrap();

    for metric in Metric::ALL {
        let baseline = compute_distances(&queries, &reference, metric).unwrap();
        let from_compiled = compiled.compute_distances(&queries, &reference, metric).unwrap();
        let from_sharded = sharded.compute_distances(&queries, &reference, metric).unwrap();
        assert!(from_compiled.approx_eq(&baseline, 1e-6), "compiled {}", metric);
        assert!(from_sharded.approx_eq(&baseline, 1e-6), "sharded {}", metric);

        let expected = brute_force(&queries, &reference, 5, metric);
        let a = compiled.search(&queries, &reference, 5, metric).unwrap();
        let b = sharded.search(&queries, &reference, 5, metric).unwrap();
        for i in 0..queries.len() {
            assert_eq!(a.sorted_row(i), expected[i]);
            assert_eq!(b.sorted_row(i), expected[i]);
        }
    }
}

#[tokio::test]
async fn test_device_agrees_with_baseline() {
    let Some(gpu) = GpuContext::new().await.ok() else {
        eprintln!("No GPU adapter available, skipping device comparison");
        return;
    };
    let compute = KnnCompute::new(gpu).unwrap();
    let reference = random_points(300, 4, 5);
    let queries = random_points(70, 4, 6);

    for metric in Metric::ALL {
        let baseline = compute_distances(&queries, &reference, metric).unwrap();
        let device = compute
            .dispatch_distances(&queries, &reference, metric)
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(device.shape(), baseline.shape());
        let err = device.max_relative_error(&baseline, 1e-4).unwrap();
        assert!(err < 1e-4, "metric {} relative error {}", metric, err);
    }
}

#[tokio::test]
async fn test_device_euclidean_extreme_gaps() {
    let Some(gpu) = GpuContext::new().await.ok() else {
        eprintln!("No GPU adapter available, skipping extreme-gap comparison");
        return;
    };
    let compute = KnnCompute::new(gpu).unwrap();
    let reference = PointSet::from_rows(&[[-2e38, 0.0], [0.0, 0.0], [3e38, 3e38]]).unwrap();
    let queries = PointSet::from_rows(&[[2e38, 0.0]]).unwrap();

    let baseline = compute_distances(&queries, &reference, Metric::Euclidean).unwrap();
    let device = compute
        .compute_distances(&queries, &reference, Metric::Euclidean)
        .await
        .unwrap();

    assert!(baseline.get(0, 0).is_infinite());
    assert!(device.get(0, 0).is_infinite() && device.get(0, 0) > 0.0);
    assert_relative_eq!(device.get(0, 1), baseline.get(0, 1), max_relative = 1e-5);
    assert_relative_eq!(device.get(0, 2), baseline.get(0, 2), max_relative = 1e-5);
    assert!(device.as_slice().iter().all(|d| !d.is_nan()));
}

#[test]
fn test_transpose_symmetry() {
    let a = random_points(17, 6, 7);
    let b = random_points(23, 6, 8);
    for metric in Metric::ALL {
        let ab = compute_distances(&a, &b, metric).unwrap();
        let ba = compute_distances(&b, &a, metric).unwrap();
        assert_eq!(ab.shape(), (17, 23));
        assert_eq!(ab.transpose(), ba);
    }
}

#[test]
fn test_compiled_shape_change() {
    let compiled = CompiledBackend::new();
    let reference = random_points(64, 3, 9);
    let hundred = random_points(100, 3, 10);
    let ninety_nine = hundred.slice_rows(0, 99);

    let first = compiled.search(&hundred, &reference, 3, Metric::Euclidean).unwrap();
    let second = compiled.search(&ninety_nine, &reference, 3, Metric::Euclidean).unwrap();
    assert_eq!(second.shape(), (99, 3));
    for i in 0..99 {
        assert_eq!(first.sorted_row(i), second.sorted_row(i));
    }
    assert_eq!(compiled.cache().stats().compilations, 2);
}

#[test]
fn test_k_equals_n_and_k_one() {
    let reference = random_points(9, 2, 11);
    let queries = random_points(4, 2, 12);

    let all = search(&queries, &reference, 9, Metric::Manhattan).unwrap();
    for i in 0..4 {
        assert_eq!(all.sorted_row(i), (0..9).collect::<Vec<_>>());
    }

    let distances = compute_distances(&queries, &reference, Metric::Manhattan).unwrap();
    let nearest = search(&queries, &reference, 1, Metric::Manhattan).unwrap();
    for (i, row) in distances.rows().enumerate() {
        let min = row.iter().copied().fold(f32::INFINITY, f32::min);
        assert_eq!(row[nearest.row(i)[0]], min);
    }
}

#[test]
fn test_dimension_mismatch() {
    let reference = random_points(5, 3, 13);
    let queries = random_points(2, 2, 14);
    let err = search(&queries, &reference, 1, Metric::Euclidean).unwrap_err();
    assert!(matches!(
        err,
        KnnError::DimensionMismatch { query_dim: 2, reference_dim: 3 }
    ));
    assert!(CompiledBackend::new()
        .compute_distances(&queries, &reference, Metric::Euclidean)
        .is_err());
}

#[test]
fn test_invalid_k() {
    let reference = random_points(5, 3, 15);
    let queries = random_points(2, 3, 16);
    assert!(matches!(
        search(&queries, &reference, 0, Metric::Euclidean),
        Err(KnnError::InvalidK { k: 0, .. })
    ));
    assert!(matches!(
        search(&queries, &reference, 6, Metric::Euclidean),
        Err(KnnError::InvalidK { k: 6, n_reference: 5 })
    ));
}

#[tokio::test]
async fn test_nearest_corner_auto() {
    let reference = PointSet::from_rows(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]).unwrap();
    let queries = PointSet::from_rows(&[[1.0, 1.0]]).unwrap();

    let neighbours = search_auto(&queries, &reference, 1, Metric::Euclidean).await.unwrap();
    assert_eq!(neighbours.row(0), &[0]);

    let distances = compute_distances(&queries, &reference, Metric::Euclidean).unwrap();
    assert_relative_eq!(distances.get(0, 0), 1.4142, epsilon = 1e-4);
}

#[test]
fn test_square_centre_price() {
    let corners = PointSet::from_rows(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).unwrap();
    let homes = AttributedPoints::new(corners, vec![10.0, 20.0, 30.0, 40.0]).unwrap();
    let centre = PointSet::from_rows(&[[0.5, 0.5]]).unwrap();

    let prices = estimate(&centre, &homes, 4, Metric::Euclidean, Aggregate::Mean).unwrap();
    assert_relative_eq!(prices[0], 25.0);
}

#[test]
fn test_engine_from_json_config() {
    let config = KnnConfig::from_json_str(
        r#"{"k": 2, "metric": "manhattan", "backend": "sharded", "workers": 2, "batch_size": 3}"#,
    )
    .unwrap();
    assert_eq!(config.backend, Backend::Sharded);
    assert_eq!(config.metric, Metric::Manhattan);

    let engine = BatchKnn::new(config).unwrap();
    let reference = random_points(20, 2, 17);
    let queries = random_points(10, 2, 18);
    let indices = engine.search(&queries, &reference).unwrap();
    let expected = brute_force(&queries, &reference, 2, Metric::Manhattan);
    for i in 0..10 {
        assert_eq!(indices.sorted_row(i), expected[i]);
    }
}

#[tokio::test]
async fn test_engine_device_backend() {
    let Some(gpu) = GpuContext::new().await.ok() else {
        eprintln!("No GPU adapter available, skipping device engine test");
        return;
    };
    let config = KnnConfig {
        k: 3,
        backend: Backend::Device,
        ..KnnConfig::default()
    };
    let engine = BatchKnn::with_gpu(config, gpu).unwrap();
    let reference = random_points(50, 3, 19);
    let queries = random_points(12, 3, 20);
    let indices = engine.search(&queries, &reference).unwrap();
    let expected = brute_force(&queries, &reference, 3, Metric::Euclidean);
    for i in 0..12 {
        assert_eq!(indices.sorted_row(i), expected[i]);
    }
}

#[test]
fn test_city_price_map_pipeline() {
    let mut rng = StdRng::seed_from_u64(3);
    let city = CityParams::default();
    let homes = city.sample_reference(500, 10.0, 10, &mut rng).unwrap();
    let queries = create_query_points(10, 1.0).unwrap();

    let direct = estimate(&queries, &homes, 4, Metric::Euclidean, Aggregate::Mean).unwrap();
    let executor = ShardedSearch::new(4, 10).unwrap();
    let sharded =
        estimate_sharded(&executor, &queries, &homes, 4, Metric::Euclidean, Aggregate::Mean).unwrap();

    assert_eq!(direct.len(), 100);
    assert_eq!(direct, sharded);
    assert!(direct.iter().all(|p| p.is_finite() && *p > 0.0));
}
