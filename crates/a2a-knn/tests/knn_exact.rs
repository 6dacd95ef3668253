//! Integration tests for the exact kNN engine.

mod common;

use a2a_knn::{knn_exact, ExactKnnConfig};
use ndarray::{array, Array2};

/// S2: tiny identical exact.
#[test]
fn tiny_sorted_exact() {
    let corpus = array![[0.0, 0.0], [3.0, 4.0], [0.0, 3.0], [4.0, 0.0]];
    let queries = array![[0.0, 0.0]];
    let config = ExactKnnConfig {
        sorted: true,
        ..ExactKnnConfig::default()
    };
    let (idx, dist) = knn_exact(queries.view(), corpus.view(), 3, &config).unwrap();

    assert_eq!(idx.row(0).to_vec(), vec![0, 2, 3]);
    assert!((dist[[0, 0]] - 0.0).abs() < 1e-9);
    assert!((dist[[0, 1]] - 3.0).abs() < 1e-9);
    assert!((dist[[0, 2]] - 4.0).abs() < 1e-9);
}

/// S3: block decomposition must not change which neighbors are found.
#[test]
fn block_decomposition_is_invariant() {
    let corpus = common::random_matrix(1000, 16, 1);
    let queries = common::random_matrix(1000, 16, 2);

    let single_block = ExactKnnConfig {
        sorted: true,
        mem_ratio: 1.0,
        ..ExactKnnConfig::default()
    };
    let many_blocks = ExactKnnConfig {
        sorted: true,
        mem_ratio: 1e-4,
        ..ExactKnnConfig::default()
    };

    let (idx_a, dist_a) =
        knn_exact(queries.view(), corpus.view(), 10, &single_block).unwrap();
    let (idx_b, dist_b) =
        knn_exact(queries.view(), corpus.view(), 10, &many_blocks).unwrap();

    assert_eq!(idx_a, idx_b);
    for (a, b) in dist_a.iter().zip(dist_b.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

/// S4: worker count must not change which neighbors are found.
#[test]
fn worker_count_is_invariant() {
    let corpus = common::random_matrix(1000, 16, 3);
    let queries = common::random_matrix(1000, 16, 4);

    use a2a_knn::WorkerCount;
    let serial = ExactKnnConfig {
        sorted: true,
        worker_count: WorkerCount::Fixed(1),
        ..ExactKnnConfig::default()
    };
    let parallel = ExactKnnConfig {
        sorted: true,
        worker_count: WorkerCount::Fixed(8),
        ..ExactKnnConfig::default()
    };

    let (idx_a, dist_a) = knn_exact(queries.view(), corpus.view(), 10, &serial).unwrap();
    let (idx_b, dist_b) = knn_exact(queries.view(), corpus.view(), 10, &parallel).unwrap();

    assert_eq!(idx_a, idx_b);
    for (a, b) in dist_a.iter().zip(dist_b.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn rejects_zero_k() {
    let corpus = array![[0.0, 0.0]];
    let queries = array![[0.0, 0.0]];
    let config = ExactKnnConfig::default();
    assert!(knn_exact(queries.view(), corpus.view(), 0, &config).is_err());
}

/// S8 (boundary behaviors): `M = 0` must be rejected before allocation.
#[test]
fn empty_query_set_is_rejected() {
    let corpus = array![[0.0, 0.0], [1.0, 1.0]];
    let queries = Array2::<f64>::zeros((0, 2));
    let config = ExactKnnConfig::default();
    assert!(knn_exact(queries.view(), corpus.view(), 1, &config).is_err());
}
