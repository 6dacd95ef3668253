//! Shared data-generation helpers for integration tests.

use ndarray::Array2;
use rand::Rng;

/// Builds an `(n, dim)` matrix of uniform random values in `[0, 1)`, using a
/// fixed seed so tests are deterministic.
pub fn random_matrix(n: usize, dim: usize, seed: u64) -> Array2<f64> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let data: Vec<f64> = (0..n * dim).map(|_| rng.random::<f64>()).collect();
    Array2::from_shape_vec((n, dim), data).unwrap()
}
