//! The dense distance kernel and K-smallest selection primitives (§4.1, §4.2).
//!
//! Squared Euclidean distances are computed via the Gram identity
//! `‖q−c‖² = ‖q‖² + ‖c‖² − 2 q·cᵀ`, which turns an `(B, D) x (N, D)` distance
//! computation into one dense `(B, D) x (D, N)` matrix product plus a rank-1
//! correction. The matrix product is delegated to [`ndarray::linalg::general_mat_mul`],
//! which uses a real BLAS when the `blas` feature is enabled and a bundled
//! pure-Rust GEMM otherwise.

use ndarray::{Array1, Array2, ArrayView2};

use crate::float::Float;

/// Computes the squared L2 norm of every row of `rows`.
pub fn squared_row_norms<F: Float>(rows: ArrayView2<F>) -> Array1<F> {
    rows.rows()
        .into_iter()
        .map(|row| row.iter().map(|&x| x * x).sum())
        .collect()
}

/// Fills `out` with squared Euclidean distances from every row of `queries`
/// to every row of `corpus`, using precomputed corpus row norms `sq_corpus`.
///
/// `out` must be shaped `(queries.nrows(), corpus.nrows())`. `blas_threads`
/// caps the thread count used by the underlying matmul backend; it is only
/// meaningful when that backend respects `RAYON_NUM_THREADS`-style pools,
/// and is otherwise a no-op hint.
pub fn squared_distances_block<F: Float>(
    queries: ArrayView2<F>,
    corpus: ArrayView2<F>,
    sq_corpus: &Array1<F>,
    out: &mut Array2<F>,
) {
    let sq_queries = squared_row_norms(queries);

    // out = queries . corpus^T
    ndarray::linalg::general_mat_mul(F::one(), &queries, &corpus.t(), F::zero(), out);

    let neg_two = F::zero() - F::one() - F::one();
    out.mapv_inplace(|v| v * neg_two);

    for (mut row, &qn) in out.rows_mut().into_iter().zip(sq_queries.iter()) {
        for (v, &cn) in row.iter_mut().zip(sq_corpus.iter()) {
            *v = (*v + qn + cn).max(F::zero());
        }
    }
}

/// Lomuto partition of `indices[lo..=hi]` keyed by `keys`, pivoting on the
/// last element. Elements less-than-or-equal to the pivot move left; the
/// pivot's final resting index is returned.
fn lomuto_partition<F: Float>(indices: &mut [usize], keys: &[F], lo: usize, hi: usize) -> usize {
    let pivot = keys[indices[hi]];
    let mut i = lo;
    for j in lo..hi {
        if keys[indices[j]] <= pivot {
            indices.swap(i, j);
            i += 1;
        }
    }
    indices.swap(i, hi);
    i
}

/// Reorders `indices` in place so that the `k` smallest elements (by `keys`)
/// occupy `indices[0..k]`, in unspecified order. `k` must be in
/// `1..=indices.len()`.
///
/// This is an iterative quickselect: each round partitions the active range
/// and narrows to the side containing the `k`-th order statistic, so stack
/// depth never grows with `indices.len()`.
pub fn quickselect<F: Float>(indices: &mut [usize], keys: &[F], k: usize) {
    debug_assert!(k >= 1 && k <= indices.len());
    let mut lo = 0usize;
    let mut hi = indices.len() - 1;
    let mut remaining = k;

    loop {
        if lo >= hi {
            return;
        }
        let p = lomuto_partition(indices, keys, lo, hi);
        let rank = p - lo + 1;
        match rank.cmp(&remaining) {
            std::cmp::Ordering::Equal => return,
            std::cmp::Ordering::Greater => {
                hi = p - 1;
            }
            std::cmp::Ordering::Less => {
                remaining -= rank;
                lo = p + 1;
            }
        }
    }
}

/// Sorts `indices` in place by ascending `keys`, ties broken arbitrarily.
///
/// Used to put the final `K`-length row into sorted order once
/// [`quickselect`] has identified the K-smallest set; implemented as a plain
/// recursive quicksort over disjoint sub-slices (no shared index bounds, so
/// there is no arithmetic that could underflow).
pub fn quicksort_slice<F: Float>(indices: &mut [usize], keys: &[F]) {
    let len = indices.len();
    if len <= 1 {
        return;
    }
    let pivot = keys[indices[len - 1]];
    let mut i = 0usize;
    for j in 0..len - 1 {
        if keys[indices[j]] <= pivot {
            indices.swap(i, j);
            i += 1;
        }
    }
    indices.swap(i, len - 1);
    let (left, rest) = indices.split_at_mut(i);
    let (_, right) = rest.split_at_mut(1);
    quicksort_slice(left, keys);
    quicksort_slice(right, keys);
}
