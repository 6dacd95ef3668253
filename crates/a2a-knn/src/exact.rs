//! The blocked, memory-bounded exact kNN engine (§4.1).

use std::panic::AssertUnwindSafe;

use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut1};

use crate::config::ExactKnnConfig;
use crate::error::{Error, Result};
use crate::float::Float;
use crate::kernel::{quickselect, quicksort_slice, squared_distances_block, squared_row_norms};
use crate::mem::{available_memory_bytes, block_size, coerce_worker_count};

/// Computes, for every row of `queries`, the `k` nearest rows of `corpus`
/// under Euclidean distance.
///
/// Returns `(indices, distances)`, both shaped `(queries.nrows(), k)`.
/// `indices[i, j]` is the row index into `corpus` of query `i`'s `j`-th
/// neighbor; `distances[i, j]` is the corresponding (non-squared) Euclidean
/// distance. When `config.sorted` is set, each row is sorted by increasing
/// distance; otherwise the `k` columns hold the k nearest in unspecified
/// order.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `queries` is empty, if `k` is zero
/// or exceeds `corpus.nrows()`, if the two inputs disagree on embedding
/// dimension, or if `config.mem_ratio` is outside `(0, 1]`. Returns
/// [`Error::AllocationFailed`] if scratch buffers or a thread pool cannot be
/// built, or if even a single-query block does not fit the memory budget.
/// Returns [`Error::WorkerFailed`] if an internal worker task panics.
pub fn knn_exact<F: Float>(
    queries: ArrayView2<F>,
    corpus: ArrayView2<F>,
    k: usize,
    config: &ExactKnnConfig,
) -> Result<(Array2<usize>, Array2<F>)> {
    validate(queries, corpus, k, config)?;

    let n_queries = queries.nrows();
    let n_corpus = corpus.nrows();

    let available = available_memory_bytes()?;
    let b = block_size(
        n_corpus,
        std::mem::size_of::<F>(),
        std::mem::size_of::<usize>(),
        config.mem_ratio,
        available,
    )?
    .min(n_queries);

    let requested_workers = config.worker_count.resolve();
    let worker_count = coerce_worker_count(b, requested_workers);
    ftlog::debug!(
        "knn_exact: n_queries={n_queries} n_corpus={n_corpus} block_size={b} \
         worker_count={worker_count} (requested {requested_workers})"
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .map_err(|e| Error::AllocationFailed(e.to_string()))?;

    // §5's oversubscription rule: once the engine itself shards a block
    // across more than one worker, each worker's own GEMM call must not
    // also spawn a BLAS thread pool, or the two levels of parallelism
    // compete for the same cores. With exactly one worker, the caller's
    // `blas_thread_count` is honored instead.
    if worker_count > 1 {
        set_blas_threads(1);
    } else {
        set_blas_threads(config.blas_thread_count);
    }

    let sq_corpus = squared_row_norms(corpus);

    let mut out_idx = Array2::<usize>::zeros((n_queries, k));
    let mut out_dist = Array2::<F>::zeros((n_queries, k));

    let mut start = 0usize;
    while start < n_queries {
        let end = (start + b).min(n_queries);
        ftlog::debug!("knn_exact: processing block [{start}, {end})");
        let query_block = queries.slice(ndarray::s![start..end, ..]);

        let idx_slice = out_idx.slice_mut(ndarray::s![start..end, ..]);
        let dist_slice = out_dist.slice_mut(ndarray::s![start..end, ..]);

        pool.install(|| {
            dispatch_block(
                query_block,
                corpus,
                &sq_corpus,
                idx_slice,
                dist_slice,
                k,
                config.sorted,
                worker_count,
            )
        })?;

        start = end;
    }

    Ok((out_idx, out_dist))
}

/// Validates the arguments common to both public entry points.
fn validate<F: Float>(
    queries: ArrayView2<F>,
    corpus: ArrayView2<F>,
    k: usize,
    config: &ExactKnnConfig,
) -> Result<()> {
    if queries.nrows() == 0 {
        return Err(Error::InvalidArgument(
            "queries must contain at least one row (M >= 1)".to_string(),
        ));
    }
    if queries.ncols() != corpus.ncols() {
        return Err(Error::InvalidArgument(format!(
            "queries have dimension {} but corpus has dimension {}",
            queries.ncols(),
            corpus.ncols()
        )));
    }
    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".to_string()));
    }
    if k > corpus.nrows() {
        return Err(Error::InvalidArgument(format!(
            "k ({k}) exceeds corpus size ({})",
            corpus.nrows()
        )));
    }
    if !(config.mem_ratio > 0.0 && config.mem_ratio <= 1.0) {
        return Err(Error::InvalidArgument(format!(
            "mem_ratio must be in (0, 1], got {}",
            config.mem_ratio
        )));
    }
    Ok(())
}

/// Attempts to cap the BLAS backend's thread count for the current process.
///
/// This is a real runtime setter only when a vendored BLAS that exposes one
/// is linked in; the bundled pure-Rust GEMM (`matrixmultiply`, the default
/// when the crate's `blas` feature is off) has no such knob and is otherwise
/// single-threaded by construction, so there is nothing to oversubscribe in
/// that configuration. Wiring a real setter for the `blas` feature would
/// require an `extern "C"` call into OpenBLAS, which this workspace's
/// `unsafe_code = "deny"` lint forbids; this is recorded as a known
/// limitation in `DESIGN.md` rather than silently assumed away. The call is
/// still made unconditionally at both call sites so the oversubscription
/// policy has one obvious place to become real once a safe setter exists.
fn set_blas_threads(_threads: usize) {}

/// One worker's contiguous share of a query block: its absolute row range
/// within the block, and the output row views for that range.
struct WorkerChunk<'a, F: Float> {
    start: usize,
    end: usize,
    idx_rows: Vec<ArrayViewMut1<'a, usize>>,
    dist_rows: Vec<ArrayViewMut1<'a, F>>,
}

/// Splits `n` items into `workers` contiguous ranges whose sizes differ by
/// at most one, per §4.2's "Thread-count policy" ("sizes differ by at most
/// one"). Returns `(start, end)` pairs covering `0..n` with no gaps.
fn contiguous_ranges(n: usize, workers: usize) -> Vec<(usize, usize)> {
    let workers = workers.max(1);
    let base = n / workers;
    let remainder = n % workers;

    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0usize;
    for w in 0..workers {
        let len = base + usize::from(w < remainder);
        if len == 0 {
            continue;
        }
        ranges.push((start, start + len));
        start += len;
    }
    ranges
}

/// Partitions one query block into `worker_count` contiguous slices and
/// enqueues one task per slice: each task runs the full §4.1 kernel (its own
/// Gram-identity GEMM against the whole corpus, then quickselect/sort per
/// row) on its own slice, so both the matrix multiply and the selection are
/// parallelized — not selection alone.
///
/// Workers write into disjoint row ranges of `idx_out`/`dist_out`, obtained
/// via `rows_mut()` and grouped by slice before dispatch, so no
/// synchronization is needed despite each worker mutating a shared buffer.
/// Each task is wrapped in [`std::panic::catch_unwind`] so a panic inside
/// one worker's kernel call surfaces as [`Error::WorkerFailed`] instead of
/// unwinding through the pool.
#[allow(clippy::too_many_arguments)]
fn dispatch_block<F: Float>(
    query_block: ArrayView2<F>,
    corpus: ArrayView2<F>,
    sq_corpus: &Array1<F>,
    mut idx_out: ndarray::ArrayViewMut2<usize>,
    mut dist_out: ndarray::ArrayViewMut2<F>,
    k: usize,
    sorted: bool,
    worker_count: usize,
) -> Result<()> {
    use rayon::prelude::*;

    let block_rows = query_block.nrows();
    let ranges = contiguous_ranges(block_rows, worker_count);

    let mut idx_rows_iter = idx_out.rows_mut().into_iter();
    let mut dist_rows_iter = dist_out.rows_mut().into_iter();

    let chunks: Vec<WorkerChunk<'_, F>> = ranges
        .into_iter()
        .map(|(start, end)| {
            let len = end - start;
            WorkerChunk {
                start,
                end,
                idx_rows: idx_rows_iter.by_ref().take(len).collect(),
                dist_rows: dist_rows_iter.by_ref().take(len).collect(),
            }
        })
        .collect();

    chunks.into_par_iter().try_for_each(|chunk| -> Result<()> {
        let task = AssertUnwindSafe(|| {
            run_worker_chunk(query_block, corpus, sq_corpus, chunk, k, sorted);
        });
        std::panic::catch_unwind(task).map_err(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "knn_exact worker task panicked".to_string());
            Error::WorkerFailed(msg)
        })
    })
}

/// Runs the §4.1 kernel (GEMM + quickselect + optional sort) for one
/// worker's contiguous slice of a query block, writing results directly into
/// that slice's output row views.
fn run_worker_chunk<F: Float>(
    query_block: ArrayView2<F>,
    corpus: ArrayView2<F>,
    sq_corpus: &Array1<F>,
    chunk: WorkerChunk<'_, F>,
    k: usize,
    sorted: bool,
) {
    let WorkerChunk {
        start,
        end,
        idx_rows,
        dist_rows,
    } = chunk;

    let slice_queries = query_block.slice(ndarray::s![start..end, ..]);
    let mut dist_slice = Array2::<F>::zeros((end - start, corpus.nrows()));
    squared_distances_block(slice_queries, corpus, sq_corpus, &mut dist_slice);

    for (row_i, (mut idx_row, mut dist_row)) in idx_rows.into_iter().zip(dist_rows).enumerate() {
        let row = dist_slice.row(row_i);
        let sq_keys: Vec<F> = row.to_vec();
        let mut indices: Vec<usize> = (0..sq_keys.len()).collect();

        quickselect(&mut indices, &sq_keys, k);
        let selected = &mut indices[..k];
        if sorted {
            quicksort_slice(selected, &sq_keys);
        }

        for (j, &idx) in selected.iter().enumerate() {
            idx_row[j] = idx;
            dist_row[j] = sq_keys[idx].max(F::zero()).sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn finds_exact_nearest_neighbor() {
        let corpus = array![[0.0_f64, 0.0], [10.0, 10.0], [1.0, 0.0], [0.0, 1.0]];
        let queries = array![[0.1_f64, 0.1]];
        let config = ExactKnnConfig::default();
        let (idx, dist) = knn_exact(queries.view(), corpus.view(), 1, &config).unwrap();
        assert_eq!(idx[[0, 0]], 0);
        assert!(dist[[0, 0]] < 0.2);
    }

    #[test]
    fn rejects_k_larger_than_corpus() {
        let corpus = array![[0.0_f64, 0.0]];
        let queries = array![[0.0_f64, 0.0]];
        let config = ExactKnnConfig::default();
        let err = knn_exact(queries.view(), corpus.view(), 2, &config).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let corpus = array![[0.0_f64, 0.0, 0.0]];
        let queries = array![[0.0_f64, 0.0]];
        let config = ExactKnnConfig::default();
        let err = knn_exact(queries.view(), corpus.view(), 1, &config).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rejects_empty_query_set() {
        let corpus = array![[0.0_f64, 0.0], [1.0, 1.0]];
        let queries = Array2::<f64>::zeros((0, 2));
        let config = ExactKnnConfig::default();
        let err = knn_exact(queries.view(), corpus.view(), 1, &config).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn sorted_rows_are_ascending() {
        let corpus = array![[5.0_f64], [1.0], [3.0], [2.0], [4.0]];
        let queries = array![[0.0_f64]];
        let config = ExactKnnConfig {
            sorted: true,
            ..ExactKnnConfig::default()
        };
        let (_, dist) = knn_exact(queries.view(), corpus.view(), 5, &config).unwrap();
        for j in 1..5 {
            assert!(dist[[0, j - 1]] <= dist[[0, j]]);
        }
    }

    #[test]
    fn contiguous_ranges_cover_everything_with_sizes_differing_by_at_most_one() {
        let ranges = contiguous_ranges(10, 3);
        assert_eq!(ranges, vec![(0, 4), (4, 7), (7, 10)]);

        let mut covered = 0usize;
        for &(s, e) in &ranges {
            assert!(e - s <= 4 && e - s >= 3);
            assert_eq!(s, covered);
            covered = e;
        }
        assert_eq!(covered, 10);
    }

    #[test]
    fn contiguous_ranges_drops_empty_slices_when_workers_exceed_items() {
        let ranges = contiguous_ranges(2, 5);
        let total: usize = ranges.iter().map(|&(s, e)| e - s).sum();
        assert_eq!(total, 2);
        assert!(ranges.len() <= 2);
    }

    #[test]
    fn per_worker_gemm_matches_single_worker_result() {
        let corpus = array![
            [0.0_f64, 0.0],
            [3.0, 4.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [2.0, 2.0],
            [5.0, 5.0]
        ];
        let queries = array![[0.1_f64, 0.1], [2.5, 2.5], [5.0, 0.0]];

        let serial = ExactKnnConfig {
            sorted: true,
            worker_count: crate::config::WorkerCount::Fixed(1),
            ..ExactKnnConfig::default()
        };
        let parallel = ExactKnnConfig {
            sorted: true,
            worker_count: crate::config::WorkerCount::Fixed(3),
            ..ExactKnnConfig::default()
        };

        let (idx_a, dist_a) = knn_exact(queries.view(), corpus.view(), 3, &serial).unwrap();
        let (idx_b, dist_b) = knn_exact(queries.view(), corpus.view(), 3, &parallel).unwrap();

        assert_eq!(idx_a, idx_b);
        for (a, b) in dist_a.iter().zip(dist_b.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
