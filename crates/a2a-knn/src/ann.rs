//! The ANN orchestrator: k-means clustering followed by greedy bin-packing
//! and per-cluster exact resolution (§4.3).

use ndarray::{Array2, ArrayView2};

use crate::config::{AnnConfig, ExactKnnConfig, WorkerCount};
use crate::error::{Error, Result};
use crate::exact::knn_exact;
use crate::float::Float;
use crate::kmeans::cluster;
use crate::parallel::{pack_clusters, run_bins};

/// The resolved neighbor rows for one cluster's members, keyed by their
/// original (global) corpus indices.
struct ClusterRows<F: Float> {
    global_rows: Vec<usize>,
    indices: Array2<usize>,
    distances: Array2<F>,
}

/// Computes, for every row of `corpus`, its `k` nearest other rows of
/// `corpus`, using approximate k-means clustering to bound the work.
///
/// When `config.num_clusters <= 1`, this degenerates to a direct
/// `knn_exact(corpus, corpus, …)` call with no clustering step. Per the
/// source behavior this crate preserves (see `DESIGN.md`), that degenerate
/// path does **not** exclude each row's own index — only the clustered path
/// (`num_clusters > 1`) excludes self-matches. Callers that need
/// self-exclusion unconditionally should not pass `num_clusters <= 1`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `k` is zero or `k > corpus.nrows()`
/// (or `k >= corpus.nrows()` when `config.num_clusters > 1`, since
/// self-exclusion there leaves at most `n - 1` candidates), or if clustering
/// parameters are invalid. Propagates errors from the internal clustering
/// and exact-resolution passes.
pub fn ann_all_to_all<F: Float>(
    corpus: ArrayView2<F>,
    k: usize,
    config: &AnnConfig,
) -> Result<(Array2<usize>, Array2<F>)> {
    let n = corpus.nrows();

    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".to_string()));
    }
    if config.num_clusters == 0 {
        return Err(Error::InvalidArgument(
            "num_clusters must be at least 1".to_string(),
        ));
    }

    if config.num_clusters <= 1 {
        if k > n {
            return Err(Error::InvalidArgument(format!(
                "k ({k}) exceeds corpus size ({n})"
            )));
        }
        let exact_config = ExactKnnConfig {
            sorted: true,
            worker_count: config.worker_count,
            blas_thread_count: 1,
            mem_ratio: config.mem_ratio,
        };
        return knn_exact(corpus, corpus, k, &exact_config);
    }

    if k >= n {
        return Err(Error::InvalidArgument(format!(
            "k ({k}) must be less than corpus size ({n}) under self-exclusion"
        )));
    }

    let clustering = cluster(corpus, config.num_clusters, k, config.rng_seed)?;
    let sizes: Vec<usize> = clustering.members.iter().map(Vec::len).collect();

    let worker_count = config.worker_count.resolve();
    let bins = pack_clusters(&sizes, worker_count);
    ftlog::info!(
        "ann_all_to_all: packed {} clusters into {worker_count} worker bins",
        sizes.len()
    );

    let members = &clustering.members;
    let global_mem_ratio = config.mem_ratio;

    let results: Vec<Vec<ClusterRows<F>>> = run_bins(&bins, config.backend, move |bin| {
        let mut rows_for_bin = Vec::with_capacity(bin.len());
        for &cluster_idx in bin {
            let global_rows = members[cluster_idx].clone();
            let cluster_corpus = gather_rows(corpus, &global_rows);

            let scaled_ratio =
                (global_mem_ratio * (global_rows.len() as f64) / (n as f64)).clamp(0.01, 1.0);
            let exact_config = ExactKnnConfig {
                sorted: true,
                worker_count: WorkerCount::Fixed(1),
                blas_thread_count: 1,
                mem_ratio: scaled_ratio,
            };

            let (local_idx, dist) =
                knn_exact(cluster_corpus.view(), cluster_corpus.view(), k + 1, &exact_config)?;
            let (indices, distances) =
                drop_self_matches(&local_idx, &dist, &global_rows, k)?;

            rows_for_bin.push(ClusterRows {
                global_rows: global_rows.clone(),
                indices,
                distances,
            });
        }
        Ok(rows_for_bin)
    })?;

    let mut out_idx = Array2::<usize>::zeros((n, k));
    let mut out_dist = Array2::<F>::zeros((n, k));

    for bin_result in results {
        for cluster_rows in bin_result {
            for (local_i, &global_row) in cluster_rows.global_rows.iter().enumerate() {
                out_idx.row_mut(global_row).assign(&cluster_rows.indices.row(local_i));
                out_dist.row_mut(global_row).assign(&cluster_rows.distances.row(local_i));
            }
        }
    }

    Ok((out_idx, out_dist))
}

/// Copies the rows at `indices` out of `rows` into a fresh matrix.
fn gather_rows<F: Float>(rows: ArrayView2<F>, indices: &[usize]) -> Array2<F> {
    let mut out = Array2::<F>::zeros((indices.len(), rows.ncols()));
    for (dst, &src) in indices.iter().enumerate() {
        out.row_mut(dst).assign(&rows.row(src));
    }
    out
}

/// Translates a `(k + 1)`-wide local kNN result into a `k`-wide global result,
/// dropping each row's self-match (its own global index) and remapping local
/// cluster indices back to global corpus indices.
fn drop_self_matches<F: Float>(
    local_idx: &Array2<usize>,
    local_dist: &Array2<F>,
    global_rows: &[usize],
    k: usize,
) -> Result<(Array2<usize>, Array2<F>)> {
    let rows = local_idx.nrows();
    let mut out_idx = Array2::<usize>::zeros((rows, k));
    let mut out_dist = Array2::<F>::zeros((rows, k));

    for r in 0..rows {
        let self_global = global_rows[r];
        let mut written = 0usize;
        for c in 0..local_idx.ncols() {
            if written == k {
                break;
            }
            let local = local_idx[[r, c]];
            if global_rows[local] == self_global {
                continue;
            }
            out_idx[[r, written]] = global_rows[local];
            out_dist[[r, written]] = local_dist[[r, c]];
            written += 1;
        }
        if written < k {
            return Err(Error::WorkerFailed(format!(
                "cluster resolution for row {self_global} yielded only {written} of {k} neighbors after self-exclusion"
            )));
        }
    }

    Ok((out_idx, out_dist))
}
