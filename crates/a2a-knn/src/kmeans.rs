//! One-shot k-means clustering with merge-until-viable post-processing (§4.2).
//!
//! This deliberately departs from canonical k-means (no Lloyd iteration):
//! centroids are seeded once, points are assigned once, centroids are
//! recomputed once, and any cluster left with fewer than `k + 1` members is
//! merged into its nearest surviving neighbor. A single assignment pass is
//! enough for the ANN orchestrator's purposes, which only need clusters that
//! are small enough to fit a memory budget, not clusters that minimize
//! within-cluster variance.

use ndarray::{Array1, Array2, ArrayView2};
use rand::SeedableRng;

use crate::config::ExactKnnConfig;
use crate::error::{Error, Result};
use crate::exact::knn_exact;
use crate::float::Float;

/// The outcome of clustering a corpus: for every surviving cluster, the
/// indices (into the original corpus) of its members.
pub struct Clustering {
    /// `members[c]` holds the corpus row indices assigned to cluster `c`.
    pub members: Vec<Vec<usize>>,
}

/// Clusters `corpus` into at most `num_clusters` groups, merging any group
/// left with fewer than `k + 1` members into its nearest surviving neighbor.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `num_clusters` is zero, or if
/// `corpus.nrows() / num_clusters <= k` (too few points per cluster for any
/// arrangement to leave every surviving cluster viable). Propagates errors
/// from the internal `knn_exact` assignment pass.
pub fn cluster<F: Float>(
    corpus: ArrayView2<F>,
    num_clusters: usize,
    k: usize,
    rng_seed: Option<u64>,
) -> Result<Clustering> {
    let n = corpus.nrows();

    if num_clusters == 0 {
        return Err(Error::InvalidArgument(
            "num_clusters must be at least 1".to_string(),
        ));
    }
    if num_clusters == 1 {
        return Ok(Clustering {
            members: vec![(0..n).collect()],
        });
    }
    if n / num_clusters <= k {
        return Err(Error::InvalidArgument(format!(
            "num_clusters ({num_clusters}) too large for corpus of {n} points at k={k}"
        )));
    }

    let mut rng = match rng_seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_os_rng(),
    };

    let seed_indices = rand::seq::index::sample(&mut rng, n, num_clusters).into_vec();
    let mut centroids = gather_rows(corpus, &seed_indices);

    let assignment = assign_to_nearest(corpus, centroids.view())?;

    let mut members = vec![Vec::new(); num_clusters];
    for (point, &cluster_id) in assignment.iter().enumerate() {
        members[cluster_id].push(point);
    }

    recompute_centroids(corpus, &members, &mut centroids);
    merge_until_viable(corpus, &mut members, &mut centroids, k);
    members.retain(|m| !m.is_empty());

    ftlog::info!(
        "k-means: {n} points settled into {} surviving clusters (requested {num_clusters})",
        members.len()
    );

    Ok(Clustering { members })
}

/// Copies the rows at `indices` out of `rows` into a fresh matrix.
fn gather_rows<F: Float>(rows: ArrayView2<F>, indices: &[usize]) -> Array2<F> {
    let mut out = Array2::<F>::zeros((indices.len(), rows.ncols()));
    for (dst, &src) in indices.iter().enumerate() {
        out.row_mut(dst).assign(&rows.row(src));
    }
    out
}

/// Assigns every row of `corpus` to the index of its nearest row in `centroids`.
fn assign_to_nearest<F: Float>(
    corpus: ArrayView2<F>,
    centroids: ArrayView2<F>,
) -> Result<Vec<usize>> {
    let config = ExactKnnConfig {
        sorted: false,
        ..ExactKnnConfig::default()
    };
    let (idx, _) = knn_exact(corpus, centroids, 1, &config)?;
    Ok(idx.column(0).to_vec())
}

/// Recomputes each cluster's centroid as the mean of its current members.
/// Clusters with no members are left untouched; they are resolved by the
/// merge pass that follows.
fn recompute_centroids<F: Float>(
    corpus: ArrayView2<F>,
    members: &[Vec<usize>],
    centroids: &mut Array2<F>,
) {
    for (c, member_ids) in members.iter().enumerate() {
        if member_ids.is_empty() {
            continue;
        }
        let mut sum = Array1::<F>::zeros(corpus.ncols());
        for &p in member_ids {
            sum += &corpus.row(p);
        }
        let count = F::from_usize(member_ids.len()).unwrap_or_else(F::one);
        centroids.row_mut(c).assign(&(sum / count));
    }
}

/// Squared Euclidean distance between two equal-length slices.
fn squared_distance<F: Float>(a: ndarray::ArrayView1<F>, b: ndarray::ArrayView1<F>) -> F {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum()
}

/// Repeatedly finds a live cluster with fewer than `k + 1` members and merges
/// it into its nearest surviving (viable) live neighbor, until every live
/// cluster is viable or only one live cluster remains.
///
/// A cluster that has just been merged away is emptied but left in place in
/// `members` (its slot is dropped by the trailing `retain`); `alive` tracks
/// which slots are still eligible to be picked as a victim or a merge target,
/// so an already-emptied slot is never revisited as a no-op victim — without
/// that tracking, repeatedly "merging" an empty cluster into another changes
/// nothing and the loop never reaches its termination condition.
///
/// Terminates because a corpus satisfying `n / num_clusters > k` always has
/// `n >= k + 1`: each round strictly reduces the number of live clusters (by
/// retiring the victim), so in the worst case every point funnels into a
/// single surviving cluster, which is trivially viable.
fn merge_until_viable<F: Float>(
    corpus: ArrayView2<F>,
    members: &mut [Vec<usize>],
    centroids: &mut Array2<F>,
    k: usize,
) {
    let mut alive: Vec<bool> = vec![true; members.len()];

    loop {
        let live: Vec<usize> = (0..members.len()).filter(|&c| alive[c]).collect();
        let viable: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&c| members[c].len() >= k + 1)
            .collect();

        if viable.len() == live.len() {
            break;
        }
        if viable.is_empty() {
            // Every live cluster is under-sized; fold everything into the
            // single largest one and stop.
            let biggest = live
                .iter()
                .copied()
                .max_by_key(|&c| members[c].len())
                .unwrap_or(0);
            for &c in &live {
                if c != biggest {
                    let mut taken = std::mem::take(&mut members[c]);
                    members[biggest].append(&mut taken);
                    alive[c] = false;
                }
            }
            break;
        }

        let victim = live
            .iter()
            .copied()
            .find(|&c| members[c].len() < k + 1)
            .expect("non-viable live cluster must exist when viable.len() != live.len()");

        ftlog::debug!(
            "k-means: merging non-viable cluster {victim} ({} members) into its nearest survivor",
            members[victim].len()
        );

        let target = viable
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let da = squared_distance(centroids.row(victim), centroids.row(a));
                let db = squared_distance(centroids.row(victim), centroids.row(b));
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("viable is non-empty");

        let absorbed = std::mem::take(&mut members[victim]);
        alive[victim] = false;
        members[target].extend(absorbed);

        let count = F::from_usize(members[target].len()).unwrap_or_else(F::one);
        let mut sum = Array1::<F>::zeros(corpus.ncols());
        for &p in &members[target] {
            sum += &corpus.row(p);
        }
        centroids.row_mut(target).assign(&(sum / count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blob_corpus() -> Array2<f64> {
        let mut rows = Vec::new();
        for cx in [0.0, 50.0, 100.0] {
            for i in 0..20 {
                rows.push(vec![cx + (i as f64) * 0.01, (i as f64) * 0.01]);
            }
        }
        Array2::from_shape_vec((rows.len(), 2), rows.into_iter().flatten().collect()).unwrap()
    }

    #[test]
    fn every_surviving_cluster_is_viable() {
        let corpus = blob_corpus();
        let clustering = cluster(corpus.view(), 3, 4, Some(42)).unwrap();
        let total: usize = clustering.members.iter().map(Vec::len).sum();
        assert_eq!(total, corpus.nrows());
        for m in &clustering.members {
            assert!(m.len() >= 5);
        }
    }

    #[test]
    fn rejects_too_many_clusters_for_k() {
        let corpus = blob_corpus();
        let err = cluster(corpus.view(), 40, 4, Some(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn single_cluster_returns_everything() {
        let corpus = blob_corpus();
        let clustering = cluster(corpus.view(), 1, 4, None).unwrap();
        assert_eq!(clustering.members.len(), 1);
        assert_eq!(clustering.members[0].len(), corpus.nrows());
    }
}
