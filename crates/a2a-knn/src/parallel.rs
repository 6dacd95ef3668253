//! Greedy bin-packing of clusters across workers and the three interchangeable
//! "run N independent tasks, report first error" dispatch backends (§4.3, §9).

use crate::config::ParallelBackend;
use crate::error::{Error, Result};

/// Packs cluster sizes into `num_workers` bins using greedy longest-processing-
/// time-first (LPT) scheduling: clusters are considered in descending size
/// order and each one is placed into the currently-lightest bin.
///
/// Returns, for each worker, the list of cluster indices (into `sizes`)
/// assigned to it.
#[must_use]
pub fn pack_clusters(sizes: &[usize], num_workers: usize) -> Vec<Vec<usize>> {
    let num_workers = num_workers.max(1);
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_unstable_by(|&a, &b| sizes[b].cmp(&sizes[a]));

    let mut bins = vec![Vec::new(); num_workers];
    let mut loads = vec![0usize; num_workers];

    for cluster_idx in order {
        let lightest = (0..num_workers)
            .min_by_key(|&w| loads[w])
            .unwrap_or(0);
        bins[lightest].push(cluster_idx);
        loads[lightest] += sizes[cluster_idx];
    }

    bins
}

/// Runs `task` once per bin in `bins`, using the dispatch strategy named by
/// `backend`, and collects all results before reporting the first error.
///
/// All backends run every bin to completion (a failing task does not cancel
/// its siblings mid-flight); the first error encountered while scanning
/// results, in bin order, is the one returned.
pub fn run_bins<T, Fn>(bins: &[Vec<usize>], backend: ParallelBackend, task: Fn) -> Result<Vec<T>>
where
    T: Send,
    Fn: Sync + std::ops::Fn(&[usize]) -> Result<T>,
{
    let results = match backend {
        ParallelBackend::NativeThreads => run_native(bins, &task),
        ParallelBackend::StructuredLoop => run_structured(bins, &task),
        ParallelBackend::WorkStealing => run_work_stealing(bins, &task),
    };

    let mut out = Vec::with_capacity(results.len());
    for r in results {
        out.push(r?);
    }
    Ok(out)
}

/// One OS thread per bin, joined manually.
fn run_native<T, F>(bins: &[Vec<usize>], task: &F) -> Vec<Result<T>>
where
    T: Send,
    F: Sync + std::ops::Fn(&[usize]) -> Result<T>,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = bins
            .iter()
            .map(|bin| scope.spawn(move || task(bin)))
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|panic| {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker thread panicked".to_string());
                    Err(Error::WorkerFailed(msg))
                })
            })
            .collect()
    })
}

/// A `rayon::scope` with one spawned task per bin, results collected through
/// a shared, index-addressed buffer.
fn run_structured<T, F>(bins: &[Vec<usize>], task: &F) -> Vec<Result<T>>
where
    T: Send,
    F: Sync + std::ops::Fn(&[usize]) -> Result<T>,
{
    let slots: Vec<std::sync::Mutex<Option<Result<T>>>> =
        bins.iter().map(|_| std::sync::Mutex::new(None)).collect();

    rayon::scope(|scope| {
        for (i, bin) in bins.iter().enumerate() {
            let slot = &slots[i];
            scope.spawn(move |_| {
                let result = task(bin);
                let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                *guard = Some(result);
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| {
            slot.into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .unwrap_or_else(|| Err(Error::WorkerFailed("task slot never filled".to_string())))
        })
        .collect()
}

/// `rayon`'s own work-stealing `par_iter` over the bins.
fn run_work_stealing<T, F>(bins: &[Vec<usize>], task: &F) -> Vec<Result<T>>
where
    T: Send,
    F: Sync + std::ops::Fn(&[usize]) -> Result<T>,
{
    use rayon::prelude::*;
    bins.par_iter().map(|bin| task(bin)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_clusters_balances_load() {
        let sizes = vec![10, 1, 1, 1, 9, 2];
        let bins = pack_clusters(&sizes, 2);
        let loads: Vec<usize> = bins
            .iter()
            .map(|bin| bin.iter().map(|&i| sizes[i]).sum())
            .collect();
        assert!((loads[0] as i64 - loads[1] as i64).abs() <= 10);
        let total: usize = bins.iter().flatten().map(|&i| sizes[i]).sum();
        assert_eq!(total, sizes.iter().sum());
    }

    #[test]
    fn run_bins_reports_first_error_all_backends() {
        let bins = vec![vec![0], vec![1], vec![2]];
        for backend in [
            ParallelBackend::NativeThreads,
            ParallelBackend::StructuredLoop,
            ParallelBackend::WorkStealing,
        ] {
            let result: Result<Vec<usize>> = run_bins(&bins, backend, |bin| {
                if bin == [1] {
                    Err(Error::WorkerFailed("boom".to_string()))
                } else {
                    Ok(bin[0])
                }
            });
            assert!(result.is_err());
        }
    }

    #[test]
    fn run_bins_collects_results_in_order() {
        let bins = vec![vec![0], vec![1], vec![2]];
        let result = run_bins(&bins, ParallelBackend::WorkStealing, |bin| Ok::<_, Error>(bin[0] * 2))
            .unwrap();
        assert_eq!(result, vec![0, 2, 4]);
    }
}
