//! Caller-facing configuration knobs for the public entry points (§6).

use std::num::NonZeroUsize;

/// How many worker threads an engine call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    /// Resolve to the number of online CPUs at call time.
    Auto,
    /// Use exactly this many workers.
    Fixed(usize),
}

impl WorkerCount {
    /// Resolves this setting to a concrete worker count. Never returns zero.
    #[must_use]
    pub fn resolve(self) -> usize {
        match self {
            Self::Auto => std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
            Self::Fixed(n) => n.max(1),
        }
    }
}

/// Which "run N independent tasks, report first error" backend the ANN
/// orchestrator's Pass 7 dispatch uses (§4.3, §9). The three are semantically
/// equivalent; callers select one based on how they want the worker bins
/// scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelBackend {
    /// One OS thread per worker bin, joined manually with `std::thread::scope`.
    NativeThreads,
    /// A `rayon::scope` with one spawned task per worker bin.
    StructuredLoop,
    /// `rayon`'s own work-stealing `par_iter` over the worker bins.
    #[default]
    WorkStealing,
}

/// Configuration for [`crate::knn_exact`].
#[derive(Debug, Clone)]
pub struct ExactKnnConfig {
    /// Whether each output row must be sorted by increasing distance.
    pub sorted: bool,
    /// Number of workers the engine's internal task queue may use.
    pub worker_count: WorkerCount,
    /// Number of threads the dense-matmul backend may use. Only consulted
    /// when `worker_count` resolves to 1 (see §5's oversubscription rule).
    pub blas_thread_count: usize,
    /// Fraction of host free memory the engine may use for scratch buffers,
    /// in `(0, 1]`.
    pub mem_ratio: f64,
}

impl Default for ExactKnnConfig {
    fn default() -> Self {
        Self {
            sorted: true,
            worker_count: WorkerCount::Auto,
            blas_thread_count: 1,
            mem_ratio: 0.25,
        }
    }
}

/// Configuration for [`crate::ann_all_to_all`].
#[derive(Debug, Clone)]
pub struct AnnConfig {
    /// Requested number of k-means clusters (`Kc`). The merge-until-viable
    /// pass may leave fewer surviving clusters than requested.
    pub num_clusters: usize,
    /// Number of worker tasks used for Pass 7's per-cluster resolution.
    pub worker_count: WorkerCount,
    /// Fraction of host free memory any one cluster's inner `knn_exact` call
    /// may use, before Pass 7 scales it down per the worker's share of the
    /// global point count.
    pub mem_ratio: f64,
    /// Which parallel dispatch backend Pass 7 uses.
    pub backend: ParallelBackend,
    /// Seed for the k-means centroid-seeding RNG; `None` draws from OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            worker_count: WorkerCount::Auto,
            mem_ratio: 0.25,
            backend: ParallelBackend::WorkStealing,
            rng_seed: None,
        }
    }
}
