//! Error types returned by this crate's public entry points.

/// Errors that can occur while computing a k-nearest-neighbor relation.
///
/// The three variants are exactly the three failure modes in the error
/// taxonomy (argument validation, scratch/worker allocation, and worker-task
/// failure). There is no recoverable-vs-fatal hierarchy: any error here is
/// fatal for the call that raised it, and the caller's output matrices must
/// be treated as garbage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A precondition on the inputs was violated: bad dimensions, `K` out of
    /// range, `mem_ratio` outside `(0, 1]`, `Kc` too large for `N`, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Scratch buffers or worker threads could not be allocated, including
    /// the case where even a block size of one query does not fit the
    /// caller's memory budget.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A worker task returned failure; propagated from an inner `knn_exact`
    /// call, an inner allocation, or a panicking worker thread.
    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

/// A specialized [`std::result::Result`] for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
