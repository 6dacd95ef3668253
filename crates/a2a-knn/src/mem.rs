//! Host memory accounting and query-block sizing (§5).

use crate::error::{Error, Result};

/// Smallest block size the engine will ever fall back to. Below this, a
/// single query's scratch requirement does not fit the caller's budget and
/// the call fails outright rather than making silent progress one row at a
/// time forever.
const MIN_QUERIES_PER_BLOCK: usize = 1;

/// Minimum number of queries a single worker must receive from a block before
/// it is worth sharding that block across multiple workers at all (§4.2
/// "Thread-count policy").
pub const MIN_QUERIES_PER_BLOCK_PER_WORKER: usize = 1;

/// Coerces `worker_count` to 1 when the chosen block size `b` does not give
/// every worker at least [`MIN_QUERIES_PER_BLOCK_PER_WORKER`] queries to work
/// on, per the thread-count policy in §4.2: a block too small to usefully
/// split is run single-threaded instead of handing most workers nothing.
#[must_use]
pub fn coerce_worker_count(b: usize, worker_count: usize) -> usize {
    if b / worker_count < MIN_QUERIES_PER_BLOCK_PER_WORKER {
        1
    } else {
        worker_count
    }
}

/// Returns the number of bytes of free host memory, as reported by the OS.
///
/// This is a coarse, best-effort figure: it is read once per call and not
/// revisited while the engine runs, so it cannot account for memory pressure
/// from concurrent processes that appears mid-computation.
pub fn available_memory_bytes() -> Result<u64> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let free = sys.available_memory();
    if free == 0 {
        return Err(Error::AllocationFailed(
            "host reports zero available memory".to_string(),
        ));
    }
    Ok(free)
}

/// Computes the number of query rows that may be processed in one block,
/// given a corpus of `n` rows, embedding dimension `dim`, element type of
/// size `elem_size` bytes, and a caller-supplied fraction `mem_ratio` of the
/// host's free memory.
///
/// The budget must cover, for one block of `b` queries: a `b x n` distance
/// matrix, a `b x n` index matrix (`usize`-sized), a `b`-length row-norm
/// buffer, and the `n`-length corpus row-norm buffer shared across all
/// blocks. This mirrors the accounting in the original engine's block-size
/// derivation.
pub fn block_size(
    n: usize,
    elem_size: usize,
    index_size: usize,
    mem_ratio: f64,
    available_bytes: u64,
) -> Result<usize> {
    if !(mem_ratio > 0.0 && mem_ratio <= 1.0) {
        return Err(Error::InvalidArgument(format!(
            "mem_ratio must be in (0, 1], got {mem_ratio}"
        )));
    }

    let budget = (available_bytes as f64) * mem_ratio;
    let per_query_bytes = (n * (elem_size + index_size) + elem_size) as f64;
    let fixed_bytes = (n * elem_size) as f64;

    if budget <= fixed_bytes {
        return Err(Error::AllocationFailed(format!(
            "memory budget ({budget} bytes) too small to hold corpus row norms ({fixed_bytes} bytes)"
        )));
    }

    let usable = budget - fixed_bytes;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let b = (usable / per_query_bytes).floor() as usize;

    if b < MIN_QUERIES_PER_BLOCK {
        return Err(Error::AllocationFailed(
            "memory budget too small for even one query per block".to_string(),
        ));
    }

    Ok(b)
}
