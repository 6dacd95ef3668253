//! Exact and approximate k-nearest-neighbor search over dense Euclidean
//! vector collections.
//!
//! This crate provides two entry points:
//!
//! - [`knn_exact`]: a blocked, BLAS-accelerated exact kNN engine. Each query
//!   block (sized to fit a caller-supplied fraction of host free memory) is
//!   split into contiguous per-worker slices, and each worker reduces its own
//!   slice's distances to corpus points via the Gram identity in one dense
//!   matrix product.
//! - [`ann_all_to_all`]: an approximate all-to-all kNN orchestrator that
//!   clusters the corpus with a one-shot k-means pass, then resolves each
//!   cluster's neighbors independently with the exact engine, excluding each
//!   point's own index. The `num_clusters <= 1` path is an exception: it
//!   skips clustering and does not exclude self (see `ann_all_to_all`'s docs).
//!
//! Both entry points operate on a single compile-time float type per call
//! (`f32` or `f64`, see [`Float`]) and return dense `(rows, k)` index and
//! distance matrices.

#![warn(missing_docs)]

mod ann;
mod config;
mod error;
mod exact;
mod float;
mod kernel;
mod kmeans;
mod mem;
mod parallel;

pub use ann::ann_all_to_all;
pub use config::{AnnConfig, ExactKnnConfig, ParallelBackend, WorkerCount};
pub use error::{Error, Result};
pub use exact::knn_exact;
pub use float::Float;
