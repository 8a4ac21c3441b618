//! Static, hash-based assignment of input paths to workers.
//!
//! The assignment must agree across independently started processes, so it
//! hashes the path string with SHA-256 rather than Rust's randomly seeded
//! `DefaultHasher`. For a fixed worker count the predicates returned by
//! [`hash_partitioner`] for ids `0..workers` partition the set of all paths:
//! every path matches exactly one id.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Worker id in `0..workers` that owns `path`.
///
/// # Panics
/// Panics if `workers` is zero.
#[must_use]
pub fn worker_for_path(path: &Path, workers: usize) -> usize {
    assert!(workers > 0, "worker count must be positive");
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(head);
    // The remainder is below `workers`, so it always fits back into usize.
    usize::try_from(h % workers as u64).unwrap_or_default()
}

/// Predicate selecting the paths owned by `worker_id` out of `workers`.
///
/// # Panics
/// Panics if `workers` is zero.
#[must_use]
pub fn hash_partitioner(worker_id: usize, workers: usize) -> impl Fn(&Path) -> bool + Send + Sync {
    assert!(workers > 0, "worker count must be positive");
    move |path: &Path| worker_for_path(path, workers) == worker_id
}
