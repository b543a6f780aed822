//! Per-path advisory locking keyed by a digest of the logical path.
//!
//! The digest is the persisted lookup key, so it must be deterministic across
//! runs and processes; SHA-256 over the path's UTF-8 bytes satisfies that.
//! Hash collisions between distinct paths are accepted as a known risk.

use std::path::Path;

use sha2::{Digest, Sha256};

pub mod table;

pub use table::LockTable;

/// Compute the fixed-width hex identifier for a logical path.
pub fn digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}
