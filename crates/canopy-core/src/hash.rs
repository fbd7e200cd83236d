//! Deterministic hashing used for key digests.
//!
//! Digests must be identical for identical input within and across processes,
//! so the randomly seeded std hasher is never used here, even with `std-hash`.

use std::hash::{Hash, Hasher};

pub mod default {
    pub use rustc_hash::FxHasher as DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// Hashes `value` with the fixed-seed hasher.
pub fn digest<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = default::new();
    value.hash(&mut hasher);
    hasher.finish()
}
