//! High-performance collection types used throughout the crate.
//!
//! Hash-based collections use `rustc_hash` for fast non-cryptographic hashing.
//! Small, bounded temporaries (tetrahedron rings, cavity facets) use
//! [`SmallBuffer`] to stay on the stack in the common case.

mod aliases;
mod buffers;

pub use aliases::*;
pub use buffers::*;

/// Creates a `FastHashMap` with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}

/// Creates a `FastHashSet` with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}
