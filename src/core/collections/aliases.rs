use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage map backing the kernel's tetrahedron arena.
///
/// - **default** (`dense-slotmap`): `DenseSlotMap`, contiguous values and fast iteration.
/// - **without `dense-slotmap`**: `SlotMap`, cheaper removal in insertion-heavy loads.
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

/// Storage map backing the kernel's tetrahedron arena.
#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// `HashMap` with `rustc_hash::FxHasher`.
///
/// ⚠️ **Not DoS-resistant**: only use with trusted, internal keys (indices, ids).
///
/// ```rust
/// use tess::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u32, usize> = FastHashMap::default();
/// map.insert(7, 1);
/// assert_eq!(map.get(&7), Some(&1));
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` with `rustc_hash::FxHasher`.
pub type FastHashSet<T> = FxHashSet<T>;

/// Build hasher used by the capacity helpers.
pub type FastBuildHasher = FxBuildHasher;

pub use std::collections::hash_map::Entry;

/// Small-optimized `Vec`: inline storage for up to `N` elements, heap beyond.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;
