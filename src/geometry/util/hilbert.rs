//! Hilbert space-filling curve ordering for 3D points.
//!
//! Used to choose a cache- and walk-friendly insertion order in the kernel.
//! Pure ordering primitives, no triangulation types.

use crate::geometry::point::{Aabb, Point3};

/// Bits per axis; `3 * HILBERT_BITS` must fit in a `u64`.
pub const HILBERT_BITS: u32 = 21;

/// Quantize a point into integer grid coordinates in `[0, 2^bits)`.
///
/// Each axis is normalized against `bounds` and clamped to `[0, 1]`. A
/// degenerate or non-finite extent quantizes to 0 on that axis.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn hilbert_quantize(p: &Point3, bounds: &Aabb, bits: u32) -> [u32; 3] {
    debug_assert!(bits > 0 && bits <= HILBERT_BITS);
    let max_val = (1_u32 << bits) - 1;
    let extent = bounds.extent();
    let mut q = [0_u32; 3];
    for axis in 0..3 {
        let normalized = if extent[axis] > 0.0 && extent[axis].is_finite() {
            let t = (p[axis] - bounds.min[axis]) / extent[axis];
            if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 }
        } else {
            0.0
        };
        q[axis] = ((normalized * f64::from(max_val)) as u32).min(max_val);
    }
    q
}

/// Hilbert index of pre-quantized coordinates.
///
/// Skilling, "Programming the Hilbert curve", AIP Conf. Proc. 707 (2004).
#[must_use]
pub fn hilbert_index_from_quantized(coords: [u32; 3], bits: u32) -> u64 {
    let mut x = coords;

    // Inverse undo of excess work.
    let highest = 1_u32 << (bits - 1);
    let mut q = highest;
    while q > 1 {
        let p = q - 1;
        for i in 0..3 {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode.
    x[1] ^= x[0];
    x[2] ^= x[1];
    let mut t = 0_u32;
    q = highest;
    while q > 1 {
        if x[2] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for c in &mut x {
        *c ^= t;
    }

    let mut index = 0_u64;
    for bit in (0..bits).rev() {
        for c in &x {
            index = (index << 1) | u64::from((c >> bit) & 1);
        }
    }
    index
}

/// Hilbert index of a point within `bounds`.
#[must_use]
pub fn hilbert_index(p: &Point3, bounds: &Aabb) -> u64 {
    hilbert_index_from_quantized(hilbert_quantize(p, bounds, HILBERT_BITS), HILBERT_BITS)
}

/// Indices that sort `points` along the Hilbert curve of their bounding box.
///
/// Ties (points quantizing to the same cell) keep input order.
#[must_use]
pub fn hilbert_sorted_indices(points: &[Point3]) -> Vec<usize> {
    let Some(bounds) = bounding_box(points) else {
        return Vec::new();
    };
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by_cached_key(|&i| (hilbert_index(&points[i], &bounds), i));
    order
}

/// Tight bounding box of a point set, `None` if empty.
#[must_use]
pub fn bounding_box(points: &[Point3]) -> Option<Aabb> {
    let first = points.first()?;
    let mut b = Aabb::new([first.x, first.y, first.z], [first.x, first.y, first.z]);
    for p in &points[1..] {
        for axis in 0..3 {
            b.min[axis] = b.min[axis].min(p[axis]);
            b.max[axis] = b.max[axis].max(p[axis]);
        }
    }
    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collections::FastHashSet;

    #[test]
    fn origin_has_index_zero() {
        assert_eq!(hilbert_index_from_quantized([0, 0, 0], 4), 0);
    }

    #[test]
    fn indices_are_a_bijection_on_small_grid() {
        let bits = 2;
        let mut seen = FastHashSet::default();
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    let idx = hilbert_index_from_quantized([x, y, z], bits);
                    assert!(idx < 64);
                    assert!(seen.insert(idx), "duplicate index {idx}");
                }
            }
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn consecutive_indices_are_grid_neighbors() {
        let bits = 2;
        let mut by_index = vec![[0_u32; 3]; 64];
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    let idx = hilbert_index_from_quantized([x, y, z], bits);
                    by_index[usize::try_from(idx).unwrap()] = [x, y, z];
                }
            }
        }
        for pair in by_index.windows(2) {
            let dist: u32 = (0..3).map(|a| pair[0][a].abs_diff(pair[1][a])).sum();
            assert_eq!(dist, 1, "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn sorted_indices_is_permutation() {
        let points: Vec<Point3> = (0..50)
            .map(|i| {
                let t = f64::from(i);
                Point3::new((t * 0.37).sin(), (t * 0.11).cos(), t / 50.0)
            })
            .collect();
        let mut order = hilbert_sorted_indices(&points);
        order.sort_unstable();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_sorts_to_empty() {
        assert!(hilbert_sorted_indices(&[]).is_empty());
        assert!(bounding_box(&[]).is_none());
    }
}
