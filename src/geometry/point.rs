//! Point, particle, and box types.
//!
//! Particles are stored in single precision (`[f32; 3]`), matching the
//! storage of the simulation data they come from. All geometry is computed in
//! double precision on [`Point3`] values converted at the kernel boundary.

use serde::{Deserialize, Serialize};

/// Double-precision point used by predicates and the kernel.
pub type Point3 = nalgebra::Point3<f64>;

/// Double-precision vector.
pub type Vector3 = nalgebra::Vector3<f64>;

/// Stored particle position.
pub type Particle = [f32; 3];

/// Widen a stored particle to a kernel point.
#[inline]
#[must_use]
pub fn particle_to_point(p: &Particle) -> Point3 {
    Point3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2]))
}

/// Narrow a kernel point to storage precision.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn point_to_particle(p: &Point3) -> Particle {
    [p.x as f32, p.y as f32, p.z as f32]
}

/// Axis-aligned box in double precision.
///
/// Bounds may be infinite: an unbounded side models a region with no limit in
/// that direction (open domain faces, periodic axes).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: [f64; 3],
    /// Maximum corner.
    pub max: [f64; 3],
}

impl Aabb {
    /// The box covering all of space.
    pub const EVERYTHING: Self = Self {
        min: [f64::NEG_INFINITY; 3],
        max: [f64::INFINITY; 3],
    };

    /// Creates a box from its corners.
    #[must_use]
    pub const fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// True when `min <= max` on every axis.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| self.min[a] <= self.max[a])
    }

    /// Edge lengths.
    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Volume of the box (infinite if any side is unbounded).
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.extent().iter().product()
    }

    /// Grows every side by `margin`.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min.map(|v| v - margin),
            max: self.max.map(|v| v + margin),
        }
    }

    /// Translates the box by `shift`.
    #[must_use]
    pub fn translated(&self, shift: [f64; 3]) -> Self {
        Self {
            min: [
                self.min[0] + shift[0],
                self.min[1] + shift[1],
                self.min[2] + shift[2],
            ],
            max: [
                self.max[0] + shift[0],
                self.max[1] + shift[1],
                self.max[2] + shift[2],
            ],
        }
    }

    /// Closed containment test.
    #[must_use]
    pub fn contains(&self, p: &Point3) -> bool {
        (0..3).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }

    /// True if the open interiors overlap (boxes touching on a face do not).
    #[must_use]
    pub fn overlaps_interior(&self, other: &Self) -> bool {
        (0..3).all(|a| self.min[a] < other.max[a] && other.min[a] < self.max[a])
    }

    /// Squared Euclidean distance from `p` to the box (zero inside).
    #[must_use]
    pub fn squared_distance(&self, p: &Point3) -> f64 {
        (0..3)
            .map(|a| {
                let d = if p[a] < self.min[a] {
                    self.min[a] - p[a]
                } else if p[a] > self.max[a] {
                    p[a] - self.max[a]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    /// Supremum of `normal · x` over the box.
    ///
    /// Components of `normal` that are zero contribute nothing even when the
    /// box is unbounded on that axis.
    #[must_use]
    pub fn support(&self, normal: &Vector3) -> f64 {
        (0..3)
            .map(|a| {
                let n = normal[a];
                if n > 0.0 {
                    n * self.max[a]
                } else if n < 0.0 {
                    n * self.min[a]
                } else {
                    0.0
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn particle_point_conversion_is_exact_for_f32_values() {
        let p: Particle = [0.1, -2.5, 3.75];
        let q = point_to_particle(&particle_to_point(&p));
        assert_eq!(p, q);
    }

    #[test]
    fn squared_distance_to_box() {
        let b = Aabb::new([0.0; 3], [1.0; 3]);
        assert_relative_eq!(b.squared_distance(&Point3::new(0.5, 0.5, 0.5)), 0.0);
        assert_relative_eq!(b.squared_distance(&Point3::new(2.0, 0.5, 0.5)), 1.0);
        assert_relative_eq!(b.squared_distance(&Point3::new(2.0, 2.0, 0.5)), 2.0);
    }

    #[test]
    fn support_handles_unbounded_axes() {
        let slab = Aabb::new(
            [f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY],
            [f64::INFINITY, 1.0, f64::INFINITY],
        );
        let n = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(slab.support(&n), 1.0);
        let tilted = Vector3::new(0.1, 1.0, 0.0);
        assert!(slab.support(&tilted).is_infinite());
    }

    #[test]
    fn expanded_and_translated() {
        let b = Aabb::new([0.0; 3], [1.0; 3]).expanded(0.5).translated([1.0, 0.0, 0.0]);
        assert_eq!(b.min, [0.5, -0.5, -0.5]);
        assert_eq!(b.max, [2.5, 1.5, 1.5]);
        assert!(b.contains(&Point3::new(2.5, 0.0, 0.0)));
    }

    #[test]
    fn interior_overlap_excludes_shared_faces() {
        let a = Aabb::new([0.0; 3], [1.0; 3]);
        let b = Aabb::new([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        assert!(!a.overlaps_interior(&b));
        assert!(a.overlaps_interior(&a.expanded(-0.1)));
    }
}
