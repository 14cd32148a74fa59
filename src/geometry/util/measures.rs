//! Areas and volumes of Voronoi faces and cells.

use crate::geometry::point::{Point3, Vector3};

/// Area of a planar polygon given by its ordered ring of vertices.
///
/// Uses the vector area `½ |Σ (pᵢ - p₀) × (pᵢ₊₁ - p₀)|`, which is exact for
/// planar rings in either winding order. Rings with fewer than three vertices
/// have zero area.
#[must_use]
pub fn polygon_area(ring: &[Point3]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let origin = ring[0];
    let mut sum = Vector3::zeros();
    for pair in ring[1..].windows(2) {
        sum += (pair[0] - origin).cross(&(pair[1] - origin));
    }
    0.5 * sum.norm()
}

/// Volume of the pyramid with base area `area` and apex at distance `height`.
#[inline]
#[must_use]
pub fn pyramid_volume(area: f64, height: f64) -> f64 {
    area * height / 3.0
}

/// Unsigned volume of a tetrahedron.
#[must_use]
pub fn tetrahedron_volume(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> f64 {
    ((b - a).dot(&(c - a).cross(&(d - a)))).abs() / 6.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_square_area() {
        let ring = [
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        assert_relative_eq!(polygon_area(&ring), 1.0);
        let mut reversed = ring;
        reversed.reverse();
        assert_relative_eq!(polygon_area(&reversed), 1.0);
    }

    #[test]
    fn degenerate_rings_have_zero_area() {
        assert_relative_eq!(polygon_area(&[]), 0.0);
        assert_relative_eq!(
            polygon_area(&[Point3::origin(), Point3::new(1.0, 0.0, 0.0)]),
            0.0
        );
    }

    #[test]
    fn cube_from_pyramids() {
        // A unit cube seen from its center: six faces of area 1 at height 0.5.
        let vol: f64 = (0..6).map(|_| pyramid_volume(1.0, 0.5)).sum();
        assert_relative_eq!(vol, 1.0);
    }

    #[test]
    fn unit_tetrahedron_volume() {
        let v = tetrahedron_volume(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 1.0, 0.0),
            &Point3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(v, 1.0 / 6.0);
    }
}
