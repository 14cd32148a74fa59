//! Orientation and in-sphere predicates for 3D tetrahedra.
//!
//! Both predicates evaluate their determinant in `f64` and compare it against
//! an adaptive tolerance proportional to the permanent of the same expansion
//! (the sum of absolute values of its products). Results inside the tolerance
//! band are reported as [`Orientation::DEGENERATE`] / [`InSphere::BOUNDARY`]
//! instead of trusting a sign that rounding may have flipped.
//!
//! Orientation convention: `(a, b, c, d)` is positive when
//! `(b - a) · ((c - a) × (d - a)) > 0`, e.g. the unit tetrahedron
//! `(0,0,0), (1,0,0), (0,1,0), (0,0,1)`.

use crate::geometry::point::Point3;

/// Relative error factor for the orientation determinant.
const ORIENT_TOLERANCE: f64 = 8.0e-16;

/// Relative error factor for the lifted in-sphere determinant.
const INSPHERE_TOLERANCE: f64 = 2.0e-15;

/// Position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is on the circumsphere (within numerical tolerance)
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Orientation of a tetrahedron.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// The tetrahedron has negative orientation (determinant < 0)
    NEGATIVE,
    /// The tetrahedron is flat (determinant ≈ 0)
    DEGENERATE,
    /// The tetrahedron has positive orientation (determinant > 0)
    POSITIVE,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

/// Raw orientation determinant together with its permanent.
#[inline]
fn orient3d_with_permanent(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> (f64, f64) {
    let u = b - a;
    let v = c - a;
    let w = d - a;

    let vw_x = v.y * w.z - v.z * w.y;
    let vw_y = v.z * w.x - v.x * w.z;
    let vw_z = v.x * w.y - v.y * w.x;
    let det = u.x * vw_x + u.y * vw_y + u.z * vw_z;

    let permanent = u.x.abs() * ((v.y * w.z).abs() + (v.z * w.y).abs())
        + u.y.abs() * ((v.z * w.x).abs() + (v.x * w.z).abs())
        + u.z.abs() * ((v.x * w.y).abs() + (v.y * w.x).abs());

    (det, permanent)
}

/// Signed volume determinant `(b - a) · ((c - a) × (d - a))` (six times the
/// signed volume of the tetrahedron).
#[inline]
#[must_use]
pub fn orient3d(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> f64 {
    orient3d_with_permanent(a, b, c, d).0
}

/// Orientation of `(a, b, c, d)` with adaptive tolerance.
///
/// # Examples
///
/// ```
/// use tess::geometry::point::Point3;
/// use tess::geometry::predicates::{orientation, Orientation};
///
/// let o = orientation(
///     &Point3::new(0.0, 0.0, 0.0),
///     &Point3::new(1.0, 0.0, 0.0),
///     &Point3::new(0.0, 1.0, 0.0),
///     &Point3::new(0.0, 0.0, 1.0),
/// );
/// assert_eq!(o, Orientation::POSITIVE);
/// ```
#[must_use]
pub fn orientation(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> Orientation {
    let (det, permanent) = orient3d_with_permanent(a, b, c, d);
    let tolerance = ORIENT_TOLERANCE * permanent;
    if det > tolerance {
        Orientation::POSITIVE
    } else if det < -tolerance {
        Orientation::NEGATIVE
    } else {
        Orientation::DEGENERATE
    }
}

/// Position of `e` relative to the circumsphere of the positively oriented
/// tetrahedron `(a, b, c, d)`.
///
/// The determinant is the lifted 4×4 matrix with rows
/// `[p - e, |p - e|²]` for `p ∈ {a, b, c, d}`; for a positive tetrahedron it
/// is negative exactly when `e` lies inside.
#[must_use]
#[allow(clippy::many_single_char_names, clippy::similar_names)]
pub fn insphere(a: &Point3, b: &Point3, c: &Point3, d: &Point3, e: &Point3) -> InSphere {
    let (aex, aey, aez) = (a.x - e.x, a.y - e.y, a.z - e.z);
    let (bex, bey, bez) = (b.x - e.x, b.y - e.y, b.z - e.z);
    let (cex, cey, cez) = (c.x - e.x, c.y - e.y, c.z - e.z);
    let (dex, dey, dez) = (d.x - e.x, d.y - e.y, d.z - e.z);

    let ab = aex * bey - bex * aey;
    let bc = bex * cey - cex * bey;
    let cd = cex * dey - dex * cey;
    let da = dex * aey - aex * dey;
    let ac = aex * cey - cex * aey;
    let bd = bex * dey - dex * bey;

    let abc = aez * bc - bez * ac + cez * ab;
    let bcd = bez * cd - cez * bd + dez * bc;
    let cda = cez * da + dez * ac + aez * cd;
    let dab = dez * ab + aez * bd + bez * da;

    let alift = aex * aex + aey * aey + aez * aez;
    let blift = bex * bex + bey * bey + bez * bez;
    let clift = cex * cex + cey * cey + cez * cez;
    let dlift = dex * dex + dey * dey + dez * dez;

    let det = (dlift * abc - clift * dab) + (blift * cda - alift * bcd);

    let ab_p = (aex * bey).abs() + (bex * aey).abs();
    let bc_p = (bex * cey).abs() + (cex * bey).abs();
    let cd_p = (cex * dey).abs() + (dex * cey).abs();
    let da_p = (dex * aey).abs() + (aex * dey).abs();
    let ac_p = (aex * cey).abs() + (cex * aey).abs();
    let bd_p = (bex * dey).abs() + (dex * bey).abs();
    let abc_p = aez.abs() * bc_p + bez.abs() * ac_p + cez.abs() * ab_p;
    let bcd_p = bez.abs() * cd_p + cez.abs() * bd_p + dez.abs() * bc_p;
    let cda_p = cez.abs() * da_p + dez.abs() * ac_p + aez.abs() * cd_p;
    let dab_p = dez.abs() * ab_p + aez.abs() * bd_p + bez.abs() * da_p;
    let permanent = dlift * abc_p + clift * dab_p + blift * cda_p + alift * bcd_p;

    let tolerance = INSPHERE_TOLERANCE * permanent;
    if det < -tolerance {
        InSphere::INSIDE
    } else if det > tolerance {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

/// Position of `p` relative to the circumcircle of triangle `(a, b, c)`,
/// for `p` (numerically) in the triangle's plane.
///
/// Returns [`InSphere::OUTSIDE`] for a degenerate (collinear) triangle.
#[must_use]
pub fn in_circumcircle(a: &Point3, b: &Point3, c: &Point3, p: &Point3) -> InSphere {
    let u = b - a;
    let v = c - a;
    let n = u.cross(&v);
    let n2 = n.norm_squared();
    if n2 <= f64::EPSILON * u.norm_squared() * v.norm_squared() {
        return InSphere::OUTSIDE;
    }
    let offset = (v * u.norm_squared() - u * v.norm_squared()).cross(&n) / (2.0 * n2);
    let center = a + offset;
    let r2 = offset.norm_squared();
    let d2 = (p - center).norm_squared();
    let tolerance = 4.0 * f64::EPSILON * r2.max(d2);
    if d2 < r2 - tolerance {
        InSphere::INSIDE
    } else if d2 > r2 + tolerance {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tet() -> [Point3; 4] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn orientation_of_unit_tet() {
        let [a, b, c, d] = unit_tet();
        assert_eq!(orientation(&a, &b, &c, &d), Orientation::POSITIVE);
        assert_eq!(orientation(&b, &a, &c, &d), Orientation::NEGATIVE);
        assert_relative_eq!(orient3d(&a, &b, &c, &d), 1.0);
    }

    #[test]
    fn coplanar_points_are_degenerate() {
        let [a, b, c, _] = unit_tet();
        let d = Point3::new(0.3, 0.3, 0.0);
        assert_eq!(orientation(&a, &b, &c, &d), Orientation::DEGENERATE);
    }

    #[test]
    fn insphere_classifies_inside_outside_boundary() {
        let [a, b, c, d] = unit_tet();
        assert_eq!(
            insphere(&a, &b, &c, &d, &Point3::new(0.25, 0.25, 0.25)),
            InSphere::INSIDE
        );
        assert_eq!(
            insphere(&a, &b, &c, &d, &Point3::new(2.0, 2.0, 2.0)),
            InSphere::OUTSIDE
        );
        // (1, 1, 1) lies on the sphere centered at (0.5, 0.5, 0.5).
        assert_eq!(
            insphere(&a, &b, &c, &d, &Point3::new(1.0, 1.0, 1.0)),
            InSphere::BOUNDARY
        );
    }

    #[test]
    fn circumcircle_in_plane() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(2.0, 0.0, 0.0);
        let c = Point3::new(0.0, 2.0, 0.0);
        assert_eq!(
            in_circumcircle(&a, &b, &c, &Point3::new(1.0, 1.0, 0.0)),
            InSphere::INSIDE
        );
        assert_eq!(
            in_circumcircle(&a, &b, &c, &Point3::new(3.0, 3.0, 0.0)),
            InSphere::OUTSIDE
        );
        assert_eq!(
            in_circumcircle(&a, &b, &c, &Point3::new(2.0, 2.0, 0.0)),
            InSphere::BOUNDARY
        );
    }

    #[cfg(feature = "count-allocations")]
    #[test]
    fn predicates_do_not_allocate() {
        use allocation_counter::measure;

        let [a, b, c, d] = unit_tet();
        let e = Point3::new(0.2, 0.2, 0.2);
        let result = measure(|| {
            let _ = orientation(&a, &b, &c, &d);
            let _ = insphere(&a, &b, &c, &d, &e);
        });
        assert_eq!(result.count_total, 0);
    }
}
