//! Circumsphere of a tetrahedron.

use crate::geometry::point::Point3;

/// Errors from circumsphere computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircumsphereError {
    /// The four points are (numerically) coplanar.
    #[error("Cannot compute circumsphere of a flat tetrahedron")]
    FlatTetrahedron,
}

/// Center and radius of a sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Center point
    pub center: Point3,
    /// Radius (non-negative)
    pub radius: f64,
}

/// Circumcenter of tetrahedron `(a, b, c, d)`.
///
/// With `u = b - a`, `v = c - a`, `w = d - a`:
///
/// ```text
/// center = a + (|u|² (v × w) + |v|² (w × u) + |w|² (u × v)) / (2 u · (v × w))
/// ```
///
/// # Errors
///
/// Returns [`CircumsphereError::FlatTetrahedron`] if the denominator vanishes.
///
/// # Examples
///
/// ```
/// use tess::geometry::point::Point3;
/// use tess::geometry::util::circumcenter;
///
/// let c = circumcenter(
///     &Point3::new(0.0, 0.0, 0.0),
///     &Point3::new(1.0, 0.0, 0.0),
///     &Point3::new(0.0, 1.0, 0.0),
///     &Point3::new(0.0, 0.0, 1.0),
/// )
/// .unwrap();
/// assert!((c - Point3::new(0.5, 0.5, 0.5)).norm() < 1e-12);
/// ```
pub fn circumcenter(
    a: &Point3,
    b: &Point3,
    c: &Point3,
    d: &Point3,
) -> Result<Point3, CircumsphereError> {
    let u = b - a;
    let v = c - a;
    let w = d - a;
    let vw = v.cross(&w);
    let denom = 2.0 * u.dot(&vw);
    let scale = u.norm() * v.norm() * w.norm();
    if denom.abs() <= f64::EPSILON * scale || !denom.is_finite() {
        return Err(CircumsphereError::FlatTetrahedron);
    }
    let num = vw * u.norm_squared() + w.cross(&u) * v.norm_squared() + u.cross(&v) * w.norm_squared();
    Ok(a + num / denom)
}

/// Circumsphere of tetrahedron `(a, b, c, d)`.
///
/// # Errors
///
/// Returns [`CircumsphereError::FlatTetrahedron`] for coplanar input.
pub fn circumsphere(
    a: &Point3,
    b: &Point3,
    c: &Point3,
    d: &Point3,
) -> Result<Sphere, CircumsphereError> {
    let center = circumcenter(a, b, c, d)?;
    Ok(Sphere {
        center,
        radius: (center - a).norm(),
    })
}
