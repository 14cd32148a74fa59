//! Particle generation for synthetic runs, tests, and benchmarks.
//!
//! Generated particles are deterministic functions of `(seed, lattice index)`
//! (or `(seed, block)` for uniform samples), so the same global particle set is
//! produced regardless of how the domain is decomposed.

use rand::{Rng, SeedableRng};

use crate::geometry::point::{Aabb, Particle, Point3, point_to_particle};

/// Default cap on the number of lattice points a single call may visit.
const MAX_GRID_POINTS_DEFAULT: usize = 1 << 30;

/// Read the lattice cap, overridable through `TESS_MAX_GRID_POINTS`.
fn max_grid_points() -> usize {
    if let Ok(v) = std::env::var("TESS_MAX_GRID_POINTS")
        && let Ok(n) = v.parse::<usize>()
    {
        return n;
    }
    MAX_GRID_POINTS_DEFAULT
}

/// Errors from particle generation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointGenerationError {
    /// A lattice dimension is zero.
    #[error("Grid size must be positive on every axis, got {dsize:?}")]
    EmptyGrid {
        /// The requested lattice size
        dsize: [usize; 3],
    },

    /// The domain or block box is empty or inverted.
    #[error("Invalid box: min {min:?} max {max:?}")]
    InvalidBox {
        /// Minimum corner
        min: [f64; 3],
        /// Maximum corner
        max: [f64; 3],
    },

    /// The lattice exceeds the configured size cap.
    #[error("Grid of {points} points exceeds the cap of {cap}")]
    TooManyPoints {
        /// Points requested
        points: usize,
        /// Configured cap
        cap: usize,
    },
}

/// SplitMix64 finalizer, used to derive independent per-point seeds.
#[inline]
const fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Half-open membership with the domain's upper faces closed, so every point
/// of the domain belongs to exactly one block of a tiling.
#[must_use]
pub fn owns_point(block: &Aabb, domain: &Aabb, p: &Point3) -> bool {
    (0..3).all(|a| {
        p[a] >= block.min[a]
            && (p[a] < block.max[a] || (block.max[a] >= domain.max[a] && p[a] <= block.max[a]))
    })
}

fn validate_box(b: &Aabb) -> Result<(), PointGenerationError> {
    if (0..3).all(|a| b.min[a] < b.max[a] && b.min[a].is_finite() && b.max[a].is_finite()) {
        Ok(())
    } else {
        Err(PointGenerationError::InvalidBox {
            min: b.min,
            max: b.max,
        })
    }
}

/// Lattice particles of a `dsize` grid over `domain` that fall in `block`.
///
/// Lattice points sit at cell centers and are displaced by up to `jitter`
/// (absolute units) on each axis, then clamped into the domain. A displaced
/// point belongs to the block that owns its final position, so tiling blocks
/// partition the global set exactly.
///
/// # Errors
///
/// Returns [`PointGenerationError`] for an empty grid, an invalid box, or a
/// lattice above the size cap.
///
/// # Examples
///
/// ```
/// use tess::geometry::point::Aabb;
/// use tess::geometry::util::point_generation::jittered_grid_particles;
///
/// let domain = Aabb::new([0.0; 3], [1.0; 3]);
/// let pts = jittered_grid_particles(&domain, &domain, [4, 4, 4], 0.0, 7).unwrap();
/// assert_eq!(pts.len(), 64);
/// ```
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn jittered_grid_particles(
    block: &Aabb,
    domain: &Aabb,
    dsize: [usize; 3],
    jitter: f64,
    seed: u64,
) -> Result<Vec<Particle>, PointGenerationError> {
    if dsize.contains(&0) {
        return Err(PointGenerationError::EmptyGrid { dsize });
    }
    validate_box(domain)?;
    validate_box(block)?;

    let total = dsize.iter().try_fold(1_usize, |acc, &n| acc.checked_mul(n));
    let cap = max_grid_points();
    match total {
        Some(points) if points <= cap => {}
        Some(points) => return Err(PointGenerationError::TooManyPoints { points, cap }),
        None => {
            return Err(PointGenerationError::TooManyPoints {
                points: usize::MAX,
                cap,
            });
        }
    }

    let extent = domain.extent();
    let spacing: [f64; 3] = std::array::from_fn(|a| extent[a] / dsize[a] as f64);

    // Lattice index window that can land in the block after jitter.
    let range: [(usize, usize); 3] = std::array::from_fn(|a| {
        let reach = jitter.abs() / spacing[a] + 1.0;
        let lo = ((block.min[a] - domain.min[a]) / spacing[a] - 0.5 - reach).floor();
        let hi = ((block.max[a] - domain.min[a]) / spacing[a] - 0.5 + reach).ceil();
        let lo = lo.max(0.0) as usize;
        let hi = (hi.max(0.0) as usize).min(dsize[a] - 1);
        (lo, hi)
    });

    let mut particles = Vec::new();
    for k in range[2].0..=range[2].1 {
        for j in range[1].0..=range[1].1 {
            for i in range[0].0..=range[0].1 {
                let index = [i, j, k];
                let linear = (k * dsize[1] + j) * dsize[0] + i;
                let mut rng = rand::rngs::StdRng::seed_from_u64(mix(seed ^ mix(linear as u64)));
                let coords: [f64; 3] = std::array::from_fn(|a| {
                    let center = domain.min[a] + (index[a] as f64 + 0.5) * spacing[a];
                    let offset = if jitter > 0.0 {
                        rng.random_range(-jitter..=jitter)
                    } else {
                        0.0
                    };
                    (center + offset).clamp(domain.min[a], domain.max[a])
                });
                let p = Point3::new(coords[0], coords[1], coords[2]);
                // Ownership is decided on the stored (f32) position.
                let stored = point_to_particle(&p);
                let q = crate::geometry::point::particle_to_point(&stored);
                if owns_point(block, domain, &q) {
                    particles.push(stored);
                }
            }
        }
    }
    Ok(particles)
}

/// `n` uniform random particles inside `bounds`, seeded.
///
/// # Errors
///
/// Returns [`PointGenerationError::InvalidBox`] for an empty or inverted box.
pub fn random_particles_seeded(
    bounds: &Aabb,
    n: usize,
    seed: u64,
) -> Result<Vec<Particle>, PointGenerationError> {
    validate_box(bounds)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    Ok((0..n)
        .map(|_| {
            let p = Point3::new(
                rng.random_range(bounds.min[0]..bounds.max[0]),
                rng.random_range(bounds.min[1]..bounds.max[1]),
                rng.random_range(bounds.min[2]..bounds.max[2]),
            );
            point_to_particle(&p)
        })
        .collect())
}
