//! Completeness classifier.
//!
//! A block knows every particle inside its *known region* `K`: its bounds
//! expanded by the current margin (unbounded toward open domain faces, where
//! no particle can exist). Particles may exist anywhere in the *point region*
//! `P`. A Delaunay tetrahedron is final once its circumsphere misses `P \ K`,
//! since no particle that could still arrive would fall inside it. A cell is
//! complete once every tetrahedron around it is final.

use serde::{Deserialize, Serialize};

use crate::core::algorithms::local_tessellation::LocalTessellation;
use crate::core::block::{Block, Bounds};
use crate::core::collections::SmallBuffer;
use crate::core::decomposition::DomainInfo;
use crate::geometry::point::{Aabb, Point3, Vector3, particle_to_point};
use crate::geometry::util::circumsphere::Sphere;

/// Why a cell is not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncompleteReason {
    /// The cell is unbounded and stays so whatever else arrives.
    Unbounded,
    /// Particles that may still arrive could change the cell.
    MissingNeighborData,
    /// The kernel discarded the site.
    Discarded,
}

/// State of one Voronoi cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    /// Not yet classified
    #[default]
    Undetermined,
    /// Fully determined and bounded
    Complete,
    /// Not complete, for the given reason
    Incomplete(IncompleteReason),
}

impl CellState {
    /// True for [`CellState::Complete`].
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// True if another exchange round could still change this cell.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Undetermined | Self::Incomplete(IncompleteReason::MissingNeighborData)
        )
    }

    /// Combines the previous state with this round's decision.
    ///
    /// Complete and unbounded decisions are final; everything else is
    /// replaced by the newer decision.
    #[must_use]
    pub const fn merge(self, newer: Self) -> Self {
        match self {
            Self::Complete | Self::Incomplete(IncompleteReason::Unbounded) => self,
            _ => newer,
        }
    }
}

/// Per-state counts over a set of cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCounts {
    /// Complete cells
    pub complete: u64,
    /// Unbounded cells
    pub unbounded: u64,
    /// Cells waiting for neighbor data (including undetermined)
    pub pending: u64,
    /// Discarded sites
    pub discarded: u64,
}

impl CellCounts {
    /// Tallies `states`.
    #[must_use]
    pub fn of(states: &[CellState]) -> Self {
        let mut counts = Self::default();
        for s in states {
            match s {
                CellState::Complete => counts.complete += 1,
                CellState::Incomplete(IncompleteReason::Unbounded) => counts.unbounded += 1,
                CellState::Incomplete(IncompleteReason::Discarded) => counts.discarded += 1,
                CellState::Undetermined
                | CellState::Incomplete(IncompleteReason::MissingNeighborData) => {
                    counts.pending += 1;
                }
            }
        }
        counts
    }

    /// Element-wise sum.
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self {
            complete: self.complete + other.complete,
            unbounded: self.unbounded + other.unbounded,
            pending: self.pending + other.pending,
            discarded: self.discarded + other.discarded,
        }
    }

    /// As a vector for reductions.
    #[must_use]
    pub const fn to_array(self) -> [u64; 4] {
        [self.complete, self.unbounded, self.pending, self.discarded]
    }

    /// From a reduced vector.
    #[must_use]
    pub const fn from_array(a: [u64; 4]) -> Self {
        Self {
            complete: a[0],
            unbounded: a[1],
            pending: a[2],
            discarded: a[3],
        }
    }
}

/// The unknown region `P \ K` of one block, as disjoint axis-aligned slabs.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRegion {
    known: Aabb,
    slabs: SmallBuffer<Aabb, 6>,
}

impl UnknownRegion {
    /// Unknown region of a block with the given bounds at `margin`.
    #[must_use]
    pub fn new(bounds: &Bounds, domain: &DomainInfo, margin: f64) -> Self {
        let block = bounds.to_aabb();
        let d = &domain.bounds;
        let extent = domain.extent();

        let mut known = block.expanded(margin);
        let mut points = *d;
        for axis in 0..3 {
            if domain.periodic[axis] {
                points.min[axis] = f64::NEG_INFINITY;
                points.max[axis] = f64::INFINITY;
            } else if domain.has_wall(axis) {
                points.min[axis] -= extent[axis];
                points.max[axis] += extent[axis];
            } else {
                if block.min[axis] <= d.min[axis] {
                    known.min[axis] = f64::NEG_INFINITY;
                }
                if block.max[axis] >= d.max[axis] {
                    known.max[axis] = f64::INFINITY;
                }
            }
        }

        // Peel P one axis at a time: below K, above K, then clamp to K.
        let mut slabs = SmallBuffer::new();
        let mut rest = points;
        for axis in 0..3 {
            if rest.min[axis] < known.min[axis] {
                let mut below = rest;
                below.max[axis] = below.max[axis].min(known.min[axis]);
                if below.is_valid() {
                    slabs.push(below);
                }
            }
            if rest.max[axis] > known.max[axis] {
                let mut above = rest;
                above.min[axis] = above.min[axis].max(known.max[axis]);
                if above.is_valid() {
                    slabs.push(above);
                }
            }
            rest.min[axis] = rest.min[axis].max(known.min[axis]);
            rest.max[axis] = rest.max[axis].min(known.max[axis]);
            if !rest.is_valid() {
                break;
            }
        }
        Self { known, slabs }
    }

    /// The known region `K`.
    #[must_use]
    pub const fn known(&self) -> &Aabb {
        &self.known
    }

    /// Slabs covering `P \ K`.
    #[must_use]
    pub fn slabs(&self) -> &[Aabb] {
        &self.slabs
    }

    /// True if no particle outside `K` can exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }

    /// True if the open ball misses every slab.
    #[must_use]
    pub fn sphere_is_clear(&self, sphere: &Sphere) -> bool {
        let r2 = sphere.radius * sphere.radius;
        self.slabs
            .iter()
            .all(|s| s.squared_distance(&sphere.center) >= r2)
    }

    /// True if the open half-space `{x : normal · x > offset}` misses every slab.
    #[must_use]
    pub fn halfspace_is_clear(&self, normal: &Vector3, offset: f64) -> bool {
        self.slabs.iter().all(|s| s.support(normal) <= offset)
    }
}

/// Outer half-space of hull facet `(a, b, c)`: `(normal, offset)`.
fn facet_halfspace(a: &Point3, b: &Point3, c: &Point3) -> (Vector3, f64) {
    let normal = (b - a).cross(&(c - a));
    (normal, normal.dot(&a.coords))
}

/// Classifies every original cell of `block` under `region`.
#[must_use]
pub fn classify_cells(
    block: &Block,
    tess: &LocalTessellation,
    region: &UnknownRegion,
) -> Vec<CellState> {
    let num_original = block.num_original();
    let particles = block.all_particles();

    let mut hull_of: Vec<SmallBuffer<u32, 8>> = vec![SmallBuffer::new(); num_original];
    for (f, facet) in tess.hull_facets.iter().enumerate() {
        for &v in facet {
            if let Some(list) = hull_of.get_mut(v as usize) {
                list.push(u32::try_from(f).unwrap_or(u32::MAX));
            }
        }
    }

    let sphere_clear: Vec<bool> = tess
        .spheres
        .iter()
        .map(|s| region.sphere_is_clear(s))
        .collect();

    (0..num_original)
        .map(|site| {
            if tess.is_discarded(site) {
                return CellState::Incomplete(IncompleteReason::Discarded);
            }
            let spheres_clear = tess.incident_tets(site).all(|t| sphere_clear[t]);
            if !spheres_clear {
                return CellState::Incomplete(IncompleteReason::MissingNeighborData);
            }
            if !tess.touches_infinity(site) {
                return CellState::Complete;
            }
            let hull_clear = hull_of[site].iter().all(|&f| {
                let [a, b, c] = tess.hull_facets[f as usize]
                    .map(|v| particle_to_point(&particles[v as usize]));
                let (normal, offset) = facet_halfspace(&a, &b, &c);
                region.halfspace_is_clear(&normal, offset)
            });
            if hull_clear {
                CellState::Incomplete(IncompleteReason::Unbounded)
            } else {
                CellState::Incomplete(IncompleteReason::MissingNeighborData)
            }
        })
        .collect()
}

/// Merges `decided` into the block's stored states and returns the counts.
pub fn update_cell_states(block: &mut Block, decided: &[CellState]) -> CellCounts {
    let merged: Vec<CellState> = block
        .cell_states()
        .iter()
        .zip(decided)
        .map(|(old, &new)| old.merge(new))
        .collect();
    let counts = CellCounts::of(&merged);
    block.set_cell_states(merged);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::local_tessellation::tessellate_block;
    use crate::core::block::BlockSpec;
    use crate::geometry::kernel::KernelChoice;

    fn domain(periodic: bool, walls: bool) -> DomainInfo {
        DomainInfo {
            bounds: Aabb::new([0.0; 3], [10.0; 3]),
            periodic: [periodic; 3],
            walls,
        }
    }

    #[test]
    fn merge_keeps_final_states() {
        use CellState::{Complete, Incomplete, Undetermined};
        let missing = Incomplete(IncompleteReason::MissingNeighborData);
        let unbounded = Incomplete(IncompleteReason::Unbounded);
        assert_eq!(Complete.merge(missing), Complete);
        assert_eq!(unbounded.merge(Complete), unbounded);
        assert_eq!(missing.merge(Complete), Complete);
        assert_eq!(Undetermined.merge(missing), missing);
        assert!(missing.is_pending());
        assert!(!unbounded.is_pending());
    }

    #[test]
    fn single_open_block_knows_everything() {
        let bounds = Bounds::new([0.0; 3], [10.0; 3]);
        let region = UnknownRegion::new(&bounds, &domain(false, false), 1.0);
        assert!(region.is_empty());
        assert!(region.known().min[0].is_infinite());
    }

    #[test]
    fn interior_face_leaves_one_slab() {
        let bounds = Bounds::new([0.0; 3], [5.0, 10.0, 10.0]);
        let region = UnknownRegion::new(&bounds, &domain(false, false), 1.0);
        assert_eq!(region.slabs().len(), 1);
        let slab = region.slabs()[0];
        assert!((slab.min[0] - 6.0).abs() < 1e-12);
        assert!((slab.max[0] - 10.0).abs() < 1e-12);
        let inside = Sphere {
            center: Point3::new(4.0, 5.0, 5.0),
            radius: 1.5,
        };
        let crossing = Sphere {
            center: Point3::new(4.0, 5.0, 5.0),
            radius: 2.5,
        };
        assert!(region.sphere_is_clear(&inside));
        assert!(!region.sphere_is_clear(&crossing));
    }

    #[test]
    fn periodic_block_is_surrounded_by_unknown_space() {
        let bounds = Bounds::new([0.0; 3], [10.0; 3]);
        let region = UnknownRegion::new(&bounds, &domain(true, false), 1.0);
        assert_eq!(region.slabs().len(), 6);
        let n = Vector3::new(1.0, 0.0, 0.0);
        assert!(!region.halfspace_is_clear(&n, 100.0));
    }

    #[test]
    fn walls_bound_the_point_region() {
        let bounds = Bounds::new([0.0; 3], [10.0; 3]);
        let region = UnknownRegion::new(&bounds, &domain(false, true), 2.0);
        assert_eq!(region.slabs().len(), 6);
        for s in region.slabs() {
            assert!(s.min.iter().chain(&s.max).all(|v| v.is_finite()));
        }
    }

    #[test]
    fn lone_tetrahedron_cells_are_unbounded() {
        let block = Block::new(BlockSpec {
            gid: 0,
            bounds: Bounds::new([0.0; 3], [10.0; 3]),
            links: Vec::new(),
            particles: vec![
                [1.0, 1.0, 1.0],
                [2.0, 1.0, 1.0],
                [1.0, 2.0, 1.0],
                [1.0, 1.0, 2.0],
            ],
        });
        let tess = tessellate_block(KernelChoice::default().build().as_ref(), &block).unwrap();
        let region = UnknownRegion::new(block.bounds(), &domain(false, false), 1.0);
        let states = classify_cells(&block, &tess, &region);
        assert_eq!(
            states,
            vec![CellState::Incomplete(IncompleteReason::Unbounded); 4]
        );
    }

    #[test]
    fn counts_tally_states() {
        let states = [
            CellState::Complete,
            CellState::Complete,
            CellState::Undetermined,
            CellState::Incomplete(IncompleteReason::Discarded),
        ];
        let c = CellCounts::of(&states);
        assert_eq!(c.to_array(), [2, 0, 1, 1]);
        assert_eq!(CellCounts::from_array(c.to_array()), c);
        assert_eq!(c.add(c).complete, 4);
    }
}
