//! Incremental Bowyer–Watson tetrahedralization with an infinite vertex.
//!
//! The triangulation is closed by a symbolic vertex at infinity: every hull
//! facet `(a, b, c)` carries an infinite tetrahedron `(a, b, c, ∞)`, so every
//! tetrahedron has four neighbors and point location never falls off the hull.
//!
//! Invariants:
//! - finite tetrahedra are positively oriented (see [`crate::geometry::predicates`]);
//! - the infinite vertex is always stored at index 3, and `(a, b, c, ∞)` is
//!   oriented so that `orient3d(a, b, c, p) > 0` for points beyond the facet;
//! - `neighbors[i]` is the tetrahedron sharing the facet opposite vertex `i`.
//!
//! Insertion of `p`:
//! 1. locate a tetrahedron in conflict with `p` (visibility walk, scan fallback);
//! 2. grow the conflict region breadth-first over neighbors;
//! 3. collect the cavity boundary facets;
//! 4. fill the cavity by coning each boundary facet to `p`;
//! 5. wire the new tetrahedra to the outside and to each other.
//!
//! A finite tetrahedron conflicts with `p` when `p` is strictly inside its
//! circumsphere. An infinite tetrahedron `(a, b, c, ∞)` conflicts when `p` is
//! strictly beyond plane `abc`, or on that plane strictly inside the circle
//! through `a`, `b`, `c`.

use slotmap::SecondaryMap;
use tracing::{debug, trace};

use crate::core::collections::{
    CAVITY_BUFFER_SIZE, FastHashMap, FastHashSet, SmallBuffer, StorageMap, fast_hash_map_with_capacity,
};
use crate::geometry::kernel::{
    DualVertex, GeometryKernel, KernelError, KernelFace, KernelOutput, KernelSession, LabeledPoint,
};
use crate::geometry::point::Point3;
use crate::geometry::predicates::{InSphere, Orientation, in_circumcircle, insphere, orientation};
use crate::geometry::util::circumcenter;
use crate::geometry::util::hilbert::hilbert_sorted_indices;

slotmap::new_key_type! {
    /// Key of a tetrahedron in the session arena.
    pub struct TetKey;
}

/// Vertex id standing for the point at infinity.
const INFINITE: u32 = u32::MAX;

/// Walk steps before falling back to a linear scan.
const MAX_WALK_STEPS_FACTOR: usize = 4;

#[derive(Debug, Clone)]
struct Tet {
    vertices: [u32; 4],
    neighbors: [Option<TetKey>; 4],
}

impl Tet {
    const fn new(vertices: [u32; 4]) -> Self {
        Self {
            vertices,
            neighbors: [None; 4],
        }
    }

    const fn is_infinite(&self) -> bool {
        self.vertices[3] == INFINITE
    }

    fn index_of(&self, v: u32) -> Option<usize> {
        self.vertices.iter().position(|&w| w == v)
    }

    fn index_of_neighbor(&self, key: TetKey) -> Option<usize> {
        self.neighbors.iter().position(|&n| n == Some(key))
    }
}

/// Sorted vertex triple identifying a facet.
fn facet_key(vertices: &[u32; 4], opposite: usize) -> [u32; 3] {
    let mut key = [0_u32; 3];
    let mut k = 0;
    for (i, &v) in vertices.iter().enumerate() {
        if i != opposite {
            key[k] = v;
            k += 1;
        }
    }
    key.sort_unstable();
    key
}

/// The Bowyer–Watson kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BowyerWatson {
    spatial_sort: bool,
}

impl BowyerWatson {
    /// Creates the kernel; `spatial_sort` inserts points along a Hilbert curve.
    #[must_use]
    pub const fn new(spatial_sort: bool) -> Self {
        Self { spatial_sort }
    }
}

impl Default for BowyerWatson {
    fn default() -> Self {
        Self::new(true)
    }
}

impl GeometryKernel for BowyerWatson {
    fn name(&self) -> &'static str {
        "bowyer-watson"
    }

    fn open_session(&self) -> Box<dyn KernelSession + '_> {
        Box::new(BowyerWatsonSession::new(self.spatial_sort))
    }
}

/// One tessellation's worth of state.
#[derive(Debug)]
pub struct BowyerWatsonSession {
    spatial_sort: bool,
    points: Vec<Point3>,
    labels: Vec<u32>,
    tets: StorageMap<TetKey, Tet>,
    last: Option<TetKey>,
}

impl Drop for BowyerWatsonSession {
    fn drop(&mut self) {
        trace!(
            vertices = self.points.len(),
            tets = self.tets.len(),
            "releasing kernel session"
        );
    }
}

enum Located {
    Conflict(TetKey),
    NoConflict,
}

impl BowyerWatsonSession {
    fn new(spatial_sort: bool) -> Self {
        Self {
            spatial_sort,
            points: Vec::new(),
            labels: Vec::new(),
            tets: StorageMap::with_key(),
            last: None,
        }
    }

    fn reset(&mut self) {
        self.points.clear();
        self.labels.clear();
        self.tets.clear();
        self.last = None;
    }

    fn point(&self, v: u32) -> &Point3 {
        &self.points[v as usize]
    }

    fn push_vertex(&mut self, p: LabeledPoint) -> u32 {
        // Vertex ids are bounded by the input length, which the caller keeps below u32::MAX.
        let id = u32::try_from(self.points.len()).unwrap_or(INFINITE - 1);
        self.points.push(p.point);
        self.labels.push(p.label);
        id
    }

    // =========================================================================
    // INITIAL SIMPLEX
    // =========================================================================

    /// Picks four affinely independent points from `order`, returning their
    /// positions in `order`.
    fn find_initial_simplex(points: &[LabeledPoint], order: &[usize]) -> Option<[usize; 4]> {
        let p0 = &points[order[0]].point;
        let scale = order
            .iter()
            .map(|&i| (points[i].point - p0).norm())
            .fold(0.0_f64, f64::max);
        if scale == 0.0 {
            return None;
        }
        let i1 = (1..order.len()).find(|&k| (points[order[k]].point - p0).norm() > 1e-12 * scale)?;
        let p1 = &points[order[i1]].point;
        let i2 = (1..order.len()).find(|&k| {
            let area = (p1 - p0).cross(&(points[order[k]].point - p0)).norm();
            area > 1e-10 * scale * scale
        })?;
        let p2 = &points[order[i2]].point;
        let i3 = (1..order.len()).find(|&k| {
            orientation(p0, p1, p2, &points[order[k]].point) != Orientation::DEGENERATE
        })?;
        Some([0, i1, i2, i3])
    }

    fn build_initial_simplex(&mut self, ids: [u32; 4]) {
        let [a, b, c, d] = ids;
        let finite = if orientation(self.point(a), self.point(b), self.point(c), self.point(d))
            == Orientation::POSITIVE
        {
            [a, b, c, d]
        } else {
            [b, a, c, d]
        };
        let t0 = self.tets.insert(Tet::new(finite));

        let mut infinite_keys = [t0; 4];
        for i in 0..4 {
            // Facet opposite finite[i]; orient it so finite[i] is on the negative side.
            let f = facet_key(&finite, i);
            let (x, y, z) = (f[0], f[1], f[2]);
            let verts = if orientation(self.point(x), self.point(y), self.point(z), self.point(finite[i]))
                == Orientation::NEGATIVE
            {
                [x, y, z, INFINITE]
            } else {
                [y, x, z, INFINITE]
            };
            let key = self.tets.insert(Tet::new(verts));
            infinite_keys[i] = key;
            self.tets[t0].neighbors[i] = Some(key);
            self.tets[key].neighbors[3] = Some(t0);
        }

        // Infinite tets share facets (x, y, ∞) pairwise.
        let mut open: FastHashMap<[u32; 3], (TetKey, usize)> = FastHashMap::default();
        for &key in &infinite_keys {
            for j in 0..3 {
                let fk = facet_key(&self.tets[key].vertices, j);
                if let Some((other, oj)) = open.remove(&fk) {
                    self.tets[key].neighbors[j] = Some(other);
                    self.tets[other].neighbors[oj] = Some(key);
                } else {
                    open.insert(fk, (key, j));
                }
            }
        }
        self.last = Some(t0);
    }

    // =========================================================================
    // PREDICATES
    // =========================================================================

    fn conflicts(&self, key: TetKey, p: &Point3) -> bool {
        let tet = &self.tets[key];
        let [a, b, c, d] = tet.vertices;
        if tet.is_infinite() {
            let (pa, pb, pc) = (self.point(a), self.point(b), self.point(c));
            match orientation(pa, pb, pc, p) {
                Orientation::POSITIVE => true,
                Orientation::NEGATIVE => false,
                Orientation::DEGENERATE => in_circumcircle(pa, pb, pc, p) == InSphere::INSIDE,
            }
        } else {
            insphere(self.point(a), self.point(b), self.point(c), self.point(d), p) == InSphere::INSIDE
        }
    }

    // =========================================================================
    // LOCATION
    // =========================================================================

    /// Visibility walk toward `p`, then a scan over all tetrahedra if the walk
    /// ends somewhere not in conflict.
    fn locate(&self, p: &Point3) -> Located {
        let limit = MAX_WALK_STEPS_FACTOR * self.tets.len() + 16;
        let mut current = self.last.filter(|&k| self.tets.contains_key(k));

        let mut steps = 0;
        'walk: while let Some(key) = current {
            steps += 1;
            if steps > limit {
                break;
            }
            let tet = &self.tets[key];
            if tet.is_infinite() {
                break;
            }
            // Rotate the starting facet so degenerate walks do not cycle.
            for k in 0..4 {
                let i = (k + steps) % 4;
                let mut pts = [self.point(tet.vertices[0]); 4];
                for (j, slot) in pts.iter_mut().enumerate() {
                    *slot = if j == i { p } else { self.point(tet.vertices[j]) };
                }
                if orientation(pts[0], pts[1], pts[2], pts[3]) == Orientation::NEGATIVE {
                    current = tet.neighbors[i];
                    continue 'walk;
                }
            }
            break;
        }

        if let Some(key) = current
            && self.conflicts(key, p)
        {
            return Located::Conflict(key);
        }

        trace!(steps, "walk did not end in conflict; scanning");
        self.tets
            .keys()
            .find(|&k| self.conflicts(k, p))
            .map_or(Located::NoConflict, Located::Conflict)
    }

    // =========================================================================
    // INSERTION
    // =========================================================================

    fn find_conflict_region(&self, start: TetKey, p: &Point3) -> Vec<TetKey> {
        let mut region = Vec::new();
        let mut visited: SecondaryMap<TetKey, ()> = SecondaryMap::new();
        let mut queue: SmallBuffer<TetKey, CAVITY_BUFFER_SIZE> = SmallBuffer::new();
        queue.push(start);
        visited.insert(start, ());
        while let Some(key) = queue.pop() {
            region.push(key);
            for neighbor in self.tets[key].neighbors.into_iter().flatten() {
                if !visited.contains_key(neighbor) {
                    visited.insert(neighbor, ());
                    if self.conflicts(neighbor, p) {
                        queue.push(neighbor);
                    }
                }
            }
        }
        region
    }

    fn insert(&mut self, v: u32) -> Result<bool, KernelError> {
        let p = *self.point(v);
        let label = self.labels[v as usize];
        let start = match self.locate(&p) {
            Located::Conflict(key) => key,
            Located::NoConflict => return Ok(false),
        };

        let region = self.find_conflict_region(start, &p);
        let in_region: FastHashSet<TetKey> = region.iter().copied().collect();

        // Cavity boundary: (conflict tet, facet index, outside neighbor).
        let mut boundary: Vec<(TetKey, usize, TetKey)> = Vec::with_capacity(region.len() * 2);
        for &key in &region {
            let tet = &self.tets[key];
            for i in 0..4 {
                let neighbor = tet.neighbors[i].ok_or_else(|| KernelError::Inconsistent {
                    message: format!("tetrahedron {:?} has no neighbor at facet {i}", tet.vertices),
                })?;
                if !in_region.contains(&neighbor) {
                    boundary.push((key, i, neighbor));
                }
            }
        }

        // Every new finite tetrahedron must be positively oriented, or the
        // cavity is not star-shaped from p.
        for &(key, i, _) in &boundary {
            let mut verts = self.tets[key].vertices;
            verts[i] = v;
            if verts[3] != INFINITE {
                let o = orientation(
                    self.point(verts[0]),
                    self.point(verts[1]),
                    self.point(verts[2]),
                    self.point(verts[3]),
                );
                if o != Orientation::POSITIVE {
                    return Err(KernelError::Numerical {
                        label,
                        message: format!("cavity facet {verts:?} is {o} as seen from the new point"),
                    });
                }
            }
        }

        // Fill and wire to the outside.
        let mut created: Vec<(TetKey, usize)> = Vec::with_capacity(boundary.len());
        for &(key, i, outside) in &boundary {
            let mut verts = self.tets[key].vertices;
            verts[i] = v;
            let mut tet = Tet::new(verts);
            tet.neighbors[i] = Some(outside);
            let new_key = self.tets.insert(tet);
            let back = self.tets[outside]
                .index_of_neighbor(key)
                .ok_or_else(|| KernelError::Inconsistent {
                    message: "outside neighbor does not point back into the cavity".to_string(),
                })?;
            self.tets[outside].neighbors[back] = Some(new_key);
            created.push((new_key, i));
        }

        // Wire new tetrahedra to each other across facets through p.
        let mut open: FastHashMap<[u32; 3], (TetKey, usize)> =
            fast_hash_map_with_capacity(created.len() * 3);
        for &(key, apex) in &created {
            for j in 0..4 {
                if j == apex {
                    continue;
                }
                let fk = facet_key(&self.tets[key].vertices, j);
                if let Some((other, oj)) = open.remove(&fk) {
                    self.tets[key].neighbors[j] = Some(other);
                    self.tets[other].neighbors[oj] = Some(key);
                } else {
                    open.insert(fk, (key, j));
                }
            }
        }
        if !open.is_empty() {
            return Err(KernelError::Numerical {
                label,
                message: format!("{} cavity facets left unmatched", open.len()),
            });
        }

        for key in region {
            self.tets.remove(key);
        }
        self.last = created.first().map(|&(k, _)| k);
        Ok(true)
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    fn extract(&self, discarded: Vec<u32>) -> Result<KernelOutput, KernelError> {
        let n = self.points.len();
        let mut index: SecondaryMap<TetKey, u32> = SecondaryMap::new();
        let mut tets = Vec::new();
        let mut keys = Vec::new();
        for (key, tet) in &self.tets {
            if !tet.is_infinite() {
                let idx = u32::try_from(tets.len()).map_err(|_| KernelError::Inconsistent {
                    message: "tetrahedron count exceeds u32".to_string(),
                })?;
                index.insert(key, idx);
                tets.push(tet.vertices);
                keys.push(key);
            }
        }

        let dual = |key: TetKey| index.get(key).map_or(DualVertex::Infinite, |&i| DualVertex::Finite(i));

        let mut tet_neighbors = Vec::with_capacity(tets.len());
        let mut circumcenters = Vec::with_capacity(tets.len());
        for &key in &keys {
            let tet = &self.tets[key];
            tet_neighbors.push(tet.neighbors.map(|nb| nb.and_then(|k| index.get(k).copied())));
            let [a, b, c, d] = tet.vertices;
            let center = circumcenter(self.point(a), self.point(b), self.point(c), self.point(d))
                .map_err(|e| KernelError::Numerical {
                    label: self.labels[a as usize],
                    message: e.to_string(),
                })?;
            circumcenters.push(center);
        }

        let mut incident = vec![Vec::new(); n];
        let mut hull_facets = Vec::new();
        for (key, tet) in &self.tets {
            for &v in &tet.vertices {
                if v != INFINITE {
                    incident[v as usize].push(dual(key));
                }
            }
            if tet.is_infinite() {
                hull_facets.push([tet.vertices[0], tet.vertices[1], tet.vertices[2]]);
            }
        }

        let mut faces = Vec::new();
        let mut seen: FastHashSet<(u32, u32)> = FastHashSet::default();
        for &start in &keys {
            let verts = self.tets[start].vertices;
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let (u, w) = (verts[i].min(verts[j]), verts[i].max(verts[j]));
                    if seen.insert((u, w)) {
                        faces.push(KernelFace {
                            sites: [u, w],
                            ring: self.circulate(start, u, w, &dual)?,
                        });
                    }
                }
            }
        }

        debug!(
            vertices = n,
            tets = tets.len(),
            faces = faces.len(),
            discarded = discarded.len(),
            "kernel output extracted"
        );

        Ok(KernelOutput {
            labels: self.labels.clone(),
            tets,
            tet_neighbors,
            circumcenters,
            incident,
            hull_facets,
            faces,
            discarded,
        })
    }

    /// Tetrahedra around edge `(u, w)`, starting at `start`.
    fn circulate<F>(
        &self,
        start: TetKey,
        u: u32,
        w: u32,
        dual: &F,
    ) -> Result<SmallBuffer<DualVertex, 16>, KernelError>
    where
        F: Fn(TetKey) -> DualVertex,
    {
        let mut ring = SmallBuffer::new();
        let others = |tet: &Tet| {
            let mut o = tet.vertices.iter().copied().filter(|&x| x != u && x != w);
            (o.next(), o.next())
        };
        let (Some(mut cross), Some(_)) = others(&self.tets[start]) else {
            return Err(KernelError::Inconsistent {
                message: format!("edge ({u}, {w}) is not an edge of its start tetrahedron"),
            });
        };
        let mut current = start;
        for _ in 0..=self.tets.len() {
            ring.push(dual(current));
            let tet = &self.tets[current];
            let i = tet.index_of(cross).ok_or_else(|| KernelError::Inconsistent {
                message: format!("edge ring around ({u}, {w}) lost vertex {cross}"),
            })?;
            let keep = tet
                .vertices
                .iter()
                .copied()
                .find(|&x| x != u && x != w && x != cross)
                .ok_or_else(|| KernelError::Inconsistent {
                    message: format!("edge ring around ({u}, {w}) is degenerate"),
                })?;
            current = tet.neighbors[i].ok_or_else(|| KernelError::Inconsistent {
                message: format!("edge ring around ({u}, {w}) is open"),
            })?;
            cross = keep;
            if current == start {
                return Ok(ring);
            }
        }
        Err(KernelError::Inconsistent {
            message: format!("edge ring around ({u}, {w}) does not close"),
        })
    }
}

impl KernelSession for BowyerWatsonSession {
    fn triangulate(&mut self, points: &[LabeledPoint]) -> Result<KernelOutput, KernelError> {
        self.reset();
        if let Some(bad) = points
            .iter()
            .find(|p| !(p.point.x.is_finite() && p.point.y.is_finite() && p.point.z.is_finite()))
        {
            return Err(KernelError::NonFinitePoint { label: bad.label });
        }
        if points.len() < 4 {
            return Ok(KernelOutput::all_discarded(points));
        }

        let order: Vec<usize> = if self.spatial_sort {
            let coords: Vec<Point3> = points.iter().map(|p| p.point).collect();
            hilbert_sorted_indices(&coords)
        } else {
            (0..points.len()).collect()
        };

        let Some(initial) = Self::find_initial_simplex(points, &order) else {
            debug!(points = points.len(), "input is flat; every point discarded");
            return Ok(KernelOutput::all_discarded(points));
        };

        let mut ids = [0_u32; 4];
        for (slot, &k) in ids.iter_mut().zip(&initial) {
            *slot = self.push_vertex(points[order[k]]);
        }
        self.build_initial_simplex(ids);

        let mut discarded = Vec::new();
        let mut exact: FastHashSet<[u64; 3]> = fast_hash_set_from(&self.points);
        for (k, &i) in order.iter().enumerate() {
            if initial.contains(&k) {
                continue;
            }
            let lp = points[i];
            let bits = [lp.point.x.to_bits(), lp.point.y.to_bits(), lp.point.z.to_bits()];
            if !exact.insert(bits) {
                discarded.push(lp.label);
                continue;
            }
            let v = self.push_vertex(lp);
            if !self.insert(v)? {
                // No tetrahedron sees the point (numerically coincident); drop it.
                self.points.pop();
                self.labels.pop();
                discarded.push(lp.label);
            }
        }

        self.extract(discarded)
    }
}

fn fast_hash_set_from(points: &[Point3]) -> FastHashSet<[u64; 3]> {
    points
        .iter()
        .map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::util::point_generation::random_particles_seeded;
    use crate::geometry::point::{Aabb, particle_to_point};

    fn labeled(points: &[Point3]) -> Vec<LabeledPoint> {
        points
            .iter()
            .enumerate()
            .map(|(i, &point)| LabeledPoint {
                point,
                label: u32::try_from(i).unwrap(),
            })
            .collect()
    }

    fn random_points(n: usize, seed: u64) -> Vec<Point3> {
        random_particles_seeded(&Aabb::new([0.0; 3], [1.0; 3]), n, seed)
            .unwrap()
            .iter()
            .map(particle_to_point)
            .collect()
    }

    /// Empty-sphere check against every input point.
    fn assert_delaunay(out: &KernelOutput, input: &[LabeledPoint]) {
        for tet in &out.tets {
            let [a, b, c, d] = tet.map(|v| input[out.labels[v as usize] as usize].point);
            for p in input {
                assert_ne!(
                    insphere(&a, &b, &c, &d, &p.point),
                    InSphere::INSIDE,
                    "point {} inside circumsphere of {tet:?}",
                    p.label
                );
            }
        }
    }

    #[test]
    fn single_tetrahedron() {
        let pts = labeled(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        let out = BowyerWatson::default().triangulate(&pts).unwrap();
        assert_eq!(out.tets.len(), 1);
        assert_eq!(out.hull_facets.len(), 4);
        assert_eq!(out.faces.len(), 6);
        for cell in &out.incident {
            // One finite tet plus three infinite ones around each vertex.
            assert_eq!(cell.len(), 4);
            assert!(cell.contains(&DualVertex::Infinite));
        }
        for face in &out.faces {
            assert_eq!(face.ring.len(), 3);
        }
    }

    #[test]
    fn random_points_are_delaunay_and_closed() {
        let input = labeled(&random_points(200, 11));
        let out = BowyerWatson::default().triangulate(&input).unwrap();
        assert!(out.discarded.is_empty());
        assert_eq!(out.number_of_vertices(), 200);
        assert_delaunay(&out, &input);

        // Euler characteristic of the 3-ball: V - E + F - T = 1.
        let v = i64::try_from(out.number_of_vertices()).unwrap();
        let e = i64::try_from(out.faces.len()).unwrap();
        let t = i64::try_from(out.tets.len()).unwrap();
        let interior_facets = out
            .tet_neighbors
            .iter()
            .flatten()
            .filter(|n| n.is_some())
            .count();
        let f = i64::try_from(interior_facets / 2 + out.hull_facets.len()).unwrap();
        assert_eq!(v - e + f - t, 1);
    }

    #[test]
    fn input_order_and_spatial_sort_agree() {
        let input = labeled(&random_points(120, 5));
        let sorted = BowyerWatson::new(true).triangulate(&input).unwrap();
        let plain = BowyerWatson::new(false).triangulate(&input).unwrap();
        let canon = |out: &KernelOutput| {
            let mut t: Vec<[u32; 4]> = out
                .tets
                .iter()
                .map(|tet| {
                    let mut l = tet.map(|v| out.labels[v as usize]);
                    l.sort_unstable();
                    l
                })
                .collect();
            t.sort_unstable();
            t
        };
        assert_eq!(canon(&sorted), canon(&plain));
    }

    #[test]
    fn duplicates_are_discarded() {
        let mut pts = random_points(30, 2);
        pts.push(pts[3]);
        pts.push(pts[7]);
        let input = labeled(&pts);
        let out = BowyerWatson::default().triangulate(&input).unwrap();
        assert_eq!(out.discarded.len(), 2);
        assert_eq!(out.number_of_vertices(), 30);
    }

    #[test]
    fn degenerate_inputs_discard_everything() {
        let few = labeled(&random_points(3, 1));
        let out = BowyerWatson::default().triangulate(&few).unwrap();
        assert_eq!(out.discarded, vec![0, 1, 2]);

        let flat: Vec<Point3> = (0..10)
            .map(|i| Point3::new(f64::from(i), f64::from(i * i % 7), 0.0))
            .collect();
        let out = BowyerWatson::default().triangulate(&labeled(&flat)).unwrap();
        assert!(out.tets.is_empty());
        assert_eq!(out.discarded.len(), 10);
    }

    #[test]
    fn non_finite_input_is_an_error() {
        let mut pts = random_points(5, 3);
        pts[2].x = f64::NAN;
        let err = BowyerWatson::default().triangulate(&labeled(&pts)).unwrap_err();
        assert_eq!(err, KernelError::NonFinitePoint { label: 2 });
    }

    #[test]
    fn hull_facets_face_outward() {
        let input = labeled(&random_points(60, 8));
        let out = BowyerWatson::default().triangulate(&input).unwrap();
        let far = Point3::new(0.5, 0.5, 0.5);
        for f in &out.hull_facets {
            let [a, b, c] = f.map(|v| input[out.labels[v as usize] as usize].point);
            // The centroid of the cloud is inside the hull: negative side of every facet.
            assert_eq!(orientation(&a, &b, &c, &far), Orientation::NEGATIVE);
        }
    }

    #[test]
    fn repeated_runs_are_identical() {
        let input = labeled(&random_points(80, 21));
        let kernel = BowyerWatson::default();
        let a = kernel.triangulate(&input).unwrap();
        let b = kernel.triangulate(&input).unwrap();
        assert_eq!(a, b);
    }
}
