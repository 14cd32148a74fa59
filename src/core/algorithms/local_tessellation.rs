//! Local tessellation adapter.
//!
//! Feeds a block's particles (originals and ghosts, widened to `f64`) to the
//! geometry kernel and reshapes the result into block-indexed arrays. Kernel
//! vertex labels are the block's all-particle indices, so every array here is
//! expressed in the block's native indexing no matter how the kernel
//! reordered its input.

use tracing::{debug, trace};

use crate::core::block::{Block, BlockId};
use crate::core::collections::{FastHashSet, RingBuffer};
use crate::core::error::TessError;
use crate::geometry::kernel::{DualVertex, GeometryKernel, KernelOutput, LabeledPoint};
use crate::geometry::point::{Point3, particle_to_point};
use crate::geometry::util::circumsphere::Sphere;

/// Index of the point at infinity in [`LocalTessellation::verts`].
pub const INFINITE_VERTEX: u32 = 0;

/// A post-hoc invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    /// A derived count disagrees with its cross-check.
    #[error("Block {gid}: {what} mismatch, expected {expected}, found {found}")]
    CountMismatch {
        /// Block
        gid: BlockId,
        /// Which count
        what: &'static str,
        /// Expected value
        expected: usize,
        /// Observed value
        found: usize,
    },

    /// The kernel returned a label that is out of range or repeated.
    #[error("Block {gid}: kernel returned invalid label {label}")]
    BadLabel {
        /// Block
        gid: BlockId,
        /// Offending label
        label: u32,
    },
}

/// A Voronoi face between two sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoronoiFace {
    /// The two sites (all-particle indices), `cells[0] < cells[1]`
    pub cells: [u32; 2],
    /// Ring of indices into [`LocalTessellation::verts`]
    pub verts: RingBuffer,
}

/// Tessellation of one block's original and ghost particles.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTessellation {
    /// Vertex 0 is infinity, then one circumcenter per finite tetrahedron
    pub verts: Vec<Point3>,
    /// Circumsphere of each finite tetrahedron
    pub spheres: Vec<Sphere>,
    /// Vertex count of each site's cell; zero for discarded sites
    pub num_cell_verts: Vec<u32>,
    cell_offsets: Vec<usize>,
    /// Concatenated cell vertex lists
    pub cells: Vec<u32>,
    /// Faces with at least three ring vertices, sorted by `cells`
    pub faces: Vec<VoronoiFace>,
    /// Delaunay edges whose dual ring collapsed below three vertices
    pub degenerate_faces: usize,
    /// Finite tetrahedra, all-particle indices
    pub tets: Vec<[u32; 4]>,
    /// Finite neighbor across the facet opposite each vertex
    pub tet_neighbors: Vec<[Option<u32>; 4]>,
    /// Convex hull facets, all-particle indices, outward oriented
    pub hull_facets: Vec<[u32; 3]>,
    /// Sites the kernel dropped
    pub discarded: Vec<u32>,
}

impl LocalTessellation {
    /// Number of sites (the block's all-particle count).
    #[must_use]
    pub fn num_sites(&self) -> usize {
        self.num_cell_verts.len()
    }

    /// Vertex list of `site`'s cell.
    #[must_use]
    pub fn cell(&self, site: usize) -> &[u32] {
        match (self.cell_offsets.get(site), self.cell_offsets.get(site + 1)) {
            (Some(&start), Some(&end)) => &self.cells[start..end],
            _ => &[],
        }
    }

    /// Whether `site`'s cell reaches the point at infinity.
    #[must_use]
    pub fn touches_infinity(&self, site: usize) -> bool {
        self.cell(site).contains(&INFINITE_VERTEX)
    }

    /// Finite tetrahedra incident to `site`.
    pub fn incident_tets(&self, site: usize) -> impl Iterator<Item = usize> + '_ {
        self.cell(site)
            .iter()
            .filter(|&&v| v != INFINITE_VERTEX)
            .map(|&v| v as usize - 1)
    }

    /// Whether the kernel discarded `site`.
    #[must_use]
    pub fn is_discarded(&self, site: usize) -> bool {
        self.num_cell_verts.get(site).is_none_or(|&n| n == 0)
    }
}

const fn dual_index(v: DualVertex) -> u32 {
    match v {
        DualVertex::Infinite => INFINITE_VERTEX,
        DualVertex::Finite(t) => t + 1,
    }
}

/// Maps dual vertices to vertex ids, keeping only the first infinity.
fn dedup_infinite<I: IntoIterator<Item = DualVertex>>(ring: I) -> RingBuffer {
    let mut seen_infinite = false;
    let mut out = RingBuffer::new();
    for v in ring {
        if v == DualVertex::Infinite {
            if seen_infinite {
                continue;
            }
            seen_infinite = true;
        }
        out.push(dual_index(v));
    }
    out
}

/// Tessellates `block`'s current particle set.
///
/// # Errors
///
/// Returns [`TessError::Kernel`] if the kernel rejects the input and
/// [`TessError::Consistency`] if its output fails the cross-checks.
pub fn tessellate_block(
    kernel: &dyn GeometryKernel,
    block: &Block,
) -> Result<LocalTessellation, TessError> {
    let gid = block.gid();
    let points: Vec<LabeledPoint> = block
        .all_particles()
        .iter()
        .zip(0_u32..)
        .map(|(p, label)| LabeledPoint {
            point: particle_to_point(p),
            label,
        })
        .collect();

    let output = {
        let mut session = kernel.open_session();
        session
            .triangulate(&points)
            .map_err(|source| TessError::Kernel { gid, source })?
    };
    trace!(
        gid,
        kernel = kernel.name(),
        tets = output.tets.len(),
        "kernel finished"
    );
    let tess = from_kernel_output(gid, &points, output)?;
    debug!(
        gid,
        sites = tess.num_sites(),
        tets = tess.tets.len(),
        faces = tess.faces.len(),
        discarded = tess.discarded.len(),
        "local tessellation"
    );
    Ok(tess)
}

/// Converts kernel output into block indexing and cross-checks it.
///
/// # Errors
///
/// Returns [`ConsistencyError`] on invalid labels or count mismatches.
pub fn from_kernel_output(
    gid: BlockId,
    points: &[LabeledPoint],
    output: KernelOutput,
) -> Result<LocalTessellation, ConsistencyError> {
    let n = points.len();
    let KernelOutput {
        labels,
        tets: kernel_tets,
        tet_neighbors,
        circumcenters,
        incident,
        hull_facets: kernel_hull,
        faces: kernel_faces,
        discarded,
    } = output;

    let mut seen = vec![false; n];
    for &label in labels.iter().chain(&discarded) {
        match seen.get_mut(label as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(ConsistencyError::BadLabel { gid, label }),
        }
    }
    if labels.len() + discarded.len() != n {
        return Err(ConsistencyError::CountMismatch {
            gid,
            what: "kept plus discarded sites",
            expected: n,
            found: labels.len() + discarded.len(),
        });
    }

    let site = |v: u32| labels[v as usize];
    let tets: Vec<[u32; 4]> = kernel_tets.iter().map(|t| t.map(site)).collect();
    let hull_facets: Vec<[u32; 3]> = kernel_hull.iter().map(|f| f.map(site)).collect();

    let spheres: Vec<Sphere> = tets
        .iter()
        .zip(&circumcenters)
        .map(|(t, &center)| Sphere {
            center,
            radius: (center - points[t[0] as usize].point).norm(),
        })
        .collect();

    let mut verts = Vec::with_capacity(circumcenters.len() + 1);
    verts.push(Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY));
    verts.extend(circumcenters);

    // Cells in site order.
    let mut per_site: Vec<RingBuffer> = vec![RingBuffer::new(); n];
    for (v, ring) in incident.into_iter().enumerate() {
        per_site[labels[v] as usize] = dedup_infinite(ring);
    }
    let mut num_cell_verts = Vec::with_capacity(n);
    let mut cell_offsets = Vec::with_capacity(n + 1);
    let mut cells = Vec::new();
    cell_offsets.push(0);
    for ring in &per_site {
        num_cell_verts.push(u32::try_from(ring.len()).unwrap_or(u32::MAX));
        cells.extend_from_slice(ring);
        cell_offsets.push(cells.len());
    }

    let expected_faces = kernel_faces.len();
    let mut degenerate_faces = 0;
    let mut faces = Vec::with_capacity(expected_faces);
    for face in kernel_faces {
        let mut ring = dedup_infinite(face.ring);
        if ring.len() < 3 {
            degenerate_faces += 1;
            continue;
        }
        let mut cells = face.sites.map(site);
        if cells[0] > cells[1] {
            cells.swap(0, 1);
            ring.reverse();
        }
        faces.push(VoronoiFace { cells, verts: ring });
    }
    faces.sort_by_key(|f| f.cells);

    // Every finite Delaunay edge has exactly one dual face.
    let mut edges = FastHashSet::default();
    for t in &tets {
        for i in 0..4 {
            for j in (i + 1)..4 {
                edges.insert((t[i].min(t[j]), t[i].max(t[j])));
            }
        }
    }
    if faces.len() + degenerate_faces != edges.len() {
        return Err(ConsistencyError::CountMismatch {
            gid,
            what: "faces",
            expected: edges.len(),
            found: faces.len() + degenerate_faces,
        });
    }
    let total_cell_verts: usize = num_cell_verts.iter().map(|&c| c as usize).sum();
    if total_cell_verts != cells.len() {
        return Err(ConsistencyError::CountMismatch {
            gid,
            what: "cell vertices",
            expected: total_cell_verts,
            found: cells.len(),
        });
    }

    Ok(LocalTessellation {
        verts,
        spheres,
        num_cell_verts,
        cell_offsets,
        cells,
        faces,
        degenerate_faces,
        tets,
        tet_neighbors,
        hull_facets,
        discarded,
    })
}
