//! Geometry kernel capability.
//!
//! A kernel turns `N` labeled points into a Delaunay tetrahedralization plus
//! its Voronoi dual. Labels are opaque to the kernel and come back attached to
//! every vertex so callers can undo any internal reordering.
//!
//! Kernels keep no global state. Every invocation runs inside a
//! [`KernelSession`] obtained from [`GeometryKernel::open_session`]; the
//! session owns all scratch storage and releases it when dropped, so nothing
//! leaks from one block's tessellation into the next.

use serde::{Deserialize, Serialize};

use crate::core::collections::SmallBuffer;
use crate::geometry::algorithms::bowyer_watson::BowyerWatson;
use crate::geometry::point::Point3;

/// A point handed to the kernel together with the caller's label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledPoint {
    /// Position
    pub point: Point3,
    /// Caller-supplied identifier, returned unchanged
    pub label: u32,
}

/// A vertex of the Voronoi dual: the point at infinity or the circumcenter of
/// a finite Delaunay tetrahedron (by index into [`KernelOutput::tets`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DualVertex {
    /// Contribution from an unbounded (infinite) tetrahedron
    Infinite,
    /// Circumcenter of the finite tetrahedron with this index
    Finite(u32),
}

/// Dual face of one finite Delaunay edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelFace {
    /// Kernel vertex ids of the edge endpoints
    pub sites: [u32; 2],
    /// Tetrahedra around the edge in circulation order
    pub ring: SmallBuffer<DualVertex, 16>,
}

/// Everything a kernel reports for one point set.
///
/// Vertex ids are kernel-internal; `labels[v]` maps them back to caller labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelOutput {
    /// Caller label of each kernel vertex
    pub labels: Vec<u32>,
    /// Finite tetrahedra, positively oriented
    pub tets: Vec<[u32; 4]>,
    /// Finite neighbor opposite each vertex (`None` across the hull)
    pub tet_neighbors: Vec<[Option<u32>; 4]>,
    /// Circumcenter of each finite tetrahedron
    pub circumcenters: Vec<Point3>,
    /// Dual vertices incident to each kernel vertex (its Voronoi cell)
    pub incident: Vec<Vec<DualVertex>>,
    /// Convex hull facets, oriented so points outside see them positively
    pub hull_facets: Vec<[u32; 3]>,
    /// One dual face per finite Delaunay edge
    pub faces: Vec<KernelFace>,
    /// Labels of input points the kernel dropped (duplicates, degenerate input)
    pub discarded: Vec<u32>,
}

impl KernelOutput {
    /// An output in which every input point was discarded.
    #[must_use]
    pub fn all_discarded(points: &[LabeledPoint]) -> Self {
        Self {
            discarded: points.iter().map(|p| p.label).collect(),
            ..Self::default()
        }
    }

    /// Number of kernel vertices (kept input points).
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.labels.len()
    }
}

/// Kernel failure. Not retried: the input itself cannot be tessellated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// An input coordinate is NaN or infinite.
    #[error("Point with label {label} has non-finite coordinates")]
    NonFinitePoint {
        /// Label of the offending point
        label: u32,
    },

    /// Predicates produced an inconsistent cavity or a flat tetrahedron.
    #[error("Numerical failure while inserting label {label}: {message}")]
    Numerical {
        /// Label of the point being inserted
        label: u32,
        /// Description
        message: String,
    },

    /// The combinatorial structure is broken (missing neighbor, open edge ring).
    #[error("Inconsistent triangulation: {message}")]
    Inconsistent {
        /// Description
        message: String,
    },
}

/// Scoped kernel invocation.
pub trait KernelSession {
    /// Tessellates `points`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] when the input cannot be tessellated.
    fn triangulate(&mut self, points: &[LabeledPoint]) -> Result<KernelOutput, KernelError>;
}

/// A geometry kernel.
pub trait GeometryKernel: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Opens a session owning all per-invocation state.
    fn open_session(&self) -> Box<dyn KernelSession + '_>;

    /// Convenience: open a session, tessellate, drop the session.
    ///
    /// # Errors
    ///
    /// Propagates [`KernelError`] from the session.
    fn triangulate(&self, points: &[LabeledPoint]) -> Result<KernelOutput, KernelError> {
        let mut session = self.open_session();
        session.triangulate(points)
    }
}

/// Kernel selection, part of the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelChoice {
    /// Incremental Bowyer–Watson with an explicit infinite vertex.
    BowyerWatson {
        /// Insert along a Hilbert curve instead of input order.
        spatial_sort: bool,
    },
}

impl Default for KernelChoice {
    fn default() -> Self {
        Self::BowyerWatson { spatial_sort: true }
    }
}

impl KernelChoice {
    /// Instantiates the selected kernel.
    #[must_use]
    pub fn build(&self) -> Box<dyn GeometryKernel> {
        match *self {
            Self::BowyerWatson { spatial_sort } => Box::new(BowyerWatson::new(spatial_sort)),
        }
    }
}
