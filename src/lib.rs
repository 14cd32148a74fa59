//! # tess
//!
//! Distributed Voronoi and Delaunay tessellation of 3D particle sets that
//! are decomposed into axis-aligned blocks.
//!
//! Each block is tessellated independently together with ghost copies of
//! nearby particles from neighboring blocks. Ghosts are exchanged in rounds
//! with a growing margin until every cell is classified as complete,
//! unbounded, or discarded. Every Delaunay tetrahedron is then emitted by
//! exactly one block, and the result is written with one of two collective
//! file layouts.
//!
//! # Features
//!
//! - Regular block decomposition with periodic or walled domain faces
//! - Ghost exchange with exact provenance (owner block, native index, wrap)
//! - Cell completeness that needs no global synchronization beyond
//!   neighbor-to-neighbor queries and one reduction per round
//! - Ownership rule that emits each tetrahedron once across all blocks
//! - Voronoi cells with face polygons, areas, and volumes
//! - Columnar and block-record output layouts, readable with any rank count
//! - In-process ([`comm::single::SingleProcess`]), threaded
//!   ([`comm::thread_world::ThreadWorld`]), and MPI (`mpi` feature)
//!   communicators
//!
//! # Basic Usage
//!
//! ```rust
//! use tess::prelude::*;
//!
//! let config = TessConfigBuilder::default()
//!     .tot_blocks(2)
//!     .domain_size([4, 4, 4])
//!     .domain_max([4.0; 3])
//!     .build()
//!     .unwrap();
//!
//! let comm = SingleProcess;
//! let domain = domain_info(&config);
//! let mut store = generate_blocks(&comm, &config).unwrap();
//! let run = tessellate(&comm, &mut store, &domain, &config).unwrap();
//!
//! assert_eq!(run.blocks.len(), 2);
//! assert!(run.counts.complete > 0);
//! ```
//!
//! # Invariants
//!
//! - A ghost's provenance names the block and index of the original particle
//!   and the wrap under which the copy was made.
//! - A cell marked complete stays complete in later rounds.
//! - Over all blocks, every Delaunay tetrahedron of the union of the
//!   particles is emitted exactly once.
//! - Files are independent of the number of ranks that wrote them.

#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// Blocks, configuration, and the tessellation pipeline.
pub mod core {
    /// Stages of the distributed pipeline.
    pub mod algorithms {
        /// Cell classification and the region a block has not yet seen.
        pub mod completeness;
        /// Ghost selection, routing, and wall mirroring.
        pub mod ghost_exchange;
        /// Kernel invocation and per-block Voronoi/Delaunay extraction.
        pub mod local_tessellation;
        /// Completeness queries to the owners of received ghosts.
        pub mod neighbor_completeness;
        /// Round driver.
        pub mod tessellate;
        /// Tetrahedron ownership.
        pub mod tet_classifier;
    }
    pub mod block;
    /// Hash maps, small buffers, and slot storage.
    pub mod collections;
    pub mod config;
    pub mod decomposition;
    pub mod error;
    pub mod output;
}

/// Points, predicates, and the Delaunay kernel.
pub mod geometry {
    /// Tetrahedralization algorithms.
    pub mod algorithms {
        pub mod bowyer_watson;
    }
    pub mod kernel;
    pub mod point;
    pub mod predicates;
    pub mod util;
}

/// Collective communication.
pub mod comm {
    pub mod communicator;
    #[cfg(feature = "mpi")]
    pub mod mpi_world;
    pub mod single;
    pub mod thread_world;
}

/// Persisted tessellations.
pub mod io {
    pub mod block_file;
    pub mod columnar;
    pub mod layout;
    pub mod shared_file;
}

/// Commonly used types and entry points.
pub mod prelude {
    pub use crate::comm::communicator::{CommError, Communicator, CommunicatorExt, Rank};
    #[cfg(feature = "mpi")]
    pub use crate::comm::mpi_world::MpiWorld;
    pub use crate::comm::single::SingleProcess;
    pub use crate::comm::thread_world::{ThreadComm, ThreadWorld};
    pub use crate::core::algorithms::completeness::{CellCounts, CellState, IncompleteReason};
    pub use crate::core::algorithms::tessellate::{
        RoundStats, TessRun, domain_info, generate_blocks, run, tessellate,
    };
    pub use crate::core::block::{
        Block, BlockId, BlockSpec, BlockStore, Bounds, NeighborLink, Provenance, WallMirror,
        WrapDirection,
    };
    pub use crate::core::config::{OutputLayout, TessConfig, TessConfigBuilder};
    pub use crate::core::decomposition::{ContiguousAssigner, DomainInfo, RegularDecomposer};
    pub use crate::core::error::TessError;
    pub use crate::core::output::TessBlock;
    pub use crate::geometry::kernel::KernelChoice;
    pub use crate::geometry::point::{Aabb, Particle};
    pub use crate::io::block_file::{read_block, read_blocks, write_blocks};
    pub use crate::io::columnar::{read_columnar, write_columnar};
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}
