//! Top-level error type of the tessellation pipeline.

use crate::comm::communicator::CommError;
use crate::core::algorithms::ghost_exchange::ExchangeError;
use crate::core::algorithms::local_tessellation::ConsistencyError;
use crate::core::block::{BlockId, BlockStoreError};
use crate::core::config::ConfigError;
use crate::core::decomposition::DecompositionError;
use crate::geometry::kernel::KernelError;
use crate::geometry::util::point_generation::PointGenerationError;
use crate::io::layout::LayoutError;
use crate::io::shared_file::IoFormatError;

/// Errors surfaced by the public entry points.
///
/// Kernel, convergence, and consistency failures abort the whole collective
/// run. Other ranks learn about them through [`TessError::CollectiveAbort`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TessError {
    /// The geometry kernel rejected a block's point set.
    #[error("Geometry kernel failed on block {gid}: {source}")]
    Kernel {
        /// Block being tessellated
        gid: BlockId,
        /// Kernel error
        source: KernelError,
    },

    /// Completeness did not stabilize.
    #[error("No convergence after {rounds} rounds: {pending} cells still pending")]
    ConvergenceFailure {
        /// Rounds performed
        rounds: usize,
        /// Cells still waiting for neighbor data, over all blocks
        pending: u64,
    },

    /// Another rank failed; this rank stops with it.
    #[error("Rank {rank} aborted the collective operation: {message}")]
    CollectiveAbort {
        /// Lowest failing rank
        rank: usize,
        /// That rank's error message
        message: String,
    },

    /// A post-hoc invariant check failed.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Ghost exchange failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Communication failed.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid decomposition.
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),

    /// Block store failure.
    #[error(transparent)]
    BlockStore(#[from] BlockStoreError),

    /// Offset computation failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Reading or writing a persisted file failed.
    #[error(transparent)]
    Io(#[from] IoFormatError),

    /// Particle generation failed.
    #[error(transparent)]
    PointGeneration(#[from] PointGenerationError),
}

impl TessError {
    /// True for failures that end the run on every rank.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Kernel { .. }
                | Self::ConvergenceFailure { .. }
                | Self::CollectiveAbort { .. }
                | Self::Consistency(_)
                | Self::Exchange(_)
                | Self::Comm(_)
        )
    }
}
