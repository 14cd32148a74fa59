//! Multi-round tessellation driver.
//!
//! Each round grows the ghost margin, exchanges ghosts, re-tessellates every
//! resident block, merges the new completeness decisions, and asks owners
//! about the ghosts' cells. Rounds continue until no cell anywhere is waiting
//! for neighbor data. Every step is collective, so all ranks run the same
//! number of rounds and fail together.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::comm::communicator::{Communicator, CommunicatorExt};
use crate::core::algorithms::completeness::{
    CellCounts, UnknownRegion, classify_cells, update_cell_states,
};
use crate::core::algorithms::ghost_exchange::exchange_ghosts;
use crate::core::algorithms::local_tessellation::tessellate_block;
use crate::core::algorithms::neighbor_completeness::exchange_neighbor_completeness;
use crate::core::algorithms::tet_classifier::classify_tets;
use crate::core::block::{BlockId, BlockStore};
use crate::core::config::{OutputLayout, TessConfig};
use crate::core::decomposition::{DomainInfo, RegularDecomposer};
use crate::core::error::TessError;
use crate::core::output::{TessBlock, build_output};
use crate::geometry::kernel::GeometryKernel;
use crate::geometry::util::point_generation::jittered_grid_particles;
use crate::io::{block_file, columnar};

/// Global summary of one exchange round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    /// Round number, from 1
    pub round: usize,
    /// Ghost margin used
    pub margin: f64,
    /// Particles sent, all ranks
    pub sent: u64,
    /// New ghosts, all ranks
    pub received: u64,
    /// New wall mirrors, all ranks
    pub mirrored: u64,
    /// Cell states after the round, all ranks
    pub counts: CellCounts,
    /// Ghosts whose owner is still waiting for data, all ranks
    pub remote_pending: u64,
    /// New ghosts per block resident on this rank
    pub block_received: Vec<(BlockId, u64)>,
}

/// Result of a converged run on one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct TessRun {
    /// Output records of the resident blocks
    pub blocks: Vec<TessBlock>,
    /// Per-round history
    pub rounds: Vec<RoundStats>,
    /// Final cell states, all ranks
    pub counts: CellCounts,
    /// Tetrahedra emitted, all ranks
    pub total_tets: u64,
    /// Final margin
    pub margin: f64,
}

/// Domain description of `config`.
#[must_use]
pub const fn domain_info(config: &TessConfig) -> DomainInfo {
    DomainInfo {
        bounds: config.domain(),
        periodic: config.periodic(),
        walls: config.walls,
    }
}

/// Decomposes the domain and fills this rank's blocks with jittered lattice
/// particles.
///
/// # Errors
///
/// Returns [`TessError`] on an invalid configuration, a decomposition that
/// does not fit `max_blocks`, or failed particle generation. The result is
/// agreed collectively.
pub fn generate_blocks<C>(comm: &C, config: &TessConfig) -> Result<BlockStore, TessError>
where
    C: Communicator + ?Sized,
{
    let local = (|| -> Result<BlockStore, TessError> {
        config.validate()?;
        let domain = domain_info(config);
        let decomposer = RegularDecomposer::new(domain, config.tot_blocks)?;
        let specs = decomposer.block_specs(
            comm.rank(),
            comm.size(),
            config.max_blocks,
            |_, bounds| -> Result<_, TessError> {
                Ok(jittered_grid_particles(
                    &bounds.to_aabb(),
                    &domain.bounds,
                    config.domain_size,
                    config.jitter,
                    config.seed,
                )?)
            },
        )?;
        let mut store = BlockStore::new(config.max_blocks);
        for spec in specs {
            store.create(spec)?;
        }
        Ok(store)
    })();
    comm.agree(local)
}

/// Initial margin and its cap.
///
/// The cap is the smallest block extent anywhere, beyond which ghosts would
/// have to come from more than one block away.
///
/// # Errors
///
/// Returns [`TessError::Comm`] if a reduction fails.
pub fn margin_schedule<C>(comm: &C, store: &BlockStore, config: &TessConfig) -> Result<(f64, f64), TessError>
where
    C: Communicator + ?Sized,
{
    let mut spacing = 0.0_f64;
    let mut extent = f64::INFINITY;
    for block in store.blocks() {
        let b = block.bounds().to_aabb();
        extent = b.extent().into_iter().fold(extent, f64::min);
        if block.num_original() > 0 {
            #[allow(clippy::cast_precision_loss)]
            let mean = (b.volume() / block.num_original() as f64).cbrt();
            spacing = spacing.max(mean);
        }
    }
    let cap = comm.all_reduce_min(extent)?;
    let spacing = comm.all_reduce_max(spacing)?;
    let margin = match config.ghost_margin {
        Some(m) => m,
        None if spacing > 0.0 => config.margin_factor * spacing,
        None => cap,
    };
    Ok((margin.min(cap), cap))
}

/// Tessellates every block and merges the new decisions.
fn tessellate_round(
    kernel: &dyn GeometryKernel,
    store: &mut BlockStore,
    domain: &DomainInfo,
    margin: f64,
) -> Result<CellCounts, TessError> {
    let mut counts = CellCounts::default();
    for block in store.blocks_mut() {
        let tess = tessellate_block(kernel, block)?;
        let region = UnknownRegion::new(block.bounds(), domain, margin);
        let decided = classify_cells(block, &tess, &region);
        counts = counts.add(update_cell_states(block, &decided));
        block.set_tessellation(tess);
    }
    Ok(counts)
}

/// Builds the output records from the final tessellations.
fn collect_output(
    store: &BlockStore,
    domain: &DomainInfo,
    margin: f64,
    config: &TessConfig,
) -> Result<Vec<TessBlock>, TessError> {
    let mut out = Vec::with_capacity(store.len());
    for block in store.blocks() {
        let Some(tess) = block.tessellation() else {
            continue;
        };
        let region = UnknownRegion::new(block.bounds(), domain, margin);
        let tets = classify_tets(block, tess, &region)?;
        out.push(build_output(block, tess, tets, config));
    }
    Ok(out)
}

/// Runs exchange rounds until every cell is decided, then classifies the
/// tetrahedra of every resident block.
///
/// # Errors
///
/// Returns [`TessError::ConvergenceFailure`] when cells are still pending
/// after `max_rounds` rounds or at the largest usable margin, and any
/// kernel, consistency, exchange, or communication failure (agreed
/// collectively).
pub fn tessellate<C>(
    comm: &C,
    store: &mut BlockStore,
    domain: &DomainInfo,
    config: &TessConfig,
) -> Result<TessRun, TessError>
where
    C: Communicator + ?Sized,
{
    store.reset_all();
    let kernel = config.kernel.build();
    let (mut margin, cap) = margin_schedule(comm, store, config)?;
    let mut rounds = Vec::new();
    let mut counts = CellCounts::default();

    for round in 1..=config.max_rounds {
        let exchange = comm.agree(exchange_ghosts(comm, store, domain, margin))?;
        let local = comm.agree(tessellate_round(kernel.as_ref(), store, domain, margin))?;
        let remote = comm.agree(exchange_neighbor_completeness(comm, store))?;

        let mut totals = local.to_array().to_vec();
        totals.extend([
            remote.remote_pending,
            exchange.sent,
            exchange.received,
            exchange.mirrored,
        ]);
        let totals = comm.all_reduce_sum(&totals)?;
        counts = CellCounts::from_array([totals[0], totals[1], totals[2], totals[3]]);
        let stats = RoundStats {
            round,
            margin,
            sent: totals[5],
            received: totals[6],
            mirrored: totals[7],
            counts,
            remote_pending: totals[4],
            block_received: exchange.per_block,
        };
        info!(
            rank = comm.rank(),
            round,
            margin,
            received = stats.received,
            complete = counts.complete,
            unbounded = counts.unbounded,
            pending = counts.pending,
            "exchange round"
        );
        let remote_pending = stats.remote_pending;
        rounds.push(stats);

        if counts.pending == 0 && remote_pending == 0 {
            let blocks = comm.agree(collect_output(store, domain, margin, config))?;
            let local_tets = blocks.iter().map(|b| b.num_tets() as u64).sum::<u64>();
            let total_tets = comm.all_reduce_sum(&[local_tets])?[0];
            debug!(rank = comm.rank(), rounds = round, total_tets, "tessellation converged");
            return Ok(TessRun {
                blocks,
                rounds,
                counts,
                total_tets,
                margin,
            });
        }
        if margin >= cap {
            break;
        }
        margin = (margin * config.margin_growth).min(cap);
    }

    Err(TessError::ConvergenceFailure {
        rounds: rounds.len(),
        pending: counts.pending.max(rounds.last().map_or(0, |r| r.remote_pending)),
    })
}

/// Generates, tessellates, and writes a synthetic particle set.
///
/// # Errors
///
/// Propagates failures from [`generate_blocks`], [`tessellate`], and the
/// output writers.
pub fn run<C>(comm: &C, config: &TessConfig) -> Result<TessRun, TessError>
where
    C: Communicator + ?Sized,
{
    let mut store = generate_blocks(comm, config)?;
    let domain = domain_info(config);
    let result = tessellate(comm, &mut store, &domain, config)?;
    if let Some(path) = &config.output {
        match config.output_layout {
            OutputLayout::Columnar => {
                columnar::write_columnar(comm, path, &result.blocks, config.tot_blocks)?;
            }
            OutputLayout::Blocks => block_file::write_blocks(comm, path, &result.blocks)?,
        }
        info!(rank = comm.rank(), path = %path.display(), "output written");
    }
    store.clear();
    Ok(result)
}
