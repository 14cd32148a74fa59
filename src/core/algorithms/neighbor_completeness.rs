//! Neighbor-completeness exchange.
//!
//! A block holding a ghost asks the ghost's owner for the owner's verdict on
//! that site's cell. Requests and responses are keyed by provenance: each
//! request carries the native indices of the ghosts received over one link,
//! and the response returns one state per index in the same order. The
//! answers never override the owner's classification; they only tell the
//! holder whether more rounds may change its ghosts' cells.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comm::communicator::{Communicator, CommunicatorExt, Rank};
use crate::core::algorithms::completeness::CellState;
use crate::core::algorithms::ghost_exchange::ExchangeError;
use crate::core::block::{BlockId, BlockStore, WrapDirection};
use crate::core::error::TessError;

/// Request for the owner's cell states of some native indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessRequest {
    /// Asking block
    pub from: BlockId,
    /// Rank of the asking block
    pub reply_to: Rank,
    /// Owner block
    pub to: BlockId,
    /// Wrap of the asker's link to the owner
    pub wrap: WrapDirection,
    /// Native indices on the owner, in the asker's receive order
    pub nids: Vec<u32>,
}

/// Owner's answer, aligned with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessResponse {
    /// Owner block
    pub from: BlockId,
    /// Asking block
    pub to: BlockId,
    /// Wrap of the asker's link, echoed
    pub wrap: WrapDirection,
    /// One state per requested index
    pub states: Vec<CellState>,
}

/// Outcome of one exchange on this rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborCompletenessStats {
    /// Ghost states requested
    pub asked: u64,
    /// Ghosts whose owner reports a complete cell
    pub remote_complete: u64,
    /// Ghosts whose owner is still waiting for data
    pub remote_pending: u64,
}

/// Builds the requests of every resident block.
#[must_use]
pub fn build_requests(store: &BlockStore, rank: Rank) -> Vec<(Rank, CompletenessRequest)> {
    let mut out = Vec::new();
    for block in store.blocks() {
        for (li, link) in block.links().iter().enumerate() {
            let nids: Vec<u32> = block
                .received_from(li)
                .iter()
                .filter_map(|&i| block.ghost(i as usize))
                .map(|g| g.provenance.nid)
                .collect();
            if nids.is_empty() {
                continue;
            }
            out.push((
                link.proc,
                CompletenessRequest {
                    from: block.gid(),
                    reply_to: rank,
                    to: link.gid,
                    wrap: link.wrap,
                    nids,
                },
            ));
        }
    }
    out
}

/// Answers one request from the owner's current states.
///
/// Indices the owner does not know are reported as undetermined.
///
/// # Errors
///
/// Returns [`ExchangeError::UnknownBlock`] if the owner is not resident.
pub fn answer_request(
    store: &BlockStore,
    rank: Rank,
    request: &CompletenessRequest,
) -> Result<CompletenessResponse, ExchangeError> {
    let owner = store.get(request.to).ok_or(ExchangeError::UnknownBlock {
        gid: request.to,
        rank,
    })?;
    let states = request
        .nids
        .iter()
        .map(|&nid| {
            owner
                .cell_states()
                .get(nid as usize)
                .copied()
                .unwrap_or_default()
        })
        .collect();
    Ok(CompletenessResponse {
        from: owner.gid(),
        to: request.from,
        wrap: request.wrap,
        states,
    })
}

/// One collective request/response round over every resident block.
///
/// # Errors
///
/// Returns [`ExchangeError`] for misaddressed messages and
/// [`TessError::Comm`] on transport failure.
pub fn exchange_neighbor_completeness<C>(
    comm: &C,
    store: &mut BlockStore,
) -> Result<NeighborCompletenessStats, TessError>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let requests = build_requests(store, rank);
    let incoming = comm.exchange_messages(&requests)?;

    let mut failure = None;
    let mut responses = Vec::with_capacity(incoming.len());
    for (_, request) in &incoming {
        match answer_request(store, rank, request) {
            Ok(response) => responses.push((request.reply_to, response)),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }
    let answers = comm.exchange_messages(&responses)?;
    if let Some(e) = failure {
        return Err(e.into());
    }

    let mut stats = NeighborCompletenessStats::default();
    for (_, response) in answers {
        let block = store.get_mut(response.to).ok_or(ExchangeError::UnknownBlock {
            gid: response.to,
            rank,
        })?;
        let li = block
            .link_index(response.from, response.wrap)
            .ok_or(ExchangeError::NoMatchingLink {
                gid: response.to,
                from: response.from,
                wrap: response.wrap,
            })?;
        stats.asked += response.states.len() as u64;
        for state in &response.states {
            if state.is_complete() {
                stats.remote_complete += 1;
            } else if state.is_pending() {
                stats.remote_pending += 1;
            }
        }
        block.set_neighbor_states(li, response.states);
    }
    debug!(
        rank,
        asked = stats.asked,
        remote_complete = stats.remote_complete,
        remote_pending = stats.remote_pending,
        "neighbor completeness"
    );
    Ok(stats)
}
