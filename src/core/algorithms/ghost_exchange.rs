//! Ghost exchange.
//!
//! Each block sends, over every link, the original particles that lie within
//! the current margin of the neighbor's bounds (Chebyshev distance, in this
//! block's frame). Particles are shifted by the link's wrap translation
//! before they leave, so the receiver stores them in its own frame. A link
//! remembers what it already sent, so later rounds with a larger margin only
//! ship the difference, and receivers deduplicate by provenance.
//!
//! With walls enabled, every known particle near a domain face is then
//! mirrored across it (and across each combination of nearby faces at edges
//! and corners of the domain).

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::comm::communicator::{Communicator, CommunicatorExt, Rank};
use crate::core::block::{
    Block, BlockId, BlockStore, GhostRecord, GhostSource, Provenance, WallMirror, WrapDirection,
};
use crate::core::decomposition::DomainInfo;
use crate::core::error::TessError;
use crate::geometry::point::{Particle, particle_to_point};

/// Ghost exchange failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// A link points at a rank outside the world.
    #[error("Block {gid} links to block {neighbor} on unreachable rank {proc}")]
    UnreachableNeighbor {
        /// Sending block
        gid: BlockId,
        /// Neighbor block
        neighbor: BlockId,
        /// Neighbor's rank
        proc: Rank,
    },

    /// A message arrived for a block this rank does not hold.
    #[error("Rank {rank} received a message for non-resident block {gid}")]
    UnknownBlock {
        /// Addressed block
        gid: BlockId,
        /// Receiving rank
        rank: Rank,
    },

    /// A message arrived over a link the receiver does not have.
    #[error("Block {gid} has no link to block {from} with wrap {wrap}")]
    NoMatchingLink {
        /// Receiving block
        gid: BlockId,
        /// Sending block
        from: BlockId,
        /// Expected wrap on the receiver's side
        wrap: WrapDirection,
    },
}

/// One particle on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GhostParticle {
    /// Native index on the sender
    pub nid: u32,
    /// Coordinates, already in the receiver's frame
    pub coords: Particle,
}

/// Ghosts from one block to one neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostMessage {
    /// Sending block
    pub from: BlockId,
    /// Receiving block
    pub to: BlockId,
    /// Wrap of the sender's link
    pub wrap: WrapDirection,
    /// Particles
    pub particles: Vec<GhostParticle>,
}

/// Totals of one exchange on this rank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStats {
    /// Particles sent
    pub sent: u64,
    /// New ghosts received (after deduplication)
    pub received: u64,
    /// New wall mirrors
    pub mirrored: u64,
    /// New ghosts per resident block
    pub per_block: Vec<(BlockId, u64)>,
}

/// Selects the particles `block` must send over each of its links at
/// `margin`, marking them as sent. Returns one message per link index.
pub fn select_ghosts(block: &mut Block, domain: &DomainInfo, margin: f64) -> Vec<(usize, GhostMessage)> {
    let extent = domain.extent();
    let mut messages = Vec::new();
    for li in 0..block.links().len() {
        let link = block.links()[li];
        let t = link.wrap.translation(extent);
        let region = link
            .bounds
            .to_aabb()
            .translated([-t[0], -t[1], -t[2]])
            .expanded(margin);
        let mut particles = Vec::new();
        for nid in 0..block.num_original() {
            let p = block.original_particles()[nid];
            let Ok(nid) = u32::try_from(nid) else { break };
            if region.contains(&particle_to_point(&p)) && block.mark_sent(li, nid) {
                particles.push(GhostParticle {
                    nid,
                    coords: link.wrap.apply(&p, extent),
                });
            }
        }
        trace!(
            gid = block.gid(),
            neighbor = link.gid,
            wrap = %link.wrap,
            count = particles.len(),
            "ghosts selected"
        );
        messages.push((
            li,
            GhostMessage {
                from: block.gid(),
                to: link.gid,
                wrap: link.wrap,
                particles,
            },
        ));
    }
    messages
}

/// Appends a received message to `block`. Returns the number of new ghosts.
///
/// # Errors
///
/// Returns [`ExchangeError::NoMatchingLink`] if `block` has no link back to
/// the sender under the reversed wrap.
pub fn receive_ghosts(block: &mut Block, message: &GhostMessage) -> Result<u64, ExchangeError> {
    let back = message.wrap.reversed();
    let link = block
        .link_index(message.from, back)
        .ok_or(ExchangeError::NoMatchingLink {
            gid: block.gid(),
            from: message.from,
            wrap: back,
        })?;
    let link = u32::try_from(link).unwrap_or(u32::MAX);
    let mut added = 0;
    for g in &message.particles {
        let record = GhostRecord {
            provenance: Provenance {
                gid: message.from,
                nid: g.nid,
                wrap: message.wrap,
            },
            source: GhostSource::Link(link),
        };
        if block.add_ghost(g.coords, record) {
            added += 1;
        }
    }
    Ok(added)
}

/// Mirrors every non-mirror particle of `block` within `margin` of a walled
/// domain face. Returns the number of new mirrors.
pub fn add_wall_mirrors(block: &mut Block, domain: &DomainInfo, margin: f64) -> u64 {
    if !domain.walls {
        return 0;
    }
    let d = domain.bounds;
    let sources: Vec<(Particle, Provenance)> = (0..block.num_all())
        .filter(|&i| block.ghost(i).is_none_or(|g| !g.is_wall()))
        .filter_map(|i| {
            let index = u32::try_from(i).ok()?;
            Some((block.all_particles()[i], block.provenance(index)?))
        })
        .collect();

    let mut added = 0;
    for (p, provenance) in sources {
        // Faces near `p`, per axis.
        let options: [[Option<WallMirror>; 2]; 3] = std::array::from_fn(|a| {
            if !domain.has_wall(a) {
                return [None, None];
            }
            let x = f64::from(p[a]);
            [
                (x - d.min[a] <= margin).then(|| WallMirror::face(a, false)),
                (d.max[a] - x <= margin).then(|| WallMirror::face(a, true)),
            ]
        });
        if options.iter().flatten().all(Option::is_none) {
            continue;
        }
        let choices = |a: usize| -> Vec<WallMirror> {
            std::iter::once(WallMirror::default())
                .chain(options[a].iter().flatten().copied())
                .collect()
        };
        for mx in choices(0) {
            for my in choices(1) {
                for mz in choices(2) {
                    let mirror = mx.union(my).union(mz);
                    if mirror.is_empty() {
                        continue;
                    }
                    let record = GhostRecord {
                        provenance,
                        source: GhostSource::Wall(mirror),
                    };
                    if block.add_ghost(mirror.reflect(&p, &d), record) {
                        added += 1;
                    }
                }
            }
        }
    }
    added
}

/// One collective ghost exchange over every resident block.
///
/// # Errors
///
/// Returns [`ExchangeError`] for unreachable neighbors or misaddressed
/// messages, and [`TessError::Comm`] on transport failure. The exchange
/// itself is always completed collectively first.
pub fn exchange_ghosts<C>(
    comm: &C,
    store: &mut BlockStore,
    domain: &DomainInfo,
    margin: f64,
) -> Result<ExchangeStats, TessError>
where
    C: Communicator + ?Sized,
{
    let size = comm.size();
    let mut outgoing: Vec<(Rank, GhostMessage)> = Vec::new();
    let mut failure = None;
    let mut stats = ExchangeStats::default();

    for block in store.blocks_mut() {
        for (li, message) in select_ghosts(block, domain, margin) {
            let link = block.links()[li];
            if link.proc >= size {
                failure.get_or_insert(ExchangeError::UnreachableNeighbor {
                    gid: block.gid(),
                    neighbor: link.gid,
                    proc: link.proc,
                });
                continue;
            }
            if message.particles.is_empty() {
                continue;
            }
            stats.sent += message.particles.len() as u64;
            outgoing.push((link.proc, message));
        }
    }

    let received = comm.exchange_messages(&outgoing)?;
    if let Some(e) = failure {
        return Err(e.into());
    }

    let mut per_block: Vec<(BlockId, u64)> = store.blocks().iter().map(|b| (b.gid(), 0)).collect();
    for (_, message) in &received {
        let block = store.get_mut(message.to).ok_or(ExchangeError::UnknownBlock {
            gid: message.to,
            rank: comm.rank(),
        })?;
        let added = receive_ghosts(block, message)?;
        stats.received += added;
        if let Some(entry) = per_block.iter_mut().find(|(g, _)| *g == message.to) {
            entry.1 += added;
        }
    }

    for block in store.blocks_mut() {
        stats.mirrored += add_wall_mirrors(block, domain, margin);
    }
    stats.per_block = per_block;

    debug!(
        rank = comm.rank(),
        margin,
        sent = stats.sent,
        received = stats.received,
        mirrored = stats.mirrored,
        "ghost exchange"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::single::SingleProcess;
    use crate::core::block::{BlockSpec, Bounds, NeighborLink};
    use crate::geometry::point::Aabb;

    fn domain(periodic: bool, walls: bool) -> DomainInfo {
        DomainInfo {
            bounds: Aabb::new([0.0; 3], [10.0; 3]),
            periodic: [periodic, false, false],
            walls,
        }
    }

    fn two_blocks() -> BlockStore {
        let left = Bounds::new([0.0; 3], [5.0, 10.0, 10.0]);
        let right = Bounds::new([5.0, 0.0, 0.0], [10.0; 3]);
        let mut store = BlockStore::default();
        store
            .create(BlockSpec {
                gid: 0,
                bounds: left,
                links: vec![NeighborLink {
                    gid: 1,
                    proc: 0,
                    wrap: WrapDirection::NONE,
                    bounds: right,
                }],
                particles: vec![[1.0, 5.0, 5.0], [4.5, 5.0, 5.0], [3.5, 5.0, 5.0]],
            })
            .unwrap();
        store
            .create(BlockSpec {
                gid: 1,
                bounds: right,
                links: vec![NeighborLink {
                    gid: 0,
                    proc: 0,
                    wrap: WrapDirection::NONE,
                    bounds: left,
                }],
                particles: vec![[5.2, 5.0, 5.0], [9.0, 5.0, 5.0]],
            })
            .unwrap();
        store
    }

    #[test]
    fn only_particles_within_the_margin_cross() {
        let mut store = two_blocks();
        let stats = exchange_ghosts(&SingleProcess, &mut store, &domain(false, false), 1.0).unwrap();
        assert_eq!(stats.sent, 2);
        let right = store.get(1).unwrap();
        assert_eq!(right.ghosts().len(), 1);
        assert_eq!(right.ghosts()[0].provenance.nid, 1);
        assert_eq!(right.all_particles()[2], [4.5, 5.0, 5.0]);
        assert_eq!(stats.per_block, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn growing_the_margin_sends_only_new_particles() {
        let mut store = two_blocks();
        let d = domain(false, false);
        exchange_ghosts(&SingleProcess, &mut store, &d, 1.0).unwrap();
        let again = exchange_ghosts(&SingleProcess, &mut store, &d, 1.0).unwrap();
        assert_eq!(again.sent, 0);
        let grown = exchange_ghosts(&SingleProcess, &mut store, &d, 2.0).unwrap();
        assert_eq!(grown.sent, 1);
        let right = store.get(1).unwrap();
        let nids: Vec<u32> = right.ghosts().iter().map(|g| g.provenance.nid).collect();
        assert_eq!(nids, vec![1, 2]);
    }

    #[test]
    fn duplicate_messages_are_ignored() {
        let mut store = two_blocks();
        let message = GhostMessage {
            from: 0,
            to: 1,
            wrap: WrapDirection::NONE,
            particles: vec![GhostParticle {
                nid: 1,
                coords: [4.5, 5.0, 5.0],
            }],
        };
        let block = store.get_mut(1).unwrap();
        assert_eq!(receive_ghosts(block, &message).unwrap(), 1);
        assert_eq!(receive_ghosts(block, &message).unwrap(), 0);
        assert_eq!(block.num_all(), 3);
    }

    #[test]
    fn message_without_link_is_rejected() {
        let mut store = two_blocks();
        let message = GhostMessage {
            from: 7,
            to: 1,
            wrap: WrapDirection::NONE,
            particles: Vec::new(),
        };
        assert!(matches!(
            receive_ghosts(store.get_mut(1).unwrap(), &message),
            Err(ExchangeError::NoMatchingLink { from: 7, .. })
        ));
    }

    #[test]
    fn periodic_self_link_translates_ghosts() {
        let bounds = Bounds::new([0.0; 3], [10.0; 3]);
        let links = [WrapDirection::X0, WrapDirection::X1]
            .map(|wrap| NeighborLink {
                gid: 0,
                proc: 0,
                wrap,
                bounds,
            })
            .to_vec();
        let mut store = BlockStore::default();
        store
            .create(BlockSpec {
                gid: 0,
                bounds,
                links,
                particles: vec![[0.5, 5.0, 5.0], [9.5, 5.0, 5.0], [5.0, 5.0, 5.0]],
            })
            .unwrap();
        exchange_ghosts(&SingleProcess, &mut store, &domain(true, false), 1.0).unwrap();
        let block = store.get(0).unwrap();
        assert_eq!(block.ghosts().len(), 2);
        for (g, coords) in block.ghosts().iter().zip(&block.all_particles()[3..]) {
            let original = block.original_particles()[g.provenance.nid as usize];
            assert_ne!(*coords, original);
            let shift = g.provenance.wrap.translation([10.0; 3]);
            assert!((f64::from(coords[0]) - (f64::from(original[0]) + shift[0])).abs() < 1e-5);
        }
    }

    #[test]
    fn walls_mirror_near_faces_and_corners() {
        let bounds = Bounds::new([0.0; 3], [10.0; 3]);
        let mut store = BlockStore::default();
        store
            .create(BlockSpec {
                gid: 0,
                bounds,
                links: Vec::new(),
                particles: vec![[0.5, 5.0, 5.0], [0.5, 0.5, 5.0], [5.0, 5.0, 5.0]],
            })
            .unwrap();
        let d = DomainInfo {
            bounds: Aabb::new([0.0; 3], [10.0; 3]),
            periodic: [false; 3],
            walls: true,
        };
        let stats = exchange_ghosts(&SingleProcess, &mut store, &d, 1.0).unwrap();
        // One face mirror for the first point, three for the edge point.
        assert_eq!(stats.mirrored, 4);
        let block = store.get(0).unwrap();
        assert!(block.ghosts().iter().all(GhostRecord::is_wall));
        assert!(block.all_particles()[3..].contains(&[-0.5, 5.0, 5.0]));
        assert!(block.all_particles()[3..].contains(&[-0.5, -0.5, 5.0]));
        // Mirroring again adds nothing.
        assert_eq!(add_wall_mirrors(store.get_mut(0).unwrap(), &d, 1.0), 0);
    }

    #[test]
    fn unreachable_neighbor_is_fatal() {
        let mut store = two_blocks();
        let mut spec_links = store.get(0).unwrap().links().to_vec();
        spec_links[0].proc = 3;
        store.destroy(0);
        store
            .create(BlockSpec {
                gid: 0,
                bounds: Bounds::new([0.0; 3], [5.0, 10.0, 10.0]),
                links: spec_links,
                particles: vec![[4.5, 5.0, 5.0]],
            })
            .unwrap();
        let err = exchange_ghosts(&SingleProcess, &mut store, &domain(false, false), 1.0).unwrap_err();
        assert!(matches!(
            err,
            TessError::Exchange(ExchangeError::UnreachableNeighbor { proc: 3, .. })
        ));
    }
}
