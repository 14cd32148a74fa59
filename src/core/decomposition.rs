//! Regular-grid domain decomposition.
//!
//! The domain is cut into a `dx × dy × dz` grid of blocks whose global ids
//! run x-fastest. Blocks are assigned to ranks in contiguous gid ranges, and
//! each block links to its (up to 26) face, edge, and corner neighbors,
//! including wrapped neighbors on periodic axes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::block::{BlockId, BlockSpec, Bounds, NeighborLink, WrapDirection};
use crate::core::collections::FastHashSet;
use crate::geometry::point::{Aabb, Particle};

/// Invalid decomposition request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecompositionError {
    /// No blocks requested.
    #[error("Cannot decompose into {tot_blocks} blocks")]
    InvalidBlockCount {
        /// Requested count
        tot_blocks: usize,
    },

    /// No ranks.
    #[error("World size must be positive")]
    EmptyWorld,

    /// A rank would hold more blocks than allowed.
    #[error("Rank {rank} would hold {blocks} blocks, above the limit of {max}")]
    TooManyResident {
        /// Rank
        rank: usize,
        /// Blocks assigned
        blocks: usize,
        /// Configured limit
        max: usize,
    },

    /// A gid outside the decomposition.
    #[error("Block {gid} is outside a decomposition of {tot_blocks} blocks")]
    UnknownBlock {
        /// Offending gid
        gid: BlockId,
        /// Total blocks
        tot_blocks: usize,
    },
}

/// Global domain description shared by every block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Domain box
    pub bounds: Aabb,
    /// Periodic axes
    pub periodic: [bool; 3],
    /// Mirror walls on non-periodic faces
    pub walls: bool,
}

impl DomainInfo {
    /// Domain edge lengths.
    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        self.bounds.extent()
    }

    /// True if any axis is periodic.
    #[must_use]
    pub fn any_periodic(&self) -> bool {
        self.periodic.contains(&true)
    }

    /// True if the face on `axis` (`upper` side) carries a wall.
    #[must_use]
    pub const fn has_wall(&self, axis: usize) -> bool {
        self.walls && !self.periodic[axis]
    }

    /// True if the face on `axis` is open (neither periodic nor walled).
    #[must_use]
    pub const fn is_open(&self, axis: usize) -> bool {
        !self.periodic[axis] && !self.walls
    }
}

/// Contiguous gid ranges per rank; the first `tot % size` ranks take one extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContiguousAssigner {
    size: usize,
    tot_blocks: usize,
}

impl ContiguousAssigner {
    /// Assigner for `tot_blocks` blocks over `size` ranks.
    #[must_use]
    pub const fn new(size: usize, tot_blocks: usize) -> Self {
        let size = if size == 0 { 1 } else { size };
        Self { size, tot_blocks }
    }

    /// First gid and count for `rank`.
    #[must_use]
    pub const fn range(&self, rank: usize) -> (usize, usize) {
        let base = self.tot_blocks / self.size;
        let rem = self.tot_blocks % self.size;
        let count = base + if rank < rem { 1 } else { 0 };
        let start = rank * base + if rank < rem { rank } else { rem };
        (start, count)
    }

    /// Gids resident on `rank`.
    pub fn local_gids(&self, rank: usize) -> impl Iterator<Item = BlockId> {
        let (start, count) = self.range(rank);
        (start..start + count).filter_map(|g| BlockId::try_from(g).ok())
    }

    /// Rank holding `gid`.
    #[must_use]
    pub const fn rank(&self, gid: BlockId) -> usize {
        let gid = gid as usize;
        let base = self.tot_blocks / self.size;
        let rem = self.tot_blocks % self.size;
        let split = rem * (base + 1);
        if gid < split {
            gid / (base + 1)
        } else if base == 0 {
            rem
        } else {
            rem + (gid - split) / base
        }
    }
}

/// Splits `n` into three factors, assigning each prime factor to the axis
/// with the largest current per-block extent.
fn factor_divisions(n: usize, extent: [f64; 3]) -> [usize; 3] {
    let mut primes = Vec::new();
    let mut rest = n;
    let mut p = 2;
    while p * p <= rest {
        while rest % p == 0 {
            primes.push(p);
            rest /= p;
        }
        p += 1;
    }
    if rest > 1 {
        primes.push(rest);
    }
    primes.sort_unstable_by(|a, b| b.cmp(a));

    let mut div = [1_usize; 3];
    for prime in primes {
        #[allow(clippy::cast_precision_loss)]
        let axis = (0..3)
            .max_by(|&a, &b| {
                let ea = extent[a] / div[a] as f64;
                let eb = extent[b] / div[b] as f64;
                ea.total_cmp(&eb).then(b.cmp(&a))
            })
            .unwrap_or(0);
        div[axis] *= prime;
    }
    div
}

/// Regular grid of blocks over a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularDecomposer {
    domain: DomainInfo,
    divisions: [usize; 3],
}

impl RegularDecomposer {
    /// Decomposes `domain` into `tot_blocks` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`DecompositionError::InvalidBlockCount`] for zero blocks or a
    /// count that does not fit a block id.
    pub fn new(domain: DomainInfo, tot_blocks: usize) -> Result<Self, DecompositionError> {
        if tot_blocks == 0 || BlockId::try_from(tot_blocks).is_err() {
            return Err(DecompositionError::InvalidBlockCount { tot_blocks });
        }
        let divisions = factor_divisions(tot_blocks, domain.extent());
        debug!(?divisions, tot_blocks, "regular decomposition");
        Ok(Self { domain, divisions })
    }

    /// Decomposition with explicit per-axis divisions.
    ///
    /// # Errors
    ///
    /// Returns [`DecompositionError::InvalidBlockCount`] if any division is zero.
    pub fn with_divisions(
        domain: DomainInfo,
        divisions: [usize; 3],
    ) -> Result<Self, DecompositionError> {
        let tot_blocks = divisions.iter().product();
        if divisions.contains(&0) || BlockId::try_from(tot_blocks).is_err() {
            return Err(DecompositionError::InvalidBlockCount { tot_blocks });
        }
        Ok(Self { domain, divisions })
    }

    /// Domain description.
    #[must_use]
    pub const fn domain(&self) -> &DomainInfo {
        &self.domain
    }

    /// Blocks per axis.
    #[must_use]
    pub const fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    /// Total number of blocks.
    #[must_use]
    pub fn tot_blocks(&self) -> usize {
        self.divisions.iter().product()
    }

    /// Grid coordinates of `gid`.
    #[must_use]
    pub const fn coords(&self, gid: BlockId) -> [usize; 3] {
        let g = gid as usize;
        let [dx, dy, _] = self.divisions;
        [g % dx, (g / dx) % dy, g / (dx * dy)]
    }

    /// Gid at grid coordinates.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn gid_at(&self, c: [usize; 3]) -> BlockId {
        let [dx, dy, _] = self.divisions;
        ((c[2] * dy + c[1]) * dx + c[0]) as BlockId
    }

    /// Bounds of `gid`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bounds(&self, gid: BlockId) -> Bounds {
        let c = self.coords(gid);
        let d = &self.domain.bounds;
        let cut = |axis: usize, i: usize| -> f64 {
            if i == self.divisions[axis] {
                d.max[axis]
            } else {
                d.min[axis] + (d.max[axis] - d.min[axis]) * i as f64 / self.divisions[axis] as f64
            }
        };
        Bounds::from_aabb(&Aabb::new(
            std::array::from_fn(|a| cut(a, c[a])),
            std::array::from_fn(|a| cut(a, c[a] + 1)),
        ))
    }

    /// Neighbor links of `gid`, in offset order, deduplicated by `(gid, wrap)`.
    #[must_use]
    pub fn links(&self, gid: BlockId, assigner: &ContiguousAssigner) -> Vec<NeighborLink> {
        let c = self.coords(gid);
        let mut seen = FastHashSet::default();
        let mut links = Vec::new();
        for oz in -1_i64..=1 {
            for oy in -1_i64..=1 {
                'offset: for ox in -1_i64..=1 {
                    let offset = [ox, oy, oz];
                    if offset == [0, 0, 0] {
                        continue;
                    }
                    let mut nc = [0_usize; 3];
                    let mut wrap = WrapDirection::NONE;
                    for axis in 0..3 {
                        #[allow(clippy::cast_possible_wrap)]
                        let n = self.divisions[axis] as i64;
                        #[allow(clippy::cast_possible_wrap)]
                        let target = c[axis] as i64 + offset[axis];
                        if (0..n).contains(&target) {
                            #[allow(clippy::cast_sign_loss)]
                            {
                                nc[axis] = target as usize;
                            }
                        } else if self.domain.periodic[axis] {
                            #[allow(clippy::cast_sign_loss)]
                            {
                                nc[axis] = target.rem_euclid(n) as usize;
                            }
                            wrap = wrap.union(WrapDirection::for_side(axis, offset[axis] > 0));
                        } else {
                            continue 'offset;
                        }
                    }
                    let ngid = self.gid_at(nc);
                    if ngid == gid && wrap.is_none() {
                        continue;
                    }
                    if seen.insert((ngid, wrap)) {
                        links.push(NeighborLink {
                            gid: ngid,
                            proc: assigner.rank(ngid),
                            wrap,
                            bounds: self.bounds(ngid),
                        });
                    }
                }
            }
        }
        links
    }

    /// Block descriptions resident on `rank`, with particles from `particles`.
    ///
    /// # Errors
    ///
    /// Returns [`DecompositionError::TooManyResident`] if the rank would
    /// exceed `max_blocks`, or any error from `particles`.
    pub fn block_specs<E, F>(
        &self,
        rank: usize,
        size: usize,
        max_blocks: usize,
        mut particles: F,
    ) -> Result<Vec<BlockSpec>, E>
    where
        E: From<DecompositionError>,
        F: FnMut(BlockId, &Bounds) -> Result<Vec<Particle>, E>,
    {
        if size == 0 {
            return Err(DecompositionError::EmptyWorld.into());
        }
        let assigner = ContiguousAssigner::new(size, self.tot_blocks());
        let (_, count) = assigner.range(rank);
        if count > max_blocks {
            return Err(DecompositionError::TooManyResident {
                rank,
                blocks: count,
                max: max_blocks,
            }
            .into());
        }
        assigner
            .local_gids(rank)
            .map(|gid| {
                let bounds = self.bounds(gid);
                Ok(BlockSpec {
                    gid,
                    bounds,
                    links: self.links(gid, &assigner),
                    particles: particles(gid, &bounds)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(periodic: bool) -> DomainInfo {
        DomainInfo {
            bounds: Aabb::new([0.0; 3], [8.0; 3]),
            periodic: [periodic; 3],
            walls: false,
        }
    }

    #[test]
    fn factorization_is_balanced() {
        assert_eq!(factor_divisions(8, [1.0; 3]), [2, 2, 2]);
        assert_eq!(factor_divisions(1, [1.0; 3]), [1, 1, 1]);
        assert_eq!(factor_divisions(2, [1.0, 4.0, 1.0]), [1, 2, 1]);
        let d = factor_divisions(12, [1.0; 3]);
        assert_eq!(d.iter().product::<usize>(), 12);
        assert!(d.iter().all(|&n| n <= 3));
    }

    #[test]
    fn contiguous_assignment_round_trips() {
        for (size, tot) in [(1, 5), (3, 8), (4, 4), (5, 3)] {
            let a = ContiguousAssigner::new(size, tot);
            let mut total = 0;
            for rank in 0..size {
                for gid in a.local_gids(rank) {
                    assert_eq!(a.rank(gid), rank, "size {size} tot {tot} gid {gid}");
                    total += 1;
                }
            }
            assert_eq!(total, tot);
        }
    }

    #[test]
    fn blocks_tile_the_domain() {
        let d = RegularDecomposer::new(domain(false), 8).unwrap();
        let vol: f64 = (0..8).map(|g| d.bounds(g).to_aabb().volume()).sum();
        assert!((vol - 512.0).abs() < 1e-9);
        assert_eq!(d.bounds(0).min, [0.0; 3]);
        assert_eq!(d.bounds(7).max, [8.0; 3]);
    }

    #[test]
    fn open_domain_links() {
        let d = RegularDecomposer::new(domain(false), 8).unwrap();
        let a = ContiguousAssigner::new(1, 8);
        let links = d.links(0, &a);
        assert_eq!(links.len(), 7);
        assert!(links.iter().all(|l| l.wrap.is_none()));
    }

    #[test]
    fn periodic_links_are_deduplicated_by_wrap() {
        let d = RegularDecomposer::new(domain(true), 8).unwrap();
        let a = ContiguousAssigner::new(2, 8);
        let links = d.links(0, &a);
        assert_eq!(links.len(), 26);
        let unique: FastHashSet<_> = links.iter().map(|l| (l.gid, l.wrap)).collect();
        assert_eq!(unique.len(), 26);
        let across_minus_x = links
            .iter()
            .find(|l| l.wrap == WrapDirection::X0 && l.gid == 1)
            .unwrap();
        assert_eq!(across_minus_x.proc, 0);
    }

    #[test]
    fn single_periodic_block_links_to_itself() {
        let d = RegularDecomposer::new(domain(true), 1).unwrap();
        let links = d.links(0, &ContiguousAssigner::new(1, 1));
        assert_eq!(links.len(), 26);
        assert!(links.iter().all(|l| l.gid == 0 && !l.wrap.is_none()));
    }

    #[test]
    fn resident_limit_is_enforced() {
        let d = RegularDecomposer::new(domain(false), 8).unwrap();
        let r: Result<Vec<BlockSpec>, DecompositionError> =
            d.block_specs(0, 2, 3, |_, _| Ok(Vec::new()));
        assert_eq!(
            r.unwrap_err(),
            DecompositionError::TooManyResident {
                rank: 0,
                blocks: 4,
                max: 3
            }
        );
        let ok: Vec<BlockSpec> = d
            .block_specs::<DecompositionError, _>(1, 2, 4, |_, _| Ok(Vec::new()))
            .unwrap();
        assert_eq!(ok.iter().map(|b| b.gid).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }
}
