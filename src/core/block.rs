//! Blocks and the per-process block store.
//!
//! A [`Block`] owns its original particles (whose positions define the native
//! indices) followed by ghost particles received from neighbors or mirrored
//! across walls. Ghosts are appended, never interleaved or removed within a
//! tessellation pass, and each carries the provenance needed to resolve it
//! back to the owning block.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::algorithms::completeness::CellState;
use crate::core::algorithms::local_tessellation::LocalTessellation;
use crate::core::collections::{FastHashMap, FastHashSet};
use crate::geometry::point::{Aabb, Particle};

/// Global block identifier, stable across process counts.
pub type BlockId = u32;

// =============================================================================
// WRAP DIRECTION
// =============================================================================

/// Set of periodic wraps relating a block to a neighbor.
///
/// Bit `X1` means the neighbor lies beyond this block's `+x` side through the
/// periodic boundary; a particle sent across it is shifted by `-extent.x`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrapDirection(u8);

impl WrapDirection {
    /// No wrap.
    pub const NONE: Self = Self(0);
    /// Across the `-x` side.
    pub const X0: Self = Self(0x01);
    /// Across the `+x` side.
    pub const X1: Self = Self(0x02);
    /// Across the `-y` side.
    pub const Y0: Self = Self(0x04);
    /// Across the `+y` side.
    pub const Y1: Self = Self(0x08);
    /// Across the `-z` side.
    pub const Z0: Self = Self(0x10);
    /// Across the `+z` side.
    pub const Z1: Self = Self(0x20);

    const MASK: u8 = 0x3f;

    /// Decodes raw bits; `None` for unknown bits or a `-`/`+` pair on one axis.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::MASK != 0 {
            return None;
        }
        let mut axis = 0;
        while axis < 3 {
            if (bits >> (2 * axis)) & 0b11 == 0b11 {
                return None;
            }
            axis += 1;
        }
        Some(Self(bits))
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True for [`WrapDirection::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Union of two wraps.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Wrap for crossing `side` (`-1` or `+1`) of `axis`.
    #[must_use]
    pub const fn for_side(axis: usize, positive: bool) -> Self {
        Self(1 << (2 * axis + positive as usize))
    }

    /// The wrap seen from the other block (`+x` ↔ `-x` per axis).
    #[must_use]
    pub const fn reversed(self) -> Self {
        let low = self.0 & 0x15;
        let high = self.0 & 0x2a;
        Self((low << 1) | (high >> 1))
    }

    /// Shift applied to a particle sent across this wrap.
    #[must_use]
    pub fn translation(self, extent: [f64; 3]) -> [f64; 3] {
        std::array::from_fn(|axis| {
            let bits = (self.0 >> (2 * axis)) & 0b11;
            match bits {
                0b01 => extent[axis],
                0b10 => -extent[axis],
                _ => 0.0,
            }
        })
    }

    /// Applies [`Self::translation`] to a stored particle.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(self, p: &Particle, extent: [f64; 3]) -> Particle {
        if self.is_none() {
            return *p;
        }
        let t = self.translation(extent);
        std::array::from_fn(|a| (f64::from(p[a]) + t[a]) as f32)
    }
}

impl fmt::Display for WrapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        for (axis, name) in ["x", "y", "z"].iter().enumerate() {
            if self.contains(Self::for_side(axis, false)) {
                write!(f, "-{name}")?;
            }
            if self.contains(Self::for_side(axis, true)) {
                write!(f, "+{name}")?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// BOUNDS, LINKS, PROVENANCE
// =============================================================================

/// Block bounds in storage precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum corner
    pub min: [f32; 3],
    /// Maximum corner
    pub max: [f32; 3],
}

impl Bounds {
    /// Creates bounds from corners.
    #[must_use]
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Widens to a double-precision box.
    #[must_use]
    pub fn to_aabb(&self) -> Aabb {
        Aabb::new(self.min.map(f64::from), self.max.map(f64::from))
    }

    /// Narrows a double-precision box.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_aabb(b: &Aabb) -> Self {
        Self::new(b.min.map(|v| v as f32), b.max.map(|v| v as f32))
    }
}

/// Link to a neighboring block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeighborLink {
    /// Neighbor's global id
    pub gid: BlockId,
    /// Rank holding the neighbor
    pub proc: usize,
    /// Periodic wrap toward the neighbor
    pub wrap: WrapDirection,
    /// Neighbor's bounds in its own frame
    pub bounds: Bounds,
}

/// Portable identity of a particle: owner block, owner's native index, and
/// the wrap under which this copy was made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provenance {
    /// Owner block
    pub gid: BlockId,
    /// Native index on the owner
    pub nid: u32,
    /// Wrap applied when the copy was sent
    pub wrap: WrapDirection,
}

/// Set of domain faces a wall mirror was reflected across, at most one per
/// axis. Bit `2 * axis` is the minimum face, bit `2 * axis + 1` the maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WallMirror(u8);

impl WallMirror {
    /// Decodes raw bits; `None` for unknown bits or both faces of one axis.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match WrapDirection::from_bits(bits) {
            Some(_) => Some(Self(bits)),
            None => None,
        }
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The single face on `axis`.
    #[must_use]
    pub const fn face(axis: usize, upper: bool) -> Self {
        Self(1 << (2 * axis + upper as usize))
    }

    /// True when no face is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two face sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// The face set on `axis`: `Some(upper)` or `None`.
    #[must_use]
    pub const fn on_axis(self, axis: usize) -> Option<bool> {
        match (self.0 >> (2 * axis)) & 0b11 {
            0b01 => Some(false),
            0b10 => Some(true),
            _ => None,
        }
    }

    /// Reflects `p` across every face in the set.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn reflect(self, p: &Particle, domain: &Aabb) -> Particle {
        std::array::from_fn(|a| match self.on_axis(a) {
            Some(false) => (2.0 * domain.min[a] - f64::from(p[a])) as f32,
            Some(true) => (2.0 * domain.max[a] - f64::from(p[a])) as f32,
            None => p[a],
        })
    }
}

/// How a ghost reached this block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GhostSource {
    /// Received over the link with this index
    Link(u32),
    /// Mirrored locally across one or more walls
    Wall(WallMirror),
}

/// A ghost particle's provenance and origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GhostRecord {
    /// Identity of the source particle
    pub provenance: Provenance,
    /// Link or wall
    pub source: GhostSource,
}

impl GhostRecord {
    /// True for wall mirrors.
    #[must_use]
    pub const fn is_wall(&self) -> bool {
        matches!(self.source, GhostSource::Wall(_))
    }

    /// Deduplication key: the provenance plus the mirror faces, if any.
    #[must_use]
    pub const fn key(&self) -> (Provenance, Option<WallMirror>) {
        match self.source {
            GhostSource::Link(_) => (self.provenance, None),
            GhostSource::Wall(faces) => (self.provenance, Some(faces)),
        }
    }
}

/// What a particle index of a block refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexRef {
    /// An original particle of this block (native index)
    Local(u32),
    /// A particle owned elsewhere (or a wrapped copy of one of ours)
    Remote(Provenance),
    /// A wall mirror, not part of the real tessellation
    Wall(Provenance, WallMirror),
}

// =============================================================================
// BLOCK
// =============================================================================

/// Description of a block handed out by the decomposition.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSpec {
    /// Global id
    pub gid: BlockId,
    /// Bounds
    pub bounds: Bounds,
    /// Neighbor links
    pub links: Vec<NeighborLink>,
    /// Original particles
    pub particles: Vec<Particle>,
}

/// One spatial block and its particle and geometry state.
#[derive(Clone, Debug)]
pub struct Block {
    gid: BlockId,
    bounds: Bounds,
    links: Vec<NeighborLink>,
    particles: Vec<Particle>,
    num_original: usize,
    ghosts: Vec<GhostRecord>,
    ghost_index: FastHashMap<(Provenance, Option<WallMirror>), u32>,
    sent: Vec<FastHashSet<u32>>,
    received: Vec<Vec<u32>>,
    neighbor_states: Vec<Vec<CellState>>,
    cell_states: Vec<CellState>,
    tessellation: Option<LocalTessellation>,
}

impl Block {
    /// Creates a block with no ghosts.
    #[must_use]
    pub fn new(spec: BlockSpec) -> Self {
        let num_original = spec.particles.len();
        let num_links = spec.links.len();
        Self {
            gid: spec.gid,
            bounds: spec.bounds,
            links: spec.links,
            particles: spec.particles,
            num_original,
            ghosts: Vec::new(),
            ghost_index: FastHashMap::default(),
            sent: vec![FastHashSet::default(); num_links],
            received: vec![Vec::new(); num_links],
            neighbor_states: vec![Vec::new(); num_links],
            cell_states: vec![CellState::Undetermined; num_original],
            tessellation: None,
        }
    }

    /// Global id.
    #[must_use]
    pub const fn gid(&self) -> BlockId {
        self.gid
    }

    /// Bounds.
    #[must_use]
    pub const fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Neighbor links, in decomposition order.
    #[must_use]
    pub fn links(&self) -> &[NeighborLink] {
        &self.links
    }

    /// Number of original particles.
    #[must_use]
    pub const fn num_original(&self) -> usize {
        self.num_original
    }

    /// Number of original plus ghost particles.
    #[must_use]
    pub fn num_all(&self) -> usize {
        self.particles.len()
    }

    /// Original particles (native index order).
    #[must_use]
    pub fn original_particles(&self) -> &[Particle] {
        &self.particles[..self.num_original]
    }

    /// Originals followed by ghosts.
    #[must_use]
    pub fn all_particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Ghost records, aligned with `all_particles()[num_original..]`.
    #[must_use]
    pub fn ghosts(&self) -> &[GhostRecord] {
        &self.ghosts
    }

    /// Ghost record of all-particle index `index`, `None` for originals.
    #[must_use]
    pub fn ghost(&self, index: usize) -> Option<&GhostRecord> {
        index.checked_sub(self.num_original).and_then(|g| self.ghosts.get(g))
    }

    /// Resolves an all-particle index to a local or remote reference.
    #[must_use]
    pub fn vertex_ref(&self, index: u32) -> Option<VertexRef> {
        let i = index as usize;
        if i < self.num_original {
            return Some(VertexRef::Local(index));
        }
        self.ghost(i).map(|g| match g.source {
            GhostSource::Link(_) => VertexRef::Remote(g.provenance),
            GhostSource::Wall(faces) => VertexRef::Wall(g.provenance, faces),
        })
    }

    /// Portable identity of any particle of this block.
    #[must_use]
    pub fn provenance(&self, index: u32) -> Option<Provenance> {
        match self.vertex_ref(index)? {
            VertexRef::Local(nid) => Some(Provenance {
                gid: self.gid,
                nid,
                wrap: WrapDirection::NONE,
            }),
            VertexRef::Remote(p) | VertexRef::Wall(p, _) => Some(p),
        }
    }

    /// Appends a ghost unless its key is already present. Returns `true` if added.
    pub fn add_ghost(&mut self, coords: Particle, record: GhostRecord) -> bool {
        let key = record.key();
        if self.ghost_index.contains_key(&key) {
            return false;
        }
        let Ok(index) = u32::try_from(self.particles.len()) else {
            return false;
        };
        self.ghost_index.insert(key, index);
        self.particles.push(coords);
        self.ghosts.push(record);
        if let GhostSource::Link(link) = record.source
            && let Some(list) = self.received.get_mut(link as usize)
        {
            list.push(index);
        }
        true
    }

    /// All-particle index of the ghost with this key, if present.
    #[must_use]
    pub fn find_ghost(&self, provenance: &Provenance, wall: Option<WallMirror>) -> Option<u32> {
        self.ghost_index.get(&(*provenance, wall)).copied()
    }

    /// Records that native particle `nid` went over `link`. Returns `false` if it already had.
    pub fn mark_sent(&mut self, link: usize, nid: u32) -> bool {
        self.sent.get_mut(link).is_some_and(|s| s.insert(nid))
    }

    /// Whether `nid` was already sent over `link`.
    #[must_use]
    pub fn was_sent(&self, link: usize, nid: u32) -> bool {
        self.sent.get(link).is_some_and(|s| s.contains(&nid))
    }

    /// All-particle indices received over `link`, in arrival order.
    #[must_use]
    pub fn received_from(&self, link: usize) -> &[u32] {
        self.received.get(link).map_or(&[], Vec::as_slice)
    }

    /// Owner-reported states of the ghosts received over `link`, aligned
    /// with [`Self::received_from`].
    #[must_use]
    pub fn neighbor_states(&self, link: usize) -> &[CellState] {
        self.neighbor_states.get(link).map_or(&[], Vec::as_slice)
    }

    /// Stores owner-reported states for `link`.
    pub fn set_neighbor_states(&mut self, link: usize, states: Vec<CellState>) {
        if let Some(slot) = self.neighbor_states.get_mut(link) {
            *slot = states;
        }
    }

    /// Index of the link to `gid` under `wrap`.
    #[must_use]
    pub fn link_index(&self, gid: BlockId, wrap: WrapDirection) -> Option<usize> {
        self.links.iter().position(|l| l.gid == gid && l.wrap == wrap)
    }

    /// Per-original cell states.
    #[must_use]
    pub fn cell_states(&self) -> &[CellState] {
        &self.cell_states
    }

    /// Replaces the cell states (one per original particle).
    pub fn set_cell_states(&mut self, states: Vec<CellState>) {
        debug_assert_eq!(states.len(), self.num_original);
        self.cell_states = states;
    }

    /// Current local tessellation, if computed.
    #[must_use]
    pub const fn tessellation(&self) -> Option<&LocalTessellation> {
        self.tessellation.as_ref()
    }

    /// Attaches a new local tessellation.
    pub fn set_tessellation(&mut self, tess: LocalTessellation) {
        self.tessellation = Some(tess);
    }

    /// Drops ghosts and derived geometry, keeping originals and links.
    pub fn reset(&mut self) {
        self.particles.truncate(self.num_original);
        self.ghosts.clear();
        self.ghost_index.clear();
        self.sent.iter_mut().for_each(FastHashSet::clear);
        self.received.iter_mut().for_each(Vec::clear);
        self.neighbor_states.iter_mut().for_each(Vec::clear);
        self.cell_states = vec![CellState::Undetermined; self.num_original];
        self.tessellation = None;
    }
}

// =============================================================================
// BLOCK STORE
// =============================================================================

/// Lifecycle callbacks run by the [`BlockStore`].
pub trait BlockLifecycle: Send {
    /// After a block is created.
    fn on_create(&mut self, _block: &Block) {}
    /// After a block is reset for a new pass.
    fn on_reset(&mut self, _block: &Block) {}
    /// Before a block is destroyed.
    fn on_destroy(&mut self, _block: &Block) {}
}

/// Lifecycle hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLifecycle;

impl BlockLifecycle for TracingLifecycle {
    fn on_create(&mut self, block: &Block) {
        trace!(gid = block.gid(), particles = block.num_original(), "block created");
    }

    fn on_reset(&mut self, block: &Block) {
        trace!(gid = block.gid(), "block reset");
    }

    fn on_destroy(&mut self, block: &Block) {
        trace!(gid = block.gid(), "block destroyed");
    }
}

/// Errors from the block store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockStoreError {
    /// A block with this gid already exists.
    #[error("Block {gid} already exists")]
    DuplicateBlock {
        /// Duplicate gid
        gid: BlockId,
    },
    /// More blocks than allowed per process.
    #[error("Block limit of {max} per process exceeded")]
    TooManyBlocks {
        /// Configured limit
        max: usize,
    },
}

/// Blocks resident on this process.
pub struct BlockStore {
    blocks: Vec<Block>,
    index: FastHashMap<BlockId, usize>,
    max_blocks: usize,
    hooks: Box<dyn BlockLifecycle>,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("blocks", &self.blocks.len())
            .field("max_blocks", &self.max_blocks)
            .finish_non_exhaustive()
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl BlockStore {
    /// Empty store holding at most `max_blocks` blocks, with logging hooks.
    #[must_use]
    pub fn new(max_blocks: usize) -> Self {
        Self::with_hooks(max_blocks, Box::new(TracingLifecycle))
    }

    /// Empty store with custom lifecycle hooks.
    #[must_use]
    pub fn with_hooks(max_blocks: usize, hooks: Box<dyn BlockLifecycle>) -> Self {
        Self {
            blocks: Vec::new(),
            index: FastHashMap::default(),
            max_blocks,
            hooks,
        }
    }

    /// Creates a block.
    ///
    /// # Errors
    ///
    /// Returns [`BlockStoreError`] on a duplicate gid or when full.
    pub fn create(&mut self, spec: BlockSpec) -> Result<&Block, BlockStoreError> {
        if self.index.contains_key(&spec.gid) {
            return Err(BlockStoreError::DuplicateBlock { gid: spec.gid });
        }
        if self.blocks.len() >= self.max_blocks {
            return Err(BlockStoreError::TooManyBlocks {
                max: self.max_blocks,
            });
        }
        let lid = self.blocks.len();
        self.index.insert(spec.gid, lid);
        self.blocks.push(Block::new(spec));
        let block = &self.blocks[lid];
        self.hooks.on_create(block);
        Ok(block)
    }

    /// Resets every block for a new tessellation pass.
    pub fn reset_all(&mut self) {
        for block in &mut self.blocks {
            block.reset();
            self.hooks.on_reset(block);
        }
    }

    /// Removes a block. Returns it if present.
    pub fn destroy(&mut self, gid: BlockId) -> Option<Block> {
        let lid = self.index.remove(&gid)?;
        self.hooks.on_destroy(&self.blocks[lid]);
        let block = self.blocks.remove(lid);
        for slot in self.index.values_mut() {
            if *slot > lid {
                *slot -= 1;
            }
        }
        Some(block)
    }

    /// Removes every block.
    pub fn clear(&mut self) {
        for block in &self.blocks {
            self.hooks.on_destroy(block);
        }
        debug!(blocks = self.blocks.len(), "block store cleared");
        self.blocks.clear();
        self.index.clear();
    }

    /// Number of resident blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no block is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in creation order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Mutable blocks in creation order.
    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// Block by gid.
    #[must_use]
    pub fn get(&self, gid: BlockId) -> Option<&Block> {
        self.index.get(&gid).map(|&lid| &self.blocks[lid])
    }

    /// Mutable block by gid.
    pub fn get_mut(&mut self, gid: BlockId) -> Option<&mut Block> {
        self.index.get(&gid).map(|&lid| &mut self.blocks[lid])
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        for block in &self.blocks {
            self.hooks.on_destroy(block);
        }
    }
}
