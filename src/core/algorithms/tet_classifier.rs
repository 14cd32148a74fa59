//! Tetrahedron classification.
//!
//! Every finite tetrahedron of a block's local tessellation is emitted by at
//! most one block: the one owning the tetrahedron's smallest vertex identity
//! `(gid, nid)`, and only once its circumsphere is clear of the block's
//! unknown region. Tetrahedra whose four vertices are all original particles
//! are local; the others record each slot as a provenance triple.

use tracing::debug;

use crate::core::algorithms::completeness::UnknownRegion;
use crate::core::algorithms::local_tessellation::{ConsistencyError, LocalTessellation};
use crate::core::block::{Block, BlockId, Provenance, VertexRef, WrapDirection};

/// Tetrahedra a block contributes to the global tessellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TetClassification {
    /// Tetrahedra of four original particles (native indices)
    pub loc_tets: Vec<[u32; 4]>,
    /// Owner block of each remote tetrahedron slot, four per tetrahedron
    pub rem_tet_gids: Vec<BlockId>,
    /// Owner native index of each remote tetrahedron slot
    pub rem_tet_nids: Vec<u32>,
    /// Wrap of each remote tetrahedron slot
    pub rem_tet_wraps: Vec<WrapDirection>,
    /// First emitted tetrahedron holding each original particle, local
    /// tetrahedra first, or `-1`
    pub vert_to_tet: Vec<i64>,
    /// Tetrahedra left to the block owning their smallest vertex
    pub foreign: usize,
    /// Tetrahedra whose circumsphere still reaches unknown space
    pub unsettled: usize,
    /// Tetrahedra touching a wall mirror
    pub mirrored: usize,
}

impl TetClassification {
    /// Number of remote tetrahedra.
    #[must_use]
    pub fn num_rem_tets(&self) -> usize {
        self.rem_tet_gids.len() / 4
    }

    /// Total tetrahedra emitted.
    #[must_use]
    pub fn num_tets(&self) -> usize {
        self.loc_tets.len() + self.num_rem_tets()
    }

    /// Slots of remote tetrahedron `index`.
    #[must_use]
    pub fn remote_tet(&self, index: usize) -> Option<[Provenance; 4]> {
        let base = index.checked_mul(4)?;
        if base + 4 > self.rem_tet_gids.len() {
            return None;
        }
        Some(std::array::from_fn(|k| Provenance {
            gid: self.rem_tet_gids[base + k],
            nid: self.rem_tet_nids[base + k],
            wrap: self.rem_tet_wraps[base + k],
        }))
    }
}

/// Classifies the tetrahedra of `tess`, the current tessellation of `block`.
///
/// # Errors
///
/// Returns [`ConsistencyError`] if a tetrahedron references an unknown
/// particle or the slot accounting does not add up.
pub fn classify_tets(
    block: &Block,
    tess: &LocalTessellation,
    region: &UnknownRegion,
) -> Result<TetClassification, ConsistencyError> {
    let gid = block.gid();
    let mut out = TetClassification::default();

    'tets: for (t, tet) in tess.tets.iter().enumerate() {
        let mut refs = [VertexRef::Local(0); 4];
        for (slot, &v) in refs.iter_mut().zip(tet) {
            *slot = block
                .vertex_ref(v)
                .ok_or(ConsistencyError::BadLabel { gid, label: v })?;
            if matches!(slot, VertexRef::Wall(..)) {
                out.mirrored += 1;
                continue 'tets;
            }
        }

        let identity = |r: &VertexRef| match *r {
            VertexRef::Local(nid) => (gid, nid),
            VertexRef::Remote(p) | VertexRef::Wall(p, _) => (p.gid, p.nid),
        };
        let owner = refs
            .iter()
            .min_by_key(|r| (identity(r), !matches!(r, VertexRef::Local(_))));
        if !matches!(owner, Some(VertexRef::Local(_))) {
            out.foreign += 1;
            continue;
        }
        if !tess.spheres.get(t).is_some_and(|s| region.sphere_is_clear(s)) {
            out.unsettled += 1;
            continue;
        }

        if let [
            VertexRef::Local(a),
            VertexRef::Local(b),
            VertexRef::Local(c),
            VertexRef::Local(d),
        ] = refs
        {
            out.loc_tets.push([a, b, c, d]);
            continue;
        }
        for r in refs {
            let p = match r {
                VertexRef::Local(nid) => Provenance {
                    gid,
                    nid,
                    wrap: WrapDirection::NONE,
                },
                VertexRef::Remote(p) | VertexRef::Wall(p, _) => p,
            };
            out.rem_tet_gids.push(p.gid);
            out.rem_tet_nids.push(p.nid);
            out.rem_tet_wraps.push(p.wrap);
        }
    }

    let loc = out.loc_tets.len();
    let rem = out.num_rem_tets();
    let slots = 4 * loc + out.rem_tet_gids.len();
    if slots != 4 * (loc + rem)
        || out.rem_tet_nids.len() != out.rem_tet_gids.len()
        || out.rem_tet_wraps.len() != out.rem_tet_gids.len()
    {
        return Err(ConsistencyError::CountMismatch {
            gid,
            what: "tetrahedron vertex slots",
            expected: 4 * (loc + rem),
            found: slots,
        });
    }

    out.vert_to_tet = vert_to_tet(block, &out);
    debug!(
        gid,
        local = loc,
        remote = rem,
        foreign = out.foreign,
        unsettled = out.unsettled,
        mirrored = out.mirrored,
        "tetrahedra classified"
    );
    Ok(out)
}

fn vert_to_tet(block: &Block, tets: &TetClassification) -> Vec<i64> {
    let mut table = vec![-1_i64; block.num_original()];
    let mut claim = |nid: u32, t: usize| {
        if let Some(slot) = table.get_mut(nid as usize)
            && *slot < 0
        {
            *slot = i64::try_from(t).unwrap_or(i64::MAX);
        }
    };
    for (t, tet) in tets.loc_tets.iter().enumerate() {
        for &nid in tet {
            claim(nid, t);
        }
    }
    let offset = tets.loc_tets.len();
    for (k, (&g, &nid)) in tets.rem_tet_gids.iter().zip(&tets.rem_tet_nids).enumerate() {
        if g == block.gid() && tets.rem_tet_wraps[k].is_none() {
            claim(nid, offset + k / 4);
        }
    }
    table
}
