//! Per-block output record.
//!
//! [`TessBlock`] is what a block contributes to the persisted tessellation:
//! its original particles, Voronoi vertices and cells, the faces touching its
//! cells, the complete cells that pass the volume filter, and the tetrahedra
//! it owns. Both persisted layouts read and write this record.

use serde::{Deserialize, Serialize};

use crate::core::algorithms::completeness::CellState;
use crate::core::algorithms::local_tessellation::LocalTessellation;
use crate::core::algorithms::tet_classifier::TetClassification;
use crate::core::block::{Block, BlockId, Bounds, NeighborLink, Provenance, WrapDirection};
use crate::core::config::TessConfig;
use crate::geometry::point::{Particle, particle_to_point, point_to_particle};
use crate::geometry::util::measures::{polygon_area, pyramid_volume};

/// One block of the tessellation, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TessBlock {
    /// Global id
    pub gid: BlockId,
    /// Minimum corner
    pub mins: [f32; 3],
    /// Maximum corner
    pub maxs: [f32; 3],
    /// Original particles, native index order
    pub particles: Vec<Particle>,
    /// Voronoi vertices; vertex 0 is the point at infinity
    pub verts: Vec<[f32; 3]>,
    /// Vertex count of each original cell
    pub num_cell_verts: Vec<u32>,
    /// Concatenated cell vertex lists
    pub cells: Vec<u32>,
    /// Sites of each face; indices at or past `particles.len()` are ghosts
    pub face_cells: Vec<[u32; 2]>,
    /// Ring length of each face
    pub face_num_verts: Vec<u32>,
    /// Concatenated face rings
    pub face_verts: Vec<u32>,
    /// Offset of each original cell's entries in `cell_faces`
    pub cell_faces_start: Vec<u32>,
    /// Face indices touching each original cell
    pub cell_faces: Vec<u32>,
    /// Complete cells passing the volume filter
    pub complete_cells: Vec<u32>,
    /// Surface area of each complete cell
    pub areas: Vec<f32>,
    /// Volume of each complete cell
    pub vols: Vec<f32>,
    /// Tetrahedra of four original particles
    pub loc_tets: Vec<[u32; 4]>,
    /// Owner block of each remote tetrahedron slot
    pub rem_tet_gids: Vec<BlockId>,
    /// Owner native index of each remote tetrahedron slot
    pub rem_tet_nids: Vec<u32>,
    /// Wrap bits of each remote tetrahedron slot
    pub rem_tet_wrap_dirs: Vec<u8>,
    /// First tetrahedron holding each original particle, or `-1`
    pub vert_to_tet: Vec<i64>,
    /// Neighbor links
    pub links: Vec<NeighborLink>,
}

impl TessBlock {
    /// Block bounds.
    #[must_use]
    pub const fn bounds(&self) -> Bounds {
        Bounds::new(self.mins, self.maxs)
    }

    /// Number of remote tetrahedra.
    #[must_use]
    pub fn num_rem_tets(&self) -> usize {
        self.rem_tet_gids.len() / 4
    }

    /// Total tetrahedra this block owns.
    #[must_use]
    pub fn num_tets(&self) -> usize {
        self.loc_tets.len() + self.num_rem_tets()
    }

    /// Face indices touching original cell `cell`.
    #[must_use]
    pub fn faces_of(&self, cell: usize) -> &[u32] {
        let Some(&start) = self.cell_faces_start.get(cell) else {
            return &[];
        };
        let end = self
            .cell_faces_start
            .get(cell + 1)
            .map_or(self.cell_faces.len(), |&e| e as usize);
        self.cell_faces.get(start as usize..end).unwrap_or(&[])
    }

    /// Every tetrahedron as four provenance triples.
    #[must_use]
    pub fn tet_identities(&self) -> Vec<[Provenance; 4]> {
        let local = self.loc_tets.iter().map(|t| {
            t.map(|nid| Provenance {
                gid: self.gid,
                nid,
                wrap: WrapDirection::NONE,
            })
        });
        let remote = (0..self.num_rem_tets()).map(|r| {
            std::array::from_fn(|k| {
                let i = 4 * r + k;
                Provenance {
                    gid: self.rem_tet_gids[i],
                    nid: self.rem_tet_nids[i],
                    wrap: WrapDirection::from_bits(self.rem_tet_wrap_dirs[i])
                        .unwrap_or_default(),
                }
            })
        });
        local.chain(remote).collect()
    }
}

/// Area and volume of a complete cell from its faces.
fn cell_measures(block: &Block, tess: &LocalTessellation, site: usize, faces: &[usize]) -> (f64, f64) {
    let particles = block.all_particles();
    let mut area = 0.0;
    let mut volume = 0.0;
    for &f in faces {
        let face = &tess.faces[f];
        let ring: Vec<_> = face.verts.iter().map(|&v| tess.verts[v as usize]).collect();
        let a = polygon_area(&ring);
        let other = if face.cells[0] as usize == site {
            face.cells[1]
        } else {
            face.cells[0]
        };
        let h = 0.5
            * (particle_to_point(&particles[site]) - particle_to_point(&particles[other as usize]))
                .norm();
        area += a;
        volume += pyramid_volume(a, h);
    }
    (area, volume)
}

/// Builds the output record of `block` from its final tessellation.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_output(
    block: &Block,
    tess: &LocalTessellation,
    tets: TetClassification,
    config: &TessConfig,
) -> TessBlock {
    let n = block.num_original();
    let as_u32 = |i: usize| u32::try_from(i).unwrap_or(u32::MAX);

    let mut cells = Vec::new();
    let mut num_cell_verts = Vec::with_capacity(n);
    for site in 0..n {
        let cell = tess.cell(site);
        num_cell_verts.push(as_u32(cell.len()));
        cells.extend_from_slice(cell);
    }

    // Faces are sorted by their smaller site, and originals come first.
    let kept: Vec<usize> = tess
        .faces
        .iter()
        .enumerate()
        .filter(|(_, f)| (f.cells[0] as usize) < n)
        .map(|(i, _)| i)
        .collect();
    let mut face_cells = Vec::with_capacity(kept.len());
    let mut face_num_verts = Vec::with_capacity(kept.len());
    let mut face_verts = Vec::new();
    let mut touching: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut by_site: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (out_index, &f) in kept.iter().enumerate() {
        let face = &tess.faces[f];
        face_cells.push(face.cells);
        face_num_verts.push(as_u32(face.verts.len()));
        face_verts.extend_from_slice(&face.verts);
        for &c in &face.cells {
            if let Some(list) = touching.get_mut(c as usize) {
                list.push(out_index);
            }
            if let Some(list) = by_site.get_mut(c as usize) {
                list.push(f);
            }
        }
    }
    let mut cell_faces_start = Vec::with_capacity(n);
    let mut cell_faces = Vec::new();
    for list in &touching {
        cell_faces_start.push(as_u32(cell_faces.len()));
        cell_faces.extend(list.iter().map(|&f| as_u32(f)));
    }

    let mut complete_cells = Vec::new();
    let mut areas = Vec::new();
    let mut vols = Vec::new();
    for (site, state) in block.cell_states().iter().enumerate() {
        if *state != CellState::Complete {
            continue;
        }
        let (area, volume) = cell_measures(block, tess, site, &by_site[site]);
        if !config.accepts_volume(volume as f32) {
            continue;
        }
        complete_cells.push(as_u32(site));
        areas.push(area as f32);
        vols.push(volume as f32);
    }

    let bounds = block.bounds();
    TessBlock {
        gid: block.gid(),
        mins: bounds.min,
        maxs: bounds.max,
        particles: block.original_particles().to_vec(),
        verts: tess.verts.iter().map(point_to_particle).collect(),
        num_cell_verts,
        cells,
        face_cells,
        face_num_verts,
        face_verts,
        cell_faces_start,
        cell_faces,
        complete_cells,
        areas,
        vols,
        loc_tets: tets.loc_tets,
        rem_tet_gids: tets.rem_tet_gids,
        rem_tet_nids: tets.rem_tet_nids,
        rem_tet_wrap_dirs: tets.rem_tet_wraps.iter().map(|w| w.bits()).collect(),
        vert_to_tet: tets.vert_to_tet,
        links: block.links().to_vec(),
    }
}
