//! Columnar collective layout.
//!
//! One global dataset per field. The file is the magic `TESSCOL1`, a
//! little-endian `u64` header length, a JSON header listing every dataset
//! (name, element type, shape, byte offset from the end of the header), and
//! then the datasets themselves in little-endian order.
//!
//! Per-block scalar datasets (`gid`, `mins`, `maxs`, `num_<field>`,
//! `block_off_<field>`) have one row per block, indexed by gid. Variable
//! datasets hold every block's slice back to back in gid order, at offsets
//! taken from the [`GlobalLayout`]. The header depends only on global totals,
//! so every rank computes the same one and the file is reproducible.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comm::communicator::{Communicator, CommunicatorExt};
use crate::core::block::{BlockId, Bounds, NeighborLink, WrapDirection};
use crate::core::error::TessError;
use crate::core::output::TessBlock;
use crate::io::layout::{GlobalLayout, LayoutError, ReadPartition};
use crate::io::shared_file::{IoFormatError, SharedFile, check_magic};

/// File magic.
pub const MAGIC: &[u8; 8] = b"TESSCOL1";

/// Bytes before the JSON header: magic and header length.
const PREAMBLE: u64 = 16;

/// Count fields of the global layout.
pub const FIELDS: [&str; 10] = [
    "particles",
    "verts",
    "cells",
    "faces",
    "face_verts",
    "cell_faces",
    "complete",
    "loc_tets",
    "rem_tets",
    "neighbors",
];

const PARTICLES: usize = 0;
const VERTS: usize = 1;
const CELLS: usize = 2;
const FACES: usize = 3;
const FACE_VERTS: usize = 4;
const CELL_FACES: usize = 5;
const COMPLETE: usize = 6;
const LOC_TETS: usize = 7;
const REM_TETS: usize = 8;
const NEIGHBORS: usize = 9;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Unsigned byte
    U8,
    /// 32-bit unsigned
    U32,
    /// 64-bit signed
    I64,
    /// 64-bit unsigned
    U64,
    /// 32-bit float
    F32,
}

impl Dtype {
    /// Bytes per element.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::U8 => 1,
            Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }
}

/// A variable dataset: its count field and elements per count.
struct VarSpec {
    name: &'static str,
    field: usize,
    width: u64,
    dtype: Dtype,
}

const fn var(name: &'static str, field: usize, width: u64, dtype: Dtype) -> VarSpec {
    VarSpec {
        name,
        field,
        width,
        dtype,
    }
}

const VARIABLE: [VarSpec; 19] = [
    var("particles", PARTICLES, 3, Dtype::F32),
    var("verts", VERTS, 3, Dtype::F32),
    var("num_cell_verts", PARTICLES, 1, Dtype::U32),
    var("cells", CELLS, 1, Dtype::U32),
    var("face_cells", FACES, 2, Dtype::U32),
    var("face_num_verts", FACES, 1, Dtype::U32),
    var("face_verts", FACE_VERTS, 1, Dtype::U32),
    var("cell_faces_start", PARTICLES, 1, Dtype::U32),
    var("cell_faces", CELL_FACES, 1, Dtype::U32),
    var("complete_cells", COMPLETE, 1, Dtype::U32),
    var("areas", COMPLETE, 1, Dtype::F32),
    var("vols", COMPLETE, 1, Dtype::F32),
    var("loc_tets", LOC_TETS, 4, Dtype::U32),
    var("rem_tet_gids", REM_TETS, 4, Dtype::U32),
    var("rem_tet_nids", REM_TETS, 4, Dtype::U32),
    var("rem_tet_wrap_dirs", REM_TETS, 4, Dtype::U8),
    var("vert_to_tet", PARTICLES, 1, Dtype::I64),
    var("neighbors", NEIGHBORS, 1, Dtype::U32),
    var("neighbor_wraps", NEIGHBORS, 1, Dtype::U8),
];

/// Typed contents of one dataset slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Bytes
    U8(Vec<u8>),
    /// 32-bit unsigned values
    U32(Vec<u32>),
    /// 64-bit signed values
    I64(Vec<i64>),
    /// 64-bit unsigned values
    U64(Vec<u64>),
    /// 32-bit floats
    F32(Vec<f32>),
}

// Columns are cast to and from their in-memory bytes, which are the on-disk
// little-endian bytes only on little-endian targets.
#[cfg(not(target_endian = "little"))]
compile_error!("the columnar layout requires a little-endian target");

/// Decodes packed elements from possibly unaligned bytes.
fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

macro_rules! column_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        fn $name(self, dataset: &str) -> Result<Vec<$ty>, IoFormatError> {
            match self {
                Self::$variant(v) => Ok(v),
                other => Err(IoFormatError::Header {
                    message: format!(
                        "dataset {dataset} has type {:?}, expected {:?}",
                        other.dtype(),
                        Dtype::$variant
                    ),
                }),
            }
        }
    };
}

impl Column {
    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        match self {
            Self::U8(_) => Dtype::U8,
            Self::U32(_) => Dtype::U32,
            Self::I64(_) => Dtype::I64,
            Self::U64(_) => Dtype::U64,
            Self::F32(_) => Dtype::F32,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    /// True when the slice is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Little-endian encoding.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::U8(v) => v.clone(),
            Self::U32(v) => bytemuck::cast_slice(v).to_vec(),
            Self::I64(v) => bytemuck::cast_slice(v).to_vec(),
            Self::U64(v) => bytemuck::cast_slice(v).to_vec(),
            Self::F32(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }

    /// Decodes little-endian bytes; a trailing partial element is ignored.
    #[must_use]
    pub fn from_le_bytes(dtype: Dtype, bytes: &[u8]) -> Self {
        match dtype {
            Dtype::U8 => Self::U8(bytes.to_vec()),
            Dtype::U32 => Self::U32(decode(bytes)),
            Dtype::I64 => Self::I64(decode(bytes)),
            Dtype::U64 => Self::U64(decode(bytes)),
            Dtype::F32 => Self::F32(decode(bytes)),
        }
    }

    column_accessor!(into_u8, U8, u8);
    column_accessor!(into_u32, U32, u32);
    column_accessor!(into_i64, I64, i64);
    column_accessor!(into_u64, U64, u64);
    column_accessor!(into_f32, F32, f32);
}

/// One dataset in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Name
    pub name: String,
    /// Element type
    pub dtype: Dtype,
    /// Shape; the product is the element count
    pub shape: Vec<u64>,
    /// Byte offset from the end of the header
    pub offset: u64,
}

impl DatasetEntry {
    /// Number of elements.
    #[must_use]
    pub fn elements(&self) -> u64 {
        self.shape
            .iter()
            .try_fold(1_u64, |n, &d| n.checked_mul(d))
            .unwrap_or(u64::MAX)
    }
}

/// The JSON header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnarHeader {
    /// Blocks in the file
    pub tot_blocks: u64,
    /// Count fields
    pub fields: Vec<String>,
    /// Every dataset, in file order
    pub datasets: Vec<DatasetEntry>,
}

impl ColumnarHeader {
    /// Header for `tot_blocks` blocks with the given per-field totals.
    #[must_use]
    pub fn new(tot_blocks: u64, totals: &[u64]) -> Self {
        let mut datasets = Vec::new();
        let mut offset = 0;
        let mut push = |name: String, dtype: Dtype, shape: Vec<u64>| {
            let entry = DatasetEntry {
                name,
                dtype,
                shape,
                offset,
            };
            offset += entry.elements() * dtype.size();
            datasets.push(entry);
        };
        push("gid".into(), Dtype::U32, vec![tot_blocks]);
        push("mins".into(), Dtype::F32, vec![tot_blocks, 3]);
        push("maxs".into(), Dtype::F32, vec![tot_blocks, 3]);
        for field in FIELDS {
            push(format!("num_{field}"), Dtype::U64, vec![tot_blocks]);
        }
        for field in FIELDS {
            push(format!("block_off_{field}"), Dtype::U64, vec![tot_blocks]);
        }
        for var in &VARIABLE {
            let total = totals.get(var.field).copied().unwrap_or(0);
            let shape = if var.width == 1 {
                vec![total]
            } else {
                vec![total, var.width]
            };
            push(var.name.into(), var.dtype, shape);
        }
        Self {
            tot_blocks,
            fields: FIELDS.iter().map(ToString::to_string).collect(),
            datasets,
        }
    }

    /// Looks up a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::MissingDataset`] if absent.
    pub fn dataset(&self, name: &str) -> Result<&DatasetEntry, IoFormatError> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| IoFormatError::MissingDataset { name: name.into() })
    }
}

/// Per-field counts of a block.
#[must_use]
pub fn block_counts(b: &TessBlock) -> Vec<u64> {
    [
        b.particles.len(),
        b.verts.len(),
        b.cells.len(),
        b.face_cells.len(),
        b.face_verts.len(),
        b.cell_faces.len(),
        b.complete_cells.len(),
        b.loc_tets.len(),
        b.num_rem_tets(),
        b.links.len(),
    ]
    .map(|n| n as u64)
    .to_vec()
}

/// Splits a block into its variable dataset slices, checking their sizes.
fn block_columns(b: &TessBlock, counts: &[u64]) -> Result<Vec<Column>, IoFormatError> {
    let columns = vec![
        Column::F32(b.particles.iter().flatten().copied().collect()),
        Column::F32(b.verts.iter().flatten().copied().collect()),
        Column::U32(b.num_cell_verts.clone()),
        Column::U32(b.cells.clone()),
        Column::U32(b.face_cells.iter().flatten().copied().collect()),
        Column::U32(b.face_num_verts.clone()),
        Column::U32(b.face_verts.clone()),
        Column::U32(b.cell_faces_start.clone()),
        Column::U32(b.cell_faces.clone()),
        Column::U32(b.complete_cells.clone()),
        Column::F32(b.areas.clone()),
        Column::F32(b.vols.clone()),
        Column::U32(b.loc_tets.iter().flatten().copied().collect()),
        Column::U32(b.rem_tet_gids.clone()),
        Column::U32(b.rem_tet_nids.clone()),
        Column::U8(b.rem_tet_wrap_dirs.clone()),
        Column::I64(b.vert_to_tet.clone()),
        Column::U32(b.links.iter().map(|l| l.gid).collect()),
        Column::U8(b.links.iter().map(|l| l.wrap.bits()).collect()),
    ];
    for (var, column) in VARIABLE.iter().zip(&columns) {
        let expected = counts[var.field] * var.width;
        if column.len() as u64 != expected {
            return Err(IoFormatError::ShapeMismatch {
                name: format!("{} of block {}", var.name, b.gid),
                expected,
                actual: column.len() as u64,
            });
        }
    }
    Ok(columns)
}

fn triples(v: &[f32]) -> Vec<[f32; 3]> {
    v.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

/// Reassembles a block from its dataset slices in [`VARIABLE`] order.
fn block_from_columns<F>(
    gid: BlockId,
    bounds: Bounds,
    columns: Vec<Column>,
    neighbor: F,
) -> Result<TessBlock, IoFormatError>
where
    F: Fn(BlockId) -> Option<(usize, Bounds)>,
{
    let [
        particles,
        verts,
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
        loc_tets,
        rem_tet_gids,
        rem_tet_nids,
        rem_tet_wrap_dirs,
        vert_to_tet,
        neighbors,
        neighbor_wraps,
    ]: [Column; 19] = columns.try_into().map_err(|_| IoFormatError::Header {
        message: "wrong number of datasets".into(),
    })?;

    let neighbors = neighbors.into_u32("neighbors")?;
    let wraps = neighbor_wraps.into_u8("neighbor_wraps")?;
    let links = neighbors
        .iter()
        .zip(&wraps)
        .map(|(&n, &w)| {
            let wrap = WrapDirection::from_bits(w).ok_or_else(|| IoFormatError::Header {
                message: format!("block {gid} has invalid wrap bits {w:#04x}"),
            })?;
            let (proc, bounds) = neighbor(n).ok_or(IoFormatError::UnknownBlock { gid: n })?;
            Ok(NeighborLink {
                gid: n,
                proc,
                wrap,
                bounds,
            })
        })
        .collect::<Result<Vec<_>, IoFormatError>>()?;

    Ok(TessBlock {
        gid,
        mins: bounds.min,
        maxs: bounds.max,
        particles: triples(&particles.into_f32("particles")?),
        verts: triples(&verts.into_f32("verts")?),
        num_cell_verts: num_cell_verts.into_u32("num_cell_verts")?,
        cells: cells.into_u32("cells")?,
        face_cells: face_cells
            .into_u32("face_cells")?
            .chunks_exact(2)
            .map(|c| [c[0], c[1]])
            .collect(),
        face_num_verts: face_num_verts.into_u32("face_num_verts")?,
        face_verts: face_verts.into_u32("face_verts")?,
        cell_faces_start: cell_faces_start.into_u32("cell_faces_start")?,
        cell_faces: cell_faces.into_u32("cell_faces")?,
        complete_cells: complete_cells.into_u32("complete_cells")?,
        areas: areas.into_f32("areas")?,
        vols: vols.into_f32("vols")?,
        loc_tets: loc_tets
            .into_u32("loc_tets")?
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect(),
        rem_tet_gids: rem_tet_gids.into_u32("rem_tet_gids")?,
        rem_tet_nids: rem_tet_nids.into_u32("rem_tet_nids")?,
        rem_tet_wrap_dirs: rem_tet_wrap_dirs.into_u8("rem_tet_wrap_dirs")?,
        vert_to_tet: vert_to_tet.into_i64("vert_to_tet")?,
        links,
    })
}

/// Writes this rank's blocks into the shared columnar file at `path`.
///
/// Collective: every rank must call it, with its blocks in ascending gid
/// order.
///
/// # Errors
///
/// Returns [`LayoutError`] if the blocks do not add up to `tot_blocks`,
/// [`IoFormatError`] on malformed blocks or storage failure, and
/// [`TessError::Comm`] on communication failure. Failures are agreed
/// collectively.
pub fn write_columnar<C>(
    comm: &C,
    path: &Path,
    blocks: &[TessBlock],
    tot_blocks: usize,
) -> Result<(), TessError>
where
    C: Communicator + ?Sized,
{
    let counts: Vec<(BlockId, Vec<u64>)> = blocks.iter().map(|b| (b.gid, block_counts(b))).collect();
    let layout = GlobalLayout::compute(comm, &FIELDS, &counts)?;
    if layout.tot_blocks() != tot_blocks as u64 {
        return Err(LayoutError::BlockCount {
            expected: tot_blocks as u64,
            actual: layout.tot_blocks(),
        }
        .into());
    }
    let header = ColumnarHeader::new(layout.tot_blocks(), layout.totals());
    let header_bytes = serde_json::to_vec(&header).map_err(|e| IoFormatError::Header {
        message: e.to_string(),
    })?;
    let base = PREAMBLE + header_bytes.len() as u64;
    let file = SharedFile::create(comm, path)?;

    let written = (|| -> Result<(), TessError> {
        if comm.rank() == 0 {
            file.write_at(0, MAGIC)?;
            file.write_at(8, &(header_bytes.len() as u64).to_le_bytes())?;
            file.write_at(PREAMBLE, &header_bytes)?;
        }
        let put = |name: &str, index: u64, column: &Column| -> Result<(), IoFormatError> {
            let entry = header.dataset(name)?;
            file.write_at(base + entry.offset + index * entry.dtype.size(), &column.to_le_bytes())
        };
        for (b, (_, row_counts)) in blocks.iter().zip(&counts) {
            let row = u64::from(b.gid);
            if row >= layout.tot_blocks() {
                return Err(IoFormatError::UnknownBlock { gid: b.gid }.into());
            }
            let offsets = layout
                .offsets(b.gid)
                .ok_or(IoFormatError::UnknownBlock { gid: b.gid })?;
            put("gid", row, &Column::U32(vec![b.gid]))?;
            put("mins", 3 * row, &Column::F32(b.mins.to_vec()))?;
            put("maxs", 3 * row, &Column::F32(b.maxs.to_vec()))?;
            for (f, field) in FIELDS.iter().enumerate() {
                put(&format!("num_{field}"), row, &Column::U64(vec![row_counts[f]]))?;
                put(&format!("block_off_{field}"), row, &Column::U64(vec![offsets[f]]))?;
            }
            for (var, column) in VARIABLE.iter().zip(block_columns(b, row_counts)?) {
                put(var.name, offsets[var.field] * var.width, &column)?;
            }
        }
        file.sync()?;
        Ok(())
    })();
    comm.agree(written)?;
    debug!(rank = comm.rank(), blocks = blocks.len(), path = %path.display(), "columnar file written");
    Ok(())
}

/// Reads and parses the header; returns it with the data section start.
///
/// # Errors
///
/// Returns [`IoFormatError`] for a foreign or malformed file.
pub fn read_header(file: &SharedFile) -> Result<(ColumnarHeader, u64), IoFormatError> {
    check_magic(file, MAGIC)?;
    let len = file.read_u64(8)?;
    let bytes = file.read_at(PREAMBLE, len)?;
    let header: ColumnarHeader = serde_json::from_slice(&bytes).map_err(|e| IoFormatError::Header {
        message: e.to_string(),
    })?;
    Ok((header, PREAMBLE + len))
}

/// `count * width` elements, or a header error on overflow.
fn scaled(count: u64, width: u64, name: &str) -> Result<u64, IoFormatError> {
    count.checked_mul(width).ok_or_else(|| IoFormatError::Header {
        message: format!("{name}: {count} rows of width {width} overflow"),
    })
}

fn read_column(
    file: &SharedFile,
    header: &ColumnarHeader,
    base: u64,
    name: &str,
    start: u64,
    count: u64,
) -> Result<Column, IoFormatError> {
    let entry = header.dataset(name)?;
    let end = start.checked_add(count).unwrap_or(u64::MAX);
    if end > entry.elements() {
        return Err(IoFormatError::ShapeMismatch {
            name: name.into(),
            expected: end,
            actual: entry.elements(),
        });
    }
    let size = entry.dtype.size();
    let overflow = || IoFormatError::Header {
        message: format!("{name}: range {start}+{count} overflows the file"),
    };
    let offset = start
        .checked_mul(size)
        .and_then(|o| o.checked_add(entry.offset))
        .and_then(|o| o.checked_add(base))
        .ok_or_else(overflow)?;
    let len = count.checked_mul(size).ok_or_else(overflow)?;
    let bytes = file.read_at(offset, len)?;
    Ok(Column::from_le_bytes(entry.dtype, &bytes))
}

/// Reads this rank's share of the blocks in the columnar file at `path`.
///
/// Blocks are split contiguously over the reading ranks ([`ReadPartition`]);
/// neighbor ranks are recomputed for the new split and neighbor bounds come
/// from the `mins`/`maxs` datasets.
///
/// # Errors
///
/// Returns [`IoFormatError`] for a missing, foreign, or malformed file
/// (agreed collectively).
pub fn read_columnar<C>(comm: &C, path: &Path) -> Result<Vec<TessBlock>, TessError>
where
    C: Communicator + ?Sized,
{
    let local = (|| -> Result<Vec<TessBlock>, TessError> {
        let file = SharedFile::open(path)?;
        let (header, base) = read_header(&file)?;
        let tot = header.tot_blocks;
        let tot_blocks = usize::try_from(tot).map_err(|e| IoFormatError::Header {
            message: e.to_string(),
        })?;
        let partition = ReadPartition::new(comm.size(), tot_blocks);
        let (start, count) = partition.range(comm.rank());

        let gids = read_column(&file, &header, base, "gid", 0, tot)?.into_u32("gid")?;
        let corners = scaled(tot, 3, "mins")?;
        let mins = read_column(&file, &header, base, "mins", 0, corners)?.into_f32("mins")?;
        let maxs = read_column(&file, &header, base, "maxs", 0, corners)?.into_f32("maxs")?;
        let mut nums = Vec::with_capacity(FIELDS.len());
        let mut offs = Vec::with_capacity(FIELDS.len());
        for field in FIELDS {
            let name = format!("num_{field}");
            nums.push(read_column(&file, &header, base, &name, 0, tot)?.into_u64(&name)?);
            let name = format!("block_off_{field}");
            offs.push(read_column(&file, &header, base, &name, 0, tot)?.into_u64(&name)?);
        }
        let bounds_of = |row: usize| {
            Bounds::new(
                [mins[3 * row], mins[3 * row + 1], mins[3 * row + 2]],
                [maxs[3 * row], maxs[3 * row + 1], maxs[3 * row + 2]],
            )
        };
        let neighbor = |n: BlockId| {
            let row = n as usize;
            (row < tot_blocks).then(|| (partition.rank(row), bounds_of(row)))
        };

        let mut blocks = Vec::with_capacity(count);
        for row in start..start + count {
            let gid = gids[row];
            if gid as usize != row {
                return Err(IoFormatError::Header {
                    message: format!("row {row} holds block {gid}"),
                }
                .into());
            }
            let columns = VARIABLE
                .iter()
                .map(|var| -> Result<Column, IoFormatError> {
                    read_column(
                        &file,
                        &header,
                        base,
                        var.name,
                        scaled(offs[var.field][row], var.width, var.name)?,
                        scaled(nums[var.field][row], var.width, var.name)?,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            blocks.push(block_from_columns(gid, bounds_of(row), columns, neighbor)?);
        }
        Ok(blocks)
    })();
    let blocks = comm.agree(local)?;
    debug!(rank = comm.rank(), blocks = blocks.len(), path = %path.display(), "columnar file read");
    Ok(blocks)
}
