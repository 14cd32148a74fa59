//! Block-record layout.
//!
//! Each block is one serialized record. The file is the magic `TESSBLK1`, the
//! block count, an index of `(gid, offset, len)` triples in global block
//! order, and then the records. Single blocks can be read without touching
//! the rest of the file.

use std::path::Path;

use tracing::debug;

use crate::comm::communicator::{Communicator, CommunicatorExt};
use crate::core::block::BlockId;
use crate::core::collections::FastHashMap;
use crate::core::error::TessError;
use crate::core::output::TessBlock;
use crate::io::layout::{GlobalLayout, ReadPartition};
use crate::io::shared_file::{IoFormatError, SharedFile, check_magic};

/// File magic.
pub const MAGIC: &[u8; 8] = b"TESSBLK1";

const INDEX_START: u64 = 16;
const INDEX_ENTRY: u64 = 24;

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEntry {
    /// Block
    pub gid: BlockId,
    /// Absolute byte offset of the record
    pub offset: u64,
    /// Record length in bytes
    pub len: u64,
}

impl RecordEntry {
    fn to_le_bytes(self) -> [u8; 24] {
        let mut out = [0_u8; 24];
        out[..8].copy_from_slice(&u64::from(self.gid).to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..].copy_from_slice(&self.len.to_le_bytes());
        out
    }
}

/// Writes this rank's blocks into the shared block file at `path`.
///
/// Collective; blocks must be in ascending gid order on every rank.
///
/// # Errors
///
/// Returns [`IoFormatError`] if a block cannot be encoded or written, a
/// layout error for unordered blocks, and [`TessError::Comm`] on
/// communication failure. Failures are agreed collectively.
pub fn write_blocks<C>(comm: &C, path: &Path, blocks: &[TessBlock]) -> Result<(), TessError>
where
    C: Communicator + ?Sized,
{
    let encoded: Result<Vec<Vec<u8>>, TessError> = blocks
        .iter()
        .map(|b| bincode::serialize(b).map_err(|e| IoFormatError::from(e).into()))
        .collect();
    let records = comm.agree(encoded)?;

    let counts: Vec<(BlockId, Vec<u64>)> = blocks
        .iter()
        .zip(&records)
        .map(|(b, r)| (b.gid, vec![r.len() as u64]))
        .collect();
    let layout = GlobalLayout::compute(comm, &["bytes"], &counts)?;
    let data_start = INDEX_START + INDEX_ENTRY * layout.tot_blocks();
    let file = SharedFile::create(comm, path)?;

    let written = (|| -> Result<(), TessError> {
        if comm.rank() == 0 {
            file.write_at(0, MAGIC)?;
            file.write_at(8, &layout.tot_blocks().to_le_bytes())?;
        }
        for (i, (b, record)) in blocks.iter().zip(&records).enumerate() {
            let offset = layout
                .offsets(b.gid)
                .ok_or(IoFormatError::UnknownBlock { gid: b.gid })?[0];
            let entry = RecordEntry {
                gid: b.gid,
                offset: data_start + offset,
                len: record.len() as u64,
            };
            let row = layout.block_start() + i as u64;
            file.write_at(INDEX_START + INDEX_ENTRY * row, &entry.to_le_bytes())?;
            file.write_at(entry.offset, record)?;
        }
        file.sync()?;
        Ok(())
    })();
    comm.agree(written)?;
    debug!(rank = comm.rank(), blocks = blocks.len(), path = %path.display(), "block file written");
    Ok(())
}

/// Reads the record index.
///
/// # Errors
///
/// Returns [`IoFormatError`] for a foreign or truncated file.
pub fn read_index(file: &SharedFile) -> Result<Vec<RecordEntry>, IoFormatError> {
    check_magic(file, MAGIC)?;
    let count = file.read_u64(8)?;
    let len = count.checked_mul(INDEX_ENTRY).ok_or_else(|| IoFormatError::Header {
        message: format!("block count {count} overflows the index"),
    })?;
    let bytes = file.read_at(INDEX_START, len)?;
    bytes
        .chunks_exact(24)
        .map(|c| {
            let word = |i: usize| {
                let mut w = [0_u8; 8];
                w.copy_from_slice(&c[8 * i..8 * i + 8]);
                u64::from_le_bytes(w)
            };
            let gid = BlockId::try_from(word(0)).map_err(|_| IoFormatError::Header {
                message: format!("gid {} out of range", word(0)),
            })?;
            Ok(RecordEntry {
                gid,
                offset: word(1),
                len: word(2),
            })
        })
        .collect()
}

fn read_record(file: &SharedFile, entry: RecordEntry) -> Result<TessBlock, IoFormatError> {
    let bytes = file.read_at(entry.offset, entry.len)?;
    let block: TessBlock = bincode::deserialize(&bytes)?;
    if block.gid != entry.gid {
        return Err(IoFormatError::Header {
            message: format!("record indexed as block {} holds block {}", entry.gid, block.gid),
        });
    }
    Ok(block)
}

/// Reads this rank's share of the blocks in the block file at `path`.
///
/// Blocks are split contiguously in index order ([`ReadPartition`]), and
/// neighbor ranks are recomputed for the new split.
///
/// # Errors
///
/// Returns [`IoFormatError`] for a missing, foreign, or malformed file
/// (agreed collectively).
pub fn read_blocks<C>(comm: &C, path: &Path) -> Result<Vec<TessBlock>, TessError>
where
    C: Communicator + ?Sized,
{
    let local = (|| -> Result<Vec<TessBlock>, TessError> {
        let file = SharedFile::open(path)?;
        let index = read_index(&file)?;
        let partition = ReadPartition::new(comm.size(), index.len());
        let row_of: FastHashMap<BlockId, usize> = index.iter().enumerate().map(|(row, e)| (e.gid, row)).collect();
        let (start, count) = partition.range(comm.rank());
        index[start..start + count]
            .iter()
            .map(|&entry| {
                let mut block = read_record(&file, entry)?;
                for link in &mut block.links {
                    let row = row_of
                        .get(&link.gid)
                        .ok_or(IoFormatError::UnknownBlock { gid: link.gid })?;
                    link.proc = partition.rank(*row);
                }
                Ok(block)
            })
            .collect()
    })();
    let blocks = comm.agree(local)?;
    debug!(rank = comm.rank(), blocks = blocks.len(), path = %path.display(), "block file read");
    Ok(blocks)
}

/// Reads a single block from the block file at `path`.
///
/// # Errors
///
/// Returns [`IoFormatError::UnknownBlock`] if `gid` is not in the file, and
/// other [`IoFormatError`]s for a foreign or malformed file.
pub fn read_block(path: &Path, gid: BlockId) -> Result<TessBlock, IoFormatError> {
    let file = SharedFile::open(path)?;
    let entry = read_index(&file)?
        .into_iter()
        .find(|e| e.gid == gid)
        .ok_or(IoFormatError::UnknownBlock { gid })?;
    read_record(&file, entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::single::SingleProcess;
    use crate::comm::thread_world::ThreadWorld;
    use crate::core::decomposition::ContiguousAssigner;
    use crate::io::columnar::tests::sample_block;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tess-blocks-{}-{name}", std::process::id()))
    }

    #[test]
    fn single_block_lookup() {
        let path = scratch("lookup");
        let blocks: Vec<_> = (0..3).map(|g| sample_block(g, 3)).collect();
        write_blocks(&SingleProcess, &path, &blocks).unwrap();
        assert_eq!(read_block(&path, 1).unwrap(), blocks[1]);
        assert!(matches!(read_block(&path, 9), Err(IoFormatError::UnknownBlock { gid: 9 })));
        assert_eq!(read_blocks(&SingleProcess, &path).unwrap(), blocks);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn written_by_three_read_by_two() {
        let path = scratch("regroup");
        let tot = 5_usize;
        ThreadWorld::run(3, |comm| {
            let assigner = ContiguousAssigner::new(comm.size(), tot);
            let blocks: Vec<_> = assigner
                .local_gids(comm.rank())
                .map(|g| sample_block(g, 5))
                .collect();
            write_blocks(&comm, &path, &blocks).unwrap();
        });
        let read = ThreadWorld::run(2, |comm| read_blocks(&comm, &path).unwrap());
        assert_eq!(read[0].len(), 2);
        assert_eq!(read[1].len(), 3);
        let all: Vec<_> = read.into_iter().flatten().collect();
        let partition = ReadPartition::new(2, tot);
        for (gid, block) in all.iter().enumerate() {
            let mut expected = sample_block(BlockId::try_from(gid).unwrap(), 5);
            for link in &mut expected.links {
                link.proc = partition.rank(link.gid as usize);
            }
            assert_eq!(block, &expected);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn index_is_checked_against_records() {
        let path = scratch("index");
        write_blocks(&SingleProcess, &path, &[sample_block(0, 1)]).unwrap();
        let file = SharedFile::open(&path).unwrap();
        let index = read_index(&file).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].offset, INDEX_START + INDEX_ENTRY);
        let wrong = RecordEntry { gid: 4, ..index[0] };
        assert!(matches!(read_record(&file, wrong), Err(IoFormatError::Header { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_block_counts_are_errors() {
        let path = scratch("corrupt-count");
        for count in [1_u64 << 62, u64::MAX, 3] {
            let file = SharedFile::create(&SingleProcess, &path).unwrap();
            file.write_at(0, MAGIC).unwrap();
            file.write_at(8, &count.to_le_bytes()).unwrap();
            file.write_at(16, &[0; 24]).unwrap();
            let err = read_block(&path, 0).unwrap_err();
            assert!(
                matches!(err, IoFormatError::Header { .. } | IoFormatError::Truncated { .. }),
                "count {count}: {err:?}"
            );
            let err = read_blocks(&SingleProcess, &path).unwrap_err();
            assert!(matches!(err, TessError::Io(_)), "count {count}: {err:?}");
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn records_past_the_end_are_truncation() {
        let path = scratch("corrupt-record");
        write_blocks(&SingleProcess, &path, &[sample_block(0, 1)]).unwrap();
        let file = SharedFile::open(&path).unwrap();
        let entry = read_index(&file).unwrap()[0];
        let long = RecordEntry { len: 1 << 40, ..entry };
        assert!(matches!(read_record(&file, long), Err(IoFormatError::Truncated { .. })));
        let far = RecordEntry { offset: u64::MAX - 4, ..entry };
        assert!(matches!(read_record(&file, far), Err(IoFormatError::Truncated { .. })));
        std::fs::remove_file(&path).unwrap();
    }
}
