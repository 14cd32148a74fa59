//! Global layout of per-block variable-length arrays.
//!
//! Every block contributes a count per named field. Blocks are laid out in
//! global order (ascending gid, which is also rank order), so a block's
//! offset in a field is the sum of the counts of every block before it: the
//! sum over earlier ranks comes from one exclusive scan of the per-rank
//! totals, and the sum over earlier blocks of the same rank is a local
//! prefix sum. One more reduction yields the global totals.

use tracing::trace;

use crate::comm::communicator::Communicator;
use crate::core::block::BlockId;
use crate::core::error::TessError;

/// Invalid layout request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// A block supplied the wrong number of counts.
    #[error("Block {gid} has {actual} counts for {expected} fields")]
    FieldCount {
        /// Offending block
        gid: BlockId,
        /// Number of fields
        expected: usize,
        /// Counts supplied
        actual: usize,
    },

    /// Blocks are not in ascending gid order.
    #[error("Block {next} follows block {previous}; blocks must be in ascending gid order")]
    UnorderedBlocks {
        /// Earlier block
        previous: BlockId,
        /// Later block
        next: BlockId,
    },

    /// The blocks seen do not match the expected total.
    #[error("Layout covers {actual} blocks, expected {expected}")]
    BlockCount {
        /// Expected total
        expected: u64,
        /// Blocks contributed by all ranks
        actual: u64,
    },
}

/// Offsets of every resident block in every field, plus global totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalLayout {
    fields: Vec<&'static str>,
    blocks: Vec<(BlockId, Vec<u64>)>,
    totals: Vec<u64>,
    block_start: u64,
    tot_blocks: u64,
}

impl GlobalLayout {
    /// Computes the layout collectively from this rank's per-block counts.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError`] for malformed counts (agreed collectively)
    /// and [`TessError::Comm`] if a reduction fails.
    pub fn compute<C>(
        comm: &C,
        fields: &[&'static str],
        counts: &[(BlockId, Vec<u64>)],
    ) -> Result<Self, TessError>
    where
        C: Communicator + ?Sized,
    {
        use crate::comm::communicator::CommunicatorExt;

        let checked = (|| -> Result<(), TessError> {
            for (gid, row) in counts {
                if row.len() != fields.len() {
                    return Err(LayoutError::FieldCount {
                        gid: *gid,
                        expected: fields.len(),
                        actual: row.len(),
                    }
                    .into());
                }
            }
            for pair in counts.windows(2) {
                if pair[0].0 >= pair[1].0 {
                    return Err(LayoutError::UnorderedBlocks {
                        previous: pair[0].0,
                        next: pair[1].0,
                    }
                    .into());
                }
            }
            Ok(())
        })();
        comm.agree(checked)?;

        // Slot 0 counts blocks, the rest are field totals.
        let mut local = vec![0_u64; fields.len() + 1];
        local[0] = counts.len() as u64;
        for (_, row) in counts {
            for (slot, &c) in local[1..].iter_mut().zip(row) {
                *slot += c;
            }
        }
        let before = comm.exclusive_scan_sum(&local)?;
        let global = comm.all_reduce_sum(&local)?;

        let mut running = before[1..].to_vec();
        let blocks = counts
            .iter()
            .map(|(gid, row)| {
                let offsets = running.clone();
                for (r, &c) in running.iter_mut().zip(row) {
                    *r += c;
                }
                (*gid, offsets)
            })
            .collect();
        trace!(rank = comm.rank(), block_start = before[0], totals = ?&global[1..], "global layout");
        Ok(Self {
            fields: fields.to_vec(),
            blocks,
            totals: global[1..].to_vec(),
            block_start: before[0],
            tot_blocks: global[0],
        })
    }

    /// Field names, in count order.
    #[must_use]
    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    /// Index of a field.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == name)
    }

    /// Offsets of `gid` in every field.
    #[must_use]
    pub fn offsets(&self, gid: BlockId) -> Option<&[u64]> {
        self.blocks
            .iter()
            .find(|(g, _)| *g == gid)
            .map(|(_, o)| o.as_slice())
    }

    /// Offset of `gid` in `field`.
    #[must_use]
    pub fn offset(&self, gid: BlockId, field: &str) -> Option<u64> {
        let f = self.field_index(field)?;
        self.offsets(gid).map(|o| o[f])
    }

    /// Global totals per field.
    #[must_use]
    pub fn totals(&self) -> &[u64] {
        &self.totals
    }

    /// Global position of this rank's first block.
    #[must_use]
    pub const fn block_start(&self) -> u64 {
        self.block_start
    }

    /// Blocks over all ranks.
    #[must_use]
    pub const fn tot_blocks(&self) -> u64 {
        self.tot_blocks
    }
}

/// Contiguous split of blocks over reading ranks; the last rank takes the
/// remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPartition {
    size: usize,
    tot_blocks: usize,
}

impl ReadPartition {
    /// Partition of `tot_blocks` blocks over `size` ranks.
    #[must_use]
    pub const fn new(size: usize, tot_blocks: usize) -> Self {
        let size = if size == 0 { 1 } else { size };
        Self { size, tot_blocks }
    }

    /// First block index and count of `rank`.
    #[must_use]
    pub const fn range(&self, rank: usize) -> (usize, usize) {
        let base = self.tot_blocks / self.size;
        let start = rank * base;
        if rank + 1 == self.size {
            (start, self.tot_blocks - start)
        } else if rank < self.size {
            (start, base)
        } else {
            (self.tot_blocks, 0)
        }
    }

    /// Rank reading block index `index`.
    #[must_use]
    pub const fn rank(&self, index: usize) -> usize {
        let base = self.tot_blocks / self.size;
        if base == 0 {
            return self.size - 1;
        }
        let r = index / base;
        if r >= self.size { self.size - 1 } else { r }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::single::SingleProcess;
    use crate::comm::thread_world::ThreadWorld;
    use crate::core::decomposition::ContiguousAssigner;

    const FIELDS: [&str; 2] = ["particles", "tets"];

    fn counts_of(gid: BlockId) -> Vec<u64> {
        vec![u64::from(gid) + 1, 2 * u64::from(gid)]
    }

    #[test]
    fn single_process_offsets_are_prefix_sums() {
        let counts: Vec<_> = (0..4).map(|g| (g, counts_of(g))).collect();
        let layout = GlobalLayout::compute(&SingleProcess, &FIELDS, &counts).unwrap();
        assert_eq!(layout.offsets(0), Some(&[0, 0][..]));
        assert_eq!(layout.offsets(3), Some(&[6, 6][..]));
        assert_eq!(layout.offset(2, "tets"), Some(2));
        assert_eq!(layout.totals(), &[10, 12]);
        assert_eq!(layout.tot_blocks(), 4);
    }

    #[test]
    fn offsets_match_sequential_sums_across_ranks() {
        let tot = 11_usize;
        let results = ThreadWorld::run(3, |comm| {
            let assigner = ContiguousAssigner::new(comm.size(), tot);
            let counts: Vec<_> = assigner
                .local_gids(comm.rank())
                .map(|g| (g, counts_of(g)))
                .collect();
            GlobalLayout::compute(&comm, &FIELDS, &counts).unwrap()
        });
        let mut expected = [0_u64; 2];
        for gid in 0..u32::try_from(tot).unwrap() {
            let layout = results.iter().find(|l| l.offsets(gid).is_some()).unwrap();
            assert_eq!(layout.offsets(gid).unwrap(), &expected[..]);
            for (e, c) in expected.iter_mut().zip(counts_of(gid)) {
                *e += c;
            }
        }
        for layout in &results {
            assert_eq!(layout.totals(), &expected[..]);
            assert_eq!(layout.tot_blocks(), 11);
        }
        assert_eq!(results[1].block_start(), 4);
    }

    #[test]
    fn malformed_counts_are_rejected() {
        let err = GlobalLayout::compute(&SingleProcess, &FIELDS, &[(0, vec![1])]).unwrap_err();
        assert!(matches!(err, TessError::Layout(LayoutError::FieldCount { gid: 0, .. })));
        let err = GlobalLayout::compute(&SingleProcess, &FIELDS, &[(1, vec![1, 1]), (0, vec![1, 1])])
            .unwrap_err();
        assert!(matches!(err, TessError::Layout(LayoutError::UnorderedBlocks { .. })));
    }

    #[test]
    fn read_partition_gives_remainder_to_last_rank() {
        let p = ReadPartition::new(3, 8);
        assert_eq!(p.range(0), (0, 2));
        assert_eq!(p.range(1), (2, 2));
        assert_eq!(p.range(2), (4, 4));
        assert_eq!(p.rank(7), 2);
        assert_eq!(p.rank(3), 1);
        let sparse = ReadPartition::new(4, 2);
        assert_eq!(sparse.range(3), (0, 2));
        assert_eq!(sparse.range(0), (0, 0));
        assert_eq!(sparse.rank(1), 3);
    }
}
