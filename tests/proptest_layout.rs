//! Property-based tests for the global layout, read partitions, and wrap
//! directions.
//!
//! - Layout offsets equal sequential prefix sums over blocks in gid order,
//!   for any rank count
//! - Read partitions cover every block exactly once
//! - Wrap reversal is an involution and undoes the translation

use approx::assert_relative_eq;
use proptest::prelude::*;
use tess::core::decomposition::ContiguousAssigner;
use tess::io::layout::{GlobalLayout, ReadPartition};
use tess::prelude::*;

const FIELDS: [&str; 3] = ["particles", "faces", "tets"];

/// Per-block counts for up to 12 blocks.
fn block_counts() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(0_u64..50, FIELDS.len()), 1..12)
}

/// Valid wrap directions: at most one side per axis.
fn wrap_direction() -> impl Strategy<Value = WrapDirection> {
    prop::array::uniform3(0_u8..3).prop_map(|sides| {
        sides
            .iter()
            .enumerate()
            .fold(WrapDirection::NONE, |w, (axis, &side)| match side {
                1 => w.union(WrapDirection::for_side(axis, false)),
                2 => w.union(WrapDirection::for_side(axis, true)),
                _ => w,
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: offsets are the sequential prefix sums regardless of how
    /// blocks are spread over ranks.
    #[test]
    fn prop_layout_offsets_are_prefix_sums(counts in block_counts(), ranks in 1_usize..5) {
        let tot = counts.len();
        let layouts = ThreadWorld::run(ranks, |comm| {
            let assigner = ContiguousAssigner::new(comm.size(), tot);
            let mine: Vec<_> = assigner
                .local_gids(comm.rank())
                .map(|g| (g, counts[g as usize].clone()))
                .collect();
            GlobalLayout::compute(&comm, &FIELDS, &mine).unwrap()
        });

        let mut running = vec![0_u64; FIELDS.len()];
        for (gid, row) in counts.iter().enumerate() {
            let gid = BlockId::try_from(gid).unwrap();
            let owner = layouts.iter().find(|l| l.offsets(gid).is_some()).unwrap();
            prop_assert_eq!(owner.offsets(gid).unwrap(), &running[..]);
            for (r, c) in running.iter_mut().zip(row) {
                *r += c;
            }
        }
        for layout in &layouts {
            prop_assert_eq!(layout.totals(), &running[..]);
            prop_assert_eq!(layout.tot_blocks(), tot as u64);
        }
    }

    /// Property: every block is read by exactly one rank, and `rank` agrees
    /// with `range`.
    #[test]
    fn prop_read_partition_covers_blocks(size in 1_usize..9, tot in 0_usize..40) {
        let p = ReadPartition::new(size, tot);
        let mut next = 0;
        for rank in 0..size {
            let (start, count) = p.range(rank);
            if count > 0 {
                prop_assert_eq!(start, next);
                for index in start..start + count {
                    prop_assert_eq!(p.rank(index), rank);
                }
            }
            next = start + count;
        }
        prop_assert_eq!(next, tot);
    }

    /// Property: reversing twice is the identity and reversed wraps translate
    /// back.
    #[test]
    fn prop_wrap_reversal_undoes_translation(
        wrap in wrap_direction(),
        extent in prop::array::uniform3(0.5_f64..100.0),
    ) {
        prop_assert_eq!(wrap.reversed().reversed(), wrap);
        prop_assert_eq!(WrapDirection::from_bits(wrap.bits()), Some(wrap));
        let t = wrap.translation(extent);
        let back = wrap.reversed().translation(extent);
        for a in 0..3 {
            assert_relative_eq!(t[a] + back[a], 0.0);
            assert_relative_eq!(t[a].abs(), if t[a] == 0.0 { 0.0 } else { extent[a] });
        }
    }
}
