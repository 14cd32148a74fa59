//! Trivial world of one rank.

use crate::comm::communicator::{CommError, Communicator, Rank, check_destinations};

/// A world containing only this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        Ok(values.to_vec())
    }

    fn exclusive_scan_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        Ok(vec![0; values.len()])
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        Ok(value)
    }

    fn all_reduce_min(&self, value: f64) -> Result<f64, CommError> {
        Ok(value)
    }

    fn exchange(&self, outgoing: Vec<(Rank, Vec<u8>)>) -> Result<Vec<(Rank, Vec<u8>)>, CommError> {
        check_destinations(&outgoing, 1)?;
        Ok(outgoing.into_iter().map(|(_, bytes)| (0, bytes)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_zero_and_reduce_is_identity() {
        let comm = SingleProcess;
        assert_eq!(comm.exclusive_scan_sum(&[3, 4]).unwrap(), vec![0, 0]);
        assert_eq!(comm.all_reduce_sum(&[3, 4]).unwrap(), vec![3, 4]);
        assert!(comm.all_reduce_or(true).unwrap());
        assert!(!comm.all_reduce_or(false).unwrap());
        comm.barrier().unwrap();
    }

    #[test]
    fn sending_outside_the_world_fails() {
        let comm = SingleProcess;
        assert_eq!(
            comm.exchange(vec![(1, vec![0])]).unwrap_err(),
            CommError::UnreachableRank { rank: 1, size: 1 }
        );
    }
}
