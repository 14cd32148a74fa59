//! Communicator capability.
//!
//! All cross-process interaction goes through [`Communicator`]. Every method
//! is collective: all ranks of the world must call it in the same order, and
//! none returns before every rank has contributed.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::TessError;

/// Rank within a world.
pub type Rank = usize;

/// Communication failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// A message was addressed to a rank outside the world.
    #[error("Rank {rank} is unreachable in a world of size {size}")]
    UnreachableRank {
        /// Destination rank
        rank: Rank,
        /// World size
        size: usize,
    },

    /// Contributions to a reduction differ in length across ranks.
    #[error("Collective length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length on the first rank
        expected: usize,
        /// Length on another rank
        actual: usize,
    },

    /// A message could not be encoded or decoded.
    #[error("Message codec failure: {message}")]
    Codec {
        /// Description
        message: String,
    },

    /// The transport failed.
    #[error("Transport failure: {message}")]
    Transport {
        /// Description
        message: String,
    },
}

impl From<bincode::Error> for CommError {
    fn from(e: bincode::Error) -> Self {
        Self::Codec {
            message: e.to_string(),
        }
    }
}

/// Collective operations used by the tessellation pipeline.
pub trait Communicator {
    /// This process's rank.
    fn rank(&self) -> Rank;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Element-wise sum across ranks.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure or mismatched lengths.
    fn all_reduce_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError>;

    /// Element-wise exclusive prefix sum over ranks (zeros on rank 0).
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure or mismatched lengths.
    fn exclusive_scan_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError>;

    /// Maximum across ranks.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure.
    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError>;

    /// Minimum across ranks.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure.
    fn all_reduce_min(&self, value: f64) -> Result<f64, CommError>;

    /// Sparse all-to-all: delivers each `(dest, bytes)` and returns what this
    /// rank received as `(src, bytes)`, sorted by source (stable per source).
    ///
    /// # Errors
    ///
    /// Returns [`CommError::UnreachableRank`] when a destination is outside
    /// the world. The call still completes collectively before returning it.
    fn exchange(&self, outgoing: Vec<(Rank, Vec<u8>)>) -> Result<Vec<(Rank, Vec<u8>)>, CommError>;

    /// Synchronizes all ranks.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure.
    fn barrier(&self) -> Result<(), CommError> {
        self.all_reduce_sum(&[]).map(|_| ())
    }

    /// Logical or across ranks.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure.
    fn all_reduce_or(&self, value: bool) -> Result<bool, CommError> {
        Ok(self.all_reduce_sum(&[u64::from(value)])?[0] > 0)
    }

    /// Gathers one byte buffer from every rank, in rank order.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on transport failure.
    fn all_gather_bytes(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let outgoing = (0..self.size()).map(|r| (r, bytes.clone())).collect();
        let received = self.exchange(outgoing)?;
        if received.len() != self.size() {
            return Err(CommError::LengthMismatch {
                expected: self.size(),
                actual: received.len(),
            });
        }
        Ok(received.into_iter().map(|(_, b)| b).collect())
    }
}

/// Per-rank outcome shared by [`CommunicatorExt::agree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outcome {
    failed: Option<String>,
}

/// Helpers layered on any [`Communicator`].
pub trait CommunicatorExt: Communicator {
    /// Collective error agreement.
    ///
    /// Every rank contributes whether `local` failed. If no rank failed, the
    /// local value is returned. Otherwise a failing rank returns its own
    /// error and every other rank returns [`TessError::CollectiveAbort`]
    /// naming the lowest failing rank.
    ///
    /// # Errors
    ///
    /// Returns the local error, a [`TessError::CollectiveAbort`], or a
    /// communication error from the agreement itself.
    fn agree<T>(&self, local: Result<T, TessError>) -> Result<T, TessError> {
        let outcome = Outcome {
            failed: local.as_ref().err().map(ToString::to_string),
        };
        let gathered = self.all_gather_bytes(bincode::serialize(&outcome).map_err(CommError::from)?)?;
        let mut first_failure = None;
        for (rank, bytes) in gathered.iter().enumerate() {
            let outcome: Outcome = bincode::deserialize(bytes).map_err(CommError::from)?;
            if let Some(message) = outcome.failed {
                first_failure = Some((rank, message));
                break;
            }
        }
        match (local, first_failure) {
            (Ok(value), None) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Some((rank, message))) => {
                warn!(rank = self.rank(), failed_rank = rank, %message, "collective abort");
                Err(TessError::CollectiveAbort { rank, message })
            }
        }
    }

    /// Encodes per-destination messages and exchanges them.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] on codec or transport failure.
    fn exchange_messages<M>(&self, outgoing: &[(Rank, M)]) -> Result<Vec<(Rank, M)>, CommError>
    where
        M: Serialize + for<'de> Deserialize<'de>,
    {
        let encoded = outgoing
            .iter()
            .map(|(dest, msg)| Ok((*dest, bincode::serialize(msg)?)))
            .collect::<Result<Vec<_>, CommError>>()?;
        self.exchange(encoded)?
            .into_iter()
            .map(|(src, bytes)| Ok((src, bincode::deserialize(&bytes)?)))
            .collect()
    }
}

impl<C: Communicator + ?Sized> CommunicatorExt for C {}

/// Validates every destination against the world size.
///
/// # Errors
///
/// Returns [`CommError::UnreachableRank`] for the first bad destination.
pub fn check_destinations(outgoing: &[(Rank, Vec<u8>)], size: usize) -> Result<(), CommError> {
    match outgoing.iter().find(|(dest, _)| *dest >= size) {
        Some(&(rank, _)) => Err(CommError::UnreachableRank { rank, size }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::single::SingleProcess;

    #[test]
    fn agree_passes_success_through() {
        let comm = SingleProcess;
        assert_eq!(comm.agree::<u32>(Ok(7)).unwrap(), 7);
    }

    #[test]
    fn agree_returns_local_error() {
        let comm = SingleProcess;
        let err = TessError::ConvergenceFailure {
            rounds: 3,
            pending: 2,
        };
        assert_eq!(comm.agree::<()>(Err(err.clone())).unwrap_err(), err);
    }

    #[test]
    fn typed_messages_round_trip() {
        let comm = SingleProcess;
        let received = comm
            .exchange_messages(&[(0, vec![1_u32, 2]), (0, vec![3])])
            .unwrap();
        assert_eq!(received, vec![(0, vec![1, 2]), (0, vec![3])]);
    }

    #[test]
    fn destination_check() {
        assert!(check_destinations(&[(0, vec![])], 1).is_ok());
        assert_eq!(
            check_destinations(&[(0, vec![]), (2, vec![])], 2).unwrap_err(),
            CommError::UnreachableRank { rank: 2, size: 2 }
        );
    }
}
