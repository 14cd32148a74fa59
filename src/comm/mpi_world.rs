//! MPI backend.
//!
//! Sparse exchanges go through two all-to-all steps: the byte counts first,
//! then one variable-count all-to-all carrying length-prefixed frames.

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives};
use tracing::debug;

use crate::comm::communicator::{CommError, Communicator, Rank, check_destinations};

/// The MPI world communicator. Finalizes MPI when dropped.
pub struct MpiWorld {
    world: SimpleCommunicator,
    _universe: Universe,
}

impl std::fmt::Debug for MpiWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiWorld")
            .field("rank", &self.world.rank())
            .field("size", &self.world.size())
            .finish()
    }
}

impl MpiWorld {
    /// Initializes MPI.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::Transport`] if MPI was already initialized.
    pub fn initialize() -> Result<Self, CommError> {
        let universe = mpi::initialize().ok_or_else(|| CommError::Transport {
            message: "MPI is already initialized".to_string(),
        })?;
        let world = universe.world();
        debug!(rank = world.rank(), size = world.size(), "MPI initialized");
        Ok(Self {
            world,
            _universe: universe,
        })
    }
}

fn to_count(n: usize) -> Result<i32, CommError> {
    i32::try_from(n).map_err(|_| CommError::Transport {
        message: format!("message of {n} bytes exceeds the MPI count limit"),
    })
}

fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let old = *acc;
            *acc += x;
            Some(old)
        })
        .collect()
}

impl Communicator for MpiWorld {
    #[allow(clippy::cast_sign_loss)]
    fn rank(&self) -> Rank {
        self.world.rank() as Rank
    }

    #[allow(clippy::cast_sign_loss)]
    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn all_reduce_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        let mut out = vec![0_u64; values.len()];
        if !values.is_empty() {
            self.world
                .all_reduce_into(values, &mut out[..], SystemOperation::sum());
        }
        Ok(out)
    }

    fn exclusive_scan_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        let mut out = vec![0_u64; values.len()];
        if !values.is_empty() {
            self.world
                .exclusive_scan_into(values, &mut out[..], SystemOperation::sum());
        }
        // The receive buffer is undefined on rank 0.
        if self.world.rank() == 0 {
            out.iter_mut().for_each(|v| *v = 0);
        }
        Ok(out)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        let mut out = 0.0_f64;
        self.world
            .all_reduce_into(&value, &mut out, SystemOperation::max());
        Ok(out)
    }

    fn all_reduce_min(&self, value: f64) -> Result<f64, CommError> {
        let mut out = 0.0_f64;
        self.world
            .all_reduce_into(&value, &mut out, SystemOperation::min());
        Ok(out)
    }

    fn exchange(&self, outgoing: Vec<(Rank, Vec<u8>)>) -> Result<Vec<(Rank, Vec<u8>)>, CommError> {
        let size = self.size();
        let status = check_destinations(&outgoing, size);

        let mut frames: Vec<Vec<u8>> = vec![Vec::new(); size];
        for (dest, bytes) in outgoing {
            if let Some(frame) = frames.get_mut(dest) {
                frame.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                frame.extend_from_slice(&bytes);
            }
        }
        let counts = frames
            .iter()
            .map(|f| to_count(f.len()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut recv_counts = vec![0_i32; size];
        self.world.all_to_all_into(&counts[..], &mut recv_counts[..]);

        let send_data: Vec<u8> = frames.concat();
        let send_displs = displacements(&counts);
        let recv_displs = displacements(&recv_counts);
        #[allow(clippy::cast_sign_loss)]
        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recv_data = vec![0_u8; total];
        {
            let send = mpi::datatype::Partition::new(&send_data[..], &counts[..], &send_displs[..]);
            let mut recv =
                mpi::datatype::PartitionMut::new(&mut recv_data[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&send, &mut recv);
        }

        let mut received = Vec::new();
        for (src, (&count, &displ)) in recv_counts.iter().zip(&recv_displs).enumerate() {
            #[allow(clippy::cast_sign_loss)]
            let mut chunk = &recv_data[displ as usize..(displ + count) as usize];
            while chunk.len() >= 8 {
                let (len, rest) = chunk.split_at(8);
                let mut len_bytes = [0_u8; 8];
                len_bytes.copy_from_slice(len);
                let len = usize::try_from(u64::from_le_bytes(len_bytes)).map_err(|_| {
                    CommError::Transport {
                        message: "frame length overflow".to_string(),
                    }
                })?;
                if rest.len() < len {
                    return Err(CommError::Transport {
                        message: format!("truncated frame from rank {src}"),
                    });
                }
                let (body, tail) = rest.split_at(len);
                received.push((src, body.to_vec()));
                chunk = tail;
            }
        }
        status.map(|()| received)
    }
}
