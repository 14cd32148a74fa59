//! In-process world: one OS thread per rank.
//!
//! Collectives follow a deposit / barrier / collect / barrier pattern over
//! shared slots, so a rank cannot overwrite a slot before every other rank
//! has read the previous contribution.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use tracing::trace;

use crate::comm::communicator::{CommError, Communicator, Rank, check_destinations};

#[derive(Debug, Clone, Default)]
enum Contribution {
    #[default]
    Empty,
    Ints(Vec<u64>),
    Float(f64),
}

#[derive(Debug)]
struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Contribution>>,
    mailboxes: Mutex<Vec<Vec<(Rank, Vec<u8>)>>>,
}

/// Handle for one rank of a [`ThreadWorld`].
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: Rank,
    shared: Arc<Shared>,
}

/// Launcher for in-process multi-rank runs.
#[derive(Debug, Clone, Copy)]
pub struct ThreadWorld;

impl ThreadWorld {
    /// Runs `f` on `size` ranks, each on its own thread, and returns the
    /// per-rank results in rank order. A panic on any rank is re-raised.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadComm) -> T + Sync,
    {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Contribution::Empty; size]),
            mailboxes: Mutex::new(vec![Vec::new(); size]),
        });
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = ThreadComm {
                        rank,
                        shared: Arc::clone(&shared),
                    };
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}

impl ThreadComm {
    fn gather(&self, mine: Contribution) -> Vec<Contribution> {
        self.shared.slots.lock()[self.rank] = mine;
        self.shared.barrier.wait();
        let all = self.shared.slots.lock().clone();
        self.shared.barrier.wait();
        all
    }

    fn gather_ints(&self, values: &[u64]) -> Result<Vec<Vec<u64>>, CommError> {
        let all = self.gather(Contribution::Ints(values.to_vec()));
        all.into_iter()
            .map(|c| match c {
                Contribution::Ints(v) if v.len() == values.len() => Ok(v),
                Contribution::Ints(v) => Err(CommError::LengthMismatch {
                    expected: values.len(),
                    actual: v.len(),
                }),
                _ => Err(CommError::Transport {
                    message: "ranks disagree on the collective being performed".to_string(),
                }),
            })
            .collect()
    }

    fn gather_floats(&self, value: f64) -> Result<Vec<f64>, CommError> {
        self.gather(Contribution::Float(value))
            .into_iter()
            .map(|c| match c {
                Contribution::Float(v) => Ok(v),
                _ => Err(CommError::Transport {
                    message: "ranks disagree on the collective being performed".to_string(),
                }),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        let all = self.gather_ints(values)?;
        Ok((0..values.len())
            .map(|i| all.iter().map(|v| v[i]).sum())
            .collect())
    }

    fn exclusive_scan_sum(&self, values: &[u64]) -> Result<Vec<u64>, CommError> {
        let all = self.gather_ints(values)?;
        Ok((0..values.len())
            .map(|i| all[..self.rank].iter().map(|v| v[i]).sum())
            .collect())
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64, CommError> {
        Ok(self
            .gather_floats(value)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    fn all_reduce_min(&self, value: f64) -> Result<f64, CommError> {
        Ok(self
            .gather_floats(value)?
            .into_iter()
            .fold(f64::INFINITY, f64::min))
    }

    fn exchange(&self, outgoing: Vec<(Rank, Vec<u8>)>) -> Result<Vec<(Rank, Vec<u8>)>, CommError> {
        // Deliver what we can even on error so peers are not left waiting.
        let status = check_destinations(&outgoing, self.shared.size);
        {
            let mut boxes = self.shared.mailboxes.lock();
            for (dest, bytes) in outgoing {
                if let Some(mailbox) = boxes.get_mut(dest) {
                    mailbox.push((self.rank, bytes));
                }
            }
        }
        self.shared.barrier.wait();
        let mut received = std::mem::take(&mut self.shared.mailboxes.lock()[self.rank]);
        self.shared.barrier.wait();
        received.sort_by_key(|(src, _)| *src);
        trace!(rank = self.rank, messages = received.len(), "thread exchange");
        status.map(|()| received)
    }
}
