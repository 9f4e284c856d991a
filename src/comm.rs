//! Thin façade over collective reductions across partition ranks.
//!
//! The topology policies are rank-synchronous: the fixed-point loops of
//! `consistent_refinement`/`consistent_unrefinement` and the global change
//! counts in the drivers must agree on every rank or the run deadlocks.
//! Taking a [`Collective`] parameter makes that visible in the signature —
//! a caller cannot accidentally invoke them on a subset of ranks.
//!
//! Backends: [`NoComm`] for serial runs, [`LocalComm`] for multi-threaded
//! tests (mailbox rendezvous over byte payloads), and `MpiComm` behind the
//! `mpi-support` feature for real distributed runs.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Collective reduction interface (minimal by design).
///
/// All operations are synchronous barriers: every rank must call them the
/// same number of times in the same order.
pub trait Collective: Send + Sync {
    /// This rank's index.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn n_ranks(&self) -> usize;
    /// Sum across ranks.
    fn all_reduce_sum(&self, value: u64) -> u64;
    /// Minimum across ranks.
    fn all_reduce_min(&self, value: u64) -> u64;
    /// Maximum across ranks.
    fn all_reduce_max(&self, value: u64) -> u64;
    /// Logical or across ranks.
    fn all_reduce_or(&self, value: bool) -> bool {
        self.all_reduce_max(value as u64) != 0
    }
    /// True when more than one rank participates.
    fn is_parallel(&self) -> bool {
        self.n_ranks() > 1
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Collective for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn n_ranks(&self) -> usize {
        1
    }
    fn all_reduce_sum(&self, value: u64) -> u64 {
        value
    }
    fn all_reduce_min(&self, value: u64) -> u64 {
        value
    }
    fn all_reduce_max(&self, value: u64) -> u64 {
        value
    }
}

// --- LocalComm: intra-process, thread-per-rank -------------------------------

#[derive(Debug, Default)]
struct GroupState {
    mailbox: DashMap<(u64, usize), Bytes>,
}

/// Intra-process collective for tests: one instance per thread, all sharing
/// a mailbox. Each reduction posts this rank's value for the current round
/// and spin-waits for the others.
///
/// This is a test harness, not a transport: rounds are retained for two
/// generations before being pruned, and progress relies on every rank
/// calling the same reductions.
#[derive(Debug)]
pub struct LocalComm {
    state: Arc<GroupState>,
    rank: usize,
    n_ranks: usize,
    round: AtomicU64,
}

impl LocalComm {
    /// Creates a group of `n` communicators sharing one mailbox; hand one to
    /// each thread.
    pub fn group(n: usize) -> Vec<LocalComm> {
        assert!(n > 0, "a communicator group needs at least one rank");
        let state = Arc::new(GroupState::default());
        (0..n)
            .map(|rank| LocalComm {
                state: Arc::clone(&state),
                rank,
                n_ranks: n,
                round: AtomicU64::new(0),
            })
            .collect()
    }

    fn exchange(&self, value: u64) -> Vec<u64> {
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        self.state
            .mailbox
            .insert((round, self.rank), Bytes::copy_from_slice(&value.to_le_bytes()));

        let mut values = vec![0u64; self.n_ranks];
        for rank in 0..self.n_ranks {
            loop {
                if let Some(bytes) = self.state.mailbox.get(&(round, rank)) {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&bytes[..8]);
                    values[rank] = u64::from_le_bytes(raw);
                    break;
                }
                std::thread::yield_now();
            }
        }

        // Everyone has passed round - 2 by now; drop our stale entry.
        if round >= 2 {
            self.state.mailbox.remove(&(round - 2, self.rank));
        }
        values
    }
}

impl Collective for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn n_ranks(&self) -> usize {
        self.n_ranks
    }
    fn all_reduce_sum(&self, value: u64) -> u64 {
        self.exchange(value).iter().sum()
    }
    fn all_reduce_min(&self, value: u64) -> u64 {
        self.exchange(value).into_iter().min().unwrap_or(value)
    }
    fn all_reduce_max(&self, value: u64) -> u64 {
        self.exchange(value).into_iter().max().unwrap_or(value)
    }
}

// --- MPI backend (feature = "mpi-support") -----------------------------------

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Collective;
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI-backed collective over the world communicator.
    pub struct MpiComm {
        world: SimpleCommunicator,
        universe: Option<mpi::environment::Universe>,
    }

    impl MpiComm {
        /// Initializes MPI (once per process) and wraps the world
        /// communicator.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            Some(MpiComm {
                world,
                universe: Some(universe),
            })
        }
    }

    impl Collective for MpiComm {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }
        fn n_ranks(&self) -> usize {
            self.world.size() as usize
        }
        fn all_reduce_sum(&self, value: u64) -> u64 {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            out
        }
        fn all_reduce_min(&self, value: u64) -> u64 {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::min());
            out
        }
        fn all_reduce_max(&self, value: u64) -> u64 {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            out
        }
    }

    impl Drop for MpiComm {
        fn drop(&mut self) {
            // Universe finalizes MPI when dropped.
            let _ = self.universe.take();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
