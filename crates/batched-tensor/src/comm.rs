//! Worker groups and collective exchange.
//!
//! The store runs in SPMD fashion: a fixed group of workers executes the
//! same program, each owning a disjoint set of blocks. Every session
//! operation is collective: each worker must invoke it with matching
//! arguments and in the same relative order, or the group deadlocks.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

/// A fixed group of cooperating workers.
pub trait Communicator: Send + Sync {
    /// This worker's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Gather one value from every worker, in rank order (collective).
    fn all_gather(&self, value: u64) -> Vec<u64>;

    /// Distribute `value` from `root` to every worker (collective).
    fn broadcast(&self, root: usize, value: u64) -> u64;

    /// Wait until every worker reaches this point (collective).
    fn barrier(&self);
}

/// The trivial single-worker group.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, value: u64) -> Vec<u64> {
        vec![value]
    }

    fn broadcast(&self, _root: usize, value: u64) -> u64 {
        value
    }

    fn barrier(&self) {}
}

struct GroupShared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<u64>>,
}

/// An in-process worker group whose members run on dedicated threads.
///
/// One member per worker; each member is moved to the thread that drives
/// that worker. Exchanges go through a shared gather buffer guarded by a
/// barrier on each side.
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl ThreadGroup {
    /// Create all members of a group of `size` workers.
    pub fn split(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "worker group must not be empty");
        let shared = Arc::new(GroupShared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![0; size]),
        });
        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather(&self, value: u64) -> Vec<u64> {
        self.shared.slots.lock()[self.rank] = value;
        self.shared.barrier.wait();
        let out = self.shared.slots.lock().clone();
        // keep the buffer stable until every worker has read it
        self.shared.barrier.wait();
        out
    }

    fn broadcast(&self, root: usize, value: u64) -> u64 {
        if self.rank == root {
            self.shared.slots.lock()[root] = value;
        }
        self.shared.barrier.wait();
        let out = self.shared.slots.lock()[root];
        self.shared.barrier.wait();
        out
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
