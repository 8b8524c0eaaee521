//! Soft per-batch capacity estimation.
//!
//! Before a write or read session starts, the store estimates the
//! per-worker footprint of one batch. An oversized estimate does not stop
//! execution; it logs a single warning for the lifetime of the guard and
//! stays silent afterwards.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Bytes above which a per-worker batch is considered oversized.
pub const DEFAULT_BATCH_LIMIT: u64 = 2_000_000_000;

/// Sticky, group-wide capacity warning state.
///
/// Shared (via `Arc`) between a store, its duplicates, and stores templated
/// from it, so the warning fires at most once per family of stores.
#[derive(Debug)]
pub struct CapacityGuard {
    limit: u64,
    warned: AtomicBool,
}

impl CapacityGuard {
    /// Guard with a custom byte limit.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            warned: AtomicBool::new(false),
        }
    }

    /// Whether the warning has fired.
    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Relaxed)
    }

    /// Estimate the per-worker, per-batch footprint and warn once if it
    /// reaches the limit. Returns whether the estimate fits.
    pub fn check(
        &self,
        total_elements: u64,
        num_workers: usize,
        num_batches: usize,
        byte_width: usize,
    ) -> bool {
        let per_batch = total_elements / num_workers.max(1) as u64 / num_batches.max(1) as u64;
        let bytes = per_batch.saturating_mul(byte_width as u64);
        if bytes >= self.limit {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(
                    estimated_bytes = bytes,
                    limit = self.limit,
                    "batch may not fit in per-worker memory; \
                     increase the number of batches or workers"
                );
            }
            false
        } else {
            true
        }
    }
}

impl Default for CapacityGuard {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_LIMIT)
    }
}
