//! Write and read views: per-batch, per-worker bookkeeping.

use std::path::PathBuf;

/// Bookkeeping for one axis grouping of batches.
///
/// Records, for every flattened batch id and worker rank, how many blocks
/// and elements that worker contributed, plus the index file describing
/// where those blocks live in the data file. The write view is filled in
/// batch by batch during a write session and sealed at finalize; read views
/// are rebuilt from the write view's index and never change afterwards.
#[derive(Debug, Clone, Default)]
pub(crate) struct BatchView {
    /// Axes the batches are grouped over.
    pub(crate) dims: Vec<usize>,
    /// Flattened batch count (product of per-axis batch counts).
    pub(crate) num_batches: usize,
    /// `[batch][worker]` block counts.
    pub(crate) blocks: Vec<Vec<u64>>,
    /// `[batch][worker]` element counts.
    pub(crate) elements: Vec<Vec<u64>>,
    /// Index file describing this grouping (file backend only).
    pub(crate) index_path: Option<PathBuf>,
}

impl BatchView {
    pub(crate) fn new(dims: Vec<usize>, num_batches: usize, num_workers: usize) -> Self {
        Self {
            dims,
            num_batches,
            blocks: vec![vec![0; num_workers]; num_batches],
            elements: vec![vec![0; num_workers]; num_batches],
            index_path: None,
        }
    }

    /// Record the gathered per-worker counts for one batch.
    pub(crate) fn record(&mut self, batch: usize, blocks: Vec<u64>, elements: Vec<u64>) {
        self.blocks[batch] = blocks;
        self.elements[batch] = elements;
    }

    /// Blocks recorded before `(batch, rank)` in file order: all blocks of
    /// earlier batches plus this batch's blocks on lower ranks.
    pub(crate) fn blocks_before(&self, batch: usize, rank: usize) -> u64 {
        let prior: u64 = self.blocks[..batch]
            .iter()
            .map(|per_rank| per_rank.iter().sum::<u64>())
            .sum();
        prior + self.blocks[batch][..rank].iter().sum::<u64>()
    }

    /// Elements recorded before `(batch, rank)` in file order.
    pub(crate) fn elements_before(&self, batch: usize, rank: usize) -> u64 {
        let prior: u64 = self.elements[..batch]
            .iter()
            .map(|per_rank| per_rank.iter().sum::<u64>())
            .sum();
        prior + self.elements[batch][..rank].iter().sum::<u64>()
    }

    /// This worker's block count for one batch.
    pub(crate) fn local_blocks(&self, batch: usize, rank: usize) -> u64 {
        self.blocks[batch][rank]
    }

    /// This worker's element count for one batch.
    pub(crate) fn local_elements(&self, batch: usize, rank: usize) -> u64 {
        self.elements[batch][rank]
    }

    /// All blocks contributed to one batch.
    pub(crate) fn total_blocks_in(&self, batch: usize) -> u64 {
        self.blocks[batch].iter().sum()
    }

    /// All elements contributed to one batch.
    pub(crate) fn total_elements_in(&self, batch: usize) -> u64 {
        self.elements[batch].iter().sum()
    }
}
