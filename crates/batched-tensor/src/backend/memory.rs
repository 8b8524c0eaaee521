//! In-memory backend: an accumulating tensor, or one tensor per batch.

use std::ops::Range;
use std::sync::Arc;

use crate::layout::AxisLayout;
use crate::scalar::Scalar;
use crate::tensor::BlockTensor;

/// Storage strategy for the memory backend.
///
/// A single accumulator is cheapest; per-batch tensors trade memory for
/// keeping each batch separately addressable on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// One shared tensor; batches are summed into it.
    #[default]
    Accumulate,
    /// One independent tensor per batch.
    PerBatch,
}

/// The in-memory representation of all written batches.
///
/// Tensors are held behind `Arc` so duplicated stores share the stored
/// data; writes go through copy-on-write.
#[derive(Debug, Clone)]
pub(crate) enum MemoryStore<T: Scalar> {
    Accumulator(Arc<BlockTensor<T>>),
    PerBatch(Vec<Arc<BlockTensor<T>>>),
}

impl<T: Scalar> MemoryStore<T> {
    /// Allocate storage for a write session of `num_batches` batches.
    pub(crate) fn allocate(
        mode: MemoryMode,
        layouts: Arc<Vec<AxisLayout>>,
        num_batches: usize,
    ) -> Self {
        match mode {
            MemoryMode::Accumulate => {
                MemoryStore::Accumulator(Arc::new(BlockTensor::new(layouts)))
            }
            MemoryMode::PerBatch => MemoryStore::PerBatch(
                (0..num_batches)
                    .map(|_| Arc::new(BlockTensor::new(layouts.clone())))
                    .collect(),
            ),
        }
    }

    /// Sum the incoming batch's blocks (restricted to the batch's block
    /// bounds) into the backing tensor. Returns the local element count
    /// moved in.
    pub(crate) fn put(
        &mut self,
        batch: usize,
        incoming: &mut BlockTensor<T>,
        bounds: &[Range<usize>],
    ) -> u64 {
        let moved = incoming.elements_within(bounds) as u64;
        let target = match self {
            MemoryStore::Accumulator(acc) => acc,
            MemoryStore::PerBatch(slots) => &mut slots[batch],
        };
        Arc::make_mut(target).merge_from(incoming, bounds, true);
        moved
    }

    /// The tensor exposed to readers for one batch.
    pub(crate) fn batch_tensor(&self, batch: usize) -> Option<&BlockTensor<T>> {
        match self {
            MemoryStore::Accumulator(acc) => Some(acc),
            MemoryStore::PerBatch(slots) => slots.get(batch).map(|t| &**t),
        }
    }

    /// Re-bin per-batch tensors under a new grouping.
    ///
    /// `batch_bounds[new_batch]` gives the per-axis block bounds of that
    /// batch under the new grouping. No-op for the accumulator strategy,
    /// which is grouping-agnostic.
    pub(crate) fn regroup(
        &mut self,
        layouts: Arc<Vec<AxisLayout>>,
        batch_bounds: &[Vec<Range<usize>>],
    ) {
        if let MemoryStore::PerBatch(slots) = self {
            let mut rebinned: Vec<Arc<BlockTensor<T>>> = (0..batch_bounds.len())
                .map(|_| Arc::new(BlockTensor::new(layouts.clone())))
                .collect();
            for slot in slots.iter_mut() {
                let src = Arc::make_mut(slot);
                for (dst, bounds) in rebinned.iter_mut().zip(batch_bounds) {
                    Arc::make_mut(dst).merge_from(src, bounds, true);
                }
            }
            *self = MemoryStore::PerBatch(rebinned);
        }
    }
}
