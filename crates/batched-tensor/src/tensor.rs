//! Per-worker block-sparse working tensor.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::layout::AxisLayout;
use crate::scalar::Scalar;

/// Index of one block: one block coordinate per axis.
pub type BlockIndex = Vec<usize>;

/// Whether a block index lies inside per-axis block bounds.
pub(crate) fn block_in_bounds(index: &[usize], bounds: &[Range<usize>]) -> bool {
    index.iter().zip(bounds).all(|(i, r)| r.contains(i))
}

/// The local (per-worker) portion of a block-sparse tensor.
///
/// Blocks are dense row-major chunks keyed by their block index. The map is
/// ordered, so iteration, and therefore the on-disk layout of a batch, is
/// deterministic.
#[derive(Debug, Clone)]
pub struct BlockTensor<T: Scalar> {
    layouts: Arc<Vec<AxisLayout>>,
    blocks: BTreeMap<BlockIndex, Vec<T>>,
}

impl<T: Scalar> BlockTensor<T> {
    /// Create an empty tensor over shared axis layouts.
    pub fn new(layouts: Arc<Vec<AxisLayout>>) -> Self {
        Self {
            layouts,
            blocks: BTreeMap::new(),
        }
    }

    /// The axis layouts.
    pub fn layouts(&self) -> &[AxisLayout] {
        &self.layouts
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.layouts.len()
    }

    /// Shape of one block.
    pub fn block_shape(&self, index: &[usize]) -> Vec<usize> {
        index
            .iter()
            .zip(self.layouts.iter())
            .map(|(&b, l)| l.block_size(b))
            .collect()
    }

    /// Element count of one block.
    pub fn block_len(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(self.layouts.iter())
            .map(|(&b, l)| l.block_size(b))
            .product()
    }

    /// Set a block, replacing any existing data.
    pub fn insert_block(&mut self, index: BlockIndex, data: Vec<T>) {
        debug_assert_eq!(data.len(), self.block_len(&index));
        self.blocks.insert(index, data);
    }

    /// Add data into a block element-wise, creating it if absent.
    pub fn accumulate_block(&mut self, index: BlockIndex, data: Vec<T>) {
        debug_assert_eq!(data.len(), self.block_len(&index));
        match self.blocks.get_mut(&index) {
            Some(existing) => {
                for (a, b) in existing.iter_mut().zip(data) {
                    *a = *a + b;
                }
            }
            None => {
                self.blocks.insert(index, data);
            }
        }
    }

    /// Get a block's data (`None` for absent blocks).
    pub fn get_block(&self, index: &[usize]) -> Option<&[T]> {
        self.blocks.get(index).map(|v| v.as_slice())
    }

    /// Remove a block.
    pub fn remove_block(&mut self, index: &[usize]) -> Option<Vec<T>> {
        self.blocks.remove(index)
    }

    /// Allocate zero-filled blocks for the given indices, keeping any
    /// existing data.
    pub fn reserve<I: IntoIterator<Item = BlockIndex>>(&mut self, indices: I) {
        for index in indices {
            let len = self.block_len(&index);
            self.blocks.entry(index).or_insert_with(|| vec![T::zero(); len]);
        }
    }

    /// Number of stored blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of stored elements.
    pub fn num_elements(&self) -> usize {
        self.blocks.values().map(|v| v.len()).sum()
    }

    /// Whether no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Iterate stored blocks in index order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (&BlockIndex, &[T])> {
        self.blocks.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Stored block indices in order.
    pub fn block_indices(&self) -> impl Iterator<Item = &BlockIndex> {
        self.blocks.keys()
    }

    /// Remove blocks whose largest magnitude is below `eps`.
    pub fn filter(&mut self, eps: f64) {
        self.blocks
            .retain(|_, data| data.iter().any(|v| v.magnitude() >= eps));
    }

    /// Elements stored in blocks whose indices fall inside `bounds`.
    pub fn elements_within(&self, bounds: &[Range<usize>]) -> usize {
        self.blocks
            .iter()
            .filter(|(idx, _)| block_in_bounds(idx, bounds))
            .map(|(_, v)| v.len())
            .sum()
    }

    /// Move blocks whose indices fall inside `bounds` out of `src` and into
    /// this tensor, either summing into existing blocks or replacing them.
    pub fn merge_from(&mut self, src: &mut Self, bounds: &[Range<usize>], sum: bool) {
        let keys: Vec<BlockIndex> = src
            .blocks
            .keys()
            .filter(|idx| block_in_bounds(idx, bounds))
            .cloned()
            .collect();
        for index in keys {
            if let Some(data) = src.blocks.remove(&index) {
                if sum {
                    self.accumulate_block(index, data);
                } else {
                    self.blocks.insert(index, data);
                }
            }
        }
    }

    /// Concatenate all block data in index order.
    pub fn pack(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.num_elements());
        for data in self.blocks.values() {
            out.extend_from_slice(data);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AxisLayout;

    fn layouts() -> Arc<Vec<AxisLayout>> {
        Arc::new(vec![
            AxisLayout::new(vec![2, 3]),
            AxisLayout::new(vec![1, 2]),
        ])
    }

    #[test]
    fn test_insert_and_shape() {
        let mut t = BlockTensor::<f64>::new(layouts());
        assert_eq!(t.block_shape(&[1, 1]), vec![3, 2]);
        t.insert_block(vec![1, 1], vec![1.0; 6]);
        assert_eq!(t.num_blocks(), 1);
        assert_eq!(t.num_elements(), 6);
        assert_eq!(t.get_block(&[1, 1]), Some(&[1.0; 6][..]));
    }

    #[test]
    fn test_accumulate() {
        let mut t = BlockTensor::<f64>::new(layouts());
        t.accumulate_block(vec![0, 0], vec![1.0, 2.0]);
        t.accumulate_block(vec![0, 0], vec![0.5, 0.5]);
        assert_eq!(t.get_block(&[0, 0]), Some(&[1.5, 2.5][..]));
    }

    #[test]
    fn test_reserve_keeps_existing() {
        let mut t = BlockTensor::<f64>::new(layouts());
        t.insert_block(vec![0, 0], vec![4.0, 4.0]);
        t.reserve(vec![vec![0, 0], vec![0, 1]]);
        assert_eq!(t.get_block(&[0, 0]), Some(&[4.0, 4.0][..]));
        assert_eq!(t.get_block(&[0, 1]), Some(&[0.0; 4][..]));
    }

    #[test]
    fn test_filter() {
        let mut t = BlockTensor::<f64>::new(layouts());
        t.insert_block(vec![0, 0], vec![1e-20, -1e-18]);
        t.insert_block(vec![1, 0], vec![0.0, 0.0, 1.0]);
        t.filter(1e-12);
        assert_eq!(t.num_blocks(), 1);
        assert!(t.get_block(&[1, 0]).is_some());
    }

    #[test]
    fn test_merge_bounded() {
        let mut src = BlockTensor::<f64>::new(layouts());
        src.insert_block(vec![0, 0], vec![1.0, 1.0]);
        src.insert_block(vec![1, 0], vec![2.0, 2.0, 2.0]);

        let mut dst = BlockTensor::<f64>::new(layouts());
        // only blocks with first coordinate 0 are in bounds
        dst.merge_from(&mut src, &[0..1, 0..2], true);
        assert_eq!(dst.num_blocks(), 1);
        assert_eq!(src.num_blocks(), 1);
        assert!(dst.get_block(&[0, 0]).is_some());
        assert!(src.get_block(&[1, 0]).is_some());
    }

    #[test]
    fn test_pack_order_is_deterministic() {
        let mut t = BlockTensor::<f64>::new(layouts());
        t.insert_block(vec![1, 0], vec![3.0, 3.0, 3.0]);
        t.insert_block(vec![0, 0], vec![1.0, 1.0]);
        // index order, not insertion order
        assert_eq!(t.pack(), vec![1.0, 1.0, 3.0, 3.0, 3.0]);
    }
}
