//! Axis block layouts and batch partitioning.
//!
//! Each axis of the sparse tensor is divided into blocks; the blocks of an
//! axis are in turn grouped into batches of approximately equal element
//! volume. Batch bounds are computed once at construction and never change.

use std::ops::Range;

use crate::error::{Result, StoreError};

/// Block layout of one tensor axis.
///
/// Holds the ordered block extents and their cumulative element offsets.
/// For example, an axis with extents `[3, 4, 3]` spans 10 elements.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisLayout {
    /// Size of each block in elements.
    block_sizes: Vec<usize>,
    /// Cumulative offsets: `[0, s0, s0+s1, ..., total_dim]`.
    offsets: Vec<usize>,
}

impl AxisLayout {
    /// Create a layout from block extents.
    pub fn new(block_sizes: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(block_sizes.len() + 1);
        offsets.push(0);
        let mut cumsum = 0;
        for &size in &block_sizes {
            cumsum += size;
            offsets.push(cumsum);
        }
        Self {
            block_sizes,
            offsets,
        }
    }

    /// Number of blocks on this axis.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.block_sizes.len()
    }

    /// Total element extent (sum of all block sizes).
    #[inline]
    pub fn total_dim(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    /// Size of one block.
    #[inline]
    pub fn block_size(&self, block: usize) -> usize {
        self.block_sizes[block]
    }

    /// Element range covered by one block.
    #[inline]
    pub fn block_range(&self, block: usize) -> Range<usize> {
        self.offsets[block]..self.offsets[block + 1]
    }

    /// Starting element offset of one block.
    #[inline]
    pub fn block_offset(&self, block: usize) -> usize {
        self.offsets[block]
    }

    /// The block extents.
    #[inline]
    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }
}

/// Per-axis construction input: block extents plus an optional group map.
///
/// When a group map is given, no batch boundary may separate two blocks
/// sharing a group id (except possibly the boundary adjacent to the final
/// block).
#[derive(Debug, Clone)]
pub struct AxisBlocks {
    /// Ordered block extents in elements.
    pub sizes: Vec<usize>,
    /// Optional block-to-group mapping, one entry per block.
    pub groups: Option<Vec<usize>>,
}

impl AxisBlocks {
    /// Axis input without a grouping constraint.
    pub fn new(sizes: Vec<usize>) -> Self {
        Self {
            sizes,
            groups: None,
        }
    }

    /// Axis input with a grouping constraint.
    pub fn with_groups(sizes: Vec<usize>, groups: Vec<usize>) -> Self {
        Self {
            sizes,
            groups: Some(groups),
        }
    }
}

/// Partition of an axis's blocks into batches.
///
/// The half-open ranges tile `[0, num_blocks)` in order, with no gaps or
/// overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchBound {
    ranges: Vec<Range<usize>>,
}

impl BatchBound {
    /// Number of batches on this axis.
    #[inline]
    pub fn num_batches(&self) -> usize {
        self.ranges.len()
    }

    /// Block-index range of one batch.
    #[inline]
    pub fn block_range(&self, batch: usize) -> Range<usize> {
        self.ranges[batch].clone()
    }

    /// The batch containing a given block, if any.
    pub fn batch_of(&self, block: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(&block))
    }

    /// All batch ranges in order.
    #[inline]
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Element range covered by one batch.
    pub fn element_range(&self, layout: &AxisLayout, batch: usize) -> Range<usize> {
        let r = &self.ranges[batch];
        layout.block_offset(r.start)..layout.block_offset(r.end)
    }
}

/// Partition an axis's blocks into `target` batches of approximately equal
/// element volume.
///
/// Walks blocks in order accumulating a running element sum and closes a
/// batch when the sum first reaches `batch_index * (volume / target)`, but
/// never between two blocks sharing a group id. `target` is clamped to the
/// block count. Each batch's volume deviates from the ideal share by at
/// most one block's volume.
pub fn plan_batches(
    layout: &AxisLayout,
    target: usize,
    group_map: Option<&[usize]>,
) -> Result<BatchBound> {
    let num_blocks = layout.num_blocks();
    if let Some(map) = group_map {
        if map.len() != num_blocks {
            return Err(StoreError::GroupMapMismatch {
                map_len: map.len(),
                num_blocks,
            });
        }
    }

    let target = target.clamp(1, num_blocks.max(1));
    let per_batch = layout.total_dim() as f64 / target as f64;

    let mut ranges = Vec::with_capacity(target);
    let mut sum = 0usize;
    let mut batch = 1usize;
    let mut first = 0usize;

    for i in 0..num_blocks {
        sum += layout.block_size(i);

        // the final block always closes the last batch, whatever its group
        if i == num_blocks - 1 {
            ranges.push(first..num_blocks);
            break;
        }

        let group_boundary = match group_map {
            Some(map) => map[i] != map[i + 1],
            None => true,
        };

        if group_boundary && sum as f64 >= batch as f64 * per_batch {
            ranges.push(first..i + 1);
            first = i + 1;
            batch += 1;
        }
    }

    if ranges.is_empty() {
        return Err(StoreError::EmptyPartition);
    }

    Ok(BatchBound { ranges })
}
