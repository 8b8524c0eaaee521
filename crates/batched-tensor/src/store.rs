//! The batched tensor store facade.
//!
//! A [`BatchedTensor`] holds a block-sparse tensor too large for worker
//! memory by splitting it into batches along a chosen subset of axes.
//! Batches are moved in and out through write and read sessions; every
//! session call is collective over the worker group.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{
    BackendKind, FileStore, GeneratedStore, Generator, MemoryMode, MemoryStore, Store,
    DEFAULT_FILTER_EPS,
};
use crate::capacity::{CapacityGuard, DEFAULT_BATCH_LIMIT};
use crate::comm::Communicator;
use crate::error::{Result, StoreError};
use crate::layout::{plan_batches, AxisBlocks, AxisLayout, BatchBound};
use crate::scalar::Scalar;
use crate::tensor::{block_in_bounds, BlockTensor};
use crate::view::BatchView;

/// Construction options beyond the backend kind.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Root under which the file backend creates its scratch directory.
    /// Defaults to the system temporary directory.
    pub scratch_dir: Option<PathBuf>,
    /// Storage strategy for the memory backend.
    pub memory_mode: MemoryMode,
    /// Threshold below which generated blocks are dropped.
    pub filter_eps: f64,
    /// Byte limit for the per-batch capacity estimate.
    pub capacity_limit: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            memory_mode: MemoryMode::default(),
            filter_eps: DEFAULT_FILTER_EPS,
            capacity_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

/// A batched, out-of-core block-sparse tensor.
///
/// Axis layouts and batch bounds are fixed at construction. Data flows in
/// through a write session (`begin_write`, `write_batch` in increasing
/// batch order, `finish_write`) and back out through a read session
/// (`begin_read`, `read_batch`, `work_tensor`, `finish_read`), possibly
/// under a different axis grouping than the one it was written with.
pub struct BatchedTensor<T: Scalar> {
    name: String,
    comm: Arc<dyn Communicator>,
    layouts: Arc<Vec<AxisLayout>>,
    group_maps: Arc<Vec<Option<Vec<usize>>>>,
    bounds: Arc<Vec<BatchBound>>,
    kind: BackendKind,
    store: Store<T>,
    capacity: Arc<CapacityGuard>,
    scratch_root: PathBuf,
    filter_eps: f64,

    nblk_total: u64,
    nze_total: u64,
    nblk_local: u64,
    nze_local: u64,

    write_view: Arc<BatchView>,
    read_views: BTreeMap<Vec<usize>, Arc<BatchView>>,

    work: Option<BlockTensor<T>>,
    read: Option<BlockTensor<T>>,
    write_active: bool,
    read_active: bool,
    last_written: Option<usize>,
    read_dims: Vec<usize>,
    read_contiguous: bool,
    memory_current: Option<usize>,
    memory_dims: Vec<usize>,
}

impl<T: Scalar> BatchedTensor<T> {
    /// Create a store over the given axes. Collective.
    ///
    /// `batch_targets[d]` is the requested number of batches along axis
    /// `d`; it is clamped to the axis's block count. Axes meant to stay
    /// whole use a target of 1.
    pub fn new(
        comm: Arc<dyn Communicator>,
        name: &str,
        axes: Vec<AxisBlocks>,
        batch_targets: &[usize],
        kind: BackendKind,
        options: StoreOptions,
    ) -> Result<Self> {
        if batch_targets.len() != axes.len() {
            return Err(StoreError::RankMismatch {
                expected: axes.len(),
                actual: batch_targets.len(),
            });
        }

        let layouts: Vec<AxisLayout> = axes
            .iter()
            .map(|a| AxisLayout::new(a.sizes.clone()))
            .collect();
        let bounds: Vec<BatchBound> = layouts
            .iter()
            .zip(axes.iter().zip(batch_targets))
            .map(|(layout, (axis, &target))| {
                plan_batches(layout, target, axis.groups.as_deref())
            })
            .collect::<Result<_>>()?;
        let group_maps: Vec<Option<Vec<usize>>> = axes.into_iter().map(|a| a.groups).collect();

        let scratch_root = options
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let store = match kind {
            BackendKind::Memory => Store::Memory {
                mode: options.memory_mode,
                store: None,
            },
            BackendKind::File => Store::File(Arc::new(FileStore::create(
                Arc::clone(&comm),
                &scratch_root,
                name,
                layouts.len(),
            )?)),
            BackendKind::Generated => Store::Generated(GeneratedStore::new(options.filter_eps)),
        };

        info!(
            name,
            kind = kind.as_str(),
            axes = layouts.len(),
            batches = ?bounds.iter().map(|b| b.num_batches()).collect::<Vec<_>>(),
            "created batched tensor"
        );

        Ok(Self {
            name: name.to_string(),
            comm,
            layouts: Arc::new(layouts),
            group_maps: Arc::new(group_maps),
            bounds: Arc::new(bounds),
            kind,
            store,
            capacity: Arc::new(CapacityGuard::new(options.capacity_limit)),
            scratch_root,
            filter_eps: options.filter_eps,
            nblk_total: 0,
            nze_total: 0,
            nblk_local: 0,
            nze_local: 0,
            write_view: Arc::new(BatchView::default()),
            read_views: BTreeMap::new(),
            work: None,
            read: None,
            write_active: false,
            read_active: false,
            last_written: None,
            read_dims: Vec::new(),
            read_contiguous: false,
            memory_current: None,
            memory_dims: Vec::new(),
        })
    }

    /// A fresh, empty store over the same axes and batch bounds as `self`,
    /// with a backend of the given kind and sharing the capacity guard.
    /// Collective for the file backend.
    pub fn from_template(&self, name: &str, kind: BackendKind) -> Result<Self> {
        let mode = match &self.store {
            Store::Memory { mode, .. } => *mode,
            _ => MemoryMode::default(),
        };
        let store = match kind {
            BackendKind::Memory => Store::Memory { mode, store: None },
            BackendKind::File => Store::File(Arc::new(FileStore::create(
                Arc::clone(&self.comm),
                &self.scratch_root,
                name,
                self.layouts.len(),
            )?)),
            BackendKind::Generated => Store::Generated(GeneratedStore::new(self.filter_eps)),
        };
        Ok(Self {
            name: name.to_string(),
            comm: Arc::clone(&self.comm),
            layouts: Arc::clone(&self.layouts),
            group_maps: Arc::clone(&self.group_maps),
            bounds: Arc::clone(&self.bounds),
            kind,
            store,
            capacity: Arc::clone(&self.capacity),
            scratch_root: self.scratch_root.clone(),
            filter_eps: self.filter_eps,
            nblk_total: 0,
            nze_total: 0,
            nblk_local: 0,
            nze_local: 0,
            write_view: Arc::new(BatchView::default()),
            read_views: BTreeMap::new(),
            work: None,
            read: None,
            write_active: false,
            read_active: false,
            last_written: None,
            read_dims: Vec::new(),
            read_contiguous: false,
            memory_current: None,
            memory_dims: Vec::new(),
        })
    }

    /// An independent handle onto the same stored data, with its own
    /// session state. File-backed duplicates share the backing files;
    /// memory-backed duplicates share the stored tensors copy-on-write.
    pub fn duplicate(&self) -> Self {
        let store = match &self.store {
            Store::Memory { mode, store } => Store::Memory {
                mode: *mode,
                store: store.clone(),
            },
            Store::File(f) => Store::File(Arc::clone(f)),
            Store::Generated(g) => Store::Generated(g.clone()),
        };
        Self {
            name: self.name.clone(),
            comm: Arc::clone(&self.comm),
            layouts: Arc::clone(&self.layouts),
            group_maps: Arc::clone(&self.group_maps),
            bounds: Arc::clone(&self.bounds),
            kind: self.kind,
            store,
            capacity: Arc::clone(&self.capacity),
            scratch_root: self.scratch_root.clone(),
            filter_eps: self.filter_eps,
            nblk_total: self.nblk_total,
            nze_total: self.nze_total,
            nblk_local: self.nblk_local,
            nze_local: self.nze_local,
            write_view: Arc::clone(&self.write_view),
            read_views: self.read_views.clone(),
            work: None,
            read: None,
            write_active: false,
            read_active: false,
            last_written: None,
            read_dims: Vec::new(),
            read_contiguous: false,
            memory_current: None,
            memory_dims: self.memory_dims.clone(),
        }
    }

    // ------------------------------------------------------------------
    // write session

    /// Start a write session batched over the axes in `dims`. Collective.
    ///
    /// Discards any previously stored data.
    pub fn begin_write(&mut self, dims: &[usize]) -> Result<()> {
        if self.read_active {
            return Err(StoreError::SessionConflict {
                requested: "write",
                active: "read",
            });
        }
        self.validate_dims(dims)?;

        let num_batches: usize = dims.iter().map(|&d| self.bounds[d].num_batches()).product();
        self.capacity.check(
            self.dense_size(),
            self.comm.size(),
            num_batches,
            T::WIDTH,
        );

        debug!(name = %self.name, ?dims, num_batches, "write session started");

        // stale read views refer to the data being replaced
        if let Store::File(fstore) = &self.store {
            let fstore = Arc::clone(fstore);
            for dims in self.read_views.keys() {
                fstore.remove_index(&fstore.read_index_path(dims))?;
            }
            fstore.remove_index(&fstore.write_index_path())?;
            fstore.create_data_file()?;
        }
        self.read_views.clear();

        self.write_view = Arc::new(BatchView::new(dims.to_vec(), num_batches, self.comm.size()));
        if let Store::Memory { mode, store } = &mut self.store {
            *store = Some(MemoryStore::allocate(
                *mode,
                Arc::clone(&self.layouts),
                num_batches,
            ));
        }

        self.nblk_total = 0;
        self.nze_total = 0;
        self.nblk_local = 0;
        self.nze_local = 0;
        self.last_written = None;
        self.memory_dims = dims.to_vec();
        self.write_active = true;
        Ok(())
    }

    /// Write one batch. Collective; flattened batch ids must be strictly
    /// increasing within the session, and every worker must pass the same
    /// `index`.
    ///
    /// Blocks of `tensor` inside the batch's bounds are moved into the
    /// store; blocks outside stay behind. An empty `tensor` is a valid
    /// contribution and still participates in the exchange.
    pub fn write_batch(&mut self, index: &[usize], tensor: &mut BlockTensor<T>) -> Result<()> {
        if !self.write_active {
            return Err(StoreError::SessionNotInitialized("write"));
        }
        let dims = self.write_view.dims.clone();
        let flat = self.flatten(&dims, index)?;
        if let Some(last) = self.last_written {
            if flat <= last {
                return Err(StoreError::BatchOutOfOrder { got: flat, last });
            }
        }
        let blk_bounds = self.batch_bounds_flat(&dims, flat);
        let rank = self.comm.rank();

        match &mut self.store {
            Store::Memory { store, .. } => {
                let ms = store
                    .as_mut()
                    .ok_or(StoreError::SessionNotInitialized("write"))?;
                let moved_blocks = tensor
                    .block_indices()
                    .filter(|idx| block_in_bounds(idx, &blk_bounds))
                    .count() as u64;
                let moved = ms.put(flat, tensor, &blk_bounds);
                let blocks = self.comm.all_gather(moved_blocks);
                let elements = self.comm.all_gather(moved);
                self.nblk_local += moved_blocks;
                self.nze_local += moved;
                self.nblk_total += blocks.iter().sum::<u64>();
                self.nze_total += elements.iter().sum::<u64>();
            }
            Store::File(fstore) => {
                let fstore = Arc::clone(fstore);
                let mut batch = BlockTensor::new(Arc::clone(&self.layouts));
                batch.merge_from(tensor, &blk_bounds, false);
                let view = Arc::make_mut(&mut self.write_view);
                fstore.put(view, flat, &batch)?;
                self.nblk_local += view.local_blocks(flat, rank);
                self.nze_local += view.local_elements(flat, rank);
                self.nblk_total += view.total_blocks_in(flat);
                self.nze_total += view.total_elements_in(flat);
            }
            Store::Generated(_) => {
                // nothing is persisted, but the batch's blocks are still
                // consumed like the other backends consume them
                let mut discard = BlockTensor::new(Arc::clone(&self.layouts));
                discard.merge_from(tensor, &blk_bounds, false);
            }
        }

        self.last_written = Some(flat);
        Ok(())
    }

    /// Seal the write session. Collective.
    pub fn finish_write(&mut self) -> Result<()> {
        if !self.write_active {
            return Err(StoreError::SessionNotInitialized("write"));
        }
        self.write_active = false;
        debug!(
            name = %self.name,
            blocks = self.nblk_total,
            elements = self.nze_total,
            "write session sealed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // read session

    /// Start a read session batched over the axes in `dims`. Collective.
    ///
    /// `dims` need not match the grouping the data was written with; a
    /// mismatch triggers a one-time view rebuild for the file backend,
    /// cached for later sessions with the same grouping.
    pub fn begin_read(&mut self, dims: &[usize]) -> Result<()> {
        if self.write_active {
            return Err(StoreError::SessionConflict {
                requested: "read",
                active: "write",
            });
        }
        self.validate_dims(dims)?;

        let num_batches: usize = dims.iter().map(|&d| self.bounds[d].num_batches()).product();
        self.capacity.check(
            self.dense_size(),
            self.comm.size(),
            num_batches,
            T::WIDTH,
        );

        self.read_contiguous = dims == self.write_view.dims.as_slice();
        debug!(
            name = %self.name,
            ?dims,
            contiguous = self.read_contiguous,
            "read session started"
        );

        match self.kind {
            BackendKind::Memory => {
                if dims != self.memory_dims.as_slice() {
                    let batch_bounds: Vec<Vec<Range<usize>>> = (0..num_batches)
                        .map(|flat| self.batch_bounds_flat(dims, flat))
                        .collect();
                    if let Store::Memory {
                        store: Some(ms), ..
                    } = &mut self.store
                    {
                        ms.regroup(Arc::clone(&self.layouts), &batch_bounds);
                    }
                    self.memory_dims = dims.to_vec();
                }
            }
            BackendKind::File => {
                self.work = Some(BlockTensor::new(Arc::clone(&self.layouts)));
                self.read = Some(BlockTensor::new(Arc::clone(&self.layouts)));
                if !self.read_contiguous && !self.read_views.contains_key(dims) {
                    if let Store::File(fstore) = &self.store {
                        let fstore = Arc::clone(fstore);
                        let view = fstore.build_view(
                            &self.layouts,
                            &self.bounds,
                            &self.write_view,
                            dims,
                        )?;
                        self.read_views.insert(dims.to_vec(), Arc::new(view));
                    }
                }
            }
            BackendKind::Generated => {
                self.work = Some(BlockTensor::new(Arc::clone(&self.layouts)));
                self.read = Some(BlockTensor::new(Arc::clone(&self.layouts)));
            }
        }

        self.read_dims = dims.to_vec();
        self.memory_current = None;
        self.read_active = true;
        Ok(())
    }

    /// Load one batch into the work tensor. Collective; every worker must
    /// pass the same `index`.
    pub fn read_batch(&mut self, index: &[usize]) -> Result<()> {
        if !self.read_active {
            return Err(StoreError::SessionNotInitialized("read"));
        }
        let dims = self.read_dims.clone();
        let flat = self.flatten(&dims, index)?;
        let blk_bounds = self.batch_bounds_flat(&dims, flat);
        let full_bounds = self.full_block_bounds();

        match &mut self.store {
            Store::Memory { .. } => {
                self.memory_current = Some(flat);
            }
            Store::File(fstore) => {
                let fstore = Arc::clone(fstore);
                let work = self
                    .work
                    .as_mut()
                    .ok_or(StoreError::SessionNotInitialized("read"))?;
                work.clear();
                if self.read_contiguous {
                    let read = self
                        .read
                        .as_mut()
                        .ok_or(StoreError::SessionNotInitialized("read"))?;
                    read.clear();
                    fstore.get_contiguous(&self.write_view, flat, read)?;
                    work.merge_from(read, &full_bounds, false);
                } else {
                    let view = self
                        .read_views
                        .get(&dims)
                        .cloned()
                        .ok_or(StoreError::SessionNotInitialized("read"))?;
                    fstore.get_scattered(&view, flat, work)?;
                }
            }
            Store::Generated(gs) => {
                let generator = gs.generator.clone().ok_or(StoreError::MissingGenerator)?;
                let eps = gs.filter_eps;
                let read = self
                    .read
                    .as_mut()
                    .ok_or(StoreError::SessionNotInitialized("read"))?;
                read.clear();
                generator.fill(read, &blk_bounds);
                read.filter(eps);
                let work = self
                    .work
                    .as_mut()
                    .ok_or(StoreError::SessionNotInitialized("read"))?;
                work.clear();
                work.merge_from(read, &blk_bounds, false);
            }
        }
        Ok(())
    }

    /// The tensor holding the batch loaded by the last `read_batch`.
    ///
    /// For the memory backend this borrows the stored tensor directly; for
    /// the other backends it borrows the session's work tensor. `None`
    /// outside a read session.
    pub fn work_tensor(&self) -> Option<&BlockTensor<T>> {
        match &self.store {
            Store::Memory {
                store: Some(ms), ..
            } => ms.batch_tensor(self.memory_current?),
            Store::Memory { store: None, .. } => None,
            _ => self.work.as_ref(),
        }
    }

    /// End the read session and release its working storage. Collective.
    pub fn finish_read(&mut self) -> Result<()> {
        if !self.read_active {
            return Err(StoreError::SessionNotInitialized("read"));
        }
        self.read_active = false;
        self.memory_current = None;
        self.work = None;
        self.read = None;
        debug!(name = %self.name, "read session finished");
        Ok(())
    }

    // ------------------------------------------------------------------
    // backend control

    /// Install the value generator used by the generated backend.
    ///
    /// Ignored, with a warning, for the other backends.
    pub fn set_generator(&mut self, generator: Generator<T>) {
        match &mut self.store {
            Store::Generated(gs) => gs.generator = Some(generator),
            _ => warn!(
                name = %self.name,
                kind = self.kind.as_str(),
                "generator ignored by this backend"
            ),
        }
    }

    /// Drop all stored data and session state. Collective. The store stays
    /// usable for a new write session.
    pub fn reset(&mut self) -> Result<()> {
        if let Store::File(fstore) = &self.store {
            let fstore = Arc::clone(fstore);
            for dims in self.read_views.keys() {
                fstore.remove_index(&fstore.read_index_path(dims))?;
            }
            fstore.remove_index(&fstore.write_index_path())?;
            fstore.delete_data_file()?;
            fstore.create_data_file()?;
        }
        if let Store::Memory { store, .. } = &mut self.store {
            *store = None;
        }

        self.read_views.clear();
        self.write_view = Arc::new(BatchView::default());
        self.work = None;
        self.read = None;
        self.write_active = false;
        self.read_active = false;
        self.last_written = None;
        self.memory_current = None;
        self.memory_dims.clear();
        self.nblk_total = 0;
        self.nze_total = 0;
        self.nblk_local = 0;
        self.nze_local = 0;
        debug!(name = %self.name, "store reset");
        Ok(())
    }

    // ------------------------------------------------------------------
    // introspection

    /// The store's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend kind.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Number of axes.
    pub fn num_axes(&self) -> usize {
        self.layouts.len()
    }

    /// The axis layouts.
    pub fn layouts(&self) -> &[AxisLayout] {
        &self.layouts
    }

    /// Number of batches along one axis.
    pub fn num_batches(&self, axis: usize) -> usize {
        self.bounds[axis].num_batches()
    }

    /// Per-axis batch counts for a grouping.
    pub fn batch_grid(&self, dims: &[usize]) -> Vec<usize> {
        dims.iter().map(|&d| self.bounds[d].num_batches()).collect()
    }

    /// Block-index range of one batch of one axis.
    pub fn block_bounds(&self, axis: usize, batch: usize) -> Range<usize> {
        self.bounds[axis].block_range(batch)
    }

    /// Element range of one batch of one axis.
    pub fn element_bounds(&self, axis: usize, batch: usize) -> Range<usize> {
        self.bounds[axis].element_range(&self.layouts[axis], batch)
    }

    /// Per-axis block ranges covering the whole tensor.
    pub fn full_block_bounds(&self) -> Vec<Range<usize>> {
        self.layouts.iter().map(|l| 0..l.num_blocks()).collect()
    }

    /// Per-axis element ranges covering the whole tensor.
    pub fn full_element_bounds(&self) -> Vec<Range<usize>> {
        self.layouts.iter().map(|l| 0..l.total_dim()).collect()
    }

    /// Per-axis block ranges of one batch of a grouping: batched axes get
    /// the batch's block range, the rest span all blocks.
    pub fn batch_block_bounds(&self, dims: &[usize], index: &[usize]) -> Result<Vec<Range<usize>>> {
        let flat = self.flatten(dims, index)?;
        Ok(self.batch_bounds_flat(dims, flat))
    }

    /// Per-axis element ranges of one batch of a grouping.
    pub fn batch_element_bounds(
        &self,
        dims: &[usize],
        index: &[usize],
    ) -> Result<Vec<Range<usize>>> {
        let blocks = self.batch_block_bounds(dims, index)?;
        Ok(blocks
            .iter()
            .zip(self.layouts.iter())
            .map(|(r, l)| l.block_offset(r.start)..l.block_offset(r.end))
            .collect())
    }

    /// Fraction of the dense element count currently stored.
    pub fn occupancy(&self) -> f64 {
        let dense = self.dense_size();
        if dense == 0 {
            0.0
        } else {
            self.nze_total as f64 / dense as f64
        }
    }

    /// Stored nonzero elements across all workers.
    pub fn num_nonzero_elements(&self) -> u64 {
        self.nze_total
    }

    /// Stored blocks across all workers.
    pub fn num_nonzero_blocks(&self) -> u64 {
        self.nblk_total
    }

    /// This worker's stored nonzero elements.
    pub fn local_nonzero_elements(&self) -> u64 {
        self.nze_local
    }

    /// This worker's stored blocks.
    pub fn local_nonzero_blocks(&self) -> u64 {
        self.nblk_local
    }

    /// Log a summary of the store's layout and contents.
    pub fn print_info(&self) {
        info!(
            name = %self.name,
            kind = self.kind.as_str(),
            axes = self.layouts.len(),
            batches = ?(0..self.layouts.len())
                .map(|d| self.bounds[d].num_batches())
                .collect::<Vec<_>>(),
            blocks = self.nblk_total,
            elements = self.nze_total,
            occupancy = self.occupancy(),
            "batched tensor"
        );
    }

    /// An empty working tensor over this store's layouts.
    pub fn new_tensor(&self) -> BlockTensor<T> {
        BlockTensor::new(Arc::clone(&self.layouts))
    }

    // ------------------------------------------------------------------
    // helpers

    fn dense_size(&self) -> u64 {
        self.layouts
            .iter()
            .map(|l| l.total_dim() as u64)
            .fold(1u64, u64::saturating_mul)
    }

    fn validate_dims(&self, dims: &[usize]) -> Result<()> {
        let rank = self.layouts.len();
        let sorted = dims.windows(2).all(|w| w[0] < w[1]);
        if dims.is_empty() || !sorted || dims.iter().any(|&d| d >= rank) {
            return Err(StoreError::InvalidDims(dims.to_vec()));
        }
        Ok(())
    }

    /// Row-major flattening of a multi-axis batch index.
    fn flatten(&self, dims: &[usize], index: &[usize]) -> Result<usize> {
        let grid = self.batch_grid(dims);
        if index.len() != grid.len() || index.iter().zip(&grid).any(|(i, g)| i >= g) {
            return Err(StoreError::BatchOutOfRange {
                index: index.to_vec(),
                grid,
            });
        }
        Ok(index
            .iter()
            .zip(&grid)
            .fold(0, |flat, (i, g)| flat * g + i))
    }

    /// Per-axis block bounds of one flattened batch: batched axes get the
    /// batch's block range, the rest span all blocks.
    fn batch_bounds_flat(&self, dims: &[usize], flat: usize) -> Vec<Range<usize>> {
        let mut out = self.full_block_bounds();
        let mut rest = flat;
        for &d in dims.iter().rev() {
            let n = self.bounds[d].num_batches();
            out[d] = self.bounds[d].block_range(rest % n);
            rest /= n;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;

    fn store() -> BatchedTensor<f64> {
        BatchedTensor::new(
            Arc::new(SelfComm),
            "t",
            vec![
                AxisBlocks::new(vec![4, 4, 4, 4]),
                AxisBlocks::new(vec![3, 3]),
            ],
            &[2, 2],
            BackendKind::Memory,
            StoreOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_rank_mismatch() {
        let err = BatchedTensor::<f64>::new(
            Arc::new(SelfComm),
            "t",
            vec![AxisBlocks::new(vec![2, 2])],
            &[1, 1],
            BackendKind::Memory,
            StoreOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::RankMismatch { .. }));
    }

    #[test]
    fn test_invalid_groupings() {
        let mut s = store();
        assert!(matches!(
            s.begin_write(&[]),
            Err(StoreError::InvalidDims(_))
        ));
        assert!(matches!(
            s.begin_write(&[1, 0]),
            Err(StoreError::InvalidDims(_))
        ));
        assert!(matches!(
            s.begin_write(&[2]),
            Err(StoreError::InvalidDims(_))
        ));
    }

    #[test]
    fn test_flatten_and_bounds() {
        let s = store();
        assert_eq!(s.batch_grid(&[0, 1]), vec![2, 2]);
        assert_eq!(s.flatten(&[0, 1], &[1, 0]).unwrap(), 2);
        assert!(matches!(
            s.flatten(&[0], &[2]),
            Err(StoreError::BatchOutOfRange { .. })
        ));

        let b = s.batch_bounds_flat(&[0, 1], 3);
        assert_eq!(b, vec![2..4, 1..2]);
        let b = s.batch_bounds_flat(&[1], 0);
        assert_eq!(b, vec![0..4, 0..1]);

        let e = s.batch_element_bounds(&[0], &[1]).unwrap();
        assert_eq!(e, vec![8..16, 0..6]);
    }

    #[test]
    fn test_write_requires_session() {
        let mut s = store();
        let mut t = s.new_tensor();
        assert!(matches!(
            s.write_batch(&[0, 0], &mut t),
            Err(StoreError::SessionNotInitialized("write"))
        ));
    }

    #[test]
    fn test_out_of_order_batches_rejected() {
        let mut s = store();
        s.begin_write(&[0]).unwrap();
        let mut t = s.new_tensor();
        s.write_batch(&[1], &mut t).unwrap();
        assert!(matches!(
            s.write_batch(&[0], &mut t),
            Err(StoreError::BatchOutOfOrder { got: 0, last: 1 })
        ));
    }

    #[test]
    fn test_session_conflicts() {
        let mut s = store();
        s.begin_write(&[0]).unwrap();
        assert!(matches!(
            s.begin_read(&[0]),
            Err(StoreError::SessionConflict { .. })
        ));
        s.finish_write().unwrap();
        s.begin_read(&[0]).unwrap();
        assert!(matches!(
            s.begin_write(&[0]),
            Err(StoreError::SessionConflict { .. })
        ));
    }
}
