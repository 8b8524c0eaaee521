//! File backend: a shared data file plus a companion binary index.
//!
//! Batches are laid out in the data file grouped first by batch id, then by
//! worker rank. Every worker computes its own byte offset from the gathered
//! per-worker counts, so no two workers ever write overlapping ranges and
//! no locking is needed.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::comm::Communicator;
use crate::error::{Result, StoreError};
use crate::layout::{AxisLayout, BatchBound};
use crate::scalar::{decode_elements, encode_elements, Scalar};
use crate::tensor::{BlockIndex, BlockTensor};
use crate::view::BatchView;

/// Companion binary index.
///
/// A flat sequence of fixed-width record groups, one per `(batch, worker)`
/// pair, ordered by batch then rank. A group of `n` records holds one
/// `u32` array per axis (the local block indices, axis by axis) followed by
/// one `u64` array of byte offsets into the data file. No length or
/// checksum is stored inline; group positions are fully determined by the
/// cumulative block counts of all preceding pairs.
pub(crate) struct IndexFile {
    path: PathBuf,
    num_axes: usize,
    record_width: usize,
}

impl IndexFile {
    pub(crate) fn new(path: PathBuf, num_axes: usize) -> Self {
        Self {
            path,
            num_axes,
            record_width: 4 * num_axes + 8,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Write one worker's record group at the position given by the number
    /// of blocks recorded before it.
    pub(crate) fn write_group(
        &self,
        blocks_before: u64,
        indices: &[BlockIndex],
        offsets: &[u64],
    ) -> Result<()> {
        debug_assert_eq!(indices.len(), offsets.len());
        let num = indices.len();
        let mut buf = vec![0u8; num * self.record_width];
        let mut pos = 0;
        for axis in 0..self.num_axes {
            for index in indices {
                buf[pos..pos + 4].copy_from_slice(&(index[axis] as u32).to_le_bytes());
                pos += 4;
            }
        }
        for offset in offsets {
            buf[pos..pos + 8].copy_from_slice(&offset.to_le_bytes());
            pos += 8;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.write_all_at(&buf, blocks_before * self.record_width as u64)?;
        Ok(())
    }

    /// Read one worker's record group of `num` blocks.
    pub(crate) fn read_group(
        &self,
        blocks_before: u64,
        num: usize,
    ) -> Result<(Vec<BlockIndex>, Vec<u64>)> {
        if num == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut buf = vec![0u8; num * self.record_width];
        let file = File::open(&self.path)?;
        file.read_exact_at(&mut buf, blocks_before * self.record_width as u64)?;

        let mut indices = vec![vec![0usize; self.num_axes]; num];
        let mut pos = 0;
        for axis in 0..self.num_axes {
            for index in indices.iter_mut() {
                let mut b = [0u8; 4];
                b.copy_from_slice(&buf[pos..pos + 4]);
                index[axis] = u32::from_le_bytes(b) as usize;
                pos += 4;
            }
        }
        let mut offsets = vec![0u64; num];
        for offset in offsets.iter_mut() {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[pos..pos + 8]);
            *offset = u64::from_le_bytes(b);
            pos += 8;
        }
        Ok((indices, offsets))
    }

    /// Delete the index file if it exists.
    pub(crate) fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// File-backed store: one shared data file plus per-view index files in a
/// directory unique to the worker group.
///
/// Dropping the store removes the directory (collective: every worker's
/// copy must be dropped, rank 0 performs the deletion).
pub(crate) struct FileStore {
    comm: Arc<dyn Communicator>,
    dir: PathBuf,
    data_path: PathBuf,
    name: String,
    num_axes: usize,
}

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileStore {
    /// Create the group-unique scratch directory and an empty data file.
    /// Collective: rank 0 picks the directory token and creates the files.
    pub(crate) fn create(
        comm: Arc<dyn Communicator>,
        root: &Path,
        name: &str,
        num_axes: usize,
    ) -> Result<Self> {
        let token = if comm.rank() == 0 {
            (std::process::id() as u64) << 20 | DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        let token = comm.broadcast(0, token);
        let dir = root.join(format!("batchtensor_{token:x}"));
        if comm.rank() == 0 {
            fs::create_dir_all(&dir)?;
        }
        comm.barrier();

        info!(dir = %dir.display(), name, "creating file store");
        let store = Self {
            data_path: dir.join(format!("{name}.dat")),
            dir,
            name: name.to_string(),
            num_axes,
            comm,
        };
        store.create_data_file()?;
        Ok(store)
    }

    /// Create (or truncate) the data file. Collective.
    pub(crate) fn create_data_file(&self) -> Result<()> {
        if self.comm.rank() == 0 {
            File::create(&self.data_path)?;
        }
        self.comm.barrier();
        Ok(())
    }

    /// Delete the data file. Collective.
    pub(crate) fn delete_data_file(&self) -> Result<()> {
        if self.comm.rank() == 0 {
            match fs::remove_file(&self.data_path) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                other => other?,
            }
        }
        self.comm.barrier();
        Ok(())
    }

    /// Delete an index file. Collective.
    pub(crate) fn remove_index(&self, path: &Path) -> Result<()> {
        if self.comm.rank() == 0 {
            IndexFile::new(path.to_path_buf(), self.num_axes).remove()?;
        }
        self.comm.barrier();
        Ok(())
    }

    pub(crate) fn write_index_path(&self) -> PathBuf {
        self.dir.join(format!("{}_idx_write.dat", self.name))
    }

    pub(crate) fn read_index_path(&self, dims: &[usize]) -> PathBuf {
        let suffix: String = dims.iter().map(|d| d.to_string()).collect();
        self.dir.join(format!("{}_idx_read_{suffix}.dat", self.name))
    }

    /// Write one batch: gather counts, compute this worker's deterministic
    /// offsets, append index records and the element payload. Collective.
    pub(crate) fn put<T: Scalar>(
        &self,
        view: &mut BatchView,
        batch: usize,
        tensor: &BlockTensor<T>,
    ) -> Result<()> {
        let rank = self.comm.rank();
        let local_blocks = tensor.num_blocks() as u64;
        let local_elements = tensor.num_elements() as u64;

        debug!(batch, local_blocks, local_elements, "writing batch to file");

        let blocks = self.comm.all_gather(local_blocks);
        let elements = self.comm.all_gather(local_elements);
        view.record(batch, blocks, elements);

        let element_offset = view.elements_before(batch, rank);
        let blocks_before = view.blocks_before(batch, rank);

        // per-block byte offsets into the data file, in iteration order
        let mut indices = Vec::with_capacity(tensor.num_blocks());
        let mut offsets = Vec::with_capacity(tensor.num_blocks());
        let mut cursor = element_offset;
        for (index, data) in tensor.iter_blocks() {
            indices.push(index.clone());
            offsets.push(cursor * T::WIDTH as u64);
            cursor += data.len() as u64;
        }

        let index = IndexFile::new(self.write_index_path(), self.num_axes);
        index.write_group(blocks_before, &indices, &offsets)?;
        view.index_path = Some(index.path().to_path_buf());

        let payload = encode_elements(&tensor.pack());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.data_path)?;
        file.write_all_at(&payload, element_offset * T::WIDTH as u64)?;
        Ok(())
    }

    /// Read one batch written under the same grouping: a single contiguous
    /// read of this worker's slice. Collective.
    pub(crate) fn get_contiguous<T: Scalar>(
        &self,
        view: &BatchView,
        batch: usize,
        target: &mut BlockTensor<T>,
    ) -> Result<()> {
        let rank = self.comm.rank();
        let num_blocks = view.local_blocks(batch, rank) as usize;
        let num_elements = view.local_elements(batch, rank) as usize;
        if num_blocks == 0 {
            return Ok(());
        }

        let index_path = view.index_path.clone().ok_or(StoreError::MissingIndex)?;
        let index = IndexFile::new(index_path, self.num_axes);
        let (indices, offsets) = index.read_group(view.blocks_before(batch, rank), num_blocks)?;

        debug!(batch, num_blocks, num_elements, "contiguous batch read");

        let first = offsets[0];
        let mut buf = vec![0u8; num_elements * T::WIDTH];
        File::open(&self.data_path)?.read_exact_at(&mut buf, first)?;

        for (index, offset) in indices.into_iter().zip(offsets) {
            let start = (offset - first) as usize;
            let len = target.block_len(&index) * T::WIDTH;
            target.insert_block(index, decode_elements(&buf[start..start + len]));
        }
        Ok(())
    }

    /// Read one batch under an alternate view: gather the scattered ranges
    /// described by the view's index, in offset order. Collective.
    pub(crate) fn get_scattered<T: Scalar>(
        &self,
        view: &BatchView,
        batch: usize,
        target: &mut BlockTensor<T>,
    ) -> Result<()> {
        let rank = self.comm.rank();
        let num_blocks = view.local_blocks(batch, rank) as usize;
        if num_blocks == 0 {
            return Ok(());
        }

        let index_path = view.index_path.clone().ok_or(StoreError::MissingIndex)?;
        let index = IndexFile::new(index_path, self.num_axes);
        let (indices, offsets) = index.read_group(view.blocks_before(batch, rank), num_blocks)?;

        debug!(batch, num_blocks, "scattered batch read");

        let file = File::open(&self.data_path)?;
        for (index, offset) in indices.into_iter().zip(offsets) {
            let len = target.block_len(&index) * T::WIDTH;
            let mut buf = vec![0u8; len];
            file.read_exact_at(&mut buf, offset)?;
            target.insert_block(index, decode_elements(&buf));
        }
        Ok(())
    }

    /// Rebuild the index under a different axis grouping. Collective;
    /// performed once per grouping, the caller caches the result.
    pub(crate) fn build_view(
        &self,
        layouts: &[AxisLayout],
        bounds: &[BatchBound],
        write_view: &BatchView,
        dims: &[usize],
    ) -> Result<BatchView> {
        let rank = self.comm.rank();
        let size = self.comm.size();

        info!(?dims, "building read view");

        // read back all of this worker's records from the write index
        let write_index_path = write_view.index_path.clone().ok_or(StoreError::MissingIndex)?;
        let write_index = IndexFile::new(write_index_path, self.num_axes);
        let mut indices: Vec<BlockIndex> = Vec::new();
        let mut offsets: Vec<u64> = Vec::new();
        for batch in 0..write_view.num_batches {
            let num = write_view.local_blocks(batch, rank) as usize;
            let (mut i, mut o) = write_index.read_group(write_view.blocks_before(batch, rank), num)?;
            indices.append(&mut i);
            offsets.append(&mut o);
        }

        // re-bin every record under the new grouping
        let num_batches: usize = dims.iter().map(|&d| bounds[d].num_batches()).product();
        let mut view = BatchView::new(dims.to_vec(), num_batches, size);
        let mut batch_of = vec![0usize; indices.len()];
        for (i, index) in indices.iter().enumerate() {
            let mut flat = 0;
            for &d in dims {
                let b = bounds[d]
                    .batch_of(index[d])
                    .ok_or_else(|| StoreError::CorruptIndex(index.clone()))?;
                flat = flat * bounds[d].num_batches() + b;
            }
            batch_of[i] = flat;
            let len: u64 = index
                .iter()
                .zip(layouts)
                .map(|(&b, l)| l.block_size(b) as u64)
                .product();
            view.blocks[flat][rank] += 1;
            view.elements[flat][rank] += len;
        }

        // every worker learns every other worker's counts per batch
        for batch in 0..num_batches {
            let blocks = self.comm.all_gather(view.blocks[batch][rank]);
            let elements = self.comm.all_gather(view.elements[batch][rank]);
            view.record(batch, blocks, elements);
        }

        // group records by new batch, offsets ascending within each batch
        // so reads stay as sequential as possible
        let mut perm: Vec<usize> = (0..indices.len()).collect();
        perm.sort_by_key(|&i| (batch_of[i], offsets[i]));

        let read_index = IndexFile::new(self.read_index_path(dims), self.num_axes);
        if self.comm.rank() == 0 {
            read_index.remove()?;
        }
        self.comm.barrier();

        let mut cursor = 0usize;
        for batch in 0..num_batches {
            let num = view.local_blocks(batch, rank) as usize;
            let group = &perm[cursor..cursor + num];
            let group_indices: Vec<BlockIndex> =
                group.iter().map(|&i| indices[i].clone()).collect();
            let group_offsets: Vec<u64> = group.iter().map(|&i| offsets[i]).collect();
            read_index.write_group(view.blocks_before(batch, rank), &group_indices, &group_offsets)?;
            cursor += num;
        }
        view.index_path = Some(read_index.path().to_path_buf());
        Ok(view)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.comm.barrier();
        if self.comm.rank() == 0 {
            if let Err(err) = fs::remove_dir_all(&self.dir) {
                debug!(dir = %self.dir.display(), %err, "failed to remove scratch directory");
            }
        }
    }
}
