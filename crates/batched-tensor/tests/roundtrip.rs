//! Single-worker write/read cycles across all three backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use batched_tensor::{
    AxisBlocks, BackendKind, BatchedTensor, Generator, MemoryMode, SelfComm, StoreError,
    StoreOptions,
};

/// Rank-3 layout used throughout: axis block extents [4,4,4,4], [2,2,2,2,2,2]
/// and [3,3,3], batched 2x2x1. Every block spans 4*2*3 = 24 elements.
fn rank3_store(kind: BackendKind, options: StoreOptions) -> Result<BatchedTensor<f64>> {
    Ok(BatchedTensor::new(
        Arc::new(SelfComm),
        "rank3",
        vec![
            AxisBlocks::new(vec![4, 4, 4, 4]),
            AxisBlocks::new(vec![2, 2, 2, 2, 2, 2]),
            AxisBlocks::new(vec![3, 3, 3]),
        ],
        &[2, 2, 1],
        kind,
        options,
    )?)
}

fn file_options(dir: &tempfile::TempDir) -> StoreOptions {
    StoreOptions {
        scratch_dir: Some(dir.path().to_path_buf()),
        ..StoreOptions::default()
    }
}

#[test]
fn test_file_roundtrip_with_empty_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    // the second batch holds no local blocks but is still written
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    assert_eq!(store.num_nonzero_blocks(), 1);
    assert_eq!(store.num_nonzero_elements(), 24);

    store.begin_read(&[0])?;
    store.read_batch(&[0])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert_eq!(work.get_block(&[0, 0, 0]), Some(&[1.0; 24][..]));

    store.read_batch(&[1])?;
    let work = store.work_tensor().unwrap();
    assert!(work.is_empty());
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_file_read_under_different_grouping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    batch.insert_block(vec![2, 4, 1], vec![2.0; 24]);
    // each write moves only the blocks inside that batch's bounds
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    assert!(batch.is_empty());
    store.finish_write()?;

    // regrouping over axis 1: blocks 0..3 land in batch 0, 3..6 in batch 1
    store.begin_read(&[1])?;
    store.read_batch(&[0])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert_eq!(work.get_block(&[0, 0, 0]), Some(&[1.0; 24][..]));

    store.read_batch(&[1])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert_eq!(work.get_block(&[2, 4, 1]), Some(&[2.0; 24][..]));
    store.finish_read()?;

    // the rebuilt view is cached and a second session reads it again
    store.begin_read(&[1])?;
    store.read_batch(&[0])?;
    assert_eq!(store.work_tensor().unwrap().num_blocks(), 1);
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_file_multi_axis_grouping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let mut expected: BTreeMap<Vec<usize>, Vec<f64>> = BTreeMap::new();
    let mut all = store.new_tensor();
    for index in [vec![0, 0, 0], vec![1, 2, 2], vec![2, 3, 0], vec![3, 5, 1]] {
        let data: Vec<f64> = (0..24).map(|_| rng.gen_range(-1.0..1.0)).collect();
        expected.insert(index.clone(), data.clone());
        all.insert_block(index, data);
    }

    store.begin_write(&[0, 1])?;
    for i0 in 0..2 {
        for i1 in 0..2 {
            store.write_batch(&[i0, i1], &mut all)?;
        }
    }
    store.finish_write()?;
    assert!(all.is_empty());
    assert_eq!(store.num_nonzero_elements(), 4 * 24);

    store.begin_read(&[0, 1])?;
    let mut seen = BTreeMap::new();
    for i0 in 0..2 {
        for i1 in 0..2 {
            store.read_batch(&[i0, i1])?;
            let work = store.work_tensor().unwrap();
            for (index, data) in work.iter_blocks() {
                // a block belongs to exactly one batch of the grouping
                let b0 = store.block_bounds(0, i0);
                let b1 = store.block_bounds(1, i1);
                assert!(b0.contains(&index[0]) && b1.contains(&index[1]));
                seen.insert(index.clone(), data.to_vec());
            }
        }
    }
    store.finish_read()?;
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn test_memory_accumulates_within_session() -> Result<()> {
    let mut store = rank3_store(BackendKind::Memory, StoreOptions::default())?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    batch.insert_block(vec![3, 0, 0], vec![2.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    // the accumulating backend exposes the whole tensor for every batch
    store.begin_read(&[0])?;
    store.read_batch(&[0])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 2);
    assert_eq!(work.get_block(&[0, 0, 0]), Some(&[1.0; 24][..]));
    assert_eq!(work.get_block(&[3, 0, 0]), Some(&[2.0; 24][..]));
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_memory_per_batch_regroups() -> Result<()> {
    let options = StoreOptions {
        memory_mode: MemoryMode::PerBatch,
        ..StoreOptions::default()
    };
    let mut store = rank3_store(BackendKind::Memory, options)?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    batch.insert_block(vec![2, 4, 1], vec![2.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    store.begin_read(&[1])?;
    store.read_batch(&[0])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert!(work.get_block(&[0, 0, 0]).is_some());

    store.read_batch(&[1])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert!(work.get_block(&[2, 4, 1]).is_some());
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_generated_backend_filters_small_blocks() -> Result<()> {
    let mut store = rank3_store(BackendKind::Generated, StoreOptions::default())?;
    store.set_generator(Generator::new(|target, bounds| {
        // one significant and one negligible block inside the bounds
        target.insert_block(vec![bounds[0].start, 0, 0], vec![1.0; 24]);
        target.insert_block(vec![bounds[0].start, 1, 0], vec![1e-20; 24]);
    }));

    store.begin_read(&[0])?;
    store.read_batch(&[0])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert_eq!(work.get_block(&[0, 0, 0]), Some(&[1.0; 24][..]));

    store.read_batch(&[1])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.num_blocks(), 1);
    assert!(work.get_block(&[2, 0, 0]).is_some());
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_generated_write_consumes_batch_blocks() -> Result<()> {
    let mut store = rank3_store(BackendKind::Generated, StoreOptions::default())?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    batch.insert_block(vec![2, 0, 0], vec![2.0; 24]);
    // each write consumes the blocks inside its bounds, as the stored
    // backends do, even though nothing is persisted
    store.write_batch(&[0], &mut batch)?;
    assert_eq!(batch.num_blocks(), 1);
    assert!(batch.get_block(&[0, 0, 0]).is_none());
    store.write_batch(&[1], &mut batch)?;
    assert!(batch.is_empty());
    store.finish_write()?;
    Ok(())
}

#[test]
fn test_generated_backend_requires_generator() -> Result<()> {
    let mut store = rank3_store(BackendKind::Generated, StoreOptions::default())?;
    store.begin_read(&[0])?;
    assert!(matches!(
        store.read_batch(&[0]),
        Err(StoreError::MissingGenerator)
    ));
    Ok(())
}

#[test]
fn test_reset_allows_rewrite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    store.reset()?;
    assert_eq!(store.num_nonzero_elements(), 0);

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![3, 0, 0], vec![4.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    store.begin_read(&[0])?;
    store.read_batch(&[0])?;
    assert!(store.work_tensor().unwrap().is_empty());
    store.read_batch(&[1])?;
    let work = store.work_tensor().unwrap();
    assert_eq!(work.get_block(&[3, 0, 0]), Some(&[4.0; 24][..]));
    store.finish_read()?;
    Ok(())
}

#[test]
fn test_duplicate_shares_stored_data() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![1, 1, 1], vec![5.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    let mut dup = store.duplicate();
    dup.begin_read(&[0])?;
    dup.read_batch(&[0])?;
    let work = dup.work_tensor().unwrap();
    assert_eq!(work.get_block(&[1, 1, 1]), Some(&[5.0; 24][..]));
    dup.finish_read()?;
    Ok(())
}

#[test]
fn test_from_template_starts_empty() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = rank3_store(BackendKind::File, file_options(&dir))?;

    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    batch.insert_block(vec![0, 0, 0], vec![1.0; 24]);
    store.write_batch(&[0], &mut batch)?;
    store.write_batch(&[1], &mut batch)?;
    store.finish_write()?;

    let fresh: BatchedTensor<f64> = store.from_template("rank3_copy", BackendKind::File)?;
    assert_eq!(fresh.num_nonzero_elements(), 0);
    assert_eq!(fresh.num_batches(0), store.num_batches(0));
    assert_eq!(fresh.block_bounds(0, 1), store.block_bounds(0, 1));
    Ok(())
}

#[test]
fn test_batch_index_out_of_range() -> Result<()> {
    let mut store = rank3_store(BackendKind::Memory, StoreOptions::default())?;
    store.begin_write(&[0])?;
    let mut batch = store.new_tensor();
    assert!(matches!(
        store.write_batch(&[2], &mut batch),
        Err(StoreError::BatchOutOfRange { .. })
    ));
    assert!(matches!(
        store.write_batch(&[0, 0], &mut batch),
        Err(StoreError::BatchOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn test_backend_kind_from_str() {
    assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
    assert!("mmap".parse::<BackendKind>().is_err());
}
