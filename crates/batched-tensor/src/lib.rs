//! Batched, out-of-core storage for block-sparse tensors.
//!
//! A tensor too large for worker memory is split into batches along a
//! chosen subset of its axes and streamed through a [`BatchedTensor`]
//! store, backed by memory, a shared file with a companion binary index,
//! or an on-demand value generator. A fixed group of workers drives the
//! store in SPMD fashion; every session call is collective.
//!
//! ```
//! use std::sync::Arc;
//! use batched_tensor::{
//!     AxisBlocks, BackendKind, BatchedTensor, SelfComm, StoreOptions,
//! };
//!
//! # fn main() -> batched_tensor::Result<()> {
//! let mut store = BatchedTensor::<f64>::new(
//!     Arc::new(SelfComm),
//!     "overlap",
//!     vec![AxisBlocks::new(vec![4, 4]), AxisBlocks::new(vec![3, 3])],
//!     &[2, 1],
//!     BackendKind::Memory,
//!     StoreOptions::default(),
//! )?;
//!
//! store.begin_write(&[0])?;
//! let mut batch = store.new_tensor();
//! batch.insert_block(vec![0, 0], vec![1.0; 12]);
//! store.write_batch(&[0], &mut batch)?;
//! store.write_batch(&[1], &mut batch)?;
//! store.finish_write()?;
//!
//! store.begin_read(&[0])?;
//! store.read_batch(&[0])?;
//! let work = store.work_tensor().expect("read session is active");
//! assert_eq!(work.get_block(&[0, 0]), Some(&[1.0; 12][..]));
//! store.finish_read()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod capacity;
mod comm;
mod error;
mod layout;
mod scalar;
mod store;
mod tensor;
mod view;

pub use backend::{BackendKind, Generator, MemoryMode};
pub use capacity::{CapacityGuard, DEFAULT_BATCH_LIMIT};
pub use comm::{Communicator, SelfComm, ThreadGroup};
pub use error::{Result, StoreError};
pub use layout::{plan_batches, AxisBlocks, AxisLayout, BatchBound};
pub use scalar::Scalar;
pub use store::{BatchedTensor, StoreOptions};
pub use tensor::{BlockIndex, BlockTensor};
