//! Storage backends sharing one put/get contract.
//!
//! A store is backed by exactly one of three variants, chosen at
//! construction: an accumulating in-memory tensor, a parallel on-disk file
//! with a companion binary index, or an on-demand value generator.

mod file;
mod generated;
mod memory;

pub use generated::Generator;
pub use memory::MemoryMode;

pub(crate) use file::FileStore;
pub(crate) use generated::{GeneratedStore, DEFAULT_FILTER_EPS};
pub(crate) use memory::MemoryStore;

use std::str::FromStr;
use std::sync::Arc;

use crate::error::StoreError;
use crate::scalar::Scalar;

/// Which backing store holds batch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Batches accumulate in an in-memory tensor.
    Memory,
    /// Batches are written to a shared data file with a binary index.
    File,
    /// Batches are recomputed on demand by a caller-supplied generator.
    Generated,
}

impl BackendKind {
    /// The canonical name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Generated => "generated",
        }
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "generated" => Ok(BackendKind::Generated),
            other => Err(StoreError::InvalidBackendKind(other.to_string())),
        }
    }
}

/// The physical representation behind a store.
pub(crate) enum Store<T: Scalar> {
    Memory {
        mode: MemoryMode,
        /// Allocated when a write session starts.
        store: Option<MemoryStore<T>>,
    },
    File(Arc<FileStore>),
    Generated(GeneratedStore<T>),
}
