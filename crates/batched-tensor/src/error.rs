//! Error types for the batched tensor store.

use thiserror::Error;

/// Error type for batched tensor operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown backend kind string.
    #[error("invalid backend kind '{0}' (expected 'memory', 'file' or 'generated')")]
    InvalidBackendKind(String),

    /// A group map does not match its axis block list.
    #[error("group map length {map_len} does not match block count {num_blocks}")]
    GroupMapMismatch { map_len: usize, num_blocks: usize },

    /// Batch planning produced no batches (degenerate axis).
    #[error("axis produced an empty batch partition")]
    EmptyPartition,

    /// Number of per-axis inputs disagrees with the tensor rank.
    #[error("expected {expected} per-axis entries, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// An axis grouping is empty, unsorted, or names an axis out of range.
    #[error("invalid axis grouping {0:?}")]
    InvalidDims(Vec<usize>),

    /// A session method was called without initialization.
    #[error("{0} session is not initialized")]
    SessionNotInitialized(&'static str),

    /// Write and read sessions were requested at the same time.
    #[error("cannot start {requested} session: {active} session is active")]
    SessionConflict {
        requested: &'static str,
        active: &'static str,
    },

    /// Batches must be written with strictly increasing flattened ids.
    #[error("batch {got} written out of order (last was {last})")]
    BatchOutOfOrder { got: usize, last: usize },

    /// A batch index is outside the planned batch grid.
    #[error("batch index {index:?} out of range for batch grid {grid:?}")]
    BatchOutOfRange { index: Vec<usize>, grid: Vec<usize> },

    /// An index record names a block outside the batch partition.
    #[error("block index {0:?} not covered by the batch partition")]
    CorruptIndex(Vec<usize>),

    /// A view has no persisted index to read from.
    #[error("no index recorded for this view")]
    MissingIndex,

    /// The generated backend was read without a generator installed.
    #[error("no generator installed for generated backend")]
    MissingGenerator,

    /// Backing-file operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for batched tensor operations.
pub type Result<T> = std::result::Result<T, StoreError>;
