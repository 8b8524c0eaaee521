//! Generated backend: values recomputed on demand.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::scalar::Scalar;
use crate::tensor::BlockTensor;

/// Default threshold below which generated values are dropped.
pub(crate) const DEFAULT_FILTER_EPS: f64 = 1e-16;

/// Caller-supplied capability that fills requested block ranges.
///
/// Invoked once per batch read with the target tensor and the batch's
/// per-axis block-index bounds; the callback inserts the blocks it owns
/// that fall inside those bounds.
#[derive(Clone)]
pub struct Generator<T: Scalar> {
    func: Arc<dyn Fn(&mut BlockTensor<T>, &[Range<usize>]) + Send + Sync>,
}

impl<T: Scalar> Generator<T> {
    /// Wrap a fill function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut BlockTensor<T>, &[Range<usize>]) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    /// Fill `target` for the given per-axis block bounds.
    pub(crate) fn fill(&self, target: &mut BlockTensor<T>, block_bounds: &[Range<usize>]) {
        (self.func)(target, block_bounds)
    }
}

impl<T: Scalar> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator").finish_non_exhaustive()
    }
}

/// State of the generated backend. Nothing is ever persisted; a read
/// regenerates the batch and filters numerically negligible blocks.
#[derive(Debug, Clone)]
pub(crate) struct GeneratedStore<T: Scalar> {
    pub(crate) generator: Option<Generator<T>>,
    pub(crate) filter_eps: f64,
}

impl<T: Scalar> GeneratedStore<T> {
    pub(crate) fn new(filter_eps: f64) -> Self {
        Self {
            generator: None,
            filter_eps,
        }
    }
}
