//! Reduction engine for distributed arrays.
//!
//! A reduction proceeds in two phases, both expressed as block tasks:
//!
//! 1. **Block-local accumulation**
//!    * One task per input block folds the block with the operation's
//!      identity as seed, on the processor that owns the block.
//!
//! 2. **Deterministic combination**
//!    * Partial results are combined pairwise in a balanced tree, so the
//!      combine depth is `O(log(block count))`.
//!    * Tree leaves are ordered by block index and every combine keeps the
//!      left partial first. The result therefore depends only on the
//!      partition, never on placement or on the order tasks finish in.
//!
//! Only associativity of the operation is assumed, not commutativity.
//!
//! ## Whole-array vs. axis reductions
//! * [`reduce_lazy`] reduces every element to one scalar and returns a
//!   [`PendingScalar`] whose [`PendingScalar::wait`] is the suspension point.
//! * [`reduce_blocks`] with an axis reduces along that axis only. The result
//!   is a new distributed array in which the reduced axis has extent 1; each
//!   output block is the root of the combine tree over the input blocks
//!   sharing its position on the remaining axes.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::engine::blockspec::BlockSpec;
use crate::engine::broadcast::{block_shape, decode_local};
use crate::engine::context::ClusterContext;
use crate::engine::darray::DArray;
use crate::engine::directory::{BlockDirectory, SlotInit};
use crate::engine::element::{decode_block, decode_task_input, encode_block, Element, Numeric};
use crate::engine::error::{DArrayError, DArrayResult, FailureKind, TaskFailure};
use crate::engine::future::TaskHandle;
use crate::engine::grid::Grid;
use crate::engine::ops::{BlockShapeClass, OpRegistry, ReduceKernel, ReduceOp};
use crate::engine::scheduler::{Scheduler, TaskArg, TaskSpec};
use crate::engine::types::fmt_index;
use crate::profiling::profiler::{self, Arg};

/// Result of [`reduce_blocks`].
#[derive(Debug)]
pub enum Reduced<T> {
    /// Whole-array reduction.
    Scalar(T),
    /// Reduction along one axis; that axis has extent 1.
    Array(DArray<T>),
}

impl<T> Reduced<T> {
    /// The scalar, if this was a whole-array reduction.
    pub fn scalar(self) -> Option<T> {
        match self {
            Reduced::Scalar(value) => Some(value),
            Reduced::Array(_) => None,
        }
    }

    /// The array, if this was an axis reduction.
    pub fn array(self) -> Option<DArray<T>> {
        match self {
            Reduced::Scalar(_) => None,
            Reduced::Array(array) => Some(array),
        }
    }
}

/// A whole-array reduction that may still be running.
pub struct PendingScalar<T> {
    root: TaskHandle,
    sources: Vec<PartialSource>,
    scheduler: Arc<dyn Scheduler>,
    _element: PhantomData<fn() -> T>,
}

/// Phase-1 task of one input block, with the task that produces the block
/// when it was still pending at submission.
struct PartialSource {
    index: Vec<usize>,
    input: Option<TaskHandle>,
    partial: TaskHandle,
}

impl<T: Element> PendingScalar<T> {
    /// Returns `true` once the final combine has settled.
    pub fn is_ready(&self) -> bool {
        self.root.is_complete()
    }

    /// Blocks until the reduction completes and returns its value.
    ///
    /// ## Errors
    /// [`DArrayError::BlockTaskFailure`] if any block or combine task failed
    /// and [`DArrayError::FetchFailure`] if the result cannot be fetched.
    pub fn wait(&self) -> DArrayResult<T> {
        let _span = profiler::span("PendingScalar::wait");
        if let Err(failure) = self.scheduler.wait(&self.root) {
            let (index, failure) = self.originating_failure(failure);
            return Err(DArrayError::BlockTaskFailure { index, failure });
        }
        let lease = self.root.lease().ok_or(DArrayError::ShapeMismatch { expected: 1, actual: 0 })?;
        let fetch_failure = |source| DArrayError::FetchFailure { index: Vec::new(), source };
        let bytes = lease.fetch().map_err(fetch_failure)?;
        let values = decode_block::<T>(lease.chunk().id, &bytes).map_err(fetch_failure)?;
        match values.as_slice() {
            [value] => Ok(*value),
            other => Err(DArrayError::ShapeMismatch { expected: 1, actual: other.len() }),
        }
    }

    /// First failure in block-index order: an input block that failed, then a
    /// partial that failed on its own. Falls back to the root's failure.
    fn originating_failure(&self, root: TaskFailure) -> (Vec<usize>, TaskFailure) {
        let input_failure = self.sources.iter().find_map(|source| {
            let failure = source.input.as_ref()?.try_result()?.err()?;
            Some((source.index.clone(), failure))
        });
        let partial_failure = || {
            self.sources.iter().find_map(|source| match source.partial.try_result()? {
                Err(failure) if failure.kind != FailureKind::DependencyFailed => {
                    Some((source.index.clone(), failure))
                }
                _ => None,
            })
        };
        input_failure.or_else(partial_failure).unwrap_or((Vec::new(), root))
    }
}

impl<T> std::fmt::Debug for PendingScalar<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingScalar").field("root", &self.root).finish()
    }
}

/// Starts a whole-array reduction without waiting for it.
pub fn reduce_lazy<T: Numeric>(
    registry: &OpRegistry<T>,
    op: ReduceOp<T>,
    array: &DArray<T>,
) -> DArrayResult<PendingScalar<T>> {
    let _span = profiler::span("reduce").arg("op", Arg::Str(op.name().to_string()));
    let kernel = registry.reduce(BlockShapeClass::of_rank(array.rank()))?;
    let op = Arc::new(op);
    let ctx = array.context();

    let mut sources = Vec::with_capacity(array.block_count());
    for index in array.partition().block_indices() {
        let input = match array.directory().task_arg(&index)? {
            TaskArg::Future(handle) => Some(handle),
            TaskArg::Chunk(_) => None,
        };
        let partial = submit_partial(array, &kernel, &op, &index, None)?;
        sources.push(PartialSource { index, input, partial });
    }
    let partials = sources.iter().map(|source| Arc::clone(&source.partial)).collect();
    let root = combine_tree(ctx, &op, partials)?;
    debug!(op = op.name(), blocks = array.block_count(), "reduction submitted");
    Ok(PendingScalar {
        root,
        sources,
        scheduler: Arc::clone(ctx.scheduler()),
        _element: PhantomData,
    })
}

/// Reduces `array` entirely (`axis == None`) or along one axis.
///
/// ## Errors
/// [`DArrayError::InvalidAxis`] if `axis` is not below the rank; block
/// failures as in [`PendingScalar::wait`] for whole-array reductions.
pub fn reduce_blocks<T: Numeric>(
    registry: &OpRegistry<T>,
    op: ReduceOp<T>,
    array: &DArray<T>,
    axis: Option<usize>,
) -> DArrayResult<Reduced<T>> {
    let Some(axis) = axis else {
        return reduce_lazy(registry, op, array)?.wait().map(Reduced::Scalar);
    };
    if axis >= array.rank() {
        return Err(DArrayError::InvalidAxis { axis, rank: array.rank() });
    }
    let _span = profiler::span("reduce_axis").arg("axis", Arg::U64(axis as u64));
    let kernel = registry.reduce(BlockShapeClass::of_rank(array.rank()))?;
    let op = Arc::new(op);
    let ctx = array.context();
    let along = array.partition().grid_shape()[axis];
    let out_partition = array.partition().collapse_axis(axis);

    let roots = Grid::try_from_fn(out_partition.grid_shape(), |out_index| {
        let mut partials = Vec::with_capacity(along);
        let mut index = out_index.to_vec();
        for k in 0..along {
            index[axis] = k;
            partials.push(submit_partial(array, &kernel, &op, &index, Some(axis))?);
        }
        combine_tree(ctx, &op, partials)
    })?;

    let targets = roots.map(|root| root.target());
    let slots = Grid::from_cells(
        roots.dims().to_vec(),
        roots.into_cells().into_iter().map(SlotInit::Pending).collect(),
    )
    .ok_or(DArrayError::ShapeMismatch { expected: out_partition.block_count(), actual: 0 })?;
    let directory = BlockDirectory::from_slots(slots, targets, Arc::clone(ctx.scheduler()))
        .ok_or(DArrayError::ShapeMismatch { expected: out_partition.block_count(), actual: 0 })?;
    debug!(op = op.name(), axis, blocks = directory.block_count(), "axis reduction submitted");
    let spec = BlockSpec::Explicit(out_partition.block_lens().to_vec());
    Ok(Reduced::Array(DArray::from_parts(out_partition, spec, directory, ctx.clone())))
}

/// Phase 1: folds one block on its owner.
fn submit_partial<T: Numeric>(
    array: &DArray<T>,
    kernel: &ReduceKernel<T>,
    op: &Arc<ReduceOp<T>>,
    index: &[usize],
    axis: Option<usize>,
) -> DArrayResult<TaskHandle> {
    let ctx = array.context();
    let shape = block_shape(array.partition(), index)?;
    let target = array.target(index)?;
    let arg = array.directory().task_arg(index)?;
    let (kernel, op) = (Arc::clone(kernel), Arc::clone(op));
    Ok(ctx.scheduler().submit(TaskSpec {
        target,
        scope: ctx.scope_for(target),
        label: format!("reduce({}) partial {}", op.name(), fmt_index(index)),
        func: Box::new(move |inputs: Vec<Bytes>| -> Result<Bytes, String> {
            let bytes = inputs.first().ok_or("missing input block")?;
            let block = decode_local::<T>(&shape, bytes)?;
            let partial = kernel(op.as_ref(), &block, axis)?;
            Ok(encode_block(partial.as_slice()))
        }),
        args: vec![arg],
        deps: Vec::new(),
    }))
}

/// Phase 2: pairwise combine tree over `level`, in order. An odd trailing
/// partial is carried up unchanged.
fn combine_tree<T: Numeric>(
    ctx: &ClusterContext,
    op: &Arc<ReduceOp<T>>,
    mut level: Vec<TaskHandle>,
) -> DArrayResult<TaskHandle> {
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut pending = level.into_iter();
        while let Some(left) = pending.next() {
            match pending.next() {
                Some(right) => next.push(submit_combine(ctx, op, left, right)),
                None => next.push(left),
            }
        }
        level = next;
    }
    level.pop().ok_or(DArrayError::ShapeMismatch { expected: 1, actual: 0 })
}

fn submit_combine<T: Numeric>(
    ctx: &ClusterContext,
    op: &Arc<ReduceOp<T>>,
    left: TaskHandle,
    right: TaskHandle,
) -> TaskHandle {
    let target = left.target();
    let op = Arc::clone(op);
    ctx.scheduler().submit(TaskSpec {
        target,
        scope: ctx.scope_for(target),
        label: format!("reduce({}) combine {}+{}", op.name(), left.id(), right.id()),
        func: Box::new(move |inputs: Vec<Bytes>| -> Result<Bytes, String> {
            let [a, b] = inputs.as_slice() else {
                return Err(format!("combine expects 2 inputs, got {}", inputs.len()));
            };
            let a = decode_task_input::<T>(a)?;
            let b = decode_task_input::<T>(b)?;
            if a.len() != b.len() {
                return Err(format!("partials differ in length: {} vs {}", a.len(), b.len()));
            }
            let combined: Vec<T> = a.into_iter().zip(b).map(|(x, y)| op.combine(x, y)).collect();
            Ok(encode_block(&combined))
        }),
        args: vec![TaskArg::Future(left), TaskArg::Future(right)],
        deps: Vec::new(),
    })
}
