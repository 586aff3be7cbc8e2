//! Elementwise engine: derives a new distributed array block by block.
//!
//! [`broadcast_blocks`] takes an [`ElementwiseOp`] and a list of operands
//! (arrays or scalars) and builds a fresh [`BlockDirectory`] with one new
//! task per output block. The task for block `b` receives block `b` of every
//! array operand:
//!
//! * a resolved input slot is passed as its chunk,
//! * a pending input slot is passed as its task handle, which makes the new
//!   task depend on it instead of blocking the caller.
//!
//! Nothing blocks here. Failures of input blocks are not raised at this
//! point; they flow into the dependent output slots as
//! [`FailureKind::DependencyFailed`](crate::engine::error::FailureKind::DependencyFailed).
//!
//! ## Partitioning
//! Every array operand must have the same shape and block lengths as the
//! first array operand, otherwise [`DArrayError::IncompatiblePartitioning`]
//! is raised before anything is submitted. The output reuses the first array
//! operand's partition, and its placement unless [`broadcast_blocks_with`]
//! is given a policy for the output.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::engine::array::LocalArray;
use crate::engine::blockspec::{BlockSpec, Partition};
use crate::engine::darray::DArray;
use crate::engine::directory::{BlockDirectory, SlotInit};
use crate::engine::element::{decode_task_input, encode_block, Element, Numeric};
use crate::engine::error::{DArrayError, DArrayResult, PartitioningError};
use crate::engine::grid::Grid;
use crate::engine::ops::{BlockOperand, BlockShapeClass, ElementwiseOp, OpRegistry};
use crate::engine::placement::{assign, PlacementPolicy};
use crate::engine::scheduler::{TaskArg, TaskFn, TaskSpec};
use crate::engine::types::{fmt_index, ProcessorID};
use crate::profiling::profiler::{self, Arg};

/// One operand of a broadcast.
#[derive(Debug)]
pub enum Operand<'a, T> {
    /// A distributed array.
    Array(&'a DArray<T>),
    /// A scalar applied to every element.
    Scalar(T),
}

impl<'a, T> From<&'a DArray<T>> for Operand<'a, T> {
    fn from(array: &'a DArray<T>) -> Self {
        Operand::Array(array)
    }
}

/// Per-block plan: target processor, inputs, block function.
pub(crate) type BlockPlan = (ProcessorID, Vec<TaskArg>, TaskFn);

/// Submits one task per block of `partition` as described by `plan`, and
/// wraps the pending slots in a new array sharing `source`'s context.
pub(crate) fn submit_blockwise<T: Element>(
    source: &DArray<T>,
    partition: Partition,
    spec: BlockSpec,
    label: &str,
    mut plan: impl FnMut(&[usize]) -> DArrayResult<BlockPlan>,
) -> DArrayResult<DArray<T>> {
    let ctx = source.context();
    let mut targets = Vec::with_capacity(partition.block_count());
    let slots = Grid::try_from_fn(partition.grid_shape(), |index| {
        let (target, args, func) = plan(index)?;
        targets.push(target);
        let handle = ctx.scheduler().submit(TaskSpec {
            target,
            scope: ctx.scope_for(target),
            label: format!("{label} {}", fmt_index(index)),
            func,
            args,
            deps: Vec::new(),
        });
        Ok::<_, DArrayError>(SlotInit::Pending(handle))
    })?;
    let targets = Grid::from_cells(partition.grid_shape().to_vec(), targets).ok_or_else(|| {
        DArrayError::ShapeMismatch { expected: partition.block_count(), actual: slots.len() }
    })?;
    let directory = BlockDirectory::from_slots(slots, targets, Arc::clone(ctx.scheduler()))
        .ok_or_else(|| DArrayError::ShapeMismatch {
            expected: partition.block_count(),
            actual: 0,
        })?;
    debug!(label, blocks = directory.block_count(), "derived directory");
    Ok(DArray::from_parts(partition, spec, directory, ctx.clone()))
}

/// Checks that every array operand is partitioned like the first.
pub fn check_partitioning<T>(operands: &[Operand<'_, T>]) -> DArrayResult<()> {
    let mut arrays = operands.iter().enumerate().filter_map(|(pos, operand)| match operand {
        Operand::Array(array) => Some((pos, *array)),
        Operand::Scalar(_) => None,
    });
    let Some((_, first)) = arrays.next() else {
        return Ok(());
    };
    for (pos, array) in arrays {
        if array.partition() != first.partition() {
            return Err(PartitioningError {
                operand: pos,
                expected_shape: first.shape().to_vec(),
                expected_blocks: first.partition().block_lens().to_vec(),
                actual_shape: array.shape().to_vec(),
                actual_blocks: array.partition().block_lens().to_vec(),
            }
            .into());
        }
    }
    Ok(())
}

/// Applies `op` elementwise across `operands`, folding left, and returns the
/// derived array.
///
/// ## Errors
/// * [`DArrayError::NoArrayOperand`] if every operand is a scalar.
/// * [`DArrayError::IncompatiblePartitioning`] for mismatched arrays.
/// * [`DArrayError::UnsupportedOperation`] if `registry` lacks an
///   elementwise kernel for the block class.
pub fn broadcast_blocks<T: Numeric>(
    registry: &OpRegistry<T>,
    op: ElementwiseOp<T>,
    operands: &[Operand<'_, T>],
) -> DArrayResult<DArray<T>> {
    broadcast_blocks_with(registry, op, operands, None)
}

/// Like [`broadcast_blocks`], but output blocks are placed by `placement`
/// when one is given. Inputs living elsewhere are fetched by the scheduler.
///
/// ## Errors
/// As [`broadcast_blocks`], plus placement errors from
/// [`assign`](crate::engine::placement::assign).
pub fn broadcast_blocks_with<T: Numeric>(
    registry: &OpRegistry<T>,
    op: ElementwiseOp<T>,
    operands: &[Operand<'_, T>],
    placement: Option<&PlacementPolicy>,
) -> DArrayResult<DArray<T>> {
    let _span = profiler::span("broadcast").arg("op", Arg::Str(op.name().to_string()));
    let first = operands
        .iter()
        .find_map(|operand| match operand {
            Operand::Array(array) => Some(*array),
            Operand::Scalar(_) => None,
        })
        .ok_or(DArrayError::NoArrayOperand)?;
    check_partitioning(operands)?;
    let kernel = registry.elementwise(BlockShapeClass::of_rank(first.rank()))?;

    let layout: Arc<Vec<Option<T>>> = Arc::new(
        operands
            .iter()
            .map(|operand| match operand {
                Operand::Array(_) => None,
                Operand::Scalar(value) => Some(*value),
            })
            .collect(),
    );
    let arrays: Vec<&DArray<T>> = operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Array(array) => Some(*array),
            Operand::Scalar(_) => None,
        })
        .collect();
    let placed = placement
        .map(|policy| assign(first.partition().grid_shape(), policy, first.context().processors()))
        .transpose()?;
    let op = Arc::new(op);
    let partition = first.partition().clone();
    let label = format!("broadcast({})", op.name());

    submit_blockwise(first, partition.clone(), first.block_spec().clone(), &label, |index| {
        let shape = block_shape(&partition, index)?;
        let args = arrays
            .iter()
            .map(|array| array.directory().task_arg(index))
            .collect::<DArrayResult<Vec<_>>>()?;
        let target = match &placed {
            Some(targets) => *targets.get(index).ok_or_else(|| DArrayError::OutOfBounds {
                index: index.to_vec(),
                shape: targets.dims().to_vec(),
            })?,
            None => first.target(index)?,
        };
        let (kernel, op, layout) = (Arc::clone(&kernel), Arc::clone(&op), Arc::clone(&layout));
        let func: TaskFn = Box::new(move |inputs: Vec<Bytes>| -> Result<Bytes, String> {
            let mut inputs = inputs.into_iter();
            let mut block_operands = Vec::with_capacity(layout.len());
            for slot in layout.iter() {
                match slot {
                    Some(value) => block_operands.push(BlockOperand::Scalar(*value)),
                    None => {
                        let bytes = inputs.next().ok_or("missing input block")?;
                        block_operands.push(BlockOperand::Block(decode_local(&shape, &bytes)?));
                    }
                }
            }
            let out = kernel(op.as_ref(), block_operands.as_slice(), shape.as_slice())?;
            Ok(encode_block(out.as_slice()))
        });
        Ok((target, args, func))
    })
}

/// Applies `f` to every element of `array`.
pub fn map_blocks<T: Element>(
    array: &DArray<T>,
    f: impl Fn(T) -> T + Send + Sync + 'static,
) -> DArrayResult<DArray<T>> {
    let _span = profiler::span("map");
    let f = Arc::new(f);
    let partition = array.partition().clone();
    submit_blockwise(array, partition.clone(), array.block_spec().clone(), "map", |index| {
        let shape = block_shape(&partition, index)?;
        let args = vec![array.directory().task_arg(index)?];
        let target = array.target(index)?;
        let f = Arc::clone(&f);
        let func: TaskFn = Box::new(move |inputs: Vec<Bytes>| -> Result<Bytes, String> {
            let bytes = inputs.first().ok_or("missing input block")?;
            let block = decode_local::<T>(&shape, bytes)?;
            Ok(encode_block(block.map(|v| (*f)(v)).as_slice()))
        });
        Ok((target, args, func))
    })
}

pub(crate) fn block_shape(partition: &Partition, index: &[usize]) -> DArrayResult<Vec<usize>> {
    partition
        .block_domain(index)
        .map(|domain| domain.shape())
        .ok_or_else(|| DArrayError::OutOfBounds {
            index: index.to_vec(),
            shape: partition.grid_shape().to_vec(),
        })
}

/// Decodes task input bytes into a block of the given shape.
pub(crate) fn decode_local<T: Element>(shape: &[usize], bytes: &Bytes) -> Result<LocalArray<T>, String> {
    let data = decode_task_input::<T>(bytes)?;
    LocalArray::from_vec(shape, data).map_err(|e| e.to_string())
}
