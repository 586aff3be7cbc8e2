//! The distributed array facade.
//!
//! A [`DArray<T>`] is an immutable value composed of a [`Partition`] (the
//! domain and its blocks), the [`BlockSpec`] it was cut with, and a shared
//! [`BlockDirectory`]. Cloning a `DArray` is cheap; all clones observe the
//! same slots. When the last clone (and every array derived from it) is
//! dropped, the directory releases its chunk references.
//!
//! ## Lifecycle
//! * **Construction** ([`DArray::allocate`], [`DArray::distribute`],
//!   [`DArray::fill`]) validates the block spec and the placement, then
//!   submits one population task per block. Nothing blocks.
//! * **Derivation** ([`DArray::broadcast`], the arithmetic helpers,
//!   [`DArray::map`], [`DArray::transpose`], axis [`DArray::reduce`]) builds a
//!   new directory whose tasks depend on this array's slots.
//! * **Suspension points** are [`DArray::materialize`], [`DArray::collect`],
//!   [`DArray::fetch_block`], [`DArray::get`] and whole-array reductions.
//!
//! ## Errors
//! Configuration errors are returned by the call that misconfigures. Block
//! failures only surface at a suspension point, reporting the first failing
//! block in block-index order; [`DArray::failures`] lists all of them.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::engine::array::LocalArray;
use crate::engine::blockspec::{derive_blocks, BlockSpec, Partition};
use crate::engine::broadcast::{self, submit_blockwise, Operand};
use crate::engine::context::ClusterContext;
use crate::engine::directory::{BlockDirectory, SlotView};
use crate::engine::domain::Domain;
use crate::engine::element::{decode_block, encode_block, Element, Numeric};
use crate::engine::error::{DArrayError, DArrayResult, TaskFailure};
use crate::engine::grid::Grid;
use crate::engine::ops::{BlockShapeClass, ElementwiseOp, LinAlgOp, OpRegistry, ReduceOp};
use crate::engine::placement::{assign, PlacementPolicy};
use crate::engine::reduce::{self, PendingScalar, Reduced};
use crate::engine::scheduler::TaskFn;
use crate::engine::types::ProcessorID;
use crate::profiling::profiler::{self, Arg};

/// Inspection record for one block.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkInfo {
    /// Block multi-index.
    pub index: Vec<usize>,
    /// Elements covered by the block.
    pub domain: Domain,
    /// Processor the block was placed on.
    pub target: ProcessorID,
    /// Processor holding the bytes, once resolved.
    pub owner: Option<ProcessorID>,
    /// Slot state.
    pub state: SlotView,
}

/// Distributed N-dimensional array.
pub struct DArray<T> {
    partition: Partition,
    spec: BlockSpec,
    directory: Arc<BlockDirectory>,
    ctx: ClusterContext,
    _element: PhantomData<fn() -> T>,
}

impl<T> Clone for DArray<T> {
    fn clone(&self) -> Self {
        Self {
            partition: self.partition.clone(),
            spec: self.spec.clone(),
            directory: Arc::clone(&self.directory),
            ctx: self.ctx.clone(),
            _element: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DArray")
            .field("shape", &self.partition.shape())
            .field("block_lens", &self.partition.block_lens())
            .field("directory", &self.directory)
            .finish()
    }
}

impl<T> DArray<T> {
    pub(crate) fn from_parts(
        partition: Partition,
        spec: BlockSpec,
        directory: BlockDirectory,
        ctx: ClusterContext,
    ) -> Self {
        Self { partition, spec, directory: Arc::new(directory), ctx, _element: PhantomData }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        self.partition.shape()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.partition.rank()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.partition.domain().volume()
    }

    /// Arrays always hold at least one element.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Domain of the whole array.
    pub fn domain(&self) -> Domain {
        self.partition.domain()
    }

    /// Block geometry.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Block spec the array was created with.
    pub fn block_spec(&self) -> &BlockSpec {
        &self.spec
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.partition.block_count()
    }

    /// The block directory.
    pub fn directory(&self) -> &BlockDirectory {
        &self.directory
    }

    /// Cluster the array lives on.
    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    /// Processor block `index` was placed on.
    pub fn target(&self, index: &[usize]) -> DArrayResult<ProcessorID> {
        self.directory.targets().get(index).copied().ok_or_else(|| DArrayError::OutOfBounds {
            index: index.to_vec(),
            shape: self.partition.grid_shape().to_vec(),
        })
    }

    /// Waits until every block has resolved.
    ///
    /// ## Errors
    /// The first block failure in block-index order.
    pub fn materialize(&self) -> DArrayResult<()> {
        self.directory.materialize_all()
    }

    /// Inspection records for every block, in block-index order. Never blocks.
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        self.partition
            .block_indices()
            .filter_map(|index| {
                let domain = self.partition.block_domain(&index)?;
                let target = self.directory.targets().get(&index).copied()?;
                let state = self.directory.get(&index).ok()?;
                let owner = match &state {
                    SlotView::Resolved(chunk) => Some(chunk.owner),
                    _ => None,
                };
                Some(ChunkInfo { index, domain, target, owner, state })
            })
            .collect()
    }

    /// Distinct processors holding (or assigned) blocks, ascending.
    pub fn owners(&self) -> Vec<ProcessorID> {
        let owners: BTreeSet<ProcessorID> =
            self.chunks().into_iter().map(|info| info.owner.unwrap_or(info.target)).collect();
        owners.into_iter().collect()
    }

    /// Requests cancellation of every block still pending. Returns the number
    /// of tasks signalled.
    pub fn cancel(&self) -> usize {
        self.directory.cancel_all()
    }

    /// Every block failure observed so far, in block-index order.
    pub fn failures(&self) -> Vec<(Vec<usize>, TaskFailure)> {
        self.directory.failures()
    }
}

impl<T: Element> DArray<T> {
    /// Allocates an array whose blocks are produced by `generator`, called
    /// once per block with the block's domain and returning its row-major
    /// elements.
    ///
    /// ## Errors
    /// Block spec and placement errors, before anything is submitted.
    pub fn allocate<F>(
        ctx: &ClusterContext,
        shape: &[usize],
        spec: BlockSpec,
        placement: &PlacementPolicy,
        generator: F,
    ) -> DArrayResult<Self>
    where
        F: Fn(&Domain) -> Vec<T> + Send + Sync + 'static,
    {
        Self::try_allocate(ctx, shape, spec, placement, move |domain| Ok(generator(domain)))
    }

    /// Like [`DArray::allocate`], but the generator may fail. A failure is
    /// recorded in that block's slot.
    pub fn try_allocate<F>(
        ctx: &ClusterContext,
        shape: &[usize],
        spec: BlockSpec,
        placement: &PlacementPolicy,
        generator: F,
    ) -> DArrayResult<Self>
    where
        F: Fn(&Domain) -> Result<Vec<T>, String> + Send + Sync + 'static,
    {
        let partition = derive_blocks(shape, &spec, ctx.processor_count())?;
        let targets = assign(partition.grid_shape(), placement, ctx.processors())?;
        debug!(
            shape = ?shape,
            blocks = ?partition.block_lens(),
            placement = %placement,
            "allocating distributed array"
        );
        let directory =
            BlockDirectory::populate(&partition, targets, ctx, "allocate", move |domain| {
                let values = generator(domain)?;
                if values.len() != domain.volume() {
                    return Err(format!(
                        "generator produced {} elements for block {domain} of {}",
                        values.len(),
                        domain.volume()
                    ));
                }
                Ok(encode_block(&values))
            })?;
        Ok(Self::from_parts(partition, spec, directory, ctx.clone()))
    }

    /// Distributes a local array.
    pub fn distribute(
        ctx: &ClusterContext,
        source: &LocalArray<T>,
        spec: BlockSpec,
        placement: &PlacementPolicy,
    ) -> DArrayResult<Self> {
        let partition = derive_blocks(source.shape(), &spec, ctx.processor_count())?;
        let targets = assign(partition.grid_shape(), placement, ctx.processors())?;
        let source = Arc::new(source.clone());
        let directory =
            BlockDirectory::populate(&partition, targets, ctx, "distribute", move |domain| {
                let block = source.extract(domain).map_err(|e| e.to_string())?;
                Ok(encode_block(block.as_slice()))
            })?;
        Ok(Self::from_parts(partition, spec, directory, ctx.clone()))
    }

    /// Array with every element set to `value`.
    pub fn fill(
        ctx: &ClusterContext,
        shape: &[usize],
        spec: BlockSpec,
        placement: &PlacementPolicy,
        value: T,
    ) -> DArrayResult<Self> {
        Self::allocate(ctx, shape, spec, placement, move |domain| vec![value; domain.volume()])
    }

    /// Materializes and gathers every block into one local array.
    ///
    /// ## Errors
    /// [`DArrayError::BlockTaskFailure`] or [`DArrayError::FetchFailure`] for
    /// the first failing block in block-index order.
    pub fn collect(&self) -> DArrayResult<LocalArray<T>> {
        let _span = profiler::span("DArray::collect")
            .arg("blocks", Arg::U64(self.block_count() as u64));
        self.materialize()?;
        let zero = <T as bytemuck::Zeroable>::zeroed();
        let mut out = LocalArray::filled(self.shape(), zero);
        for index in self.partition.block_indices() {
            let block = self.fetch_block(&index)?;
            let domain = self.block_domain(&index)?;
            out.insert(&domain, block.as_slice())?;
        }
        Ok(out)
    }

    /// Resolves and fetches one block.
    pub fn fetch_block(&self, index: &[usize]) -> DArrayResult<LocalArray<T>> {
        let domain = self.block_domain(index)?;
        let lease = self.directory.lease(index)?;
        let fetch_failure = |source| DArrayError::FetchFailure { index: index.to_vec(), source };
        let bytes = lease.fetch().map_err(fetch_failure)?;
        let data = decode_block::<T>(lease.chunk().id, &bytes).map_err(fetch_failure)?;
        LocalArray::from_vec(&domain.shape(), data)
    }

    /// Reads one element, fetching only the block that holds it.
    pub fn get(&self, element: &[usize]) -> DArrayResult<T> {
        let (block, offset) = self.partition.locate(element).ok_or_else(|| {
            DArrayError::OutOfBounds { index: element.to_vec(), shape: self.shape().to_vec() }
        })?;
        let values = self.fetch_block(&block)?;
        values.get(&offset).copied().ok_or_else(|| DArrayError::OutOfBounds {
            index: element.to_vec(),
            shape: self.shape().to_vec(),
        })
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(T) -> T + Send + Sync + 'static) -> DArrayResult<Self> {
        broadcast::map_blocks(self, f)
    }

    /// Transposed copy of a rank-2 array. Block `(i, j)` becomes block
    /// `(j, i)` and stays on the same processor.
    ///
    /// ## Errors
    /// [`DArrayError::InvalidAxis`] for other ranks.
    pub fn transpose_with(&self, registry: &OpRegistry<T>) -> DArrayResult<Self> {
        if self.rank() != 2 {
            return Err(DArrayError::InvalidAxis { axis: 1, rank: self.rank() });
        }
        let _span = profiler::span("transpose");
        let kernel = registry.linalg(BlockShapeClass::Matrix)?;
        let partition = self.partition.swap_axes(0, 1);
        let spec = BlockSpec::Explicit(partition.block_lens().to_vec());
        submit_blockwise(self, partition, spec, "transpose", |out_index| {
            let index = [out_index[1], out_index[0]];
            let shape = broadcast::block_shape(&self.partition, &index)?;
            let args = vec![self.directory.task_arg(&index)?];
            let target = self.target(&index)?;
            let kernel = Arc::clone(&kernel);
            let func: TaskFn =
                Box::new(move |inputs: Vec<bytes::Bytes>| -> Result<bytes::Bytes, String> {
                    let bytes = inputs.first().ok_or("missing input block")?;
                    let block = broadcast::decode_local::<T>(&shape, bytes)?;
                    let out = kernel(LinAlgOp::Transpose, &block)?;
                    Ok(encode_block(out.as_slice()))
                });
            Ok((target, args, func))
        })
    }

    fn block_domain(&self, index: &[usize]) -> DArrayResult<Domain> {
        self.partition.block_domain(index).ok_or_else(|| DArrayError::OutOfBounds {
            index: index.to_vec(),
            shape: self.partition.grid_shape().to_vec(),
        })
    }
}

impl<T: Numeric> DArray<T> {
    /// All-zero array.
    pub fn zeros(
        ctx: &ClusterContext,
        shape: &[usize],
        spec: BlockSpec,
        placement: &PlacementPolicy,
    ) -> DArrayResult<Self> {
        Self::fill(ctx, shape, spec, placement, T::ZERO)
    }

    /// All-one array.
    pub fn ones(
        ctx: &ClusterContext,
        shape: &[usize],
        spec: BlockSpec,
        placement: &PlacementPolicy,
    ) -> DArrayResult<Self> {
        Self::fill(ctx, shape, spec, placement, T::ONE)
    }

    /// Applies `op` elementwise across `operands` with the standard kernels.
    pub fn broadcast(op: ElementwiseOp<T>, operands: &[Operand<'_, T>]) -> DArrayResult<Self> {
        broadcast::broadcast_blocks(&OpRegistry::standard(), op, operands)
    }

    /// Like [`DArray::broadcast`], with the output blocks placed by
    /// `placement` instead of following the first array operand.
    pub fn broadcast_with(
        op: ElementwiseOp<T>,
        operands: &[Operand<'_, T>],
        placement: &PlacementPolicy,
    ) -> DArrayResult<Self> {
        broadcast::broadcast_blocks_with(&OpRegistry::standard(), op, operands, Some(placement))
    }

    /// Elementwise `self + other`.
    pub fn add(&self, other: &Self) -> DArrayResult<Self> {
        Self::broadcast(ElementwiseOp::Add, &[self.into(), other.into()])
    }

    /// Elementwise `self - other`.
    pub fn sub(&self, other: &Self) -> DArrayResult<Self> {
        Self::broadcast(ElementwiseOp::Sub, &[self.into(), other.into()])
    }

    /// Elementwise `self * other`.
    pub fn mul(&self, other: &Self) -> DArrayResult<Self> {
        Self::broadcast(ElementwiseOp::Mul, &[self.into(), other.into()])
    }

    /// Elementwise `self / other`.
    pub fn div(&self, other: &Self) -> DArrayResult<Self> {
        Self::broadcast(ElementwiseOp::Div, &[self.into(), other.into()])
    }

    /// Every element multiplied by `factor`.
    pub fn scale(&self, factor: T) -> DArrayResult<Self> {
        Self::broadcast(ElementwiseOp::Mul, &[self.into(), Operand::Scalar(factor)])
    }

    /// Transposed copy of a rank-2 array using the standard kernels.
    pub fn transpose(&self) -> DArrayResult<Self> {
        self.transpose_with(&OpRegistry::standard())
    }

    /// Reduces the whole array (`axis == None`) or along one axis.
    pub fn reduce(&self, op: ReduceOp<T>, axis: Option<usize>) -> DArrayResult<Reduced<T>> {
        reduce::reduce_blocks(&OpRegistry::standard(), op, self, axis)
    }

    /// Starts a whole-array reduction without waiting for it.
    pub fn reduce_lazy(&self, op: ReduceOp<T>) -> DArrayResult<PendingScalar<T>> {
        reduce::reduce_lazy(&OpRegistry::standard(), op, self)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> DArrayResult<T> {
        self.reduce_lazy(ReduceOp::Sum)?.wait()
    }
}

/// Builds the processor grid for a block grid shape; exposed for inspection
/// tools that want a placement preview without allocating.
pub fn preview_placement(
    ctx: &ClusterContext,
    shape: &[usize],
    spec: &BlockSpec,
    placement: &PlacementPolicy,
) -> DArrayResult<Grid<ProcessorID>> {
    let partition = derive_blocks(shape, spec, ctx.processor_count())?;
    assign(partition.grid_shape(), placement, ctx.processors())
}
