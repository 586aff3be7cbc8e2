//! Block operations and the kernel registry.
//!
//! Operations are a closed set of tagged values rather than open-ended
//! runtime dispatch:
//!
//! * [`ElementwiseOp`]: binary element-by-element operations (`+ - * /`,
//!   min, max, or a custom function), folded left over any number of
//!   operands.
//! * [`ReduceOp`]: associative reductions carrying their algebraic identity.
//! * [`LinAlgOp`]: block-level linear algebra (currently transpose).
//!
//! Each operation kind is executed on a block by a **kernel** looked up in an
//! [`OpRegistry`] keyed by `(OpKind, BlockShapeClass)`. The standard registry
//! provides kernels for every class; callers may override a kernel for one
//! class (for example a tuned matrix kernel) without touching the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::array::LocalArray;
use crate::engine::element::{Element, Numeric};
use crate::engine::error::{DArrayError, DArrayResult};
use crate::engine::grid::{linear_offset, MultiIndexIter};
use crate::engine::types::volume;

/// Binary scalar function used by custom operations.
pub type ScalarFn<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// Element-by-element operation.
#[derive(Clone)]
pub enum ElementwiseOp<T> {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// Smaller operand.
    Min,
    /// Larger operand.
    Max,
    /// Caller-supplied function.
    Custom(ScalarFn<T>),
}

impl<T: Numeric> ElementwiseOp<T> {
    /// Wraps a custom binary function.
    pub fn custom(f: impl Fn(T, T) -> T + Send + Sync + 'static) -> Self {
        ElementwiseOp::Custom(Arc::new(f))
    }

    /// Applies the operation to one pair of elements.
    #[inline]
    pub fn apply(&self, a: T, b: T) -> T {
        match self {
            ElementwiseOp::Add => a + b,
            ElementwiseOp::Sub => a - b,
            ElementwiseOp::Mul => a * b,
            ElementwiseOp::Div => a / b,
            ElementwiseOp::Min => a.min_of(b),
            ElementwiseOp::Max => a.max_of(b),
            ElementwiseOp::Custom(f) => f(a, b),
        }
    }
}

impl<T> ElementwiseOp<T> {
    /// Operation name for labels and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ElementwiseOp::Add => "add",
            ElementwiseOp::Sub => "sub",
            ElementwiseOp::Mul => "mul",
            ElementwiseOp::Div => "div",
            ElementwiseOp::Min => "min",
            ElementwiseOp::Max => "max",
            ElementwiseOp::Custom(_) => "custom",
        }
    }
}

impl<T> fmt::Debug for ElementwiseOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Associative reduction with its identity element.
///
/// Only associativity is assumed. The engine fixes the combine order by
/// block index, so non-commutative operations still reduce reproducibly.
#[derive(Clone)]
pub enum ReduceOp<T> {
    /// Sum, identity 0.
    Sum,
    /// Product, identity 1.
    Prod,
    /// Minimum, identity is the greatest value (`+inf` for floats).
    Min,
    /// Maximum, identity is the least value (`-inf` for floats).
    Max,
    /// Caller-supplied operation. `identity` must be its true identity.
    Custom {
        /// Identity element.
        identity: T,
        /// Associative combine function.
        combine: ScalarFn<T>,
    },
}

impl<T: Numeric> ReduceOp<T> {
    /// Wraps a custom associative operation.
    pub fn custom(identity: T, combine: impl Fn(T, T) -> T + Send + Sync + 'static) -> Self {
        ReduceOp::Custom { identity, combine: Arc::new(combine) }
    }

    /// Identity element of the operation.
    pub fn identity(&self) -> T {
        match self {
            ReduceOp::Sum => T::ZERO,
            ReduceOp::Prod => T::ONE,
            ReduceOp::Min => T::MIN_IDENTITY,
            ReduceOp::Max => T::MAX_IDENTITY,
            ReduceOp::Custom { identity, .. } => *identity,
        }
    }

    /// Combines two partial results, `a` before `b`.
    #[inline]
    pub fn combine(&self, a: T, b: T) -> T {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Prod => a * b,
            ReduceOp::Min => a.min_of(b),
            ReduceOp::Max => a.max_of(b),
            ReduceOp::Custom { combine, .. } => combine(a, b),
        }
    }
}

impl<T> ReduceOp<T> {
    /// Operation name for labels and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Custom { .. } => "custom",
        }
    }
}

impl<T> fmt::Debug for ReduceOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Block-level linear-algebra operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinAlgOp {
    /// Swap the two axes of a matrix.
    Transpose,
}

/// Operation family, the first half of a registry key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// [`ElementwiseOp`]
    Elementwise,
    /// [`ReduceOp`]
    Reduce,
    /// [`LinAlgOp`]
    LinAlg,
}

/// Coarse block shape, the second half of a registry key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockShapeClass {
    /// Rank 1.
    Vector,
    /// Rank 2.
    Matrix,
    /// Rank 3 and above.
    Tensor,
}

impl BlockShapeClass {
    /// Class of blocks with the given rank.
    pub fn of_rank(rank: usize) -> Self {
        match rank {
            0 | 1 => BlockShapeClass::Vector,
            2 => BlockShapeClass::Matrix,
            _ => BlockShapeClass::Tensor,
        }
    }
}

/// One operand of an elementwise kernel.
#[derive(Clone, Debug)]
pub enum BlockOperand<T> {
    /// A block of an input array.
    Block(LocalArray<T>),
    /// A scalar broadcast over the block.
    Scalar(T),
}

/// Elementwise kernel: operation, operands, output block shape.
pub type ElementwiseKernel<T> = Arc<
    dyn Fn(&ElementwiseOp<T>, &[BlockOperand<T>], &[usize]) -> Result<LocalArray<T>, String>
        + Send
        + Sync,
>;

/// Reduction kernel: reduces one block along `axis` (or entirely), keeping
/// the reduced extents as 1.
pub type ReduceKernel<T> = Arc<
    dyn Fn(&ReduceOp<T>, &LocalArray<T>, Option<usize>) -> Result<LocalArray<T>, String>
        + Send
        + Sync,
>;

/// Linear-algebra kernel on one block.
pub type LinAlgKernel<T> =
    Arc<dyn Fn(LinAlgOp, &LocalArray<T>) -> Result<LocalArray<T>, String> + Send + Sync>;

/// A registered kernel.
#[derive(Clone)]
pub enum Kernel<T> {
    /// Elementwise kernel.
    Elementwise(ElementwiseKernel<T>),
    /// Reduction kernel.
    Reduce(ReduceKernel<T>),
    /// Linear-algebra kernel.
    LinAlg(LinAlgKernel<T>),
}

impl<T> Kernel<T> {
    /// Operation family served by the kernel.
    pub fn kind(&self) -> OpKind {
        match self {
            Kernel::Elementwise(_) => OpKind::Elementwise,
            Kernel::Reduce(_) => OpKind::Reduce,
            Kernel::LinAlg(_) => OpKind::LinAlg,
        }
    }
}

/// Kernels keyed by `(OpKind, BlockShapeClass)`.
#[derive(Clone)]
pub struct OpRegistry<T> {
    kernels: HashMap<(OpKind, BlockShapeClass), Kernel<T>>,
}

impl<T> OpRegistry<T> {
    /// Registry with no kernels.
    pub fn empty() -> Self {
        Self { kernels: HashMap::new() }
    }

    /// Registers `kernel` for `class`, returning the kernel it replaces.
    pub fn register(&mut self, class: BlockShapeClass, kernel: Kernel<T>) -> Option<Kernel<T>> {
        self.kernels.insert((kernel.kind(), class), kernel)
    }

    /// Returns `true` if a kernel is registered for the key.
    pub fn supports(&self, kind: OpKind, class: BlockShapeClass) -> bool {
        self.kernels.contains_key(&(kind, class))
    }

    fn lookup(&self, kind: OpKind, class: BlockShapeClass, op: &str) -> DArrayResult<&Kernel<T>> {
        self.kernels
            .get(&(kind, class))
            .ok_or_else(|| DArrayError::UnsupportedOperation { op: op.to_string(), class })
    }

    /// Elementwise kernel for `class`.
    pub fn elementwise(&self, class: BlockShapeClass) -> DArrayResult<ElementwiseKernel<T>> {
        match self.lookup(OpKind::Elementwise, class, "elementwise")? {
            Kernel::Elementwise(kernel) => Ok(Arc::clone(kernel)),
            _ => Err(DArrayError::UnsupportedOperation { op: "elementwise".to_string(), class }),
        }
    }

    /// Reduction kernel for `class`.
    pub fn reduce(&self, class: BlockShapeClass) -> DArrayResult<ReduceKernel<T>> {
        match self.lookup(OpKind::Reduce, class, "reduce")? {
            Kernel::Reduce(kernel) => Ok(Arc::clone(kernel)),
            _ => Err(DArrayError::UnsupportedOperation { op: "reduce".to_string(), class }),
        }
    }

    /// Linear-algebra kernel for `class`.
    pub fn linalg(&self, class: BlockShapeClass) -> DArrayResult<LinAlgKernel<T>> {
        match self.lookup(OpKind::LinAlg, class, "linalg")? {
            Kernel::LinAlg(kernel) => Ok(Arc::clone(kernel)),
            _ => Err(DArrayError::UnsupportedOperation { op: "linalg".to_string(), class }),
        }
    }
}

impl<T: Numeric> OpRegistry<T> {
    /// Registry with the built-in kernels: elementwise and reduction for every
    /// class, transpose for matrices.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for class in [BlockShapeClass::Vector, BlockShapeClass::Matrix, BlockShapeClass::Tensor] {
            registry.register(class, Kernel::Elementwise(Arc::new(elementwise_kernel::<T>)));
            registry.register(class, Kernel::Reduce(Arc::new(reduce_kernel::<T>)));
        }
        registry.register(BlockShapeClass::Matrix, Kernel::LinAlg(Arc::new(linalg_kernel::<T>)));
        registry
    }
}

impl<T: Numeric> Default for OpRegistry<T> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<T> fmt::Debug for OpRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kernels.keys()).finish()
    }
}

fn elementwise_kernel<T: Numeric>(
    op: &ElementwiseOp<T>,
    operands: &[BlockOperand<T>],
    shape: &[usize],
) -> Result<LocalArray<T>, String> {
    let len = volume(shape);
    for operand in operands {
        if let BlockOperand::Block(block) = operand {
            if block.len() != len {
                return Err(format!("operand has {} elements, block has {len}", block.len()));
            }
        }
    }
    let value = |operand: &BlockOperand<T>, i: usize| match operand {
        BlockOperand::Block(block) => block.as_slice()[i],
        BlockOperand::Scalar(s) => *s,
    };
    let (first, rest) = operands.split_first().ok_or("no operands")?;
    let data = (0..len)
        .map(|i| rest.iter().fold(value(first, i), |acc, operand| op.apply(acc, value(operand, i))))
        .collect();
    LocalArray::from_vec(shape, data).map_err(|e| e.to_string())
}

fn reduce_kernel<T: Numeric>(
    op: &ReduceOp<T>,
    block: &LocalArray<T>,
    axis: Option<usize>,
) -> Result<LocalArray<T>, String> {
    let mut out_shape = block.shape().to_vec();
    match axis {
        Some(axis) if axis >= out_shape.len() => {
            return Err(format!("axis {axis} out of range for rank {}", out_shape.len()))
        }
        Some(axis) => out_shape[axis] = 1,
        None => out_shape.iter_mut().for_each(|extent| *extent = 1),
    }
    let mut out = vec![op.identity(); volume(&out_shape)];
    let mut target = vec![0; out_shape.len()];
    // Row-major traversal visits each output cell's inputs in increasing
    // order along the reduced axes.
    for (index, &value) in MultiIndexIter::new(block.shape()).zip(block.as_slice()) {
        for (t, (&i, &extent)) in target.iter_mut().zip(index.iter().zip(&out_shape)) {
            *t = if extent == 1 { 0 } else { i };
        }
        if let Some(offset) = linear_offset(&out_shape, &target) {
            out[offset] = op.combine(out[offset], value);
        }
    }
    LocalArray::from_vec(&out_shape, out).map_err(|e| e.to_string())
}

fn linalg_kernel<T: Element>(op: LinAlgOp, block: &LocalArray<T>) -> Result<LocalArray<T>, String> {
    match op {
        LinAlgOp::Transpose => block.transpose().map_err(|e| e.to_string()),
    }
}
