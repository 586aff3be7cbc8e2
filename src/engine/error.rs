//! Error types for block geometry, placement, block tasks and fetches.
//!
//! Errors fall into two families that are surfaced differently:
//!
//! * **Configuration errors** ([`BlockSpecError`], unknown placement names,
//!   [`RankMismatchError`], [`PartitioningError`], [`ConfigError`]) are raised
//!   synchronously by the call that misconfigures, before any block task is
//!   submitted.
//! * **Runtime errors** ([`TaskFailure`], [`FetchError`]) are captured per
//!   slot and only surface when that slot is resolved or collected. A
//!   [`DArray`](crate::DArray) with failed blocks stays a valid, inspectable
//!   value until someone asks for its data.
//!
//! Low-level operations return the small dedicated error types; the facade
//! bubbles them into [`DArrayError`] with `?`.
//!
//! ## Display vs. Debug
//! * `Display` is short and suitable for logs.
//! * `Debug` (derived) keeps the full structure for diagnostics.

use thiserror::Error;

use crate::engine::types::{ChunkID, ProcessorID, TaskID};

/// Convenience alias for results produced by the distributed array API.
pub type DArrayResult<T> = Result<T, DArrayError>;

/// Why a block specification was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSpecReason {
    /// The block spec's rank differs from the array's rank.
    RankMismatch {
        /// Rank of the array shape.
        expected: usize,
        /// Rank of the supplied block lengths.
        actual: usize,
    },
    /// A block length of zero was supplied.
    ZeroLength {
        /// Offending dimension.
        dim: usize,
    },
    /// A block length exceeds the array extent in that dimension.
    ExceedsExtent {
        /// Offending dimension.
        dim: usize,
        /// Supplied block length.
        len: usize,
        /// Array extent in that dimension.
        extent: usize,
    },
    /// The array shape itself has a zero extent.
    EmptyShape {
        /// Offending dimension.
        dim: usize,
    },
    /// The array shape has no dimensions.
    ZeroRank,
    /// The element count does not fit in an `isize`.
    TooLarge,
}

/// Returned when a block specification cannot tile the requested shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid block spec: {reason:?}")]
pub struct BlockSpecError {
    /// What was wrong with the block spec.
    pub reason: BlockSpecReason,
}

impl From<BlockSpecReason> for BlockSpecError {
    fn from(reason: BlockSpecReason) -> Self {
        Self { reason }
    }
}

/// Returned when a placement refers to a dimension or grid rank that the
/// block grid does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("placement `{policy}` expects rank {expected}, block grid has rank {actual}")]
pub struct RankMismatchError {
    /// Policy that was being applied.
    pub policy: String,
    /// Rank the policy requires.
    pub expected: usize,
    /// Rank of the block grid.
    pub actual: usize,
}

/// Returned when a multi-input operation receives arrays with different
/// block grids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "incompatible partitioning: operand {operand} has shape {actual_shape:?} / blocks {actual_blocks:?}, \
     expected shape {expected_shape:?} / blocks {expected_blocks:?}"
)]
pub struct PartitioningError {
    /// Position of the offending operand.
    pub operand: usize,
    /// Shape of the first array operand.
    pub expected_shape: Vec<usize>,
    /// Block lengths of the first array operand.
    pub expected_blocks: Vec<usize>,
    /// Shape of the offending operand.
    pub actual_shape: Vec<usize>,
    /// Block lengths of the offending operand.
    pub actual_blocks: Vec<usize>,
}

/// Returned when a cluster configuration value is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count that must be positive was zero.
    #[error("`{field}` must be greater than 0")]
    Zero {
        /// Name of the field.
        field: &'static str,
    },
    /// An environment variable could not be parsed.
    #[error("cannot parse {var}={value:?}")]
    Parse {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// The rayon pool could not be built.
    #[error("failed to build compute pool: {0}")]
    Pool(String),
}

/// Category of a block task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The block function returned an error.
    Error,
    /// The block function panicked.
    Panicked,
    /// The task was cancelled before it ran.
    Cancelled,
    /// A task this one depended on failed.
    DependencyFailed,
    /// An input chunk could not be fetched.
    Fetch,
}

/// The recorded failure of one block task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task} {kind:?}: {message}")]
pub struct TaskFailure {
    /// Task that failed.
    pub task: TaskID,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl TaskFailure {
    /// Creates a failure record.
    pub fn new(task: TaskID, kind: FailureKind, message: impl Into<String>) -> Self {
        Self { task, kind, message: message.into() }
    }

    /// Returns `true` if the task was cancelled rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

/// Returned by the remote-memory collaborator when chunk bytes cannot be
/// retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The owning processor cannot be reached.
    #[error("owning processor {0} is unreachable")]
    Unreachable(ProcessorID),
    /// The chunk was already released.
    #[error("chunk {0} has been released")]
    Released(ChunkID),
    /// The chunk bytes do not decode to the expected element type.
    #[error("chunk {chunk} holds {bytes} bytes, not a whole number of {elem_size}-byte elements")]
    Corrupt {
        /// Chunk that was fetched.
        chunk: ChunkID,
        /// Byte length found.
        bytes: usize,
        /// Element size expected.
        elem_size: usize,
    },
}

/// Aggregate error for the distributed array API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DArrayError {
    /// Bad block geometry.
    #[error(transparent)]
    InvalidBlockSpec(#[from] BlockSpecError),

    /// A symbolic placement name was not recognised.
    #[error("unknown placement policy `{name}`")]
    UnknownPlacementPolicy {
        /// Name that was supplied.
        name: String,
    },

    /// A placement does not fit the block grid's rank.
    #[error(transparent)]
    PlacementRankMismatch(#[from] RankMismatchError),

    /// A placement named a processor or worker the cluster does not have.
    #[error("unknown processor or worker {0}")]
    UnknownProcessor(u32),

    /// The cluster context has no processors to place blocks on.
    #[error("cluster has no available processors")]
    NoProcessors,

    /// An elementwise operation was given only scalars.
    #[error("operation needs at least one distributed array operand")]
    NoArrayOperand,

    /// Operands of a multi-input operation disagree on their block grids.
    #[error(transparent)]
    IncompatiblePartitioning(#[from] PartitioningError),

    /// A block's underlying computation failed.
    #[error("block {} failed: {failure}", crate::engine::types::fmt_index(.index))]
    BlockTaskFailure {
        /// Block multi-index.
        index: Vec<usize>,
        /// Original failure.
        failure: TaskFailure,
    },

    /// Resolved bytes for a block could not be retrieved.
    #[error("failed to fetch block {}: {source}", crate::engine::types::fmt_index(.index))]
    FetchFailure {
        /// Block multi-index.
        index: Vec<usize>,
        /// Collaborator error.
        #[source]
        source: FetchError,
    },

    /// Local data does not match the declared shape.
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Elements implied by the shape.
        expected: usize,
        /// Elements supplied.
        actual: usize,
    },

    /// An index or axis is outside the array's rank or extent.
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    OutOfBounds {
        /// Offending index.
        index: Vec<usize>,
        /// Array shape.
        shape: Vec<usize>,
    },

    /// An axis argument exceeds the array rank.
    #[error("axis {axis} out of range for rank {rank}")]
    InvalidAxis {
        /// Requested axis.
        axis: usize,
        /// Array rank.
        rank: usize,
    },

    /// The operation registry has no kernel for this operation and block class.
    #[error("no kernel registered for {op} on {class:?} blocks")]
    UnsupportedOperation {
        /// Operation name.
        op: String,
        /// Block shape class.
        class: crate::engine::ops::BlockShapeClass,
    },

    /// A slot was asked to transition after it had already settled.
    #[error("slot {} already settled", crate::engine::types::fmt_index(.index))]
    SlotAlreadySettled {
        /// Block multi-index.
        index: Vec<usize>,
    },

    /// Invalid cluster configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DArrayError {
    /// Returns `true` for errors raised at configuration time rather than
    /// captured from a running block.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            DArrayError::BlockTaskFailure { .. } | DArrayError::FetchFailure { .. }
        )
    }
}
