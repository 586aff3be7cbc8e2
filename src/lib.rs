//! # PGAS Array
//!
//! Block-partitioned distributed arrays for a cluster of cooperating
//! processors, addressed through a PGAS (Parallel Global Address Space)
//! directory.
//!
//! ## Design Goals
//! - Exact block geometry: blocks tile the array with no gaps or overlaps
//! - Deterministic placement policies with documented wraparound rules
//! - Lazy materialization: every block is a pending task or a resolved chunk
//! - Deterministic reductions, independent of placement
//! - Explicit cluster context, no global session state
//!
//! ## Collaborators
//! Block tasks run on a [`Scheduler`] and their bytes live in a
//! [`RemoteMemory`]. [`ClusterContext::local`] wires up the in-process
//! implementations ([`LocalScheduler`] on a Rayon pool, [`InMemoryStore`]).
//!
//! ```no_run
//! use pgas_array::prelude::*;
//!
//! let ctx = ClusterContext::local(&ClusterConfig::default().with_processors_per_worker(2))?;
//! let x = DArray::<f64>::fill(&ctx, &[10, 10], BlockSpec::lengths([5, 5]), &PlacementPolicy::BlockRow, 2.0)?;
//! let y = x.add(&x)?.scale(3.0)?;
//! assert!(y.collect()?.as_slice().iter().all(|&v| v == 12.0));
//! # Ok::<(), DArrayError>(())
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]
#![deny(dead_code)]

pub mod engine;
/// Execution profiling for block tasks and engine calls.
pub mod profiling;

pub use profiling::profiler;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Arrays

pub use engine::darray::{preview_placement, ChunkInfo, DArray};
pub use engine::array::LocalArray;
pub use engine::element::{Element, Numeric};

// Geometry and placement

pub use engine::blockspec::{block_domain, derive_blocks, BlockSpec, Partition};
pub use engine::domain::{DimRange, Domain};
pub use engine::grid::Grid;
pub use engine::placement::{assign, Assignment, PlacementPolicy, PlacementTarget};

// Directory and engines

pub use engine::directory::{BlockDirectory, SlotInit, SlotView};
pub use engine::broadcast::{broadcast_blocks, broadcast_blocks_with, Operand};
pub use engine::reduce::{reduce_blocks, reduce_lazy, PendingScalar, Reduced};
pub use engine::ops::{
    BlockOperand,
    BlockShapeClass,
    ElementwiseOp,
    Kernel,
    LinAlgOp,
    OpKind,
    OpRegistry,
    ReduceOp,
};

// Cluster and collaborators

pub use engine::config::ClusterConfig;
pub use engine::context::{local_processors, ClusterContext};
pub use engine::future::{TaskFuture, TaskHandle, TaskOutcome};
pub use engine::memory::{ChunkLease, ChunkRef, InMemoryStore, RemoteMemory, StoreDiagnostics};
pub use engine::scheduler::{LocalScheduler, Scheduler, TaskArg, TaskFn, TaskSpec};

pub use engine::error::{
    BlockSpecError,
    BlockSpecReason,
    ConfigError,
    DArrayError,
    DArrayResult,
    FailureKind,
    FetchError,
    PartitioningError,
    RankMismatchError,
    TaskFailure,
};

pub use engine::types::{
    ChunkID,
    ProcessorID,
    ProcessorInfo,
    Scope,
    ScopeKind,
    TaskID,
    WorkerID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used distributed array types.
///
/// Import with:
/// ```rust
/// use pgas_array::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Assignment,
        BlockSpec,
        ClusterConfig,
        ClusterContext,
        DArray,
        DArrayError,
        DArrayResult,
        Domain,
        ElementwiseOp,
        LocalArray,
        Operand,
        PlacementPolicy,
        ReduceOp,
        Reduced,
    };
}
