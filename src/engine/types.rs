//! Core identifiers and small value types shared across the engine.
//!
//! This module defines the **fundamental identifiers** used throughout the
//! distributed array engine. They form the vocabulary shared by placement,
//! the block directory, the scheduler and the remote-memory collaborators.
//!
//! ## Identifiers
//!
//! All identifiers are small, copyable numeric aliases:
//!
//! - [`ProcessorID`]: one compute unit that can run block tasks. Processor
//!   ids are **1-based** and unique across the cluster.
//! - [`WorkerID`]: one worker process (possibly on another machine) owning
//!   one or more processors. Worker ids are also 1-based.
//! - [`TaskID`]: a submitted block task, unique per scheduler.
//! - [`ChunkID`]: a materialized chunk held by the remote-memory store.
//!
//! ## Ordering
//!
//! Block multi-indices are 0-based `usize` slices. Whenever the engine walks
//! a block grid it does so in **block-index order**, which is row-major (the
//! last dimension varies fastest). Reductions, failure reporting and
//! collection all depend on this order being fixed.

use std::fmt;

/// Identifier of a compute unit (1-based).
pub type ProcessorID = u32;
/// Identifier of a worker process (1-based).
pub type WorkerID = u32;
/// Identifier of a submitted task.
pub type TaskID = u64;
/// Identifier of a chunk held by the remote-memory store.
pub type ChunkID = u64;

/// Where a chunk may legally be accessed or a task may legally run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Anywhere in the cluster.
    Any,
    /// Any processor of the given worker.
    Worker(WorkerID),
    /// Only the given processor.
    Processor(ProcessorID),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Any => f.write_str("any"),
            Scope::Worker(worker) => write!(f, "worker:{worker}"),
            Scope::Processor(processor) => write!(f, "processor:{processor}"),
        }
    }
}

/// How wide the default scope of a freshly produced chunk is.
///
/// The cluster context turns this into a concrete [`Scope`] for each task
/// target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScopeKind {
    /// Scope each chunk to the processor that produced it.
    #[default]
    Processor,
    /// Scope each chunk to the worker owning the producing processor.
    Worker,
    /// Leave chunks unscoped.
    Any,
}

/// A processor known to the cluster and the worker that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessorInfo {
    /// Processor identifier.
    pub id: ProcessorID,
    /// Owning worker.
    pub worker: WorkerID,
}

/// Number of elements in a box with the given extents.
#[inline]
pub fn volume(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Formats a multi-index as `(i, j, ...)`.
pub(crate) fn fmt_index(index: &[usize]) -> String {
    let parts: Vec<String> = index.iter().map(|i| i.to_string()).collect();
    format!("({})", parts.join(", "))
}
