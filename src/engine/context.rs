//! Explicit cluster context.
//!
//! A [`ClusterContext`] bundles what every construction and placement call
//! needs to know about the cluster: the available processors (and the worker
//! owning each), the scheduler to submit block tasks to, the remote memory
//! holding chunk bytes, and the default chunk scope. It is passed explicitly;
//! the engine keeps no ambient session state.
//!
//! Cloning a context is cheap and every clone refers to the same
//! collaborators.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::config::ClusterConfig;
use crate::engine::error::{DArrayError, DArrayResult};
use crate::engine::memory::{InMemoryStore, RemoteMemory};
use crate::engine::scheduler::{LocalScheduler, Scheduler};
use crate::engine::types::{ProcessorID, ProcessorInfo, Scope, ScopeKind, WorkerID};

/// Processors, collaborators and defaults of one cluster session.
#[derive(Clone)]
pub struct ClusterContext {
    processors: Arc<[ProcessorInfo]>,
    scheduler: Arc<dyn Scheduler>,
    memory: Arc<dyn RemoteMemory>,
    default_scope: ScopeKind,
}

impl ClusterContext {
    /// Builds a context over explicit collaborators.
    ///
    /// ## Errors
    /// [`DArrayError::NoProcessors`] if `processors` is empty.
    pub fn new(
        processors: Vec<ProcessorInfo>,
        scheduler: Arc<dyn Scheduler>,
        memory: Arc<dyn RemoteMemory>,
    ) -> DArrayResult<Self> {
        if processors.is_empty() {
            return Err(DArrayError::NoProcessors);
        }
        Ok(Self {
            processors: processors.into(),
            scheduler,
            memory,
            default_scope: ScopeKind::default(),
        })
    }

    /// Builds an in-process cluster from `config`, backed by a
    /// [`LocalScheduler`] and an [`InMemoryStore`].
    pub fn local(config: &ClusterConfig) -> DArrayResult<Self> {
        config.validate()?;
        let store = Arc::new(InMemoryStore::new());
        let scheduler = LocalScheduler::new(config.pool_threads, Arc::clone(&store))?;
        debug!(
            workers = config.workers,
            processors = config.processor_count(),
            threads = scheduler.pool_threads(),
            "local cluster started"
        );
        let processors = local_processors(config.workers, config.processors_per_worker);
        Ok(Self::new(processors, Arc::new(scheduler), store)?
            .with_default_scope(config.default_scope))
    }

    /// Overrides the default chunk scope.
    pub fn with_default_scope(mut self, scope: ScopeKind) -> Self {
        self.default_scope = scope;
        self
    }

    /// Available processors in list order.
    pub fn processors(&self) -> &[ProcessorInfo] {
        &self.processors
    }

    /// Ids of the available processors in list order.
    pub fn processor_ids(&self) -> Vec<ProcessorID> {
        self.processors.iter().map(|p| p.id).collect()
    }

    /// Number of available processors.
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` if `id` is an available processor.
    pub fn has_processor(&self, id: ProcessorID) -> bool {
        self.processors.iter().any(|p| p.id == id)
    }

    /// Worker owning `processor`.
    pub fn worker_of(&self, processor: ProcessorID) -> Option<WorkerID> {
        self.processors.iter().find(|p| p.id == processor).map(|p| p.worker)
    }

    /// Default compute unit of `worker`: its first listed processor.
    pub fn worker_default_processor(&self, worker: WorkerID) -> Option<ProcessorID> {
        default_processor(&self.processors, worker)
    }

    /// Default scope kind for produced chunks.
    pub fn default_scope(&self) -> ScopeKind {
        self.default_scope
    }

    /// Concrete scope for a chunk produced on `target`.
    pub fn scope_for(&self, target: ProcessorID) -> Scope {
        match self.default_scope {
            ScopeKind::Processor => Scope::Processor(target),
            ScopeKind::Worker => self.worker_of(target).map_or(Scope::Any, Scope::Worker),
            ScopeKind::Any => Scope::Any,
        }
    }

    /// Task scheduler.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Remote memory holding chunk bytes.
    pub fn memory(&self) -> &Arc<dyn RemoteMemory> {
        &self.memory
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("processors", &self.processors)
            .field("default_scope", &self.default_scope)
            .finish_non_exhaustive()
    }
}

/// Processor list of a local cluster: ids `1..=workers * per_worker`,
/// numbered worker by worker.
pub fn local_processors(workers: usize, per_worker: usize) -> Vec<ProcessorInfo> {
    (0..workers * per_worker)
        .map(|i| ProcessorInfo {
            id: (i + 1) as ProcessorID,
            worker: (i / per_worker.max(1) + 1) as WorkerID,
        })
        .collect()
}

pub(crate) fn default_processor(processors: &[ProcessorInfo], worker: WorkerID) -> Option<ProcessorID> {
    processors.iter().find(|p| p.worker == worker).map(|p| p.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_processors_are_numbered_per_worker() {
        let procs = local_processors(2, 3);
        assert_eq!(procs.len(), 6);
        assert_eq!(procs[0], ProcessorInfo { id: 1, worker: 1 });
        assert_eq!(procs[3], ProcessorInfo { id: 4, worker: 2 });
        assert_eq!(default_processor(&procs, 2), Some(4));
        assert_eq!(default_processor(&procs, 3), None);
    }
}
