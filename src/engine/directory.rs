//! The block directory: the PGAS store of a distributed array.
//!
//! A [`BlockDirectory`] is an ordered grid of **slots**, one per block, with
//! the same shape as the partition's block-index grid. Every slot is either
//! *pending* (an in-flight task will produce the block) or *settled*
//! (resolved to a chunk, or failed). Next to the slots the directory records
//! the processor each block was placed on.
//!
//! ## Slot transitions
//! A slot settles at most once and never goes back:
//!
//! ```text
//! Pending(handle) --resolve--> Resolved(chunk)
//!                 \-----------> Failed(failure)
//! ```
//!
//! Before it settles, a slot may be handed over once to a different
//! producing task through [`BlockDirectory::replace`]. That starts a second
//! and final slot generation; the first task is no longer consulted.
//!
//! The settled state lives in a `OnceLock`, so [`BlockDirectory::get`] reads
//! a slot without locking and always observes either the old or the new
//! state, never a torn value. Concurrent `resolve` calls on the same slot all
//! observe the same settled value.
//!
//! ## Ownership
//! The directory owns slot *handles*, never bytes. Resolved slots and task
//! handles carry [`ChunkLease`]s; dropping the directory drops the leases and
//! the remote-memory collaborator reclaims the bytes.
//!
//! ## Grid membership
//! The set of slots is fixed at construction. After that, the only mutation
//! is an individual slot settling (through `resolve` or [`BlockDirectory::replace`]).

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::blockspec::Partition;
use crate::engine::context::ClusterContext;
use crate::engine::domain::Domain;
use crate::engine::error::{DArrayError, DArrayResult, FailureKind, TaskFailure};
use crate::engine::future::TaskHandle;
use crate::engine::grid::{Grid, MultiIndexIter};
use crate::engine::memory::{ChunkLease, ChunkRef};
use crate::engine::scheduler::{Scheduler, TaskArg, TaskSpec};
use crate::engine::types::{fmt_index, ProcessorID};
use crate::profiling::profiler::{self, Arg};

/// Initial content of a slot.
#[derive(Debug)]
pub enum SlotInit {
    /// A task that will produce the block.
    Pending(TaskHandle),
    /// An already resolved chunk.
    Resolved(ChunkLease),
}

/// Non-blocking snapshot of a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotView {
    /// Not settled yet; the handle of the producing task.
    Pending(TaskHandle),
    /// Resolved to a chunk.
    Resolved(ChunkRef),
    /// The producing task failed.
    Failed(TaskFailure),
}

impl SlotView {
    /// Returns `true` for [`SlotView::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, SlotView::Pending(_))
    }
}

struct Slot {
    task: Option<TaskHandle>,
    replacement: OnceLock<TaskHandle>,
    settled: OnceLock<Result<ChunkLease, TaskFailure>>,
}

impl Slot {
    fn new(init: SlotInit) -> Self {
        match init {
            SlotInit::Pending(handle) => Slot {
                task: Some(handle),
                replacement: OnceLock::new(),
                settled: OnceLock::new(),
            },
            SlotInit::Resolved(lease) => {
                let settled = OnceLock::new();
                let _ = settled.set(Ok(lease));
                Slot { task: None, replacement: OnceLock::new(), settled }
            }
        }
    }

    /// Task producing the current generation.
    fn current_task(&self) -> Option<&TaskHandle> {
        self.replacement.get().or(self.task.as_ref())
    }

    fn view(&self) -> SlotView {
        match (self.settled.get(), self.current_task()) {
            (Some(Ok(lease)), _) => SlotView::Resolved(*lease.chunk()),
            (Some(Err(failure)), _) => SlotView::Failed(failure.clone()),
            (None, Some(handle)) => SlotView::Pending(Arc::clone(handle)),
            (None, None) => SlotView::Failed(orphan_failure()),
        }
    }
}

fn orphan_failure() -> TaskFailure {
    TaskFailure::new(0, FailureKind::Error, "slot has neither a task nor a chunk")
}

/// Grid of slots for one distributed array.
pub struct BlockDirectory {
    slots: Grid<Slot>,
    targets: Grid<ProcessorID>,
    scheduler: Arc<dyn Scheduler>,
}

impl BlockDirectory {
    /// Builds a directory from initial slot contents and the processor each
    /// block was placed on. Returns `None` if the two grids differ in shape.
    pub fn from_slots(
        slots: Grid<SlotInit>,
        targets: Grid<ProcessorID>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Option<Self> {
        if slots.dims() != targets.dims() {
            return None;
        }
        let dims = slots.dims().to_vec();
        let slots = Grid::from_cells(dims, slots.into_cells().into_iter().map(Slot::new).collect())?;
        Some(Self { slots, targets, scheduler })
    }

    /// Submits `init(block_domain)` for every block of `partition` to the
    /// processor chosen in `targets`, and records each task as a pending
    /// slot. Never blocks.
    pub fn populate<F>(
        partition: &Partition,
        targets: Grid<ProcessorID>,
        ctx: &ClusterContext,
        label: &str,
        init: F,
    ) -> DArrayResult<Self>
    where
        F: Fn(&Domain) -> Result<Bytes, String> + Send + Sync + 'static,
    {
        let _span = profiler::span("BlockDirectory::populate")
            .arg("blocks", Arg::U64(partition.block_count() as u64));
        let init = Arc::new(init);
        let slots = Grid::try_from_fn(partition.grid_shape(), |index| {
            let domain = partition
                .block_domain(index)
                .ok_or_else(|| DArrayError::OutOfBounds {
                    index: index.to_vec(),
                    shape: partition.grid_shape().to_vec(),
                })?;
            let target = *targets.get(index).ok_or_else(|| DArrayError::OutOfBounds {
                index: index.to_vec(),
                shape: targets.dims().to_vec(),
            })?;
            let init = Arc::clone(&init);
            let handle = ctx.scheduler().submit(TaskSpec {
                target,
                scope: ctx.scope_for(target),
                label: format!("{label} {}", fmt_index(index)),
                func: Box::new(move |_: Vec<Bytes>| (*init)(&domain)),
                args: Vec::new(),
                deps: Vec::new(),
            });
            Ok::<_, DArrayError>(SlotInit::Pending(handle))
        })?;
        debug!(label, blocks = slots.len(), grid = ?partition.grid_shape(), "populated directory");
        Self::from_slots(slots, targets, Arc::clone(ctx.scheduler())).ok_or_else(|| {
            DArrayError::OutOfBounds {
                index: Vec::new(),
                shape: partition.grid_shape().to_vec(),
            }
        })
    }

    /// Block-index grid shape.
    pub fn grid_shape(&self) -> &[usize] {
        self.slots.dims()
    }

    /// Number of slots.
    pub fn block_count(&self) -> usize {
        self.slots.len()
    }

    /// Processor each block was placed on.
    pub fn targets(&self) -> &Grid<ProcessorID> {
        &self.targets
    }

    fn slot(&self, index: &[usize]) -> DArrayResult<&Slot> {
        self.slots.get(index).ok_or_else(|| DArrayError::OutOfBounds {
            index: index.to_vec(),
            shape: self.slots.dims().to_vec(),
        })
    }

    /// Current state of a slot. Never blocks.
    pub fn get(&self, index: &[usize]) -> DArrayResult<SlotView> {
        Ok(self.slot(index)?.view())
    }

    /// Waits for the slot to settle and returns its chunk.
    ///
    /// Repeated calls return the same chunk immediately and submit nothing.
    ///
    /// ## Errors
    /// [`DArrayError::BlockTaskFailure`] carrying the task's failure.
    pub fn resolve(&self, index: &[usize]) -> DArrayResult<ChunkRef> {
        let slot = self.slot(index)?;
        let settled = match slot.settled.get() {
            Some(settled) => settled,
            None => {
                let outcome = match slot.current_task() {
                    Some(handle) => match self.scheduler.wait(handle) {
                        Ok(_) => handle.lease().ok_or_else(|| {
                            TaskFailure::new(handle.id(), FailureKind::Error, "no output chunk")
                        }),
                        Err(failure) => Err(failure),
                    },
                    None => Err(orphan_failure()),
                };
                slot.settled.get_or_init(|| outcome)
            }
        };
        match settled {
            Ok(lease) => Ok(*lease.chunk()),
            Err(failure) => Err(DArrayError::BlockTaskFailure {
                index: index.to_vec(),
                failure: failure.clone(),
            }),
        }
    }

    /// Lease on the slot's chunk, resolving it first.
    pub fn lease(&self, index: &[usize]) -> DArrayResult<ChunkLease> {
        self.resolve(index)?;
        match self.slot(index)?.settled.get() {
            Some(Ok(lease)) => Ok(lease.clone()),
            _ => Err(DArrayError::BlockTaskFailure {
                index: index.to_vec(),
                failure: orphan_failure(),
            }),
        }
    }

    /// Resolves every slot in block-index order, stopping at the first
    /// failure. Slots after a failure keep running and stay inspectable.
    pub fn materialize_all(&self) -> DArrayResult<()> {
        let _span = profiler::span("BlockDirectory::materialize_all")
            .arg("blocks", Arg::U64(self.block_count() as u64));
        for index in MultiIndexIter::new(self.slots.dims()) {
            if let Err(err) = self.resolve(&index) {
                warn!(%err, "materialization failed");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Replaces the content of an unsettled slot.
    ///
    /// * `SlotInit::Resolved` settles the slot with the given chunk.
    /// * `SlotInit::Pending` hands the slot to a new producing task, which
    ///   settles it on the next `resolve`. A slot takes at most one such
    ///   hand-over.
    ///
    /// Meant for in-place operations while a directory is being derived;
    /// readers racing a hand-over see either task.
    ///
    /// ## Errors
    /// [`DArrayError::SlotAlreadySettled`] if the slot settled before, or if
    /// a pending replacement was already installed.
    pub fn replace(&self, index: &[usize], init: SlotInit) -> DArrayResult<()> {
        let slot = self.slot(index)?;
        let already_settled = || DArrayError::SlotAlreadySettled { index: index.to_vec() };
        if slot.settled.get().is_some() {
            return Err(already_settled());
        }
        match init {
            SlotInit::Resolved(lease) => slot.settled.set(Ok(lease)).map_err(|_| already_settled()),
            SlotInit::Pending(handle) => {
                slot.replacement.set(handle).map_err(|_| already_settled())?;
                debug!(index = %fmt_index(index), "slot handed to a new task");
                Ok(())
            }
        }
    }

    /// Argument for a task consuming this block: the resolved chunk if
    /// settled, otherwise the producing task's handle as a dependency.
    pub fn task_arg(&self, index: &[usize]) -> DArrayResult<TaskArg> {
        let slot = self.slot(index)?;
        match (slot.settled.get(), slot.current_task()) {
            (Some(Ok(lease)), _) => Ok(TaskArg::Chunk(lease.clone())),
            (_, Some(handle)) => Ok(TaskArg::Future(Arc::clone(handle))),
            (Some(Err(failure)), None) => Err(DArrayError::BlockTaskFailure {
                index: index.to_vec(),
                failure: failure.clone(),
            }),
            (None, None) => Err(DArrayError::BlockTaskFailure {
                index: index.to_vec(),
                failure: orphan_failure(),
            }),
        }
    }

    /// Every failure observed so far, in block-index order. Includes tasks
    /// that failed but whose slot nobody resolved yet.
    pub fn failures(&self) -> Vec<(Vec<usize>, TaskFailure)> {
        self.slots
            .iter_indexed()
            .filter_map(|(index, slot)| {
                let failure = match (slot.settled.get(), slot.current_task()) {
                    (Some(Err(failure)), _) => Some(failure.clone()),
                    (None, Some(handle)) => handle.try_result().and_then(Result::err),
                    _ => None,
                };
                failure.map(|failure| (index, failure))
            })
            .collect()
    }

    /// Slots that have not settled.
    pub fn pending_count(&self) -> usize {
        self.slots.cells().iter().filter(|slot| slot.settled.get().is_none()).count()
    }

    /// Slots that have settled.
    pub fn settled_count(&self) -> usize {
        self.block_count() - self.pending_count()
    }

    /// Sends a cancellation request to the task of every unsettled slot.
    /// Returns the number of requests sent.
    pub fn cancel_all(&self) -> usize {
        let mut sent = 0;
        for slot in self.slots.cells() {
            if slot.settled.get().is_some() {
                continue;
            }
            if let Some(handle) = slot.current_task() {
                if !handle.is_complete() {
                    self.scheduler.cancel(handle);
                    sent += 1;
                }
            }
        }
        debug!(sent, "cancel requested");
        sent
    }
}

impl std::fmt::Debug for BlockDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDirectory")
            .field("grid", &self.grid_shape())
            .field("pending", &self.pending_count())
            .finish()
    }
}
