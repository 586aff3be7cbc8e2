//! Per-task promises: the suspension points of the engine.
//!
//! A [`TaskFuture`] is the completion cell of one submitted block task. The
//! scheduler completes it exactly once with either a leased chunk or a
//! [`TaskFailure`]; everybody else observes it:
//!
//! * [`TaskFuture::try_result`] never blocks,
//! * [`TaskFuture::wait`] blocks on a condition variable until completion
//!   (no polling),
//! * [`TaskFuture::on_complete`] registers a continuation, which is how the
//!   scheduler wires dependency edges without parking pool threads.
//!
//! [`TaskHandle`] is the shared, cloneable form handed out by
//! [`Scheduler::submit`](crate::engine::scheduler::Scheduler::submit).
//!
//! ## Lifetime of the result
//! The completed result holds a [`ChunkLease`], so the chunk stays alive for
//! as long as any handle to the task exists. Dropping the last handle
//! releases it back to the remote-memory collaborator.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::engine::error::TaskFailure;
use crate::engine::memory::{ChunkLease, ChunkRef};
use crate::engine::types::{ProcessorID, TaskID};

/// Settled value of a task.
pub type TaskOutcome = Result<ChunkLease, TaskFailure>;

type Continuation = Box<dyn FnOnce(&Result<ChunkRef, TaskFailure>) + Send>;

enum FutureState {
    Running(Vec<Continuation>),
    Done(TaskOutcome),
}

/// Completion cell of one task.
pub struct TaskFuture {
    id: TaskID,
    target: ProcessorID,
    label: String,
    state: Mutex<FutureState>,
    done: Condvar,
    cancel_requested: AtomicBool,
    started: AtomicBool,
}

/// Shared handle to a submitted task.
pub type TaskHandle = Arc<TaskFuture>;

impl TaskFuture {
    /// Creates an incomplete future for task `id` targeted at `target`.
    pub fn new(id: TaskID, target: ProcessorID, label: impl Into<String>) -> TaskHandle {
        Arc::new(Self {
            id,
            target,
            label: label.into(),
            state: Mutex::new(FutureState::Running(Vec::new())),
            done: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    /// Task identifier.
    pub fn id(&self) -> TaskID {
        self.id
    }

    /// Processor the task was submitted to.
    pub fn target(&self) -> ProcessorID {
        self.target
    }

    /// Human-readable label given at submission.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Settles the future. Returns `false` (and drops `outcome`) if it was
    /// already settled.
    pub fn complete(&self, outcome: TaskOutcome) -> bool {
        let observed = outcome.as_ref().map(|lease| *lease.chunk()).map_err(Clone::clone);
        let continuations = {
            let mut state = self.state.lock();
            match &mut *state {
                FutureState::Done(_) => return false,
                FutureState::Running(waiting) => {
                    let continuations = std::mem::take(waiting);
                    *state = FutureState::Done(outcome);
                    continuations
                }
            }
        };
        self.done.notify_all();
        for continuation in continuations {
            continuation(&observed);
        }
        true
    }

    /// Result if settled, without blocking.
    pub fn try_result(&self) -> Option<Result<ChunkRef, TaskFailure>> {
        match &*self.state.lock() {
            FutureState::Running(_) => None,
            FutureState::Done(outcome) => Some(observe(outcome)),
        }
    }

    /// Returns `true` once settled.
    pub fn is_complete(&self) -> bool {
        matches!(&*self.state.lock(), FutureState::Done(_))
    }

    /// Blocks until settled and returns the result.
    pub fn wait(&self) -> Result<ChunkRef, TaskFailure> {
        let mut state = self.state.lock();
        loop {
            if let FutureState::Done(outcome) = &*state {
                return observe(outcome);
            }
            self.done.wait(&mut state);
        }
    }

    /// A fresh lease on the produced chunk, if the task succeeded.
    pub fn lease(&self) -> Option<ChunkLease> {
        match &*self.state.lock() {
            FutureState::Done(Ok(lease)) => Some(lease.clone()),
            _ => None,
        }
    }

    /// Runs `continuation` once the future settles (immediately if it
    /// already has).
    pub fn on_complete(
        &self,
        continuation: impl FnOnce(&Result<ChunkRef, TaskFailure>) + Send + 'static,
    ) {
        let observed = {
            let mut state = self.state.lock();
            match &mut *state {
                FutureState::Running(waiting) => {
                    waiting.push(Box::new(continuation));
                    return;
                }
                FutureState::Done(outcome) => observe(outcome),
            }
        };
        continuation(&observed);
    }

    /// Flags the task as cancelled.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Claims the right to run (or to cancel) the task. Only the first
    /// caller gets `true`.
    pub fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn observe(outcome: &TaskOutcome) -> Result<ChunkRef, TaskFailure> {
    outcome.as_ref().map(|lease| *lease.chunk()).map_err(Clone::clone)
}

/// Futures compare by task id.
impl PartialEq for TaskFuture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("label", &self.label)
            .field("complete", &self.is_complete())
            .finish()
    }
}
