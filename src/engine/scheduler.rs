//! Task scheduling for block computations.
//!
//! The engine never runs block work itself. It describes each block task as a
//! [`TaskSpec`] and hands it to a [`Scheduler`], receiving a
//! [`TaskHandle`] back immediately. Everything the engine later needs
//! (waiting, cancelling, chaining) goes through that handle.
//!
//! ## Task model
//! * A task has a target processor, a scope for its output chunk, a function
//!   from input bytes to output bytes, and an ordered list of arguments.
//! * An argument is either an already resolved chunk ([`TaskArg::Chunk`]) or
//!   the handle of another task ([`TaskArg::Future`]), whose output becomes the
//!   input once it completes.
//! * Extra `deps` order a task after others without consuming their output.
//!
//! ## Local execution
//! [`LocalScheduler`] runs tasks on a Rayon thread pool and stores outputs in
//! an [`InMemoryStore`]:
//!
//! * Dependencies are counted down by completion callbacks; a task is only
//!   spawned onto the pool once every dependency has settled, so no pool
//!   thread ever blocks waiting for another task.
//! * A failed dependency fails the dependent task with
//!   [`FailureKind::DependencyFailed`] without running it.
//! * Panics in block functions are caught and recorded as
//!   [`FailureKind::Panicked`].
//! * Cancelling a task that has not started settles it as
//!   [`FailureKind::Cancelled`]; a running task finishes normally.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{trace, warn};

use crate::engine::error::{ConfigError, FailureKind, TaskFailure};
use crate::engine::future::{TaskFuture, TaskHandle};
use crate::engine::memory::{ChunkLease, ChunkRef, InMemoryStore, RemoteMemory};
use crate::engine::types::{ProcessorID, Scope, TaskID};
use crate::profiling::profiler::{self, Arg};

/// Block function: consumes the fetched argument bytes in order and produces
/// the output chunk's bytes.
pub type TaskFn = Box<dyn FnOnce(Vec<Bytes>) -> Result<Bytes, String> + Send>;

/// One input of a task.
#[derive(Debug, Clone)]
pub enum TaskArg {
    /// A chunk that is already resolved.
    Chunk(ChunkLease),
    /// The output of another task; also a dependency edge.
    Future(TaskHandle),
}

/// Description of one block task.
pub struct TaskSpec {
    /// Processor the task should run on.
    pub target: ProcessorID,
    /// Scope of the produced chunk.
    pub scope: Scope,
    /// Label for logs and traces.
    pub label: String,
    /// The block function.
    pub func: TaskFn,
    /// Inputs, passed to `func` in this order.
    pub args: Vec<TaskArg>,
    /// Tasks that must settle first without contributing input.
    pub deps: Vec<TaskHandle>,
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("target", &self.target)
            .field("scope", &self.scope)
            .field("label", &self.label)
            .field("args", &self.args)
            .field("deps", &self.deps.len())
            .finish()
    }
}

/// Interface the engine consumes from the task-scheduler collaborator.
pub trait Scheduler: Send + Sync {
    /// Submits a task and returns its handle without blocking.
    fn submit(&self, spec: TaskSpec) -> TaskHandle;

    /// Blocks until the task settles.
    fn wait(&self, handle: &TaskHandle) -> Result<ChunkRef, TaskFailure> {
        handle.wait()
    }

    /// Requests cancellation. Tasks that already started are unaffected.
    fn cancel(&self, handle: &TaskHandle);
}

struct Job {
    func: TaskFn,
    args: Vec<TaskArg>,
    deps: Vec<TaskHandle>,
    scope: Scope,
}

/// Rayon-backed scheduler that executes every task in-process.
pub struct LocalScheduler {
    pool: Arc<ThreadPool>,
    store: Arc<InMemoryStore>,
    next_task: AtomicU64,
}

impl LocalScheduler {
    /// Builds a scheduler with `threads` pool threads (0 = Rayon default)
    /// writing outputs to `store`.
    pub fn new(threads: usize, store: Arc<InMemoryStore>) -> Result<Self, ConfigError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pgas-pool-{i}"))
            .start_handler(|i| profiler::thread_name(format!("pgas-pool-{i}")))
            .build()
            .map_err(|e| ConfigError::Pool(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            store,
            next_task: AtomicU64::new(1),
        })
    }

    /// Store receiving task outputs.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Number of tasks submitted so far.
    pub fn submitted_count(&self) -> u64 {
        self.next_task.load(Ordering::Relaxed) - 1
    }

    /// Number of threads in the compute pool.
    pub fn pool_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Scheduler for LocalScheduler {
    fn submit(&self, spec: TaskSpec) -> TaskHandle {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let future = TaskFuture::new(id, spec.target, spec.label);
        trace!(task = id, target = spec.target, label = future.label(), "submit");

        let mut waiting_on: Vec<TaskHandle> = spec.deps.clone();
        waiting_on.extend(spec.args.iter().filter_map(|arg| match arg {
            TaskArg::Future(handle) => Some(Arc::clone(handle)),
            TaskArg::Chunk(_) => None,
        }));

        let job = Arc::new(Mutex::new(Some(Job {
            func: spec.func,
            args: spec.args,
            deps: spec.deps,
            scope: spec.scope,
        })));

        // One extra count held by this call so the task cannot launch while
        // callbacks are still being registered.
        let remaining = Arc::new(AtomicUsize::new(waiting_on.len() + 1));
        let launch = {
            let pool = Arc::clone(&self.pool);
            let store = Arc::clone(&self.store);
            let future = Arc::clone(&future);
            move || {
                if let Some(job) = job.lock().take() {
                    let future = Arc::clone(&future);
                    let store = Arc::clone(&store);
                    pool.spawn(move || run_job(job, future, store));
                }
            }
        };
        let launch = Arc::new(launch);

        for dep in waiting_on {
            let remaining = Arc::clone(&remaining);
            let launch = Arc::clone(&launch);
            dep.on_complete(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    launch();
                }
            });
        }
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            launch();
        }
        future
    }

    fn cancel(&self, handle: &TaskHandle) {
        handle.request_cancel();
        if handle.try_start() {
            warn!(task = handle.id(), label = handle.label(), "task cancelled before start");
            handle.complete(Err(TaskFailure::new(
                handle.id(),
                FailureKind::Cancelled,
                "cancelled before start",
            )));
        }
    }
}

fn run_job(job: Job, future: TaskHandle, store: Arc<InMemoryStore>) {
    if !future.try_start() {
        return;
    }
    let task = future.id();
    let target = future.target();
    let _span = profiler::span("block_task")
        .arg("task", Arg::U64(task))
        .arg("processor", Arg::U64(u64::from(target)));

    let outcome = execute(job, &future, &store);
    if let Err(failure) = &outcome {
        warn!(task, target, label = future.label(), %failure, "block task failed");
    }
    future.complete(outcome);
}

fn execute(
    job: Job,
    future: &TaskFuture,
    store: &Arc<InMemoryStore>,
) -> Result<ChunkLease, TaskFailure> {
    let task = future.id();
    if future.is_cancel_requested() {
        return Err(TaskFailure::new(task, FailureKind::Cancelled, "cancelled before start"));
    }
    for dep in &job.deps {
        if let Some(Err(failure)) = dep.try_result() {
            return Err(dependency_failed(task, &failure));
        }
    }

    let mut inputs = Vec::with_capacity(job.args.len());
    for arg in job.args {
        let lease = match arg {
            TaskArg::Chunk(lease) => lease,
            TaskArg::Future(handle) => match handle.lease() {
                Some(lease) => lease,
                None => {
                    let failure = match handle.try_result() {
                        Some(Err(failure)) => failure,
                        _ => TaskFailure::new(handle.id(), FailureKind::Error, "no output"),
                    };
                    return Err(dependency_failed(task, &failure));
                }
            },
        };
        let bytes = lease
            .fetch()
            .map_err(|e| TaskFailure::new(task, FailureKind::Fetch, e.to_string()))?;
        inputs.push(bytes);
    }

    let func = job.func;
    let produced = match panic::catch_unwind(AssertUnwindSafe(move || func(inputs))) {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(message)) => return Err(TaskFailure::new(task, FailureKind::Error, message)),
        Err(payload) => {
            return Err(TaskFailure::new(task, FailureKind::Panicked, panic_message(payload)))
        }
    };

    let chunk = store.put(future.target(), job.scope, produced);
    let memory: Arc<dyn RemoteMemory> = store.clone();
    Ok(ChunkLease::adopt(chunk, memory))
}

fn dependency_failed(task: TaskID, cause: &TaskFailure) -> TaskFailure {
    TaskFailure::new(task, FailureKind::DependencyFailed, format!("dependency {cause}"))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "block function panicked".to_string()
    }
}
