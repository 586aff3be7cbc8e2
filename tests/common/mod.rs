#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use pgas_array::{
    local_processors,
    ClusterConfig,
    ClusterContext,
    InMemoryStore,
    LocalScheduler,
    RemoteMemory,
    Scheduler,
};

/// Local cluster with direct access to its collaborators.
pub struct Cluster {
    pub ctx: ClusterContext,
    pub scheduler: Arc<LocalScheduler>,
    pub store: Arc<InMemoryStore>,
}

pub fn cluster(workers: usize, per_worker: usize) -> Cluster {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(LocalScheduler::new(4, Arc::clone(&store)).unwrap());
    let as_scheduler: Arc<dyn Scheduler> = scheduler.clone();
    let as_memory: Arc<dyn RemoteMemory> = store.clone();
    let ctx = ClusterContext::new(local_processors(workers, per_worker), as_scheduler, as_memory)
        .unwrap();
    Cluster { ctx, scheduler, store }
}

pub fn local_ctx(processors: usize) -> ClusterContext {
    let config = ClusterConfig::default()
        .with_workers(1)
        .with_processors_per_worker(processors)
        .with_pool_threads(4);
    ClusterContext::local(&config).unwrap()
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// One-shot latch that holds block generators until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cv) = &*self.inner;
        *open.lock() = true;
        cv.notify_all();
    }

    pub fn pass(&self) {
        let (open, cv) = &*self.inner;
        let mut guard = open.lock();
        while !*guard {
            cv.wait(&mut guard);
        }
    }
}
