//! Cluster configuration.
//!
//! [`ClusterConfig`] describes the shape of a local cluster: how many worker
//! processes to model, how many processors each worker owns, how many OS
//! threads back the compute pool, and how widely freshly produced chunks are
//! scoped. Values come from `Default`, the `with_*` setters, or the
//! environment via [`ClusterConfig::from_env`].
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PGAS_WORKERS` | `workers` |
//! | `PGAS_PROCESSORS_PER_WORKER` | `processors_per_worker` |
//! | `PGAS_POOL_THREADS` | `pool_threads` (0 = rayon default) |
//! | `PGAS_DEFAULT_SCOPE` | `default_scope` (`processor`, `worker`, `any`) |

use std::env;
use std::str::FromStr;

use crate::engine::error::ConfigError;
use crate::engine::types::ScopeKind;

/// Shape of a local cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Number of worker processes.
    pub workers: usize,

    /// Processors (compute units) owned by each worker.
    pub processors_per_worker: usize,

    /// OS threads in the compute pool. Zero lets rayon decide.
    pub pool_threads: usize,

    /// Scope attached to chunks produced by block tasks.
    pub default_scope: ScopeKind,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            workers: 1,
            processors_per_worker: cpus,
            pool_threads: 0,
            default_scope: ScopeKind::Processor,
        }
    }
}

impl ClusterConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the processors per worker.
    pub fn with_processors_per_worker(mut self, processors: usize) -> Self {
        self.processors_per_worker = processors;
        self
    }

    /// Sets the compute pool thread count.
    pub fn with_pool_threads(mut self, threads: usize) -> Self {
        self.pool_threads = threads;
        self
    }

    /// Sets the default chunk scope.
    pub fn with_default_scope(mut self, scope: ScopeKind) -> Self {
        self.default_scope = scope;
        self
    }

    /// Total processors in the cluster.
    pub fn processor_count(&self) -> usize {
        self.workers * self.processors_per_worker
    }

    /// Checks that the configuration can describe a usable cluster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.processors_per_worker == 0 {
            return Err(ConfigError::Zero { field: "processors_per_worker" });
        }
        Ok(())
    }

    /// Defaults overridden by any `PGAS_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = read_var("PGAS_WORKERS")? {
            config.workers = workers;
        }
        if let Some(processors) = read_var("PGAS_PROCESSORS_PER_WORKER")? {
            config.processors_per_worker = processors;
        }
        if let Some(threads) = read_var("PGAS_POOL_THREADS")? {
            config.pool_threads = threads;
        }
        if let Some(scope) = read_var::<ScopeKind>("PGAS_DEFAULT_SCOPE")? {
            config.default_scope = scope;
        }
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for ScopeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processor" => Ok(ScopeKind::Processor),
            "worker" => Ok(ScopeKind::Worker),
            "any" => Ok(ScopeKind::Any),
            _ => Err(()),
        }
    }
}

fn read_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
        Err(_) => Ok(None),
    }
}
