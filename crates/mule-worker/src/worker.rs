//! Worker assembly.
//!
//! Wires one executor, lease manager and job runner together from a
//! [`WorkerConfig`] and the worker's queue consumer.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::executor::ScriptExecutor;
use crate::job::JobRunner;
use crate::lease::{LeaseConfig, LeaseManager};
use crate::queue::QueueSubstrate;

/// A worker: the state the control operations act on.
pub struct Worker {
    config: WorkerConfig,
    executor: Arc<ScriptExecutor>,
    lease: LeaseManager,
    jobs: JobRunner,
}

impl Worker {
    /// Create a worker consuming through `queues`.
    pub fn new(config: WorkerConfig, queues: Arc<dyn QueueSubstrate>) -> Self {
        Self::with_cancellation(config, queues, Arc::new(AtomicBool::new(false)))
    }

    /// Create a worker whose scripts observe an external cancellation flag.
    pub fn with_cancellation(
        config: WorkerConfig,
        queues: Arc<dyn QueueSubstrate>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let executor = Arc::new(ScriptExecutor::with_cancellation(
            config.executor.clone(),
            cancelled,
        ));
        let lease = LeaseManager::new(LeaseConfig::from(&config), queues, Arc::clone(&executor));
        let jobs = JobRunner::new(Arc::clone(&executor));
        Self {
            config,
            executor,
            lease,
            jobs,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<ScriptExecutor> {
        &self.executor
    }

    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    pub fn jobs(&self) -> &JobRunner {
        &self.jobs
    }
}
