//! Shared setup for integration tests.
//!
//! Builds workers over an in-memory broker with an isolated workspace root
//! per test.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use mule_worker::{BrokerConsumer, ExecutorSettings, InMemoryBroker, Worker, WorkerConfig};

/// A worker plus the handles tests inspect it through.
pub struct TestWorker {
    pub worker: Worker,
    pub consumer: BrokerConsumer,
    pub broker: InMemoryBroker,
    /// Workspace root; removed when dropped.
    pub root: TempDir,
}

impl TestWorker {
    pub fn default_queue(&self) -> &str {
        &self.worker.config().default_queue
    }

    pub fn build_queue(&self, build_id: &str) -> String {
        self.worker.lease().build_queue(build_id)
    }

    /// The worker's queue set as a sorted list.
    pub fn queues(&self) -> Vec<String> {
        self.worker.lease().queue_set().into_iter().collect()
    }
}

/// Worker config using `/bin/sh` and a workspace root under `root`.
pub fn worker_config(root: &TempDir) -> WorkerConfig {
    WorkerConfig {
        default_queue: "default".to_string(),
        build_queue_prefix: "prefix".to_string(),
        executor: ExecutorSettings {
            workspace_root: Some(root.path().to_path_buf()),
            interpreter: PathBuf::from("/bin/sh"),
            termination_grace_seconds: 1,
        },
        ..WorkerConfig::default()
    }
}

/// An idle worker consuming from the default queue.
pub fn idle_worker() -> TestWorker {
    let root = TempDir::new().unwrap();
    let config = worker_config(&root);
    let broker = InMemoryBroker::new();
    let consumer = BrokerConsumer::joined(broker.clone(), &config.default_queue);
    let worker = Worker::new(config, Arc::new(consumer.clone()));
    TestWorker {
        worker,
        consumer,
        broker,
        root,
    }
}
