//! Mule Worker
//!
//! A worker executes build/test jobs on behalf of a dispatcher. While idle
//! it consumes from a shared default queue; a dispatcher claims it for one
//! build (moving it onto that build's exclusive queue) and later releases
//! it back to the pool.
//!
//! This crate can be used in two modes:
//! - **Standalone binary**: `mule-worker rpc` serves control requests on
//!   stdin/stdout, `mule-worker serve` hands out jobs to poll clients
//! - **In-process library**: for unit and integration testing with the
//!   in-memory broker

pub mod config;
pub mod executor;
pub mod handlers;
pub mod job;
pub mod lease;
pub mod panel;
pub mod poll_server;
pub mod queue;
pub mod rpc;
pub mod signal;
pub mod worker;

pub use config::{ConfigError, ExecutorSettings, WorkerConfig};
pub use executor::{ExecutorError, ExecutorResult, ScriptExecutor, ScriptResult};
pub use job::{CallbackError, JobError, JobRunner};
pub use lease::{LeaseConfig, LeaseError, LeaseManager, LeaseState};
pub use panel::{ControlCommand, ControlPanel};
pub use poll_server::PollServer;
pub use queue::{BrokerConsumer, ConsumerFaults, InMemoryBroker, Message, QueueError, QueueSubstrate};
pub use rpc::RpcHandler;
pub use signal::{SignalHandler, SignalState};
pub use worker::Worker;
