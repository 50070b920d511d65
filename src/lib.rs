//! Mule - build worker pool client
//!
//! Polls a mule worker endpoint for work with bounded, nested retry
//! budgets and runs the jobs it hands out through the worker's job runner.
//! The worker side (leases, script execution, control RPC) lives in the
//! `mule-worker` crate.

pub mod config;
pub mod consumer;
pub mod host;

pub use config::{ClientConfig, ConfigError, PollSettings};
pub use consumer::{run_polled_job, ConsumeError, PolledJob};
pub use host::{PollClient, PollError, PollReport, RetryPolicy};
pub use mule_protocol::ops::JobResult;
pub use mule_worker::signal::{self, SignalHandler, SignalState};
