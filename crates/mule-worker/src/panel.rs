//! Control panel: the table of operations a dispatcher may invoke.
//!
//! Each operation is a [`ControlCommand`] with typed request and response
//! payloads. The panel erases those types behind a name-keyed table so the
//! RPC loop can dispatch on the `op` string.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use mule_protocol::RpcError;

use crate::handlers;
use crate::worker::Worker;

/// A control operation.
pub trait ControlCommand: Send + Sync + 'static {
    /// Operation name used on the wire.
    const NAME: &'static str;
    type Request: DeserializeOwned;
    type Response: Serialize;

    fn handle(&self, worker: &Worker, request: Self::Request) -> Result<Self::Response, RpcError>;
}

type Handler = Box<dyn Fn(&Worker, Value) -> Result<Value, RpcError> + Send + Sync>;

/// Registry of control operations.
#[derive(Default)]
pub struct ControlPanel {
    handlers: BTreeMap<&'static str, Handler>,
}

impl ControlPanel {
    /// An empty panel.
    pub fn new() -> Self {
        Self::default()
    }

    /// A panel with `claim`, `release` and `run_job` registered.
    pub fn with_defaults() -> Self {
        let mut panel = Self::new();
        panel.register(handlers::claim::Claim);
        panel.register(handlers::release::Release);
        panel.register(handlers::run_job::RunJob);
        panel
    }

    /// Register `command` under its name, replacing any previous entry.
    pub fn register<C: ControlCommand>(&mut self, command: C) {
        let handler: Handler = Box::new(move |worker, payload| {
            let request: C::Request = serde_json::from_value(payload).map_err(|e| {
                RpcError::invalid_request(format!("invalid {} payload: {}", C::NAME, e))
            })?;
            let response = command.handle(worker, request)?;
            serde_json::to_value(response).map_err(|e| {
                RpcError::invalid_request(format!("failed to serialize response: {}", e))
            })
        });
        self.handlers.insert(C::NAME, handler);
    }

    /// Registered operation names, sorted.
    pub fn commands(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.handlers.contains_key(op)
    }

    /// Run operation `op` with `payload` against `worker`.
    pub fn dispatch(&self, worker: &Worker, op: &str, payload: Value) -> Result<Value, RpcError> {
        let handler = self
            .handlers
            .get(op)
            .ok_or_else(|| RpcError::unknown_operation(op))?;
        handler(worker, payload)
    }
}
