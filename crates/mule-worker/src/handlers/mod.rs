//! Control operation handlers.
//!
//! Each operation has its own module implementing
//! [`ControlCommand`](crate::panel::ControlCommand).

pub mod claim;
pub mod release;
pub mod run_job;

use mule_protocol::RpcError;

use crate::executor::ExecutorError;
use crate::job::JobError;
use crate::lease::LeaseError;

/// Map an executor error raised while running `script` to a wire error.
fn executor_error(script: &str, err: ExecutorError) -> RpcError {
    match err {
        ExecutorError::Cancelled => RpcError::cancelled(script),
        err if err.is_precondition() => RpcError::invalid_request(err.to_string()),
        err => RpcError::execution_fault(script, err),
    }
}

pub(crate) fn lease_error(err: LeaseError) -> RpcError {
    match err {
        LeaseError::EmptyBuildId | LeaseError::ScriptWithoutWorkspace { .. } => {
            RpcError::invalid_request(err.to_string())
        }
        LeaseError::Script { script, source } => executor_error(script, source),
        LeaseError::Queue(e) => RpcError::queue_fault(e.queue(), &e),
    }
}

pub(crate) fn job_error(err: JobError) -> RpcError {
    match err {
        JobError::Executor(e) => executor_error("job", e),
        JobError::Callback(e) => {
            RpcError::new(mule_protocol::ErrorCode::CallbackFailed, e.to_string())
        }
    }
}
