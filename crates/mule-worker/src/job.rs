//! Job runner.
//!
//! Runs one test/build job through the script executor and turns the
//! outcome into a [`JobResult`]. Every call runs the script again; callers
//! that need idempotence must use unique job identifiers.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use mule_protocol::ops::JobResult;
use mule_protocol::{ENV_BUILD_ID, ENV_TEST};

use crate::executor::{ExecutorError, ScriptExecutor};

/// Boxed error returned by a completion callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from running a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job script failed to run: {0}")]
    Executor(#[from] ExecutorError),

    #[error("job callback failed: {0}")]
    Callback(#[source] CallbackError),
}

/// Runs jobs for the worker.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<ScriptExecutor>,
}

impl JobRunner {
    pub fn new(executor: Arc<ScriptExecutor>) -> Self {
        Self { executor }
    }

    /// Run `script` as job `job_id` of build `build_id`.
    pub fn run(
        &self,
        build_id: &str,
        script: &str,
        job_id: &str,
        workspace: Option<&str>,
    ) -> Result<JobResult, JobError> {
        let started_at = Utc::now();
        let script_result = self.executor.execute(
            "test.sh",
            script,
            workspace,
            &[(ENV_BUILD_ID, build_id), (ENV_TEST, job_id)],
        )?;
        let finished_at = Utc::now();

        let result = JobResult {
            build_id: build_id.to_string(),
            job_id: job_id.to_string(),
            stdout: script_result.stdout().to_string(),
            stderr: script_result.stderr().to_string(),
            retcode: script_result.exit_code(),
            started_at,
            finished_at,
        };
        info!(
            build_id,
            job = job_id,
            retcode = result.retcode,
            elapsed_ms = result.duration_ms(),
            "job finished"
        );
        Ok(result)
    }

    /// Like [`run`](Self::run), then hands the result to `callback` before
    /// returning it. A callback error is returned to the caller.
    pub fn run_with_callback<F, E>(
        &self,
        build_id: &str,
        script: &str,
        job_id: &str,
        workspace: Option<&str>,
        callback: F,
    ) -> Result<JobResult, JobError>
    where
        F: FnOnce(&JobResult) -> Result<(), E>,
        E: Into<CallbackError>,
    {
        let result = self.run(build_id, script, job_id, workspace)?;
        callback(&result).map_err(|e| JobError::Callback(e.into()))?;
        Ok(result)
    }
}
