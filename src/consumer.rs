//! Job-execution path for polled work.
//!
//! A reply from the worker endpoint names the job to run; the job runs
//! locally through the [`JobRunner`] with `TEST` set to that name.

use tracing::info;

use mule_protocol::ops::JobResult;
use mule_worker::{JobError, JobRunner};

use crate::host::{PollClient, PollError, PollReport};

/// Errors from polling for and running a job.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("reply is not a UTF-8 job identifier: {0}")]
    InvalidPayload(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// A polled job and how it ran.
#[derive(Debug, Clone)]
pub struct PolledJob {
    pub poll: PollReport,
    pub result: JobResult,
}

/// Poll `endpoint` for a job identifier and run `script` for it.
pub fn run_polled_job(
    client: &PollClient,
    endpoint: &str,
    runner: &JobRunner,
    build_id: &str,
    script: &str,
    workspace: Option<&str>,
) -> Result<PolledJob, ConsumeError> {
    let poll = client.fetch(endpoint)?;
    let job_id = String::from_utf8(poll.payload.clone())?;
    let job_id = job_id.trim();

    info!(build_id, job = job_id, requests = poll.requests, "running polled job");
    let result = runner.run(build_id, script, job_id, workspace)?;
    Ok(PolledJob { poll, result })
}
