//! run_job operation handler.

use mule_protocol::ops::{names, JobResult, RunJobRequest};
use mule_protocol::RpcError;

use crate::panel::ControlCommand;
use crate::worker::Worker;

pub struct RunJob;

impl ControlCommand for RunJob {
    const NAME: &'static str = names::RUN_JOB;
    type Request = RunJobRequest;
    type Response = JobResult;

    fn handle(&self, worker: &Worker, request: RunJobRequest) -> Result<JobResult, RpcError> {
        worker
            .jobs()
            .run(
                &request.build_id,
                &request.script,
                &request.job_id,
                request.workspace.as_deref(),
            )
            .map_err(super::job_error)
    }
}
