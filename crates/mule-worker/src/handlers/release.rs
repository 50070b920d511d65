//! Release operation handler.
//!
//! Returns the worker to the default queue.

use mule_protocol::ops::{names, LeaseResponse, ReleaseRequest};
use mule_protocol::RpcError;

use crate::panel::ControlCommand;
use crate::worker::Worker;

pub struct Release;

impl ControlCommand for Release {
    const NAME: &'static str = names::RELEASE;
    type Request = ReleaseRequest;
    type Response = LeaseResponse;

    fn handle(&self, worker: &Worker, request: ReleaseRequest) -> Result<LeaseResponse, RpcError> {
        worker
            .lease()
            .release(
                &request.build_id,
                request.workspace.as_deref(),
                request.script.as_deref(),
            )
            .map_err(super::lease_error)
    }
}
