//! Claim operation handler.
//!
//! Binds the worker to a build's exclusive queue.

use mule_protocol::ops::{names, ClaimRequest, LeaseResponse};
use mule_protocol::RpcError;

use crate::panel::ControlCommand;
use crate::worker::Worker;

pub struct Claim;

impl ControlCommand for Claim {
    const NAME: &'static str = names::CLAIM;
    type Request = ClaimRequest;
    type Response = LeaseResponse;

    fn handle(&self, worker: &Worker, request: ClaimRequest) -> Result<LeaseResponse, RpcError> {
        worker
            .lease()
            .claim(
                &request.build_id,
                request.workspace.as_deref(),
                request.script.as_deref(),
            )
            .map_err(super::lease_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::queue::{BrokerConsumer, InMemoryBroker};
    use mule_protocol::ErrorCode;
    use std::sync::Arc;

    fn make_worker() -> Worker {
        let config = WorkerConfig::default();
        let consumer = BrokerConsumer::joined(InMemoryBroker::new(), &config.default_queue);
        Worker::new(config, Arc::new(consumer))
    }

    #[test]
    fn test_claim_without_script() {
        let worker = make_worker();
        let response = Claim
            .handle(&worker, ClaimRequest { build_id: "b1".to_string(), ..Default::default() })
            .unwrap();

        assert!(response.is_ok());
        assert!(worker.lease().queue_set().contains("mule-b1"));
    }

    #[test]
    fn test_script_without_workspace_is_invalid_request() {
        let worker = make_worker();
        let err = Claim
            .handle(
                &worker,
                ClaimRequest {
                    build_id: "b1".to_string(),
                    workspace: None,
                    script: Some("true".to_string()),
                },
            )
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(worker.lease().queue_set().contains("default"));
    }

    #[test]
    fn test_workspace_without_root_is_invalid_request() {
        let worker = make_worker();
        let err = Claim
            .handle(
                &worker,
                ClaimRequest {
                    build_id: "b1".to_string(),
                    workspace: Some("ws".to_string()),
                    script: Some("true".to_string()),
                },
            )
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert_eq!(worker.lease().queue_set().len(), 1);
        assert!(worker.lease().queue_set().contains("default"));
    }
}
