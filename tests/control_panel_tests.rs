//! Integration tests: control operations over the RPC loop

mod fixtures;

use std::io::Cursor;

use serde_json::{json, Value};

use fixtures::idle_worker;
use mule_protocol::{ErrorCode, RpcResponse};
use mule_worker::{ControlPanel, RpcHandler, Worker};

fn request(op: &str, id: &str, payload: Value) -> String {
    json!({
        "protocol_version": 1,
        "op": op,
        "request_id": id,
        "payload": payload,
    })
    .to_string()
}

fn run(handler: &RpcHandler, lines: &[String]) -> Vec<RpcResponse> {
    let input = lines.join("\n") + "\n";
    let mut output = Vec::new();
    handler.run_with_io(&mut Cursor::new(input), &mut output).unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn handler_for(worker: Worker) -> RpcHandler {
    RpcHandler::new(worker)
}

#[test]
fn test_default_panel_commands() {
    assert_eq!(
        ControlPanel::with_defaults().commands(),
        vec!["claim", "release", "run_job"]
    );
}

#[test]
fn test_full_lease_lifecycle() {
    let t = idle_worker();
    let handler = handler_for(t.worker);

    let responses = run(
        &handler,
        &[
            request(
                "claim",
                "r1",
                json!({"buildID": "b1", "workspace": "ws1", "setupScript": "echo set up"}),
            ),
            request(
                "run_job",
                "r2",
                json!({"buildID": "b1", "script": "echo hello", "jobID": "job1", "workspace": "ws1"}),
            ),
            request(
                "release",
                "r3",
                json!({"buildID": "b1", "workspace": "ws1", "teardownScript": "echo torn down"}),
            ),
        ],
    );

    assert_eq!(responses.len(), 3);
    let claim = responses[0].payload.as_ref().unwrap();
    assert_eq!(claim["status"], "ok");
    assert_eq!(claim["buildID"], "b1");
    assert_eq!(claim["stdout"], "set up");
    assert_eq!(claim["retcode"], 0);

    let job = responses[1].payload.as_ref().unwrap();
    assert_eq!(job["job"], "job1");
    assert_eq!(job["stdout"], "hello");

    let release = responses[2].payload.as_ref().unwrap();
    assert_eq!(release["status"], "ok");
    assert_eq!(release["stdout"], "torn down");

    assert_eq!(handler.worker().lease().queue_set().len(), 1);
    assert!(handler.worker().lease().queue_set().contains("default"));
}

#[test]
fn test_precondition_is_invalid_request() {
    let t = idle_worker();
    let handler = handler_for(t.worker);

    let responses = run(
        &handler,
        &[request("claim", "r1", json!({"buildID": "b1", "setupScript": "exit 0"}))],
    );

    assert!(!responses[0].ok);
    assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::InvalidRequest);
}

#[test]
fn test_cancelled_setup_is_reported_and_worker_rejoins() {
    let t = idle_worker();
    t.worker.executor().request_cancel();
    let handler = handler_for(t.worker);

    let responses = run(
        &handler,
        &[request(
            "claim",
            "r1",
            json!({"buildID": "b1", "workspace": "ws", "setupScript": "exit 0"}),
        )],
    );

    assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::Cancelled);
    let queues = handler.worker().lease().queue_set();
    assert_eq!(queues.into_iter().collect::<Vec<_>>(), vec!["default".to_string()]);
}

#[test]
fn test_missing_build_id_is_invalid_request() {
    let t = idle_worker();
    let handler = handler_for(t.worker);

    let responses = run(&handler, &[request("run_job", "r1", json!({"script": "true"}))]);

    assert_eq!(responses[0].request_id, "r1");
    assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::InvalidRequest);
}
