//! Worker RPC Handler
//!
//! Implements the line-delimited JSON control loop for the worker:
//!
//!   mule-worker rpc
//!
//! The handler reads one JSON request per line from its input until EOF,
//! dispatches each through the [`ControlPanel`], and writes one JSON
//! response line per request.

use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

use mule_protocol::{RpcError, RpcRequest, RpcResponse};

use crate::panel::ControlPanel;
use crate::worker::Worker;

/// Main RPC handler for the worker.
pub struct RpcHandler {
    worker: Worker,
    panel: ControlPanel,
}

impl RpcHandler {
    /// Create a handler serving the default control operations.
    pub fn new(worker: Worker) -> Self {
        Self::with_panel(worker, ControlPanel::with_defaults())
    }

    pub fn with_panel(worker: Worker, panel: ControlPanel) -> Self {
        Self { worker, panel }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Run the RPC handler, reading from stdin and writing to stdout.
    pub fn run(&self) -> io::Result<()> {
        self.run_with_io(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Run the RPC handler with custom I/O (for testing).
    pub fn run_with_io<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line);
            self.write_response(writer, &response)?;
        }
    }

    /// Handle a single request line.
    pub fn handle_line(&self, line: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "unparseable control request");
                return RpcResponse::error(
                    self.worker.config().protocol_max,
                    String::new(),
                    RpcError::invalid_request(format!("invalid JSON: {}", e)),
                );
            }
        };

        if let Err(e) = self.validate_protocol_version(&request) {
            return RpcResponse::error(request.protocol_version, request.request_id, e);
        }

        debug!(op = %request.op, request_id = %request.request_id, "dispatching control request");
        match self.panel.dispatch(&self.worker, &request.op, request.payload) {
            Ok(payload) => RpcResponse::success(request.protocol_version, request.request_id, payload),
            Err(e) => {
                warn!(op = %request.op, error = %e, "control request failed");
                RpcResponse::error(request.protocol_version, request.request_id, e)
            }
        }
    }

    /// Validate the protocol version in the request.
    fn validate_protocol_version(&self, request: &RpcRequest) -> Result<(), RpcError> {
        let config = self.worker.config();
        if request.protocol_version < config.protocol_min
            || request.protocol_version > config.protocol_max
        {
            return Err(RpcError::unsupported_protocol(
                request.protocol_version,
                config.protocol_min,
                config.protocol_max,
            ));
        }
        Ok(())
    }

    /// Write the response to the writer.
    fn write_response<W: Write>(&self, writer: &mut W, response: &RpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{}", json)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::queue::{BrokerConsumer, InMemoryBroker};
    use mule_protocol::ErrorCode;
    use std::io::Cursor;
    use std::sync::Arc;

    fn create_handler() -> RpcHandler {
        let config = WorkerConfig::default();
        let consumer = BrokerConsumer::joined(InMemoryBroker::new(), &config.default_queue);
        RpcHandler::new(Worker::new(config, Arc::new(consumer)))
    }

    fn run(handler: &RpcHandler, input: &str) -> Vec<RpcResponse> {
        let mut reader = Cursor::new(input.to_string());
        let mut output = Vec::new();
        handler.run_with_io(&mut reader, &mut output).unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_claim_then_claim_again() {
        let handler = create_handler();
        let input = concat!(
            r#"{"protocol_version":1,"op":"claim","request_id":"r1","payload":{"buildID":"b1"}}"#,
            "\n",
            r#"{"protocol_version":1,"op":"claim","request_id":"r2","payload":{"buildID":"b1"}}"#,
            "\n",
        );

        let responses = run(&handler, input);

        assert_eq!(responses.len(), 2);
        assert!(responses[0].ok);
        assert_eq!(responses[0].request_id, "r1");
        assert_eq!(responses[0].payload.as_ref().unwrap()["status"], "ok");
        assert!(responses[1].ok);
        assert_eq!(responses[1].payload.as_ref().unwrap()["status"], "fail");
        assert_eq!(
            responses[1].payload.as_ref().unwrap()["reason"],
            "worker is already in use"
        );
    }

    #[test]
    fn test_run_job_over_rpc() {
        let handler = create_handler();
        let input = r#"{"protocol_version":1,"op":"run_job","request_id":"r3","payload":{"buildID":"b1","script":"echo hello","jobID":"job1"}}
"#;

        let responses = run(&handler, input);

        let payload = responses[0].payload.as_ref().unwrap();
        assert_eq!(payload["stdout"], "hello");
        assert_eq!(payload["retcode"], 0);
        assert_eq!(payload["job"], "job1");
    }

    #[test]
    fn test_invalid_json_does_not_stop_loop() {
        let handler = create_handler();
        let input = concat!(
            "not valid json\n",
            "\n",
            r#"{"protocol_version":1,"op":"release","request_id":"r4","payload":{"buildID":"b1"}}"#,
            "\n",
        );

        let responses = run(&handler, input);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::InvalidRequest);
        assert_eq!(
            responses[1].payload.as_ref().unwrap()["reason"],
            "worker is not leased to build b1"
        );
    }

    #[test]
    fn test_unsupported_protocol() {
        let handler = create_handler();
        let input = r#"{"protocol_version":7,"op":"claim","request_id":"r5","payload":{"buildID":"b1"}}
"#;

        let responses = run(&handler, input);

        assert!(!responses[0].ok);
        assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::UnsupportedProtocol);
        assert_eq!(handler.worker().lease().queue_set().len(), 1);
    }

    #[test]
    fn test_unknown_operation() {
        let handler = create_handler();
        let input = r#"{"protocol_version":1,"op":"unknown_op","request_id":"r6","payload":{}}
"#;

        let responses = run(&handler, input);

        assert_eq!(responses[0].error.as_ref().unwrap().code, ErrorCode::UnknownOperation);
    }
}
