//! Error types for the control protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in control error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or a violated precondition.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// A script could not be run for reasons other than its exit code.
    ExecutionFault,
    /// The queue substrate rejected a declare/consume/purge.
    QueueFault,
    /// The operator cancelled the running script.
    Cancelled,
    /// The job completion callback failed.
    CallbackFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::UnsupportedProtocol => write!(f, "UNSUPPORTED_PROTOCOL"),
            Self::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
            Self::ExecutionFault => write!(f, "EXECUTION_FAULT"),
            Self::QueueFault => write!(f, "QUEUE_FAULT"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::CallbackFailed => write!(f, "CALLBACK_FAILED"),
        }
    }
}

/// Control error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create an EXECUTION_FAULT error for a script that could not be run.
    pub fn execution_fault(script: &str, message: impl fmt::Display) -> Self {
        Self::with_data(
            ErrorCode::ExecutionFault,
            format!("failed to run {}: {}", script, message),
            serde_json::json!({ "script": script }),
        )
    }

    /// Create a QUEUE_FAULT error.
    pub fn queue_fault(queue: &str, message: impl fmt::Display) -> Self {
        Self::with_data(
            ErrorCode::QueueFault,
            format!("queue '{}': {}", queue, message),
            serde_json::json!({ "queue": queue }),
        )
    }

    /// Create a CANCELLED error.
    pub fn cancelled(script: &str) -> Self {
        Self::with_data(
            ErrorCode::Cancelled,
            format!("{} was cancelled", script),
            serde_json::json!({ "script": script }),
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
