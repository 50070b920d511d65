//! Mule Protocol Types
//!
//! Defines the control envelope exchanged between a dispatcher and a
//! worker, the lease and job payloads, and the poll tokens used by the
//! poll-retry client.

pub mod error;
pub mod request;
pub mod response;
pub mod ops;

pub use error::{ErrorCode, RpcError};
pub use request::RpcRequest;
pub use response::RpcResponse;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Environment variable carrying the resolved working directory.
pub const ENV_WORKSPACE: &str = "WORKSPACE";

/// Environment variable carrying the build identifier.
pub const ENV_BUILD_ID: &str = "BUILD_ID";

/// Environment variable carrying the job identifier (run_job only).
pub const ENV_TEST: &str = "TEST";

/// Derive the exclusive queue name for a build: `<prefix>-<build_id>`.
pub fn build_queue_name(prefix: &str, build_id: &str) -> String {
    format!("{}-{}", prefix, build_id)
}
