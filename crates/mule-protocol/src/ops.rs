//! Operation-specific types.

pub mod lease;
pub mod job;
pub mod poll;

pub use lease::{ClaimRequest, ReleaseRequest, LeaseReport, LeaseResponse, REASON_IN_USE};
pub use job::{JobResult, RunJobRequest};
pub use poll::{POLL_REQUEST, PollReply};

/// Known control operation names.
pub mod names {
    pub const CLAIM: &str = "claim";
    pub const RELEASE: &str = "release";
    pub const RUN_JOB: &str = "run_job";
}
