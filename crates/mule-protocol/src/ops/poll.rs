//! Poll exchange tokens.
//!
//! A poll client sends the literal `GET`; the worker answers with an
//! opaque payload, or nothing when it has no work.

/// Request body of a poll exchange.
pub const POLL_REQUEST: &[u8] = b"GET";

/// A reply received for a poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// Non-empty payload, handed to the job-execution path.
    Payload(Vec<u8>),
    /// Empty or whitespace-only body. Treated as malformed.
    Empty,
}

impl PollReply {
    /// Classify a raw reply body.
    pub fn from_bytes(body: Vec<u8>) -> Self {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            PollReply::Empty
        } else {
            PollReply::Payload(body)
        }
    }
}
