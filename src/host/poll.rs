//! Poll-retry client
//!
//! Asks a worker endpoint for work with a single outstanding `GET` at a
//! time. Each request waits a bounded time for the reply. Silence marks the
//! connection stale; a fresh connection replaces it just before the next
//! send. Requests are budgeted by nested retry counters:
//! `global_retries` rounds of `fetch_retries` requests each.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use mule_protocol::ops::{PollReply, POLL_REQUEST};

use super::transport::{Connection, Connector, TransportError};
use crate::config::PollSettings;

/// Sleep granularity while waiting out a backoff, so cancellation stays prompt.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Retry budget and timing for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of outer rounds.
    pub global_retries: u32,
    /// Requests per round.
    pub fetch_retries: u32,
    /// Bounded wait for each reply.
    pub poll_timeout: Duration,
    /// Delay before the second round; doubles each round after.
    pub retry_initial_delay: Duration,
    /// Upper bound on the delay between rounds.
    pub retry_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for RetryPolicy {
    fn from(settings: &PollSettings) -> Self {
        Self {
            global_retries: settings.global_retries,
            fetch_retries: settings.fetch_retries,
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            retry_initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            retry_max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given budgets and no delay between rounds.
    pub fn immediate(global_retries: u32, fetch_retries: u32, poll_timeout: Duration) -> Self {
        Self {
            global_retries,
            fetch_retries,
            poll_timeout,
            retry_initial_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
        }
    }

    /// Most requests a poll will ever send.
    pub fn max_requests(&self) -> u32 {
        self.global_retries.saturating_mul(self.fetch_retries)
    }

    /// Delay after finishing round `round` (0-based), or `None` after the
    /// last round.
    pub fn backoff_after(&self, round: u32) -> Option<Duration> {
        if round.saturating_add(1) >= self.global_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(round);
        let delay = self.retry_initial_delay.saturating_mul(factor);
        Some(delay.min(self.retry_max_delay))
    }
}

/// Successful poll outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Non-empty reply body.
    pub payload: Vec<u8>,
    /// Requests sent, including the one that got the payload.
    pub requests: u32,
    /// Connections replaced after silence or transport errors.
    pub reconnects: u32,
}

/// Poll errors
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("no usable reply after {requests} requests ({reconnects} reconnects)")]
    Exhausted { requests: u32, reconnects: u32 },

    #[error("poll cancelled")]
    Cancelled,
}

/// Client polling one endpoint at a time.
pub struct PollClient {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    cancelled: Arc<AtomicBool>,
}

impl PollClient {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self::with_cancellation(connector, policy, Arc::new(AtomicBool::new(false)))
    }

    /// Create a client that stops when `cancelled` is set.
    pub fn with_cancellation(
        connector: Arc<dyn Connector>,
        policy: RetryPolicy,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connector,
            policy,
            cancelled,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Poll `endpoint` until it replies with a payload or the budget runs out.
    pub fn fetch(&self, endpoint: &str) -> Result<PollReport, PollError> {
        if self.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let mut conn: Option<Box<dyn Connection>> =
            Some(self.connector.connect(endpoint).map_err(|source| PollError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?);
        let mut requests = 0u32;
        let mut reconnects = 0u32;

        info!(
            endpoint,
            global_retries = self.policy.global_retries,
            fetch_retries = self.policy.fetch_retries,
            "polling worker"
        );

        for round in 0..self.policy.global_retries {
            for attempt in 0..self.policy.fetch_retries {
                if self.is_cancelled() {
                    return Err(PollError::Cancelled);
                }

                if conn.is_none() {
                    reconnects += 1;
                    debug!(endpoint, reconnects, "reconnecting");
                    match self.connector.connect(endpoint) {
                        Ok(fresh) => conn = Some(fresh),
                        Err(e) => {
                            // The attempt is spent without a send.
                            warn!(endpoint, round, attempt, error = %e, "reconnect failed");
                            continue;
                        }
                    }
                }
                let Some(active) = conn.as_mut() else {
                    continue;
                };

                requests += 1;
                if let Err(e) = active.send(POLL_REQUEST) {
                    warn!(endpoint, round, attempt, error = %e, "send failed");
                    conn = None;
                    continue;
                }

                match active.poll_reply(self.policy.poll_timeout) {
                    Ok(Some(body)) => match PollReply::from_bytes(body) {
                        PollReply::Payload(payload) => {
                            info!(endpoint, requests, reconnects, "received reply");
                            return Ok(PollReport {
                                payload,
                                requests,
                                reconnects,
                            });
                        }
                        PollReply::Empty => {
                            error!(endpoint, round, attempt, "malformed reply");
                        }
                    },
                    Ok(None) => {
                        warn!(
                            endpoint,
                            round,
                            attempt,
                            timeout_ms = self.policy.poll_timeout.as_millis() as u64,
                            "no response from server, retrying"
                        );
                        conn = None;
                    }
                    Err(e) => {
                        warn!(endpoint, round, attempt, error = %e, "receive failed");
                        conn = None;
                    }
                }
            }

            if let Some(delay) = self.policy.backoff_after(round) {
                self.sleep_unless_cancelled(delay)?;
            }
        }

        warn!(endpoint, requests, reconnects, "giving up on worker");
        Err(PollError::Exhausted {
            requests,
            reconnects,
        })
    }

    fn sleep_unless_cancelled(&self, delay: Duration) -> Result<(), PollError> {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(BACKOFF_SLICE.min(deadline - now));
        }
    }
}
