//! Queue substrate.
//!
//! The lease manager only needs a handful of operations from the message
//! queue a worker consumes from; they are captured by [`QueueSubstrate`].
//! [`InMemoryBroker`] and [`BrokerConsumer`] provide a process-local
//! implementation used by the worker binary and the tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use ulid::Ulid;

/// Errors reported by a queue substrate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue '{0}' is not declared")]
    NotDeclared(String),

    #[error("queue '{queue}': {reason}")]
    Rejected { queue: String, reason: String },
}

impl QueueError {
    /// Name of the queue the error concerns.
    pub fn queue(&self) -> &str {
        match self {
            Self::NotDeclared(queue) => queue,
            Self::Rejected { queue, .. } => queue,
        }
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// One worker's view of the queue substrate.
///
/// The set returned by `active_queues` is the worker's QueueSet; only the
/// lease manager mutates it. Two workers claiming the same build both end
/// up consuming its queue; a substrate that needs exclusive consumers must
/// reject the second `consume`.
pub trait QueueSubstrate: Send + Sync {
    /// Queues this worker currently consumes from.
    fn active_queues(&self) -> BTreeSet<String>;

    /// Declare a queue. Declaring an existing queue is a no-op.
    fn declare(&self, queue: &str) -> QueueResult<()>;

    /// Start consuming from a declared queue.
    fn consume(&self, queue: &str) -> QueueResult<()>;

    /// Stop consuming from a queue. Stopping an inactive queue is a no-op.
    fn cancel_consumer(&self, queue: &str) -> QueueResult<()>;

    /// Discard pending messages; returns how many were dropped.
    fn purge(&self, queue: &str) -> QueueResult<usize>;
}

/// A queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    queues: HashMap<String, VecDeque<Message>>,
}

/// Process-local broker with named FIFO queues.
///
/// Cloning yields another handle to the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare a queue (idempotent).
    pub fn declare(&self, queue: &str) {
        self.lock().queues.entry(queue.to_string()).or_default();
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Append a message, declaring the queue if needed. Returns the message ID.
    pub fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) -> String {
        let id = Ulid::new().to_string();
        let message = Message {
            id: id.clone(),
            body: body.into(),
        };
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        id
    }

    /// Take the oldest message from a queue.
    pub fn pop(&self, queue: &str) -> Option<Message> {
        self.lock().queues.get_mut(queue).and_then(|q| q.pop_front())
    }

    /// Number of pending messages; zero for undeclared queues.
    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.len())
    }

    /// Drop all pending messages of a queue.
    pub fn purge(&self, queue: &str) -> usize {
        let mut inner = self.lock();
        match inner.queues.get_mut(queue) {
            Some(q) => {
                let dropped = q.len();
                q.clear();
                dropped
            }
            None => 0,
        }
    }
}

/// Failure injection for consumer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerFaults {
    /// Reject the next `declare` of this queue.
    pub fail_declare: Option<String>,
    /// Reject the next `consume` of this queue.
    pub fail_consume: Option<String>,
}

#[derive(Debug, Default)]
struct ConsumerInner {
    active: BTreeSet<String>,
    faults: ConsumerFaults,
}

/// A worker's consumer over an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct BrokerConsumer {
    broker: InMemoryBroker,
    inner: Arc<Mutex<ConsumerInner>>,
}

impl BrokerConsumer {
    /// Create a consumer that is not yet consuming anything.
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            inner: Arc::new(Mutex::new(ConsumerInner::default())),
        }
    }

    /// Create a consumer already consuming from `default_queue`.
    pub fn joined(broker: InMemoryBroker, default_queue: &str) -> Self {
        broker.declare(default_queue);
        let consumer = Self::new(broker);
        consumer.lock().active.insert(default_queue.to_string());
        consumer
    }

    fn lock(&self) -> MutexGuard<'_, ConsumerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Configure failure injection.
    pub fn set_faults(&self, faults: ConsumerFaults) {
        self.lock().faults = faults;
    }

    /// Take the next message from any consumed queue, in queue-name order.
    pub fn next_message(&self) -> Option<(String, Message)> {
        let active = self.active_queues();
        active
            .into_iter()
            .find_map(|queue| self.broker.pop(&queue).map(|message| (queue, message)))
    }
}

impl QueueSubstrate for BrokerConsumer {
    fn active_queues(&self) -> BTreeSet<String> {
        self.lock().active.clone()
    }

    fn declare(&self, queue: &str) -> QueueResult<()> {
        {
            let mut inner = self.lock();
            if inner.faults.fail_declare.as_deref() == Some(queue) {
                inner.faults.fail_declare = None;
                return Err(QueueError::Rejected {
                    queue: queue.to_string(),
                    reason: "declare rejected".to_string(),
                });
            }
        }
        self.broker.declare(queue);
        debug!(queue, "declared queue");
        Ok(())
    }

    fn consume(&self, queue: &str) -> QueueResult<()> {
        if !self.broker.is_declared(queue) {
            return Err(QueueError::NotDeclared(queue.to_string()));
        }
        let mut inner = self.lock();
        if inner.faults.fail_consume.as_deref() == Some(queue) {
            inner.faults.fail_consume = None;
            return Err(QueueError::Rejected {
                queue: queue.to_string(),
                reason: "consume rejected".to_string(),
            });
        }
        inner.active.insert(queue.to_string());
        Ok(())
    }

    fn cancel_consumer(&self, queue: &str) -> QueueResult<()> {
        self.lock().active.remove(queue);
        Ok(())
    }

    fn purge(&self, queue: &str) -> QueueResult<usize> {
        Ok(self.broker.purge(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_pop_fifo() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", "a");
        broker.publish("jobs", "b");

        assert_eq!(broker.depth("jobs"), 2);
        assert_eq!(broker.pop("jobs").unwrap().body, b"a");
        assert_eq!(broker.pop("jobs").unwrap().body, b"b");
        assert!(broker.pop("jobs").is_none());
    }

    #[test]
    fn test_declare_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.publish("q", "x");
        broker.declare("q");
        assert_eq!(broker.depth("q"), 1);
    }

    #[test]
    fn test_consume_requires_declare() {
        let consumer = BrokerConsumer::new(InMemoryBroker::new());
        let err = consumer.consume("missing").unwrap_err();
        assert_eq!(err, QueueError::NotDeclared("missing".to_string()));

        consumer.declare("missing").unwrap();
        consumer.consume("missing").unwrap();
        assert!(consumer.active_queues().contains("missing"));
    }

    #[test]
    fn test_joined_consumer_reads_default_queue() {
        let broker = InMemoryBroker::new();
        let consumer = BrokerConsumer::joined(broker.clone(), "default");
        broker.publish("default", "job-1");
        broker.publish("other", "job-2");

        let (queue, message) = consumer.next_message().unwrap();
        assert_eq!(queue, "default");
        assert_eq!(message.body, b"job-1");
        assert!(consumer.next_message().is_none());
    }

    #[test]
    fn test_purge_counts_dropped() {
        let consumer = BrokerConsumer::joined(InMemoryBroker::new(), "default");
        consumer.broker().publish("default", "1");
        consumer.broker().publish("default", "2");

        assert_eq!(consumer.purge("default").unwrap(), 2);
        assert_eq!(consumer.purge("never-declared").unwrap(), 0);
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let consumer = BrokerConsumer::new(InMemoryBroker::new());
        consumer.set_faults(ConsumerFaults {
            fail_declare: Some("q".to_string()),
            fail_consume: None,
        });

        assert!(consumer.declare("q").is_err());
        assert!(consumer.declare("q").is_ok());
    }
}
