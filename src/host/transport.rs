//! Transport Layer for the Poll Client
//!
//! Abstracts the request/reply connection to a worker for testability:
//! - `Connector`/`Connection` traits: interface for one request/reply exchange
//! - `TcpConnector`: newline-framed TCP connection for production
//! - `MockConnector`: scripted replies and silences for unit tests

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One connection to a worker endpoint.
///
/// At most one request is outstanding at a time.
pub trait Connection: Send {
    /// Send a request body.
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the reply to the last request.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn poll_reply(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Opens fresh connections to an endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// TCP connector using newline-terminated requests and replies.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?
            .next()
            .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        stream.set_nodelay(true)?;

        let writer = stream.try_clone()?;
        Ok(Box::new(TcpConnection {
            reader: BufReader::new(stream),
            writer,
        }))
    }
}

/// A TCP connection; replies are read one line at a time.
pub struct TcpConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection for TcpConnection {
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(body)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn poll_reply(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        // A zero read timeout means "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        self.reader.get_ref().set_read_timeout(Some(timeout))?;

        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => Err(TransportError::Closed),
            Ok(_) => {
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// What a mock endpoint does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Reply with this body.
    Payload(Vec<u8>),
    /// Reply with an empty body.
    Empty,
    /// Never reply.
    Silence,
    /// Fail the send itself.
    SendFailure,
}

impl MockReply {
    pub fn payload(body: impl Into<Vec<u8>>) -> Self {
        Self::Payload(body.into())
    }
}

#[derive(Debug, Default)]
struct MockScript {
    replies: VecDeque<MockReply>,
    connects: u32,
    sends: Vec<Vec<u8>>,
    refuse_connects: bool,
}

/// Mock connector for testing - replays a script of replies.
///
/// Replies are consumed one per request across all connections; once the
/// script runs out every request is met with silence.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<MockScript>>,
}

impl MockConnector {
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(MockScript {
                replies: replies.into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockScript> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later `connect` fail.
    pub fn refuse_connects(&self) {
        self.lock().refuse_connects = true;
    }

    /// Number of successful connects, including the first.
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    /// Bodies of all requests sent so far.
    pub fn sends(&self) -> Vec<Vec<u8>> {
        self.lock().sends.clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut script = self.lock();
        if script.refuse_connects {
            return Err(TransportError::ConnectionFailed(format!("{}: refused", endpoint)));
        }
        script.connects += 1;
        Ok(Box::new(MockConnection {
            script: Arc::clone(&self.script),
            pending: None,
        }))
    }
}

struct MockConnection {
    script: Arc<Mutex<MockScript>>,
    pending: Option<MockReply>,
}

impl Connection for MockConnection {
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        script.sends.push(body.to_vec());
        let reply = script.replies.pop_front().unwrap_or(MockReply::Silence);
        if reply == MockReply::SendFailure {
            return Err(TransportError::ConnectionFailed("send failed".to_string()));
        }
        self.pending = Some(reply);
        Ok(())
    }

    fn poll_reply(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.pending.take() {
            Some(MockReply::Payload(body)) => Ok(Some(body)),
            Some(MockReply::Empty) => Ok(Some(Vec::new())),
            _ => Ok(None),
        }
    }
}
