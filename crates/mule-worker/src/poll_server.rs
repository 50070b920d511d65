//! Poll server.
//!
//! Answers poll clients over TCP. Each request is one line; a `GET` line is
//! answered with the next message of the served queue, or an empty line if
//! the queue is empty. Anything else gets an empty (malformed) reply.
//! Replies are single lines, so message bodies must not contain newlines.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use mule_protocol::ops::POLL_REQUEST;

use crate::queue::InMemoryBroker;

/// TCP server handing out queued jobs to poll clients.
pub struct PollServer {
    listener: TcpListener,
    broker: InMemoryBroker,
    queue: String,
}

impl PollServer {
    /// Bind to `addr` and serve messages from `queue`.
    pub fn bind<A: ToSocketAddrs>(addr: A, broker: InMemoryBroker, queue: impl Into<String>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            broker,
            queue: queue.into(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails, one thread per client.
    pub fn serve(self) -> io::Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), queue = %self.queue, "poll server listening");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "failed to accept poll client");
                    continue;
                }
            };
            let broker = self.broker.clone();
            let queue = self.queue.clone();
            std::thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(e) = handle_client(stream, &broker, &queue) {
                    debug!(?peer, error = %e, "poll client disconnected");
                }
            });
        }
        Ok(())
    }

    /// Run [`serve`](Self::serve) on a background thread.
    pub fn spawn(self) -> JoinHandle<io::Result<()>> {
        std::thread::spawn(move || self.serve())
    }
}

fn handle_client(stream: TcpStream, broker: &InMemoryBroker, queue: &str) -> io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    for line in reader.lines() {
        let line = line?;
        let reply = if line.trim().as_bytes() == POLL_REQUEST {
            match broker.pop(queue) {
                Some(message) => {
                    debug!(queue, id = %message.id, "handing out job");
                    message.body
                }
                None => Vec::new(),
            }
        } else {
            warn!(request = %line, "unexpected poll request");
            Vec::new()
        };
        writer.write_all(&reply)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}
