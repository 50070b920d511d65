//! Host-side client for mule workers.
//!
//! Polls a worker endpoint for work over a pluggable transport.

pub mod poll;
pub mod transport;

pub use poll::{PollClient, PollError, PollReport, RetryPolicy};
pub use transport::{
    Connection, Connector, MockConnector, MockReply, TcpConnection, TcpConnector, TransportError,
};
