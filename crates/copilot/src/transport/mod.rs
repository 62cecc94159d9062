//! Byte-stream transports connecting the SDK to an agent.
//!
//! A transport owns one bidirectional byte stream: the stdio pipes of a
//! spawned Copilot CLI process, a TCP socket, or a WebSocket. All three hand
//! the connection the same channel triple, so the framing codec and the
//! JSON-RPC layer above never care which one is underneath.

use std::{io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

mod child_process;
mod tcp;
mod websocket;

pub use child_process::{ChildProcessConfig, ChildProcessTransport, COPILOT_CLI_PATH_ENV};
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// Capacity of the bounded lanes a transport hands to the connection.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// Errors raised while starting or running a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("agent binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("agent child {0} unavailable")]
    StdioUnavailable(&'static str),
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("websocket handshake with {uri} failed: {message}")]
    WebSocketHandshake { uri: String, message: String },
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("transport is already started")]
    AlreadyStarted,
    #[error("transport closed")]
    Closed,
}

/// Out-of-band signals a running transport reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// The byte stream failed. A `Closed` event follows.
    Error(TransportError),
    /// The byte stream ended. `exit_code` is populated by the child-process
    /// transport once the agent has been reaped.
    Closed { exit_code: Option<i32> },
}

/// The channel triple a started transport exposes.
///
/// `outgoing` is the serialized write lane: each buffer is written and
/// flushed as a unit, in submission order. `incoming` delivers received byte
/// chunks in order. `events` reports errors and the final close.
#[derive(Debug)]
pub struct TransportChannels {
    pub outgoing: mpsc::Sender<Vec<u8>>,
    pub incoming: mpsc::Receiver<Vec<u8>>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A bidirectional byte stream with explicit lifecycle ownership.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the stream and returns its channels. Calling `start` on a
    /// transport that is already running is an error.
    async fn start(&mut self) -> Result<TransportChannels, TransportError>;

    /// Tears the stream down. Idempotent; the `incoming` receiver ends and a
    /// final `Closed` event is emitted if the stream was up.
    async fn close(&mut self);
}

#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn error(&self, error: TransportError) {
        let _ = self.tx.send(TransportEvent::Error(error));
    }

    pub(crate) fn closed(&self, exit_code: Option<i32>) {
        let _ = self.tx.send(TransportEvent::Closed { exit_code });
    }
}
