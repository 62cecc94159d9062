use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::TransportError;

/// Errors surfaced while driving the Copilot CLI agent.
#[derive(Debug, Error)]
pub enum CopilotError {
    /// The byte stream's framing became ambiguous; the connection is closed.
    #[error("framing error: {0}")]
    Framing(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A malformed JSON-RPC message or a response with no matching pending
    /// call. The connection keeps reading.
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("agent returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("handler for `{method}` failed: {message}")]
    Handler { method: String, message: String },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("client is not started")]
    NotStarted,
    #[error("client is already started")]
    AlreadyStarted,
    #[error("session `{0}` has been destroyed")]
    SessionDestroyed(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CopilotError {
    /// Whether the error invalidates the whole connection as opposed to the
    /// single call that observed it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CopilotError::Framing(_) | CopilotError::Transport(_) | CopilotError::ConnectionClosed
        )
    }
}
