//! Seams between the session layer, transports and executors.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command::{CommandRequest, InboundFrame};

/// Close code for a normal, caller-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a connection lost without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport error.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Transport closed")]
    Closed,
}

/// How a transport was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

impl CloseInfo {
    /// A close with the given code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A connection lost without a close handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }
}

/// Message written to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A text frame.
    Frame(String),
    /// Close the transport.
    Close(CloseInfo),
}

/// Event produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// A transport-level error occurred; a `Closed` event follows if the
    /// transport is no longer usable.
    Error(String),
    /// The transport closed. No further events follow.
    Closed(CloseInfo),
}

/// An open transport: a write half and an event stream.
#[derive(Debug)]
pub struct TransportLink {
    /// Sender for outgoing messages.
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    /// Receiver for transport events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    ///
    /// Resolves once the transport is open.
    async fn connect(&self, endpoint: &str) -> Result<TransportLink, TransportError>;
}

/// Sink for frames produced while executing a command.
pub type FrameSink = mpsc::UnboundedSender<InboundFrame>;

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs diagnostic commands on the backend side.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `request`, streaming output frames into `sink`.
    ///
    /// Implementations send at most one error frame. The caller sends the
    /// end-of-stream marker after this returns.
    async fn execute(&self, request: &CommandRequest, sink: FrameSink) -> Result<(), ExecutorError>;
}
