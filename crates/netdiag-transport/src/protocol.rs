//! Wire protocol for client-server communication.
//!
//! Client → server: a command frame `{"type","command","parameters"}` or a
//! heartbeat `{"type":"ping"}`. Server → client: `{"output"?,"error"?,"done"?}`.

use netdiag_core::{CommandRequest, InboundFrame};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Heartbeat marker; always serialized as `{"type":"ping"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    kind: HeartbeatKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum HeartbeatKind {
    #[default]
    #[serde(rename = "ping")]
    Ping,
}

/// Frame from client to server.
///
/// A heartbeat shares its `type` with the ping command and is told apart by
/// the missing `command` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Run a command.
    Command(CommandRequest),
    /// Keepalive.
    Heartbeat(Heartbeat),
}

impl ClientFrame {
    /// Encode to JSON text.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode from JSON text.
    ///
    /// # Errors
    /// Returns error if the text is not a command or heartbeat frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Encode a command request as a client frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_command(request: &CommandRequest) -> Result<String, ProtocolError> {
    serde_json::to_string(request).map_err(ProtocolError::Encode)
}

/// The heartbeat frame text.
#[must_use]
pub fn heartbeat_frame() -> String {
    r#"{"type":"ping"}"#.to_string()
}

/// Decode a server frame.
///
/// # Errors
/// Returns error if the text is not a JSON object of the inbound shape.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encode a server frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_inbound(frame: &InboundFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(ProtocolError::Encode)
}
