//! Command requests and response frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of diagnostic command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// ICMP echo via `ping`.
    Ping,
    /// DNS lookup via `dig`.
    Dig,
}

impl CommandKind {
    /// Program name executed by the backend.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Dig => "dig",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

/// A command request as sent over the wire.
///
/// The session layer treats `parameters` as opaque application data and
/// forwards it verbatim; only the backend interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Command name.
    pub command: String,
    /// Arbitrary parameters for the executor.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl CommandRequest {
    /// Create a request with no parameters.
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            command: kind.program().to_string(),
            parameters: Map::new(),
        }
    }

    /// Create a request with parameters.
    #[must_use]
    pub fn with_parameters(kind: CommandKind, parameters: Map<String, Value>) -> Self {
        Self {
            kind,
            command: kind.program().to_string(),
            parameters,
        }
    }

    /// Get a parameter by key.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Set a parameter.
    #[must_use]
    pub fn set_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A response frame from the backend.
///
/// At most one of `output` and `error` is meaningful per frame; `error` wins
/// when both are present. `done` marks the end of a command's stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl InboundFrame {
    /// An output frame.
    #[must_use]
    pub fn output(line: impl Into<String>) -> Self {
        Self {
            output: Some(line.into()),
            ..Self::default()
        }
    }

    /// An error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The end-of-stream marker.
    #[must_use]
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    /// The non-empty error message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}
