//! Core types for network-diagnostic command sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `CommandRequest` / `InboundFrame` - Wire-level command and response types
//! - `ConnectionState` - Transport lifecycle state
//! - `SessionConfig` / `ReconnectPolicy` - Configuration
//! - `Connector` and `Executor` traits

pub mod command;
pub mod config;
pub mod state;
pub mod traits;

pub use command::{CommandKind, CommandRequest, InboundFrame};
pub use config::{ConfigError, ReconnectPolicy, SessionConfig};
pub use state::ConnectionState;
pub use traits::{Connector, Executor, TransportError};
