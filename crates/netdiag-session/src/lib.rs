//! Session layer for network-diagnostic commands.
//!
//! Provides:
//! - `Session` - Public surface: status, `send_message`, `reconnect`
//! - `ConnectionManager` - Transport lifecycle, heartbeat, backoff reconnects
//! - `CommandDispatcher` - Single-flight command sending
//! - `MessageRouter` - Inbound frame routing to the active handlers

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod router;
pub mod session;

pub use connection::{
    CONNECTION_ERROR, ConnectionManager, RECONNECTS_EXHAUSTED, SessionEvent, SessionStatus,
};
pub use dispatcher::CommandDispatcher;
pub use handler::{CommandError, HandlerSet};
pub use router::{MessageRouter, RouteOutcome};
pub use session::Session;
