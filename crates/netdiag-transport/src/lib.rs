//! Transport layer for command sessions.
//!
//! Provides:
//! - Wire protocol (JSON frames)
//! - WebSocket client transport (tokio-tungstenite)
//! - In-process channel transport
//! - Server-side WebSocket endpoint and per-IP rate limiting (feature: server)

pub mod channel;
pub mod protocol;
pub mod websocket;

#[cfg(feature = "server")]
pub mod rate_limit;
#[cfg(feature = "server")]
pub mod server;

pub use channel::{ChannelConnector, ChannelPeer};
pub use protocol::{ClientFrame, ProtocolError};
pub use websocket::WsConnector;
