//! Sending commands over the open transport.

use std::sync::Arc;

use netdiag_core::CommandRequest;
use netdiag_core::traits::OutboundMessage;
use netdiag_transport::protocol::encode_command;

use crate::connection::ConnectionManager;
use crate::handler::{ActiveHandlers, CommandError, HandlerSet};

/// Writes command requests and binds their handlers.
///
/// Single-flight: sending a command replaces the active handler set, so any
/// frames still arriving for an earlier command go to the newest handlers.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    connection: ConnectionManager,
    active: ActiveHandlers,
}

impl CommandDispatcher {
    pub(crate) const fn new(connection: ConnectionManager, active: ActiveHandlers) -> Self {
        Self { connection, active }
    }

    /// Send `request`, delivering its results to `handlers`.
    ///
    /// Returns immediately. When the transport is not open, `on_error` is
    /// called before returning and the active handler set is left as it was.
    pub fn send(&self, request: &CommandRequest, handlers: HandlerSet) {
        let Some(outbound) = self.connection.outbound_if_open() else {
            tracing::debug!(kind = %request.kind, "Send rejected, not connected");
            handlers.error(CommandError::NotConnected);
            return;
        };

        let text = match encode_command(request) {
            Ok(text) => text,
            Err(e) => {
                handlers.error(CommandError::SendFailed(e.to_string()));
                return;
            }
        };

        let handlers = Arc::new(handlers);
        if self.active.replace(Arc::clone(&handlers)).is_some() {
            tracing::debug!(kind = %request.kind, "Replacing active handlers");
        }

        if outbound.send(OutboundMessage::Frame(text)).is_err() {
            tracing::warn!(kind = %request.kind, "Transport closed while sending");
            handlers.error(CommandError::SendFailed("transport closed".to_string()));
            return;
        }
        tracing::debug!(kind = %request.kind, "Command sent");
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> Option<Arc<HandlerSet>> {
        self.active.current()
    }
}
