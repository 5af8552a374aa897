//! Routing of inbound frames to the active handler set.

use netdiag_core::InboundFrame;
use netdiag_transport::protocol::decode_inbound;

use crate::handler::{ActiveHandlers, CommandError};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to `on_output`.
    Output,
    /// Delivered to `on_error`.
    Error,
    /// Delivered to `on_complete`.
    Complete,
    /// Valid frame without anything to deliver.
    Ignored,
    /// Undecodable frame, reported as `InvalidResponse`.
    Malformed,
    /// No command has been sent yet.
    Dropped,
}

/// Decodes inbound frames and invokes the active handlers.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    active: ActiveHandlers,
}

impl MessageRouter {
    pub(crate) const fn new(active: ActiveHandlers) -> Self {
        Self { active }
    }

    /// Route one raw text frame.
    ///
    /// A frame carrying an error goes to `on_error` only, even when it also
    /// carries output. A `done` marker is reported after any output or error
    /// in the same frame.
    pub fn route(&self, text: &str) -> RouteOutcome {
        let Some(handlers) = self.active.current() else {
            tracing::debug!(len = text.len(), "Dropping frame, no active command");
            return RouteOutcome::Dropped;
        };

        let frame: InboundFrame = match decode_inbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed frame from server");
                handlers.error(CommandError::InvalidResponse);
                return RouteOutcome::Malformed;
            }
        };

        let mut outcome = RouteOutcome::Ignored;
        if let Some(message) = frame.error_message() {
            handlers.error(CommandError::Backend(message.to_string()));
            outcome = RouteOutcome::Error;
        } else if let Some(output) = frame.output.filter(|o| !o.is_empty()) {
            handlers.output(output);
            outcome = RouteOutcome::Output;
        }

        if frame.done && handlers.complete() && outcome == RouteOutcome::Ignored {
            outcome = RouteOutcome::Complete;
        }

        outcome
    }
}
