//! Caller callbacks for a command's streamed results.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Error delivered to a command's `on_error` callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The transport was not open when the command was sent.
    #[error("WebSocket is not connected")]
    NotConnected,
    /// A frame from the server could not be decoded.
    #[error("invalid response from server")]
    InvalidResponse,
    /// The backend reported a failure; the message is passed through verbatim.
    #[error("{0}")]
    Backend(String),
    /// The request could not be written to the transport.
    #[error("Failed to send command: {0}")]
    SendFailed(String),
}

type OutputFn = Box<dyn Fn(String) + Send + Sync>;
type ErrorFn = Box<dyn Fn(CommandError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Callbacks bound to the command most recently sent.
pub struct HandlerSet {
    on_output: OutputFn,
    on_error: ErrorFn,
    on_complete: Option<CompleteFn>,
}

impl HandlerSet {
    /// Create a handler set from output and error callbacks.
    pub fn new<O, E>(on_output: O, on_error: E) -> Self
    where
        O: Fn(String) + Send + Sync + 'static,
        E: Fn(CommandError) + Send + Sync + 'static,
    {
        Self {
            on_output: Box::new(on_output),
            on_error: Box::new(on_error),
            on_complete: None,
        }
    }

    /// Also get notified when the backend marks the end of the stream.
    #[must_use]
    pub fn on_complete<C>(mut self, on_complete: C) -> Self
    where
        C: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    pub(crate) fn output(&self, line: String) {
        (self.on_output)(line);
    }

    pub(crate) fn error(&self, error: CommandError) {
        (self.on_error)(error);
    }

    /// Returns false if no completion callback is registered.
    pub(crate) fn complete(&self) -> bool {
        self.on_complete.as_ref().is_some_and(|f| {
            f();
            true
        })
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("on_complete", &self.on_complete.is_some())
            .finish_non_exhaustive()
    }
}

/// Slot holding the single active handler set.
///
/// Written by the dispatcher, read by the router. Readers get a clone of the
/// `Arc` so callbacks run without the lock held.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveHandlers {
    slot: Arc<Mutex<Option<Arc<HandlerSet>>>>,
}

impl ActiveHandlers {
    /// Replace the active set, returning the previous one.
    pub fn replace(&self, handlers: Arc<HandlerSet>) -> Option<Arc<HandlerSet>> {
        self.slot.lock().replace(handlers)
    }

    pub fn current(&self) -> Option<Arc<HandlerSet>> {
        self.slot.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(CommandError::NotConnected.to_string(), "WebSocket is not connected");
        assert_eq!(
            CommandError::InvalidResponse.to_string(),
            "invalid response from server"
        );
        assert_eq!(CommandError::Backend("host unreachable".into()).to_string(), "host unreachable");
    }

    #[test]
    fn test_complete_without_callback() {
        let handlers = HandlerSet::new(|_| {}, |_| {});
        assert!(!handlers.complete());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handlers = HandlerSet::new(|_| {}, |_| {}).on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handlers.complete());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_returns_previous() {
        let active = ActiveHandlers::default();
        assert!(active.current().is_none());

        let first = Arc::new(HandlerSet::new(|_| {}, |_| {}));
        assert!(active.replace(Arc::clone(&first)).is_none());

        let second = Arc::new(HandlerSet::new(|_| {}, |_| {}));
        let previous = active.replace(Arc::clone(&second)).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&active.current().unwrap(), &second));
    }
}
