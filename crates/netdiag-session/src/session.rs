//! Public surface of a command session.

use std::sync::Arc;

use netdiag_core::{CommandRequest, ConfigError, ConnectionState, Connector, SessionConfig};
use netdiag_transport::WsConnector;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::connection::{ConnectionManager, SessionEvent, SessionStatus};
use crate::dispatcher::CommandDispatcher;
use crate::handler::{ActiveHandlers, HandlerSet};
use crate::router::MessageRouter;

/// One connection to a command backend.
///
/// Cheap to clone; clones share the same connection. Background tasks keep
/// the session alive until [`Session::stop`] is called.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    connection: ConnectionManager,
    dispatcher: CommandDispatcher,
}

impl Session {
    /// Create a session using `connector` to open transports.
    ///
    /// Nothing is opened until [`Session::start`].
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        config.validate()?;

        let id = Uuid::new_v4();
        let active = ActiveHandlers::default();
        let router = MessageRouter::new(active.clone());
        let connection = ConnectionManager::new(id, config, connector, router);
        let dispatcher = CommandDispatcher::new(connection.clone(), active);

        Ok(Self {
            id,
            connection,
            dispatcher,
        })
    }

    /// Create a session speaking WebSocket to the configured endpoint.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn websocket(config: SessionConfig) -> Result<Self, ConfigError> {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        Self::new(config, connector)
    }

    /// Session id, used in log fields.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Open the connection. No-op if it is already open or opening.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        self.connection.connect();
    }

    /// Close the connection and stop reconnecting.
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Reconnect now with a fresh attempt budget.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Send a command; results are delivered to `handlers`.
    ///
    /// See [`CommandDispatcher::send`].
    pub fn send_message(&self, request: &CommandRequest, handlers: HandlerSet) {
        self.dispatcher.send(request, handlers);
    }

    /// Returns true if the transport is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Last connectivity error, cleared on a successful open.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.connection.status().error
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.status().state
    }

    /// Current state, error and attempt count as one snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.connection.status()
    }

    /// Watch status changes.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.connection.subscribe_status()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.connection.subscribe_events()
    }

    /// Lifecycle events as a stream, skipping any the subscriber lagged on.
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.events()).filter_map(Result::ok)
    }
}
