//! Transport lifecycle: connect, heartbeat and reconnect with backoff.

use std::sync::Arc;
use std::time::Duration;

use netdiag_core::traits::{CLOSE_NORMAL, CloseInfo, OutboundMessage, TransportEvent, TransportLink};
use netdiag_core::{ConnectionState, Connector, SessionConfig, TransportError};
use netdiag_transport::protocol::heartbeat_frame;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::router::MessageRouter;

/// Error shown after a transport error event.
pub const CONNECTION_ERROR: &str = "WebSocket connection error";

/// Error shown once automatic reconnection has given up.
pub const RECONNECTS_EXHAUSTED: &str = "Maximum reconnection attempts reached";

const EVENT_CAPACITY: usize = 64;

/// Snapshot of the connection as seen by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
    /// Consecutive reconnect attempts since the last successful open.
    pub attempts: u32,
}

impl SessionStatus {
    /// Returns true if the transport is open.
    #[must_use]
    pub const fn connected(&self) -> bool {
        self.state.is_open()
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A transport is being opened.
    Connecting { attempt: u32 },
    /// The transport opened.
    Connected,
    /// The transport closed.
    Disconnected { code: u16, reason: String },
    /// A reconnect will run after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic reconnection gave up.
    ReconnectsExhausted { attempts: u32 },
    /// The transport reported an error.
    Error(String),
}

struct PendingReconnect {
    id: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    error: Option<String>,
    attempts: u32,
    /// Identifies the transport the state refers to. Events from any other
    /// transport are stale.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<PendingReconnect>,
    next_timer_id: u64,
}

impl Shared {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            error: self.error.clone(),
            attempts: self.attempts,
        }
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.task.abort();
        }
    }
}

struct Inner {
    session_id: Uuid,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    router: MessageRouter,
    shared: Mutex<Shared>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// Owns the single transport of a session.
///
/// All state changes happen under one lock and are published to a `watch`
/// channel before the lock is released, so status snapshots never go
/// backwards. Inbound frames are routed outside the lock.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session_id", &self.inner.session_id)
            .field("endpoint", &self.inner.config.endpoint)
            .field("status", &*self.inner.status_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        session_id: Uuid,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        router: MessageRouter,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                session_id,
                config,
                connector,
                router,
                shared: Mutex::new(Shared::default()),
                status_tx,
                events_tx,
            }),
        }
    }

    /// Open a transport unless one is open or opening.
    pub fn connect(&self) {
        let generation = {
            let mut shared = self.inner.shared.lock();
            self.begin_connect(&mut shared)
        };
        if let Some(generation) = generation {
            self.spawn_transport(generation);
        }
    }

    /// Move to `Connecting` under the caller's lock.
    ///
    /// Returns the new generation, or None if a transport is already live.
    fn begin_connect(&self, shared: &mut Shared) -> Option<u64> {
        if shared.state.is_open() || shared.state.is_transitioning() {
            tracing::trace!(state = %shared.state, "Connect ignored");
            return None;
        }
        shared.generation += 1;
        shared.state = ConnectionState::Connecting;
        self.publish(shared);
        self.emit(SessionEvent::Connecting {
            attempt: shared.attempts,
        });
        Some(shared.generation)
    }

    fn spawn_transport(&self, generation: u64) {
        tracing::debug!(
            session_id = %self.inner.session_id,
            endpoint = %self.inner.config.endpoint,
            generation,
            "Connecting"
        );
        let this = self.clone();
        tokio::spawn(async move { this.run_transport(generation).await });
    }

    /// Reset the attempt budget and connect now.
    pub fn reconnect(&self) {
        {
            let mut shared = self.inner.shared.lock();
            shared.cancel_reconnect();
            shared.attempts = 0;
            shared.error = None;
            self.publish(&shared);
        }
        tracing::info!(session_id = %self.inner.session_id, "Manual reconnect");
        self.connect();
    }

    /// Tear down: cancel timers and close the transport with a normal close.
    ///
    /// An open transport moves to `Closing` and then to `Disconnected` when
    /// its close event arrives. A transport still being opened is discarded.
    pub fn stop(&self) {
        let mut shared = self.inner.shared.lock();
        shared.cancel_reconnect();
        shared.cancel_heartbeat();

        match shared.state {
            ConnectionState::Open => {
                let close = CloseInfo::new(CLOSE_NORMAL, "client closing");
                let sent = shared
                    .outbound
                    .as_ref()
                    .is_some_and(|tx| tx.send(OutboundMessage::Close(close)).is_ok());
                if sent {
                    shared.state = ConnectionState::Closing;
                } else {
                    // Transport task already gone; nothing will report the close.
                    shared.state = ConnectionState::Disconnected;
                    shared.outbound = None;
                    shared.generation += 1;
                }
            }
            ConnectionState::Connecting => {
                shared.state = ConnectionState::Disconnected;
                shared.generation += 1;
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {}
        }
        self.publish(&shared);
        tracing::info!(session_id = %self.inner.session_id, state = %shared.state, "Stopped");
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Sender for the open transport, if any.
    pub(crate) fn outbound_if_open(&self) -> Option<mpsc::UnboundedSender<OutboundMessage>> {
        let shared = self.inner.shared.lock();
        if shared.state.is_open() {
            shared.outbound.clone()
        } else {
            None
        }
    }

    async fn run_transport(self, generation: u64) {
        let config = &self.inner.config;
        let result = tokio::time::timeout(
            config.connect_timeout(),
            self.inner.connector.connect(&config.endpoint),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout {
            timeout_ms: config.connect_timeout_ms,
        }));

        let TransportLink {
            outbound,
            mut events,
        } = match result {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    error = %e,
                    "Connect failed"
                );
                self.on_error(generation, &e.to_string());
                self.on_close(generation, CloseInfo::abnormal(e.to_string()));
                return;
            }
        };

        if !self.on_open(generation, outbound.clone()) {
            let _ = outbound.send(OutboundMessage::Close(CloseInfo::new(
                CLOSE_NORMAL,
                "superseded",
            )));
            return;
        }

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(text) => {
                    if self.is_current_open(generation) {
                        let outcome = self.inner.router.route(&text);
                        tracing::trace!(?outcome, "Routed frame");
                    }
                }
                TransportEvent::Error(message) => self.on_error(generation, &message),
                TransportEvent::Closed(info) => {
                    self.on_close(generation, info);
                    return;
                }
            }
        }

        self.on_close(generation, CloseInfo::abnormal("transport ended"));
    }

    fn is_current_open(&self, generation: u64) -> bool {
        let shared = self.inner.shared.lock();
        shared.generation == generation && shared.state.is_open()
    }

    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<OutboundMessage>) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation || shared.state != ConnectionState::Connecting {
            tracing::debug!(generation, "Discarding stale transport");
            return false;
        }

        shared.state = ConnectionState::Open;
        shared.attempts = 0;
        shared.error = None;
        shared.cancel_reconnect();
        shared.outbound = Some(outbound);
        shared.cancel_heartbeat();
        shared.heartbeat = self.spawn_heartbeat(generation);
        self.publish(&shared);
        self.emit(SessionEvent::Connected);
        tracing::info!(session_id = %self.inner.session_id, generation, "Connected");
        true
    }

    fn on_error(&self, generation: u64, message: &str) {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return;
        }
        tracing::warn!(session_id = %self.inner.session_id, error = %message, "Transport error");
        shared.error = Some(CONNECTION_ERROR.to_string());
        self.publish(&shared);
        self.emit(SessionEvent::Error(message.to_string()));
    }

    fn on_close(&self, generation: u64, info: CloseInfo) {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return;
        }

        let was_closing = shared.state == ConnectionState::Closing;
        shared.state = ConnectionState::Disconnected;
        shared.outbound = None;
        shared.cancel_heartbeat();
        tracing::info!(
            session_id = %self.inner.session_id,
            code = info.code,
            reason = %info.reason,
            "Disconnected"
        );
        self.emit(SessionEvent::Disconnected {
            code: info.code,
            reason: info.reason,
        });

        if was_closing {
            self.publish(&shared);
            return;
        }

        let policy = self.inner.config.reconnect;
        if policy.should_retry(shared.attempts) {
            let delay = policy.delay_for(shared.attempts);
            shared.next_timer_id += 1;
            let id = shared.next_timer_id;
            let task = self.spawn_reconnect(id, delay);
            shared.cancel_reconnect();
            shared.reconnect = Some(PendingReconnect { id, task });
            tracing::info!(
                session_id = %self.inner.session_id,
                attempt = shared.attempts + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            self.emit(SessionEvent::ReconnectScheduled {
                attempt: shared.attempts + 1,
                delay,
            });
        } else {
            tracing::error!(
                session_id = %self.inner.session_id,
                attempts = shared.attempts,
                "Giving up on reconnecting"
            );
            shared.error = Some(RECONNECTS_EXHAUSTED.to_string());
            self.emit(SessionEvent::ReconnectsExhausted {
                attempts: shared.attempts,
            });
        }
        self.publish(&shared);
    }

    fn spawn_reconnect(&self, id: u64, delay: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Claiming the timer and entering `Connecting` share one critical
            // section, so a concurrent `stop` either cancels the timer or
            // discards the attempt.
            let generation = {
                let mut shared = this.inner.shared.lock();
                if shared.reconnect.as_ref().is_none_or(|p| p.id != id) {
                    return;
                }
                shared.reconnect = None;
                shared.attempts += 1;
                this.publish(&shared);
                this.begin_connect(&mut shared)
            };
            if let Some(generation) = generation {
                this.spawn_transport(generation);
            }
        })
    }

    /// A zero interval disables heartbeats.
    fn spawn_heartbeat(&self, generation: u64) -> Option<JoinHandle<()>> {
        let period = self.inner.config.heartbeat_interval();
        if period.is_zero() {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outbound = {
                    let shared = this.inner.shared.lock();
                    if shared.generation != generation || !shared.state.is_open() {
                        break;
                    }
                    shared.outbound.clone()
                };
                let Some(outbound) = outbound else { break };
                if outbound.send(OutboundMessage::Frame(heartbeat_frame())).is_err() {
                    break;
                }
                tracing::trace!(generation, "Heartbeat sent");
            }
        }))
    }

    fn publish(&self, shared: &Shared) {
        self.inner.status_tx.send_replace(shared.status());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events_tx.send(event);
    }
}
