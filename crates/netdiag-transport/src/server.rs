//! Server-side WebSocket endpoint running commands through an `Executor`.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use netdiag_core::{CommandRequest, Executor, InboundFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::protocol::{ClientFrame, encode_inbound};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Executor running the commands.
    pub executor: Arc<dyn Executor>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, "Client connected");

    // Channel for sending frames to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundFrame>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match encode_inbound(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // One command at a time per connection; a new command supersedes the old.
    let mut running: Option<JoinHandle<()>> = None;

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%connection_id, "WebSocket error: {e}");
                break;
            }
        };

        match ClientFrame::decode(&text) {
            Ok(ClientFrame::Heartbeat(_)) => {
                tracing::trace!(%connection_id, "Heartbeat");
            }
            Ok(ClientFrame::Command(request)) => {
                if let Some(task) = running.take() {
                    task.abort();
                }
                running = Some(spawn_command(
                    Arc::clone(&state.executor),
                    request,
                    tx.clone(),
                    connection_id,
                ));
            }
            Err(e) => {
                tracing::warn!(%connection_id, "Invalid client frame: {e}");
                let _ = tx.send(InboundFrame::error("invalid request"));
            }
        }
    }

    if let Some(task) = running.take() {
        task.abort();
    }
    send_task.abort();
    tracing::info!(%connection_id, "Client disconnected");
}

fn spawn_command(
    executor: Arc<dyn Executor>,
    request: CommandRequest,
    tx: mpsc::UnboundedSender<InboundFrame>,
    connection_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(%connection_id, kind = %request.kind, "Running command");
        if let Err(e) = executor.execute(&request, tx.clone()).await {
            tracing::warn!(%connection_id, "Command failed: {e}");
            let _ = tx.send(InboundFrame::error(e.to_string()));
        }
        let _ = tx.send(InboundFrame::done());
    })
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(Arc::new(ProcessExecutor::new())));
/// ```
#[must_use]
pub fn create_ws_router(executor: Arc<dyn Executor>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState::new(executor))
}
