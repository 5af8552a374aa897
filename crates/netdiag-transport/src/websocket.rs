//! WebSocket client transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use netdiag_core::traits::{
    CLOSE_NORMAL, CloseInfo, Connector, OutboundMessage, TransportError, TransportEvent,
    TransportLink,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer closes without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// How long to wait for the server's close reply.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens WebSocket transports with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector with the given handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[allow(clippy::cast_possible_truncation)]
    async fn connect(&self, endpoint: &str) -> Result<TransportLink, TransportError> {
        let (ws, _) = timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(ws, outbound_rx, events_tx));

        debug!(endpoint, "WebSocket transport open");
        Ok(TransportLink { outbound, events })
    }
}

async fn run_socket(
    ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    let close = loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(OutboundMessage::Frame(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!(error = %e, "Failed to send frame");
                        let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        break CloseInfo::abnormal(e.to_string());
                    }
                }
                Some(OutboundMessage::Close(info)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(info.code),
                        reason: info.reason.clone().into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_ok() {
                        // Wait for the close reply so the server sees a clean handshake.
                        let _ = timeout(CLOSE_GRACE, async {
                            while let Some(Ok(msg)) = stream.next().await {
                                if msg.is_close() {
                                    break;
                                }
                            }
                        })
                        .await;
                    }
                    break info;
                }
                None => {
                    let _ = sink.close().await;
                    break CloseInfo::new(CLOSE_NORMAL, "transport dropped");
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events_tx.send(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        let _ = events_tx.send(TransportEvent::Message(text));
                    }
                    Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || CloseInfo::new(CLOSE_NO_STATUS, ""),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.as_str()),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                    break CloseInfo::abnormal(e.to_string());
                }
                None => break CloseInfo::abnormal("connection closed"),
            },
        }
    };

    debug!(code = close.code, reason = %close.reason, "WebSocket transport closed");
    let _ = events_tx.send(TransportEvent::Closed(close));
}
