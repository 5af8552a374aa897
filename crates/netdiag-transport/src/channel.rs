//! In-process transport over channels.
//!
//! `ChannelConnector` hands the far end of every transport it opens to a
//! `ChannelPeer`, which plays the backend: it sees what the client sent and
//! injects frames, errors and closes. Useful for tests and for embedding a
//! backend in the same process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use netdiag_core::InboundFrame;
use netdiag_core::traits::{
    CloseInfo, Connector, OutboundMessage, TransportError, TransportEvent, TransportLink,
};
use tokio::sync::mpsc;

use crate::protocol::encode_inbound;

/// Connector producing in-process transports.
#[derive(Debug)]
pub struct ChannelConnector {
    peer_tx: mpsc::UnboundedSender<ChannelPeer>,
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    /// Create a connector.
    ///
    /// Returns the connector and a receiver yielding one peer per opened
    /// transport.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peer_tx,
            refusing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, peer_rx)
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connect calls made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, _endpoint: &str) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (received_tx, received) = mpsc::unbounded_channel();

        // Echo caller-initiated closes back as a close event, like a server
        // answering the close handshake.
        let close_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let OutboundMessage::Close(info) = &msg {
                    let _ = close_tx.send(TransportEvent::Closed(info.clone()));
                }
                if received_tx.send(msg).is_err() {
                    break;
                }
            }
        });

        let peer = ChannelPeer {
            received,
            events: events_tx,
        };
        self.peer_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("no listener".to_string()))?;

        Ok(TransportLink { outbound, events })
    }
}

/// Backend side of an in-process transport.
#[derive(Debug)]
pub struct ChannelPeer {
    received: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelPeer {
    /// Receive the next message written by the client.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.received.recv().await
    }

    /// Receive the next text frame written by the client, skipping closes.
    pub async fn recv_frame(&mut self) -> Option<String> {
        while let Some(msg) = self.received.recv().await {
            if let OutboundMessage::Frame(text) = msg {
                return Some(text);
            }
        }
        None
    }

    /// Deliver raw text to the client.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Message(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Deliver an encoded response frame to the client.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn send_frame(&self, frame: &InboundFrame) -> Result<(), TransportError> {
        let text = encode_inbound(frame).map_err(|_| TransportError::Closed)?;
        self.send_text(text)
    }

    /// Raise a transport error without closing.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn send_error(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Error(message.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Close from the server side with the given code.
    ///
    /// The peer stays usable for reading what the client wrote before the
    /// close.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self
            .events
            .send(TransportEvent::Closed(CloseInfo::new(code, reason)));
    }

    /// Simulate a network failure: an error followed by an abnormal close.
    pub fn drop_connection(&self) {
        let _ = self
            .events
            .send(TransportEvent::Error("connection reset".to_string()));
        let _ = self
            .events
            .send(TransportEvent::Closed(CloseInfo::abnormal("connection reset")));
    }
}

#[cfg(test)]
mod tests {
    use netdiag_core::traits::CLOSE_NORMAL;
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut peers) = ChannelConnector::new();
        let mut link = connector.connect("ws://test/ws").await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        link.outbound
            .send(OutboundMessage::Frame("hello".to_string()))
            .unwrap();
        assert_eq!(peer.recv_frame().await.as_deref(), Some("hello"));

        assert_ok!(peer.send_frame(&InboundFrame::output("pong")));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(r#"{"output":"pong"}"#.to_string()))
        );
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_client_close_is_echoed() {
        let (connector, _peers) = ChannelConnector::new();
        let mut link = connector.connect("ws://test/ws").await.unwrap();

        link.outbound
            .send(OutboundMessage::Close(CloseInfo::new(CLOSE_NORMAL, "bye")))
            .unwrap();
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Closed(CloseInfo::new(CLOSE_NORMAL, "bye")))
        );
    }

    #[tokio::test]
    async fn test_refusing_connector_fails() {
        let (connector, _peers) = ChannelConnector::new();
        connector.set_refusing(true);
        let result = connector.connect("ws://test/ws").await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert_eq!(connector.attempts(), 1);
    }
}
