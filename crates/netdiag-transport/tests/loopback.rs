//! WebSocket connector against the server endpoint over a loopback socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netdiag_core::traits::{
    CLOSE_NORMAL, CloseInfo, Connector, ExecutorError, FrameSink, OutboundMessage, TransportError,
    TransportEvent,
};
use netdiag_core::{CommandKind, CommandRequest, Executor, InboundFrame};
use netdiag_transport::WsConnector;
use netdiag_transport::protocol::{decode_inbound, encode_command, heartbeat_frame};
use netdiag_transport::rate_limit::{RateLimitConfig, RateLimiter, rate_limit};
use netdiag_transport::server::create_ws_router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Echoes the command name back as two output lines.
struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, request: &CommandRequest, sink: FrameSink) -> Result<(), ExecutorError> {
        if request.parameter("fail").is_some() {
            return Err(ExecutorError::InvalidRequest("asked to fail".to_string()));
        }
        let _ = sink.send(InboundFrame::output(format!("{} line 1", request.command)));
        let _ = sink.send(InboundFrame::output(format!("{} line 2", request.command)));
        Ok(())
    }
}

async fn boot_server() -> String {
    let app = create_ws_router(Arc::new(EchoExecutor));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn boot_rate_limited_server() -> SocketAddr {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    let app = create_ws_router(Arc::new(EchoExecutor))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Plain HTTP GET returning the raw response.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

async fn next_frame(events: &mut tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) -> InboundFrame {
    match timeout(TIMEOUT, events.recv()).await.unwrap() {
        Some(TransportEvent::Message(text)) => decode_inbound(&text).unwrap(),
        Some(other) => panic!("unexpected event: {other:?}"),
        None => panic!("transport ended"),
    }
}

#[tokio::test]
async fn test_command_streams_output_then_done() {
    let url = boot_server().await;
    let mut link = WsConnector::default().connect(&url).await.unwrap();

    // Heartbeats are accepted silently.
    link.outbound
        .send(OutboundMessage::Frame(heartbeat_frame()))
        .unwrap();

    let request = CommandRequest::new(CommandKind::Ping);
    link.outbound
        .send(OutboundMessage::Frame(encode_command(&request).unwrap()))
        .unwrap();

    assert_eq!(next_frame(&mut link.events).await, InboundFrame::output("ping line 1"));
    assert_eq!(next_frame(&mut link.events).await, InboundFrame::output("ping line 2"));
    assert_eq!(next_frame(&mut link.events).await, InboundFrame::done());
}

#[tokio::test]
async fn test_executor_failure_sends_single_error_then_done() {
    let url = boot_server().await;
    let mut link = WsConnector::default().connect(&url).await.unwrap();

    let request = CommandRequest::new(CommandKind::Dig).set_parameter("fail", true);
    link.outbound
        .send(OutboundMessage::Frame(encode_command(&request).unwrap()))
        .unwrap();

    let frame = next_frame(&mut link.events).await;
    assert_eq!(frame.error_message(), Some("Invalid request: asked to fail"));
    assert_eq!(next_frame(&mut link.events).await, InboundFrame::done());
}

#[tokio::test]
async fn test_malformed_client_frame_gets_error() {
    let url = boot_server().await;
    let mut link = WsConnector::default().connect(&url).await.unwrap();

    link.outbound
        .send(OutboundMessage::Frame("not json".to_string()))
        .unwrap();

    let frame = next_frame(&mut link.events).await;
    assert_eq!(frame.error_message(), Some("invalid request"));
}

#[tokio::test]
async fn test_client_close_reports_normal_close() {
    let url = boot_server().await;
    let mut link = WsConnector::default().connect(&url).await.unwrap();

    link.outbound
        .send(OutboundMessage::Close(CloseInfo::new(CLOSE_NORMAL, "done")))
        .unwrap();

    let event = timeout(TIMEOUT, link.events.recv()).await.unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::Closed(CloseInfo::new(CLOSE_NORMAL, "done")))
    );
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WsConnector::default().connect(&format!("ws://{addr}/ws")).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
}

#[tokio::test]
async fn test_second_request_in_window_is_throttled() {
    let addr = boot_rate_limited_server().await;

    let first = WsConnector::default()
        .connect(&format!("ws://{addr}/ws"))
        .await;
    assert!(first.is_ok());

    let second = http_get(addr, "/ws").await;
    assert!(second.starts_with("HTTP/1.1 429"), "{second}");
    assert!(second.to_ascii_lowercase().contains("retry-after:"), "{second}");
    assert!(second.ends_with(r#"{"error":"too many requests"}"#), "{second}");

    let third = WsConnector::default()
        .connect(&format!("ws://{addr}/ws"))
        .await;
    let Err(TransportError::ConnectFailed(message)) = third else {
        panic!("expected the handshake to be refused");
    };
    assert!(message.contains("429"), "{message}");
}
