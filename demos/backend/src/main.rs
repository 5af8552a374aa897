//! Reference backend: runs `ping` and `dig` for WebSocket clients.
//!
//! Run with: cargo run -p netdiag-backend -- --addr 127.0.0.1:8080
//!
//! Clients connect to `ws://<addr>/ws`. Each client IP may open ten
//! connections a minute unless `--rate-limit` says otherwise.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use netdiag_executor::ProcessExecutor;
use netdiag_transport::rate_limit::{RateLimitConfig, RateLimiter, rate_limit};
use netdiag_transport::server::create_ws_router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "netdiag-backend", about = "Run ping and dig for WebSocket clients")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "NETDIAG_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Prefix every command with this wrapper, e.g. "timeout 60"
    #[arg(long, env = "NETDIAG_WRAPPER")]
    wrapper: Option<String>,

    /// Requests allowed per client IP per minute; 0 disables the limit
    #[arg(long, env = "NETDIAG_RATE_LIMIT", default_value_t = 10)]
    rate_limit: u32,

    /// Timeout for the HTTP request that opens a WebSocket, in seconds
    #[arg(long, env = "NETDIAG_REQUEST_TIMEOUT", default_value_t = 10)]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    let executor = args
        .wrapper
        .map_or_else(ProcessExecutor::new, ProcessExecutor::with_wrapper);

    let limits = RateLimitConfig {
        enabled: args.rate_limit > 0,
        max_requests: args.rate_limit,
        ..RateLimitConfig::default()
    };
    let limiter = Arc::new(RateLimiter::new(limits));
    let cleanup = Arc::clone(&limiter);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limits.window());
        loop {
            ticker.tick().await;
            cleanup.cleanup();
        }
    });

    let app = create_ws_router(Arc::new(executor))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
        .layer(TimeoutLayer::new(Duration::from_secs(args.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    tracing::info!("Backend listening on ws://{}/ws", args.addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}
