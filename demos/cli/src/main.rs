//! Command-line client for a netdiag backend.
//!
//! Run with: cargo run -p netdiag-cli -- ping example.com -c 3
//!
//! Output lines are printed as they stream in.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use netdiag_core::config::DEFAULT_ENDPOINT;
use netdiag_core::{CommandRequest, SessionConfig};
use netdiag_executor::validation::validate_record_type;
use netdiag_executor::{CommandBuilder, CommandParams, DigParams, PingParams};
use netdiag_session::{HandlerSet, RECONNECTS_EXHAUSTED, Session, SessionEvent, SessionStatus};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "netdiag", about = "Run ping and dig on a netdiag backend")]
struct Cli {
    /// Backend WebSocket endpoint
    #[arg(long, env = "NETDIAG_URL", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Give up if the command has not finished after this many seconds
    #[arg(long, default_value_t = 120, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ping a host
    Ping {
        /// IPv4 address or domain name
        target: String,
        /// Number of echo requests
        #[arg(short, long, default_value_t = 4)]
        count: u32,
    },
    /// Query DNS records
    Dig {
        /// Domain to query
        domain: String,
        /// Record type (A, AAAA, MX, NS, TXT, CNAME, SOA, PTR)
        #[arg(short = 't', long = "type", default_value = "A")]
        record_type: String,
        /// Nameserver to ask instead of the system resolver
        #[arg(long)]
        nameserver: Option<String>,
        /// Print answers only
        #[arg(long)]
        short: bool,
        /// Trace delegation from the root servers
        #[arg(long)]
        trace: bool,
        /// Show the answer section
        #[arg(long)]
        answer: bool,
    },
}

impl Command {
    /// Build the wire request, validating the record type locally.
    fn into_request(self) -> anyhow::Result<CommandRequest> {
        Ok(match self {
            Self::Ping { target, count } => PingParams { target, count }.to_request(),
            Self::Dig {
                domain,
                record_type,
                nameserver,
                short,
                trace,
                answer,
            } => {
                let options = [("short", short), ("trace", trace), ("answer", answer)]
                    .into_iter()
                    .filter(|(_, on)| *on)
                    .map(|(name, _)| name.to_string())
                    .collect();
                DigParams {
                    domain,
                    record_type: validate_record_type(&record_type)?,
                    nameserver,
                    options,
                }
                .to_request()
            }
        })
    }
}

enum Finished {
    Complete,
    Failed,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let request = cli.command.into_request()?;
    let params = CommandParams::from_request(&request).context("invalid command")?;
    if let Ok(shown) = CommandBuilder::for_params(&params).build()?.display() {
        println!("{shown}");
    }

    let config = SessionConfig::builder().endpoint(cli.endpoint).build();
    let session = Session::websocket(config).context("invalid configuration")?;
    let mut events = Box::pin(session.event_stream());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SessionEvent::ReconnectScheduled { attempt, delay } => {
                    tracing::warn!(attempt, ?delay, "Connection lost, retrying");
                }
                other => tracing::debug!(?other, "Session event"),
            }
        }
    });

    session.start();
    wait_connected(&session).await?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let failed_tx = done_tx.clone();
    let handlers = HandlerSet::new(
        |line| println!("{line}"),
        move |e| {
            eprintln!("{e}");
            let _ = failed_tx.send(Finished::Failed);
        },
    )
    .on_complete(move || {
        let _ = done_tx.send(Finished::Complete);
    });
    session.send_message(&request, handlers);

    let mut ok = true;
    let deadline = Duration::from_secs(cli.timeout);
    let outcome = tokio::time::timeout(deadline, async {
        while let Some(finished) = done_rx.recv().await {
            match finished {
                Finished::Failed => ok = false,
                Finished::Complete => break,
            }
        }
    })
    .await;

    session.stop();
    if outcome.is_err() {
        bail!("command did not finish within {}s", cli.timeout);
    }
    Ok(ok)
}

/// Wait for the first open, or fail once reconnects are exhausted.
async fn wait_connected(session: &Session) -> anyhow::Result<()> {
    let mut status = session.status_watch();
    let status = status
        .wait_for(|s: &SessionStatus| {
            s.connected() || s.error.as_deref() == Some(RECONNECTS_EXHAUSTED)
        })
        .await
        .context("session closed")?
        .clone();
    if status.connected() {
        Ok(())
    } else {
        session.stop();
        bail!("could not connect: {}", status.error.unwrap_or_default())
    }
}
