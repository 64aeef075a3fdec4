use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use stopwatch_client::{
    ClientConfig, ClientError, ConnectionState, RenderSurface, SyncClient, WebSocketConnector,
};
use stopwatch_core::SystemClock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "stopwatch-viewer",
    author,
    version,
    about = "Terminal viewer for the shared stopwatch"
)]
struct Cli {
    /// Timekeeper WebSocket endpoint.
    #[arg(long, env = "STOPWATCH_URL", default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Delay between reconnect attempts, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    backoff_ms: u64,

    /// Consecutive failed reconnects tolerated before giving up.
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    #[arg(long)]
    no_heartbeat: bool,

    /// Wait for the timekeeper before showing the timer as running.
    #[arg(long)]
    no_optimistic: bool,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_backoff(Duration::from_millis(self.backoff_ms))
            .with_max_retries(self.max_retries)
            .with_optimistic_start(!self.no_optimistic);
        if self.no_heartbeat {
            config = config.with_heartbeat(None);
        }
        config
    }
}

/// Redraws the time in place on stdout; connection changes go to stderr.
struct TerminalSurface;

impl RenderSurface for TerminalSurface {
    fn render(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r{text}");
        let _ = stdout.flush();
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        let label = match state {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "connected",
            ConnectionState::Disconnected => "disconnected, retrying",
            ConnectionState::PermanentlyFailed => "unable to reach timekeeper, giving up",
        };
        eprintln!("\n[{label}]");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    info!(url = %cli.url, "starting stopwatch-viewer");

    let client = SyncClient::spawn(
        cli.client_config(),
        Arc::new(WebSocketConnector::new(cli.url.clone())),
        Arc::new(SystemClock),
        TerminalSurface,
    )
    .context("invalid client configuration")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let running = client.mirror().is_running();
        let sent = match line.trim() {
            "start" if !running => client.start(),
            "stop" if running => client.stop(),
            "reset" => client.reset(),
            "quit" | "exit" => break,
            "start" | "stop" => {
                debug!(intent = line.trim(), "ignored; timer already in that state");
                Ok(())
            }
            "" => Ok(()),
            other => {
                eprintln!("unknown command {other:?}; try start, stop, reset or quit");
                Ok(())
            }
        };
        match sent {
            Err(ClientError::PermanentlyFailed) => {
                eprintln!("\n[not connected; command dropped]");
            }
            other => other?,
        }
    }

    client.shutdown().await;
    println!();
    Ok(())
}
