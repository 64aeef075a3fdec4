use anyhow::Result;
use clap::Parser;
use stopwatch_server::{
    config::{Cli, ServerConfig},
    telemetry::Telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "starting stopwatch-server"
    );

    stopwatch_server::run(config, telemetry.metrics_handle()).await
}
