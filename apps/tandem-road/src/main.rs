use anyhow::Result;
use clap::Parser;
use tracing::info;

use tandem_road::cli::Cli;
use tandem_road::config::ServerConfig;
use tandem_road::server;
use tandem_road::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        default_name = %config.lobby.default_name,
        max_name_len = config.lobby.max_name_len,
        "starting tandem-road"
    );

    server::run(config, telemetry.metrics_handle()).await
}
