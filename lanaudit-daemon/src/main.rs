use anyhow::Result;
use clap::Parser;

use lanaudit_daemon::cli::DaemonCli;
use lanaudit_daemon::logging::init_tracing;
use lanaudit_daemon::orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let config = cli.into_config();

    init_tracing(&config.general.log_environment)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lanaudit starting");

    orchestrator::run(config).await
}
