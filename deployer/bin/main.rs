use clap::Parser;

use fabric_deployer::cli::Cli;
use fabric_deployer::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    Cli::parse().execute().await?;
    Ok(())
}
