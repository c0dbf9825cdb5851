use clap::Parser;

use crate::cli::load_configuration;
use crate::config::Configuration;
use crate::context::{ClientFactory, HttpClientFactory};
use crate::ledger::LedgerReader;
use crate::poller::Poller;

#[derive(Debug, Clone, Parser)]
pub struct BlockCmd {
    #[clap(long)]
    pub config_file: Option<String>,
    #[clap(long)]
    pub number: u64,
    /// One line per transaction instead of JSON.
    #[clap(long)]
    pub summary: bool,
}

impl BlockCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = load_configuration(self.config_file.as_deref())?;
        let block = reader(&config)?.block(self.number).await?;

        if self.summary {
            println!("block {} with {} transactions", block.number, block.transactions.len());
            for tx in &block.transactions {
                let time = tx.timestamp.to_rfc3339().unwrap_or_else(|| "-".to_string());
                println!("{} {time} {}", tx.tx_id, tx.chaincode_id);
            }
        } else {
            println!("{}", serde_json::to_string_pretty(&block)?);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
pub struct InfoCmd {
    #[clap(long)]
    pub config_file: Option<String>,
}

impl InfoCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = load_configuration(self.config_file.as_deref())?;
        let info = reader(&config)?.chain_info().await?;
        println!("{}", serde_json::to_string_pretty(&info)?);
        Ok(())
    }
}

/// Reads through the first configured org. No peer discovery needed.
fn reader(config: &Configuration) -> anyhow::Result<LedgerReader> {
    let org = match config.orgs.first() {
        Some(org) => org,
        None => anyhow::bail!("No organizations configured"),
    };
    let client = HttpClientFactory.client(org, config.channel.orderer_endpoint.as_deref())?;
    Ok(LedgerReader::new(
        client,
        &config.channel.id,
        &config.chaincode.name,
        Poller::from_config(&config.poll),
    ))
}
