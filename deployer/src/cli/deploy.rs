use clap::Parser;
use log::{debug, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::chaincode::{self, Chaincode, DeployOutcome};
use crate::channel::{self, ProvisionOutcome};
use crate::cli::load_configuration;
use crate::context::{read_config_tx, DeploymentContext, HttpClientFactory};
use crate::logging::pretty_json;
use crate::poller::Poller;

#[derive(Debug, Clone, Parser)]
pub struct DeployCmd {
    /// Defaults to `~/.fabric-deployer/deployer.toml`.
    #[clap(long)]
    pub config_file: Option<String>,
    /// After deploying, upgrade the chaincode to this version.
    #[clap(long)]
    pub upgrade_version: Option<String>,
}

impl DeployCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let config = load_configuration(self.config_file.as_deref())?;
        debug!("Configuration: {}", pretty_json(&config));

        let channel_tx = read_config_tx(&config.channel.id, &config.channel.config_tx)?;
        let mut chaincode = Chaincode::from_config(&config.chaincode)?;

        let poller = Poller::from_config(&config.poll);
        cancel_on_shutdown(poller.cancellation().clone());

        let ctx = DeploymentContext::open(&config, &HttpClientFactory, poller).await?;

        let result = async {
            let signers = ctx.signers();
            match channel::provision_channel(&ctx, &channel_tx, &signers).await? {
                ProvisionOutcome::AlreadyJoined => info!("Channel {} already set up", config.channel.id),
                ProvisionOutcome::Created { config_block } => {
                    info!("Channel {} created, config block {config_block}", config.channel.id)
                }
            }

            match chaincode::deploy(&ctx, &config.channel.id, &chaincode).await? {
                DeployOutcome::Reset { tx_id } => {
                    info!("Chaincode {} reset in {tx_id}", chaincode.id())
                }
                DeployOutcome::Instantiated => info!("Chaincode {} instantiated", chaincode.id()),
            }

            if let Some(version) = &self.upgrade_version {
                chaincode.version = version.clone();
                chaincode::upgrade(&ctx, &config.channel.id, &chaincode).await?;
            }
            Ok::<(), crate::error::Error>(())
        }
        .await;

        ctx.close();
        result?;
        Ok(())
    }
}

/// Cancels `token` on SIGINT or SIGTERM. Any poll in progress stops at its
/// next wait.
fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        let mut stream_int = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGINT handler: {err}");
                return;
            }
        };
        let mut stream_term = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                return;
            }
        };
        tokio::select! {
            _ = stream_int.recv() => {
                info!("Received SIGINT, cancelling deployment");
                token.cancel();
            }
            _ = stream_term.recv() => {
                info!("Received SIGTERM, cancelling deployment");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}
