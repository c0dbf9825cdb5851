use std::path::PathBuf;

use clap::Parser;

use crate::config::Configuration;

pub mod deploy;
pub mod init;
pub mod ledger;

#[derive(Parser, Debug, Clone)]
#[command(name = "fabric-deployer", about = "Provisions a channel and deploys chaincode")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Write an example configuration file.
    Init(init::InitCmd),
    /// Create and join the channel, then deploy the chaincode.
    Deploy(deploy::DeployCmd),
    /// Print a decoded block.
    Block(ledger::BlockCmd),
    /// Print chain height and hashes.
    Info(ledger::InfoCmd),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Init(cmd) => cmd.execute(),
            Subcommand::Deploy(cmd) => cmd.execute().await,
            Subcommand::Block(cmd) => cmd.execute().await,
            Subcommand::Info(cmd) => cmd.execute().await,
        }
    }
}

/// Loads `config_file`, or the file in the home directory when not given.
pub(crate) fn load_configuration(config_file: Option<&str>) -> anyhow::Result<Configuration> {
    let path = match config_file {
        Some(path) => PathBuf::from(path),
        None => Configuration::default_path()?,
    };
    match Configuration::try_load(&path) {
        Ok(config) => Ok(config),
        Err(err) => anyhow::bail!("Error loading configuration file {path:?}: {err}"),
    }
}
