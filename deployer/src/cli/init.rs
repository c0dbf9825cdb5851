use std::path::PathBuf;

use clap::Parser;

use crate::config::Configuration;

#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    /// Defaults to `~/.fabric-deployer/deployer.toml`.
    #[clap(long)]
    pub config_file: Option<String>,
    /// Overwrite an existing file.
    #[clap(long)]
    pub force: bool,
}

impl InitCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        let path = match &self.config_file {
            Some(path) => PathBuf::from(path),
            None => Configuration::default_path()?,
        };
        if path.exists() && !self.force {
            anyhow::bail!("Configuration file already exists: {path:?}");
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        println!("Creating deployer configuration in: {path:?}");
        Configuration::example().try_write(&path)?;
        Ok(())
    }
}
