use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//poll settings
pub const DEFAULT_POLL_DELAY_MS: u64 = 500;
pub const DEFAULT_POLL_ATTEMPTS: usize = 10;

//example chaincode arguments
pub const DEFAULT_INIT_ARGS: [&str; 5] = ["init", "a", "100", "b", "200"];
pub const DEFAULT_RESET_ARGS: [&str; 4] = ["a", "100", "b", "200"];
pub const DEFAULT_UPGRADE_ARGS: [&str; 5] = ["init", "a", "100", "b", "400"];

const CONFIG_DIR: &str = ".fabric-deployer";
const CONFIG_FILE: &str = "deployer.toml";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("ConfigDoesNotExist: '{0}'")]
    DoesNotExist(String),
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    #[serde(default)]
    pub poll: PollConfiguration,
    pub channel: ChannelConfiguration,
    pub orgs: Vec<OrgConfiguration>,
    pub chaincode: ChaincodeConfiguration,
}

/// Shared by every convergence check.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollConfiguration {
    /// Fixed delay between two attempts.
    pub delay_ms: u64,
    /// Maximum number of attempts, including the first one.
    pub attempts: usize,
}

impl Default for PollConfiguration {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_POLL_DELAY_MS,
            attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelConfiguration {
    pub id: String,
    /// Channel creation transaction (`<channel>.tx`).
    pub config_tx: String,
    #[serde(default)]
    pub orderer_endpoint: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrgConfiguration {
    pub name: String,
    pub msp_id: String,
    /// Admin identity used to sign configuration updates.
    pub admin: String,
    /// Ledger gateway serving this organization.
    pub gateway_url: String,
    pub expected_peers: usize,
    /// Anchor peer update transaction for this org.
    #[serde(default)]
    pub anchor_config_tx: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChaincodeConfiguration {
    pub name: String,
    pub version: String,
    pub path: String,
    /// Packaged chaincode. Empty package when not set.
    #[serde(default)]
    pub package: Option<String>,
    /// Endorsement policy. Defaults to membership of the first org.
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default = "default_init_args")]
    pub init_args: Vec<String>,
    #[serde(default = "default_reset_args")]
    pub reset_args: Vec<String>,
    #[serde(default = "default_upgrade_args")]
    pub upgrade_args: Vec<String>,
}

fn to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

fn default_init_args() -> Vec<String> {
    to_strings(&DEFAULT_INIT_ARGS)
}

fn default_reset_args() -> Vec<String> {
    to_strings(&DEFAULT_RESET_ARGS)
}

fn default_upgrade_args() -> Vec<String> {
    to_strings(&DEFAULT_UPGRADE_ARGS)
}

impl Configuration {
    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Configuration> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigurationError::DoesNotExist(
                path.to_string_lossy().to_string(),
            ));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        config.try_deserialize().map_err(|err| err.into())
    }

    pub fn try_load_from_home_dir() -> Result<Configuration> {
        Self::try_load(Self::default_path()?)
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<()> {
        let config = toml::to_string(&self)?;

        let config = format!(
            "#This file is generated by cli and automatically overwritten every time when cli is run\n{config}",
        );

        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;

        Ok(())
    }

    pub fn root_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR))
            .ok_or_else(|| ConfigurationError::DoesNotExist("home directory".to_string()))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::root_dir()?.join(CONFIG_FILE))
    }

    /// Two-org sample matching the fabric example network.
    pub fn example() -> Self {
        let org = |n: usize| OrgConfiguration {
            name: format!("Org{n}"),
            msp_id: format!("Org{n}MSP"),
            admin: "Admin".to_string(),
            gateway_url: format!("http://127.0.0.1:{}", 7080 + n),
            expected_peers: 2,
            anchor_config_tx: Some(format!("fixtures/channel/orgchannelOrg{n}MSPanchors.tx")),
        };
        Configuration {
            poll: PollConfiguration::default(),
            channel: ChannelConfiguration {
                id: "orgchannel".to_string(),
                config_tx: "fixtures/channel/orgchannel.tx".to_string(),
                orderer_endpoint: Some("orderer.example.com".to_string()),
            },
            orgs: vec![org(1), org(2)],
            chaincode: ChaincodeConfiguration {
                name: "ExampleCC".to_string(),
                version: "1".to_string(),
                path: "chaincode".to_string(),
                package: None,
                policy: None,
                init_args: default_init_args(),
                reset_args: default_reset_args(),
                upgrade_args: default_upgrade_args(),
            },
        }
    }
}
