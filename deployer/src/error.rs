use std::fmt::Display;

use thiserror::Error;

use crate::poller::PollError;

/// Orchestration stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OpenContext,
    Discovery,
    ChannelCheck,
    ChannelCreate,
    AnchorUpdate,
    ChannelJoin,
    ActiveCheck,
    Reset,
    Install,
    Instantiate,
    Upgrade,
    Ledger,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::OpenContext => "open context",
            Stage::Discovery => "peer discovery",
            Stage::ChannelCheck => "channel membership check",
            Stage::ChannelCreate => "channel creation",
            Stage::AnchorUpdate => "anchor peer update",
            Stage::ChannelJoin => "channel join",
            Stage::ActiveCheck => "active chaincode check",
            Stage::Reset => "chaincode reset",
            Stage::Install => "chaincode install",
            Stage::Instantiate => "chaincode instantiate",
            Stage::Upgrade => "chaincode upgrade",
            Stage::Ledger => "ledger query",
        };
        write!(f, "{name}")
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("DiscoveryIncomplete: org {org} expected {expected} peers: {reason}")]
    DiscoveryIncomplete {
        org: String,
        expected: usize,
        reason: String,
    },
    #[error("ConfigCommitTimeout: channel {channel_id}: {reason}")]
    ConfigCommitTimeout { channel_id: String, reason: String },
    #[error("InstallIncomplete: chaincode {chaincode} not installed on all peers of {org}: {reason}")]
    InstallIncomplete {
        chaincode: String,
        org: String,
        reason: String,
    },
    #[error("InstantiateTimeout: chaincode {chaincode} not active on channel {channel_id}: {reason}")]
    InstantiateTimeout {
        chaincode: String,
        channel_id: String,
        reason: String,
    },
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },
    #[error("Configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn stage<E: Into<anyhow::Error>>(stage: Stage, source: E) -> Self {
        Error::Stage {
            stage,
            source: source.into(),
        }
    }

    /// Maps a poller failure for `stage`. Exhaustion is turned into the
    /// stage-specific timeout by `on_exhausted`.
    pub(crate) fn from_poll<F>(stage: Stage, err: PollError, on_exhausted: F) -> Self
    where
        F: FnOnce(String) -> Error,
    {
        match err {
            PollError::Exhausted { attempts, reason } => {
                on_exhausted(format!("{reason} (after {attempts} attempts)"))
            }
            PollError::Fatal(source) => Error::Stage { stage, source },
            PollError::Cancelled { .. } => Error::Cancelled { stage },
        }
    }

    /// Maps a failed [crate::poller::Poller::call]. Running out of attempts
    /// on a plain call is a stage failure, not a convergence timeout.
    pub(crate) fn from_call(stage: Stage, err: PollError) -> Self {
        Self::from_poll(stage, err, |reason| Error::Stage {
            stage,
            source: anyhow::anyhow!(reason),
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
