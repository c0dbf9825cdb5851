//! Operations the deployer consumes from the ledger network.
//!
//! The network is a black box. Every call goes through a per-organization
//! [LedgerClient] handle; the concrete transport lives behind the trait.

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod discovery;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Node or network temporarily not ready. Safe to retry.
    #[error("TransientServiceError: {0}")]
    Transient(String),
    #[error("PermanentServiceError: {0}")]
    Permanent(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// A ledger node (peer) reachable from an organization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Peer {
    /// Node name as known to the network, e.g. `peer0.org1.example.com`.
    pub name: String,
    /// Endpoint URL of the node.
    pub url: String,
    pub msp_id: String,
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) at {}", self.name, self.msp_id, self.url)
    }
}

/// Opaque handle to a signing identity held by the network gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningIdentity {
    pub msp_id: String,
    pub name: String,
}

impl Display for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.msp_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChaincodeInfo {
    pub name: String,
    pub version: String,
}

impl ChaincodeInfo {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name == name && self.version == version
    }
}

impl Display for ChaincodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// A serialized channel configuration transaction (`*.tx` artifact).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfigTx {
    pub channel_id: String,
    pub envelope: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallRequest {
    pub name: String,
    pub version: String,
    pub path: String,
    pub package: Vec<u8>,
}

/// Instantiate or upgrade request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivateRequest {
    pub name: String,
    pub version: String,
    pub path: String,
    pub policy: String,
    pub args: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub tx_id: String,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LedgerInfo {
    pub height: u64,
    pub current_block_hash: Vec<u8>,
    pub previous_block_hash: Vec<u8>,
}

/// Administrative and transactional access to the network for one
/// organization.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Nodes visible from this organization's local discovery service.
    async fn local_peers(&self) -> Result<Vec<Peer>>;

    /// Submits a channel configuration update to the ordering service.
    async fn submit_channel_config(
        &self,
        update: &ChannelConfigTx,
        signers: &[SigningIdentity],
    ) -> Result<()>;

    /// Block number of the latest configuration block of `channel_id`.
    async fn query_channel_config(&self, channel_id: &str) -> Result<u64>;

    async fn query_joined_channels(&self, peer: &Peer) -> Result<Vec<String>>;

    async fn join_channel(&self, channel_id: &str, peers: &[Peer]) -> Result<()>;

    async fn install_chaincode(&self, request: &InstallRequest, peers: &[Peer]) -> Result<()>;

    async fn query_installed_chaincodes(&self, peer: &Peer) -> Result<Vec<ChaincodeInfo>>;

    async fn activate_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()>;

    async fn upgrade_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()>;

    async fn query_active_chaincodes(&self, channel_id: &str) -> Result<Vec<ChaincodeInfo>>;

    async fn invoke_transaction(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<TransactionResponse>;

    /// Evaluates a chaincode function without submitting a transaction.
    async fn query_chaincode(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>>;

    /// Raw serialized block.
    async fn query_block(&self, channel_id: &str, number: u64) -> Result<Vec<u8>>;

    async fn query_info(&self, channel_id: &str) -> Result<LedgerInfo>;
}
