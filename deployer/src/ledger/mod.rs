//! Read side of a deployed channel: chain info, decoded blocks and the
//! example chaincode's key/value state.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use log::{debug, info};
use serde::Serialize;

use crate::block::{BlockDecoder, DecodedBlock};
use crate::context::DeploymentContext;
use crate::error::{Error, Result, Stage};
use crate::network::LedgerClient;
use crate::poller::{Outcome, Poller};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub height: u64,
    /// Base64.
    pub current_block_hash: String,
    /// Base64.
    pub previous_block_hash: String,
}

pub struct LedgerReader {
    client: Arc<dyn LedgerClient>,
    channel_id: String,
    chaincode_id: String,
    decoder: BlockDecoder,
    poller: Poller,
}

impl LedgerReader {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        channel_id: &str,
        chaincode_id: &str,
        poller: Poller,
    ) -> Self {
        Self {
            client,
            channel_id: channel_id.to_string(),
            chaincode_id: chaincode_id.to_string(),
            decoder: BlockDecoder::new(chaincode_id),
            poller,
        }
    }

    /// Reader going through the first organization's client.
    pub fn from_context(ctx: &DeploymentContext, channel_id: &str, chaincode_id: &str) -> Self {
        Self::new(
            ctx.lead().client.clone(),
            channel_id,
            chaincode_id,
            ctx.poller().clone(),
        )
    }

    pub async fn chain_info(&self) -> Result<ChainInfo> {
        let info = self
            .poller
            .call("query info", || self.client.query_info(&self.channel_id))
            .await
            .map_err(|err| Error::from_call(Stage::Ledger, err))?;

        Ok(ChainInfo {
            height: info.height,
            current_block_hash: BASE64_STANDARD.encode(&info.current_block_hash),
            previous_block_hash: BASE64_STANDARD.encode(&info.previous_block_hash),
        })
    }

    pub async fn block(&self, number: u64) -> Result<DecodedBlock> {
        let raw = self
            .poller
            .call("query block", || {
                self.client.query_block(&self.channel_id, number)
            })
            .await
            .map_err(|err| Error::from_call(Stage::Ledger, err))?;
        debug!("Block {number} is {} bytes", raw.len());

        self.decoder
            .decode(&raw)
            .map_err(|err| Error::stage(Stage::Ledger, err))
    }

    /// Submits `set key value` to the chaincode. Returns the transaction id.
    pub async fn set_value(&self, key: &str, value: &[u8]) -> Result<String> {
        let args = vec![b"set".to_vec(), key.as_bytes().to_vec(), value.to_vec()];
        let response = self
            .poller
            .call("set value", || {
                self.client
                    .invoke_transaction(&self.channel_id, &self.chaincode_id, "invoke", &args)
            })
            .await
            .map_err(|err| Error::from_call(Stage::Ledger, err))?;
        info!("Set {key} in transaction {}", response.tx_id);
        Ok(response.tx_id)
    }

    /// Queries `key` until the chaincode returns a non-empty value. A freshly
    /// committed write may not be visible on the queried peer yet.
    pub async fn get_value(&self, key: &str) -> Result<Vec<u8>> {
        let args = vec![b"query".to_vec(), key.as_bytes().to_vec()];
        let args = &args;
        self.poller
            .invoke("get value", |_| async move {
                Outcome::from_service(
                    self.client
                        .query_chaincode(&self.channel_id, &self.chaincode_id, "invoke", args)
                        .await,
                    |value| {
                        if value.is_empty() {
                            Outcome::Retryable(format!("no value for key {key}"))
                        } else {
                            Outcome::Success(value)
                        }
                    },
                )
            })
            .await
            .map_err(|err| Error::from_call(Stage::Ledger, err))
    }
}
