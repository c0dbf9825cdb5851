//! # Ledger block decoder
//!
//! Turns a committed block into the list of transactions it carries. Every
//! envelope is unwrapped down to its channel header, which decides how the
//! payload data is read:
//!
//! * `MESSAGE`, `ORDERER_TRANSACTION`, `DELIVER_SEEK_INFO`: skipped.
//! * `CONFIG`, `CONFIG_UPDATE`: parsed, nothing emitted.
//! * `ENDORSER_TRANSACTION`: one [TransactionRecord] per action.
//!
//! Any other header type fails the whole block. No partial result is returned.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use log::trace;
use prost::Message;
use serde::{Serialize, Serializer};
use thiserror::Error;

use self::proto::HeaderType;

pub mod proto;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Block: {0}")]
    Block(#[source] prost::DecodeError),
    #[error("MissingBlockHeader")]
    MissingBlockHeader,
    #[error("Envelope {index}: {source}")]
    Envelope {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("Payload {index}: {source}")]
    Payload {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("MissingHeader: envelope {index} has no payload header")]
    MissingHeader { index: usize },
    #[error("ChannelHeader {index}: {source}")]
    ChannelHeader {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("ChaincodeHeaderExtension {index}: {source}")]
    Extension {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("SignatureHeader {index}: {source}")]
    SignatureHeader {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("Transaction {index}: {source}")]
    Transaction {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("ConfigEnvelope {index}: {source}")]
    Config {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("ConfigUpdateEnvelope {index}: {source}")]
    ConfigUpdate {
        index: usize,
        source: prost::DecodeError,
    },
    #[error("UnknownBlockRecordType: envelope {index} has header type {header_type}")]
    UnknownBlockRecordType { index: usize, header_type: i32 },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecordTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl RecordTimestamp {
    pub fn to_rfc3339(&self) -> Option<String> {
        let nanos = u32::try_from(self.nanos).ok()?;
        Utc.timestamp_opt(self.seconds, nanos)
            .single()
            .map(|time| time.to_rfc3339())
    }
}

impl From<prost_types::Timestamp> for RecordTimestamp {
    fn from(timestamp: prost_types::Timestamp) -> Self {
        Self {
            seconds: timestamp.seconds,
            nanos: timestamp.nanos,
        }
    }
}

/// One endorser transaction action. Actions of the same envelope share
/// everything except `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub header_type: i32,
    #[serde(rename = "chaincodeID")]
    pub chaincode_id: String,
    #[serde(serialize_with = "as_base64")]
    pub payload: Vec<u8>,
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub timestamp: RecordTimestamp,
    #[serde(rename = "cert", serialize_with = "as_base64")]
    pub creator_cert: Vec<u8>,
    #[serde(serialize_with = "as_base64")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedBlock {
    pub number: u64,
    /// Block data hash.
    #[serde(serialize_with = "as_base64")]
    pub state_hash: Vec<u8>,
    #[serde(serialize_with = "as_base64")]
    pub previous_block_hash: Vec<u8>,
    pub transactions: Vec<TransactionRecord>,
}

/// Decodes blocks of one channel. `default_chaincode_id` is reported for
/// transactions whose header does not name a chaincode.
#[derive(Debug, Clone)]
pub struct BlockDecoder {
    default_chaincode_id: String,
}

impl BlockDecoder {
    pub fn new<S: Into<String>>(default_chaincode_id: S) -> Self {
        Self {
            default_chaincode_id: default_chaincode_id.into(),
        }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<DecodedBlock> {
        let block = proto::Block::decode(raw).map_err(DecodeError::Block)?;
        let header = block.header.ok_or(DecodeError::MissingBlockHeader)?;
        let envelopes = block.data.map(|data| data.data).unwrap_or_default();

        let mut transactions = vec![];
        for (index, envelope) in envelopes.iter().enumerate() {
            self.decode_envelope(index, envelope, &mut transactions)?;
        }
        trace!(
            "Decoded block {} with {} transactions",
            header.number,
            transactions.len()
        );

        Ok(DecodedBlock {
            number: header.number,
            state_hash: header.data_hash,
            previous_block_hash: header.previous_hash,
            transactions,
        })
    }

    fn decode_envelope(
        &self,
        index: usize,
        raw: &[u8],
        transactions: &mut Vec<TransactionRecord>,
    ) -> Result<()> {
        let envelope = proto::Envelope::decode(raw)
            .map_err(|source| DecodeError::Envelope { index, source })?;
        let payload = proto::Payload::decode(envelope.payload.as_slice())
            .map_err(|source| DecodeError::Payload { index, source })?;
        let header = payload
            .header
            .ok_or(DecodeError::MissingHeader { index })?;
        let channel_header = proto::ChannelHeader::decode(header.channel_header.as_slice())
            .map_err(|source| DecodeError::ChannelHeader { index, source })?;

        match HeaderType::from(channel_header.r#type) {
            HeaderType::Message | HeaderType::OrdererTransaction | HeaderType::DeliverSeekInfo => {}
            HeaderType::Config => {
                proto::ConfigEnvelope::decode(payload.data.as_slice())
                    .map_err(|source| DecodeError::Config { index, source })?;
            }
            HeaderType::ConfigUpdate => {
                proto::ConfigUpdateEnvelope::decode(payload.data.as_slice())
                    .map_err(|source| DecodeError::ConfigUpdate { index, source })?;
            }
            HeaderType::EndorserTransaction => {
                let signature_header =
                    proto::SignatureHeader::decode(header.signature_header.as_slice())
                        .map_err(|source| DecodeError::SignatureHeader { index, source })?;
                let transaction = proto::Transaction::decode(payload.data.as_slice())
                    .map_err(|source| DecodeError::Transaction { index, source })?;
                let chaincode_id = self.chaincode_id(index, &channel_header.extension)?;
                let timestamp = channel_header
                    .timestamp
                    .map(RecordTimestamp::from)
                    .unwrap_or_default();

                transactions.extend(transaction.actions.into_iter().map(|action| {
                    TransactionRecord {
                        header_type: channel_header.r#type,
                        chaincode_id: chaincode_id.clone(),
                        payload: action.payload,
                        tx_id: channel_header.tx_id.clone(),
                        timestamp,
                        creator_cert: signature_header.creator.clone(),
                        signature: envelope.signature.clone(),
                    }
                }));
            }
            HeaderType::Unknown(header_type) => {
                return Err(DecodeError::UnknownBlockRecordType { index, header_type });
            }
        }
        Ok(())
    }

    fn chaincode_id(&self, index: usize, extension: &[u8]) -> Result<String> {
        if extension.is_empty() {
            return Ok(self.default_chaincode_id.clone());
        }
        let extension = proto::ChaincodeHeaderExtension::decode(extension)
            .map_err(|source| DecodeError::Extension { index, source })?;
        Ok(extension
            .chaincode_id
            .map(|id| id.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.default_chaincode_id.clone()))
    }
}

/// Shorthand for [BlockDecoder::decode].
pub fn decode_block(raw: &[u8], default_chaincode_id: &str) -> Result<DecodedBlock> {
    BlockDecoder::new(default_chaincode_id).decode(raw)
}
