//! [LedgerClient] over a JSON/HTTP ledger gateway.
//!
//! Binary fields (config envelopes, packages, arguments, payloads) travel as
//! standard base64 strings. Raw blocks are returned as `application/octet-stream`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use log::trace;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::network::{
    ActivateRequest, ChaincodeInfo, ChannelConfigTx, InstallRequest, LedgerClient, LedgerInfo,
    Peer, Result, ServiceError, SigningIdentity, TransactionResponse,
};

#[derive(Serialize)]
struct SaveChannelBody<'a> {
    channel_id: &'a str,
    envelope: String,
    signers: &'a [SigningIdentity],
    orderer_endpoint: Option<&'a str>,
}

#[derive(Serialize)]
struct JoinChannelBody<'a> {
    peers: &'a [Peer],
    orderer_endpoint: Option<&'a str>,
}

#[derive(Serialize)]
struct InstallBody<'a> {
    name: &'a str,
    version: &'a str,
    path: &'a str,
    package: String,
    peers: &'a [Peer],
}

#[derive(Serialize)]
struct ActivateBody<'a> {
    name: &'a str,
    version: &'a str,
    path: &'a str,
    policy: &'a str,
    args: Vec<String>,
}

#[derive(Serialize)]
struct ChaincodeCallBody<'a> {
    chaincode_id: &'a str,
    function: &'a str,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct ConfigBlockResponse {
    block_number: u64,
}

#[derive(Deserialize)]
struct TransactionBody {
    tx_id: String,
    #[serde(default)]
    payload: String,
}

#[derive(Deserialize)]
struct PayloadBody {
    #[serde(default)]
    payload: String,
}

#[derive(Deserialize)]
struct LedgerInfoBody {
    height: u64,
    current_block_hash: String,
    previous_block_hash: String,
}

/// Client for one organization's gateway endpoint.
pub struct HttpLedgerClient {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) orderer_endpoint: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            orderer_endpoint: None,
        }
    }

    pub fn with_orderer_endpoint(self, orderer_endpoint: Option<String>) -> Self {
        Self {
            orderer_endpoint,
            ..self
        }
    }

    /// Gateway URL with `segments` appended. Each segment is percent-encoded,
    /// so a name can never add path components.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url).map_err(|err| {
            ServiceError::Permanent(format!("Invalid gateway url '{}': {err}", self.url))
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ServiceError::Permanent(format!("Gateway url '{}' cannot be a base", self.url))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        trace!("GET {url}");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        Self::json(response).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(segments)?;
        trace!("POST {url}");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await
    }

    async fn post_empty<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> Result<()> {
        self.post(segments, body).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|err| ServiceError::Permanent(format!("Failed to parse response: {err}")))
    }
}

/// Classifies a non-success HTTP status. Statuses that signal an unready node
/// or an overloaded gateway are transient.
pub(crate) fn status_error(status: StatusCode, body: String) -> ServiceError {
    let message = format!("Unexpected response: {status} {body}");
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ServiceError::Transient(message),
        _ => ServiceError::Permanent(message),
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_connect() || err.is_timeout() {
        ServiceError::Transient(format!("Gateway unreachable: {err}"))
    } else {
        ServiceError::Permanent(format!("Request failed: {err}"))
    }
}

fn encode_args(args: &[Vec<u8>]) -> Vec<String> {
    args.iter().map(|arg| BASE64_STANDARD.encode(arg)).collect()
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(value)
        .map_err(|err| ServiceError::Permanent(format!("Invalid base64 in '{field}': {err}")))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn local_peers(&self) -> Result<Vec<Peer>> {
        self.get(&["peers"]).await
    }

    async fn submit_channel_config(
        &self,
        update: &ChannelConfigTx,
        signers: &[SigningIdentity],
    ) -> Result<()> {
        let body = SaveChannelBody {
            channel_id: &update.channel_id,
            envelope: BASE64_STANDARD.encode(&update.envelope),
            signers,
            orderer_endpoint: self.orderer_endpoint.as_deref(),
        };
        self.post_empty(&["channels"], &body).await
    }

    async fn query_channel_config(&self, channel_id: &str) -> Result<u64> {
        let response: ConfigBlockResponse =
            self.get(&["channels", channel_id, "config"]).await?;
        Ok(response.block_number)
    }

    async fn query_joined_channels(&self, peer: &Peer) -> Result<Vec<String>> {
        self.get(&["peers", peer.name.as_str(), "channels"]).await
    }

    async fn join_channel(&self, channel_id: &str, peers: &[Peer]) -> Result<()> {
        let body = JoinChannelBody {
            peers,
            orderer_endpoint: self.orderer_endpoint.as_deref(),
        };
        self.post_empty(&["channels", channel_id, "join"], &body)
            .await
    }

    async fn install_chaincode(&self, request: &InstallRequest, peers: &[Peer]) -> Result<()> {
        let body = InstallBody {
            name: &request.name,
            version: &request.version,
            path: &request.path,
            package: BASE64_STANDARD.encode(&request.package),
            peers,
        };
        self.post_empty(&["chaincodes", "install"], &body).await
    }

    async fn query_installed_chaincodes(&self, peer: &Peer) -> Result<Vec<ChaincodeInfo>> {
        self.get(&["peers", peer.name.as_str(), "chaincodes"]).await
    }

    async fn activate_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()> {
        let body = activate_body(request);
        self.post_empty(&["channels", channel_id, "chaincodes"], &body)
            .await
    }

    async fn upgrade_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()> {
        let body = activate_body(request);
        self.post_empty(&["channels", channel_id, "chaincodes", "upgrade"], &body)
            .await
    }

    async fn query_active_chaincodes(&self, channel_id: &str) -> Result<Vec<ChaincodeInfo>> {
        self.get(&["channels", channel_id, "chaincodes"]).await
    }

    async fn invoke_transaction(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<TransactionResponse> {
        let body = ChaincodeCallBody {
            chaincode_id,
            function,
            args: encode_args(args),
        };
        let response = self
            .post(&["channels", channel_id, "transactions"], &body)
            .await?;
        let tx: TransactionBody = Self::json(response).await?;
        Ok(TransactionResponse {
            payload: decode_field("payload", &tx.payload)?,
            tx_id: tx.tx_id,
        })
    }

    async fn query_chaincode(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let body = ChaincodeCallBody {
            chaincode_id,
            function,
            args: encode_args(args),
        };
        let response = self
            .post(&["channels", channel_id, "queries"], &body)
            .await?;
        let result: PayloadBody = Self::json(response).await?;
        decode_field("payload", &result.payload)
    }

    async fn query_block(&self, channel_id: &str, number: u64) -> Result<Vec<u8>> {
        let number = number.to_string();
        let url = self.endpoint(&["channels", channel_id, "blocks", number.as_str()])?;
        trace!("GET {url}");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let bytes = Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn query_info(&self, channel_id: &str) -> Result<LedgerInfo> {
        let info: LedgerInfoBody = self.get(&["channels", channel_id, "info"]).await?;
        Ok(LedgerInfo {
            height: info.height,
            current_block_hash: decode_field("current_block_hash", &info.current_block_hash)?,
            previous_block_hash: decode_field("previous_block_hash", &info.previous_block_hash)?,
        })
    }
}

fn activate_body(request: &ActivateRequest) -> ActivateBody<'_> {
    ActivateBody {
        name: &request.name,
        version: &request.version,
        path: &request.path,
        policy: &request.policy,
        args: encode_args(&request.args),
    }
}
