//! In-memory ledger network used by the unit tests.
//!
//! All organizations share one [MockLedger]; each gets its own [MockClient]
//! view so discovery only returns that organization's peers. Convergence is
//! simulated with per-query lags.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::context::OrgContext;
use crate::network::{
    ActivateRequest, ChaincodeInfo, ChannelConfigTx, InstallRequest, LedgerClient, LedgerInfo,
    Peer, Result, ServiceError, SigningIdentity, TransactionResponse,
};

/// Write operations observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    SubmitChannelConfig {
        channel_id: String,
        signers: Vec<String>,
    },
    JoinChannel {
        channel_id: String,
        peers: Vec<String>,
    },
    Install {
        msp_id: String,
        name: String,
        version: String,
        peers: Vec<String>,
    },
    Activate {
        channel_id: String,
        name: String,
        version: String,
        policy: String,
        args: Vec<Vec<u8>>,
    },
    Upgrade {
        channel_id: String,
        name: String,
        version: String,
        args: Vec<Vec<u8>>,
    },
    Invoke {
        channel_id: String,
        chaincode_id: String,
        function: String,
        args: Vec<Vec<u8>>,
    },
}

#[derive(Default)]
struct PendingConfig {
    target: u64,
    remaining_queries: usize,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) peers: Vec<Peer>,
    /// Number of `local_peers` calls per org before all peers are visible.
    /// Until then only the first peer of the org is returned.
    pub(crate) discovery_lag: usize,
    discovery_calls: HashMap<String, usize>,

    pub(crate) config_block: Option<u64>,
    pub(crate) config_lag: usize,
    pending_config: Option<PendingConfig>,
    pub(crate) overlapping_config_updates: bool,

    pub(crate) joined: HashMap<String, BTreeSet<String>>,

    /// Per-peer number of installed-list queries before a fresh install shows up.
    pub(crate) install_lag: HashMap<String, usize>,
    installed: HashMap<String, Vec<(ChaincodeInfo, usize)>>,

    pub(crate) active: Vec<ChaincodeInfo>,
    pub(crate) activate_lag: usize,
    pending_active: Option<(ChaincodeInfo, usize)>,

    pub(crate) state: HashMap<String, Vec<u8>>,
    pub(crate) blocks: HashMap<u64, Vec<u8>>,
    pub(crate) info: LedgerInfo,

    errors: HashMap<&'static str, VecDeque<ServiceError>>,
    pub(crate) calls: Vec<Call>,
    tx_counter: u64,
}

#[derive(Default)]
pub(crate) struct MockLedger {
    inner: Mutex<Inner>,
}

impl MockLedger {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn add_peers(&self, msp_id: &str, count: usize) -> Vec<Peer> {
        let org = msp_id.trim_end_matches("MSP").to_lowercase();
        let peers: Vec<Peer> = (0..count)
            .map(|i| Peer {
                name: format!("peer{i}.{org}.example.com"),
                url: format!("grpcs://peer{i}.{org}.example.com:7051"),
                msp_id: msp_id.to_string(),
            })
            .collect();
        self.lock().peers.extend(peers.clone());
        peers
    }

    /// Queues an error returned by the next call of operation `op`.
    pub(crate) fn inject(&self, op: &'static str, err: ServiceError) {
        self.lock().errors.entry(op).or_default().push_back(err);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn client(self: &Arc<Self>, msp_id: &str) -> Arc<dyn LedgerClient> {
        Arc::new(MockClient {
            msp_id: msp_id.to_string(),
            ledger: self.clone(),
        })
    }
}

impl Inner {
    fn take_error(&mut self, op: &'static str) -> Result<()> {
        match self.errors.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) struct MockClient {
    msp_id: String,
    ledger: Arc<MockLedger>,
}

fn names(peers: &[Peer]) -> Vec<String> {
    peers.iter().map(|peer| peer.name.clone()).collect()
}

#[async_trait]
impl LedgerClient for MockClient {
    async fn local_peers(&self) -> Result<Vec<Peer>> {
        let mut inner = self.ledger.lock();
        inner.take_error("local_peers")?;
        let calls = {
            let calls = inner.discovery_calls.entry(self.msp_id.clone()).or_default();
            *calls += 1;
            *calls
        };
        let peers: Vec<Peer> = inner
            .peers
            .iter()
            .filter(|peer| peer.msp_id == self.msp_id)
            .cloned()
            .collect();
        if calls > inner.discovery_lag {
            Ok(peers)
        } else {
            Ok(peers.into_iter().take(1).collect())
        }
    }

    async fn submit_channel_config(
        &self,
        update: &ChannelConfigTx,
        signers: &[SigningIdentity],
    ) -> Result<()> {
        let mut inner = self.ledger.lock();
        inner.take_error("submit_channel_config")?;
        if inner.pending_config.is_some() {
            inner.overlapping_config_updates = true;
        }
        let target = inner.config_block.map(|block| block + 1).unwrap_or(0);
        let remaining_queries = inner.config_lag;
        inner.pending_config = Some(PendingConfig {
            target,
            remaining_queries,
        });
        inner.calls.push(Call::SubmitChannelConfig {
            channel_id: update.channel_id.clone(),
            signers: signers.iter().map(ToString::to_string).collect(),
        });
        Ok(())
    }

    async fn query_channel_config(&self, channel_id: &str) -> Result<u64> {
        let mut guard = self.ledger.lock();
        let inner = &mut *guard;
        inner.take_error("query_channel_config")?;
        if let Some(pending) = inner.pending_config.take() {
            if pending.remaining_queries == 0 {
                inner.config_block = Some(pending.target);
            } else {
                inner.pending_config = Some(PendingConfig {
                    target: pending.target,
                    remaining_queries: pending.remaining_queries - 1,
                });
            }
        }
        inner
            .config_block
            .ok_or_else(|| ServiceError::Transient(format!("channel {channel_id} not found")))
    }

    async fn query_joined_channels(&self, peer: &Peer) -> Result<Vec<String>> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_joined_channels")?;
        Ok(inner
            .joined
            .get(&peer.name)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn join_channel(&self, channel_id: &str, peers: &[Peer]) -> Result<()> {
        let mut inner = self.ledger.lock();
        inner.take_error("join_channel")?;
        for peer in peers {
            inner
                .joined
                .entry(peer.name.clone())
                .or_default()
                .insert(channel_id.to_string());
        }
        inner.calls.push(Call::JoinChannel {
            channel_id: channel_id.to_string(),
            peers: names(peers),
        });
        Ok(())
    }

    async fn install_chaincode(&self, request: &InstallRequest, peers: &[Peer]) -> Result<()> {
        let mut inner = self.ledger.lock();
        inner.take_error("install_chaincode")?;
        for peer in peers {
            let lag = inner.install_lag.get(&peer.name).copied().unwrap_or(0);
            inner
                .installed
                .entry(peer.name.clone())
                .or_default()
                .push((ChaincodeInfo::new(&request.name, &request.version), lag));
        }
        inner.calls.push(Call::Install {
            msp_id: self.msp_id.clone(),
            name: request.name.clone(),
            version: request.version.clone(),
            peers: names(peers),
        });
        Ok(())
    }

    async fn query_installed_chaincodes(&self, peer: &Peer) -> Result<Vec<ChaincodeInfo>> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_installed_chaincodes")?;
        let mut visible = vec![];
        if let Some(installed) = inner.installed.get_mut(&peer.name) {
            for (info, remaining) in installed.iter_mut() {
                if *remaining <= 1 {
                    *remaining = 0;
                    visible.push(info.clone());
                } else {
                    *remaining -= 1;
                }
            }
        }
        Ok(visible)
    }

    async fn activate_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()> {
        let mut inner = self.ledger.lock();
        inner.take_error("activate_chaincode")?;
        let lag = inner.activate_lag;
        inner.pending_active = Some((ChaincodeInfo::new(&request.name, &request.version), lag));
        inner.calls.push(Call::Activate {
            channel_id: channel_id.to_string(),
            name: request.name.clone(),
            version: request.version.clone(),
            policy: request.policy.clone(),
            args: request.args.clone(),
        });
        Ok(())
    }

    async fn upgrade_chaincode(&self, channel_id: &str, request: &ActivateRequest) -> Result<()> {
        let mut inner = self.ledger.lock();
        inner.take_error("upgrade_chaincode")?;
        let lag = inner.activate_lag;
        inner.active.retain(|info| info.name != request.name);
        inner.pending_active = Some((ChaincodeInfo::new(&request.name, &request.version), lag));
        inner.calls.push(Call::Upgrade {
            channel_id: channel_id.to_string(),
            name: request.name.clone(),
            version: request.version.clone(),
            args: request.args.clone(),
        });
        Ok(())
    }

    async fn query_active_chaincodes(&self, _channel_id: &str) -> Result<Vec<ChaincodeInfo>> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_active_chaincodes")?;
        if let Some((info, remaining)) = inner.pending_active.take() {
            if remaining == 0 {
                inner.active.push(info);
            } else {
                inner.pending_active = Some((info, remaining - 1));
            }
        }
        Ok(inner.active.clone())
    }

    async fn invoke_transaction(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<TransactionResponse> {
        let mut inner = self.ledger.lock();
        inner.take_error("invoke_transaction")?;
        if function == "invoke" && args.len() == 3 && args[0] == b"set" {
            let key = String::from_utf8_lossy(&args[1]).to_string();
            inner.state.insert(key, args[2].clone());
        }
        inner.calls.push(Call::Invoke {
            channel_id: channel_id.to_string(),
            chaincode_id: chaincode_id.to_string(),
            function: function.to_string(),
            args: args.to_vec(),
        });
        inner.tx_counter += 1;
        Ok(TransactionResponse {
            tx_id: format!("tx{}", inner.tx_counter),
            payload: vec![],
        })
    }

    async fn query_chaincode(
        &self,
        _channel_id: &str,
        _chaincode_id: &str,
        _function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_chaincode")?;
        let key = args
            .get(1)
            .map(|key| String::from_utf8_lossy(key).to_string())
            .unwrap_or_default();
        Ok(inner.state.get(&key).cloned().unwrap_or_default())
    }

    async fn query_block(&self, _channel_id: &str, number: u64) -> Result<Vec<u8>> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_block")?;
        inner
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| ServiceError::Permanent(format!("block {number} not found")))
    }

    async fn query_info(&self, _channel_id: &str) -> Result<LedgerInfo> {
        let mut inner = self.ledger.lock();
        inner.take_error("query_info")?;
        Ok(inner.info.clone())
    }
}

/// Org context over the mock with `peer_count` freshly added peers and an
/// anchor update for `channel_id`.
pub(crate) fn org_context(
    ledger: &Arc<MockLedger>,
    org_id: &str,
    peer_count: usize,
    channel_id: &str,
) -> OrgContext {
    let msp_id = format!("{org_id}MSP");
    let peers = ledger.add_peers(&msp_id, peer_count);
    OrgContext {
        org_id: org_id.to_string(),
        msp_id: msp_id.clone(),
        client: ledger.client(&msp_id),
        signing_identity: SigningIdentity {
            msp_id: msp_id.clone(),
            name: "Admin".to_string(),
        },
        peers,
        anchor_config: Some(ChannelConfigTx {
            channel_id: channel_id.to_string(),
            envelope: format!("{msp_id}anchors").into_bytes(),
        }),
    }
}
