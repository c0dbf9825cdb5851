//! Per-organization client bundles and the deployment context that owns them.
//!
//! The context is built once, sequentially, and is read-only afterwards. It
//! is passed by reference to every orchestration step.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::{Configuration, OrgConfiguration};
use crate::error::{Error, Result, Stage};
use crate::network::discovery::discover_peers;
use crate::network::http::HttpLedgerClient;
use crate::network::{ChannelConfigTx, LedgerClient, Peer, SigningIdentity};
use crate::poller::Poller;

/// Everything the deployer needs to act on behalf of one organization.
#[derive(Clone)]
pub struct OrgContext {
    pub org_id: String,
    pub msp_id: String,
    pub client: Arc<dyn LedgerClient>,
    pub signing_identity: SigningIdentity,
    /// Discovered peers, sorted by name.
    pub peers: Vec<Peer>,
    pub anchor_config: Option<ChannelConfigTx>,
}

impl std::fmt::Debug for OrgContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgContext")
            .field("org_id", &self.org_id)
            .field("msp_id", &self.msp_id)
            .field("signing_identity", &self.signing_identity)
            .field("peers", &self.peers)
            .field("anchor_config", &self.anchor_config)
            .finish_non_exhaustive()
    }
}

impl Display for OrgContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "org {} ({}), signer {}, {} peers",
            self.org_id,
            self.msp_id,
            self.signing_identity,
            self.peers.len()
        )
    }
}

/// Creates the administrative client of an organization.
pub trait ClientFactory: Send + Sync {
    fn client(
        &self,
        org: &OrgConfiguration,
        orderer_endpoint: Option<&str>,
    ) -> anyhow::Result<Arc<dyn LedgerClient>>;
}

pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn client(
        &self,
        org: &OrgConfiguration,
        orderer_endpoint: Option<&str>,
    ) -> anyhow::Result<Arc<dyn LedgerClient>> {
        let client = HttpLedgerClient::new(org.gateway_url.clone())
            .with_orderer_endpoint(orderer_endpoint.map(ToString::to_string));
        Ok(Arc::new(client))
    }
}

/// Reads a channel configuration transaction artifact from disk.
pub fn read_config_tx<P: AsRef<Path>>(channel_id: &str, path: P) -> std::io::Result<ChannelConfigTx> {
    let envelope = std::fs::read(path)?;
    Ok(ChannelConfigTx {
        channel_id: channel_id.to_string(),
        envelope,
    })
}

#[derive(Debug)]
pub struct DeploymentContext {
    orgs: Vec<OrgContext>,
    poller: Poller,
}

impl DeploymentContext {
    /// Builds the org contexts in configuration order. Peer discovery for an
    /// org must converge before the next org is looked at.
    pub async fn open(
        config: &Configuration,
        factory: &dyn ClientFactory,
        poller: Poller,
    ) -> Result<Self> {
        if config.orgs.is_empty() {
            return Err(Error::Configuration("no organizations configured".to_string()));
        }
        info!("Opening deployment context for {} orgs", config.orgs.len());

        let mut orgs = Vec::with_capacity(config.orgs.len());
        for org in &config.orgs {
            let client = factory
                .client(org, config.channel.orderer_endpoint.as_deref())
                .map_err(|err| Error::stage(Stage::OpenContext, err))?;

            let anchor_config = match &org.anchor_config_tx {
                Some(path) => Some(
                    read_config_tx(&config.channel.id, path)
                        .map_err(|err| Error::stage(Stage::OpenContext, err))?,
                ),
                None => None,
            };

            let peers =
                discover_peers(&poller, client.as_ref(), &org.name, org.expected_peers).await?;

            let org_context = OrgContext {
                org_id: org.name.clone(),
                msp_id: org.msp_id.clone(),
                client,
                signing_identity: SigningIdentity {
                    msp_id: org.msp_id.clone(),
                    name: org.admin.clone(),
                },
                peers,
                anchor_config,
            };
            info!("Prepared {org_context}");
            orgs.push(org_context);
        }

        Ok(Self { orgs, poller })
    }

    /// Wraps already prepared org contexts.
    pub fn from_orgs(orgs: Vec<OrgContext>, poller: Poller) -> Result<Self> {
        if orgs.is_empty() {
            return Err(Error::Configuration("no organizations configured".to_string()));
        }
        Ok(Self { orgs, poller })
    }

    pub fn orgs(&self) -> &[OrgContext] {
        &self.orgs
    }

    /// First configured organization. Channel-wide queries go through it.
    pub fn lead(&self) -> &OrgContext {
        &self.orgs[0]
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.poller.cancellation().clone()
    }

    /// Signing identities of every org, in configuration order.
    pub fn signers(&self) -> Vec<SigningIdentity> {
        self.orgs
            .iter()
            .map(|org| org.signing_identity.clone())
            .collect()
    }

    /// Ends the run. Any poll still waiting on this context stops.
    pub fn close(self) {
        info!("Closing deployment context");
        self.poller.cancellation().cancel();
    }
}
