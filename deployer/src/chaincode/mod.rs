//! Chaincode install, instantiate, upgrade and reset.

use futures::future::join_all;
use log::{debug, info};

use crate::config::ChaincodeConfiguration;
use crate::context::{DeploymentContext, OrgContext};
use crate::error::{Error, Result, Stage};
use crate::network::{ActivateRequest, InstallRequest, ServiceError};
use crate::poller::{Outcome, Poller};

/// Endorsement policy satisfied by any member of `msp_id`.
pub fn one_org_policy(msp_id: &str) -> String {
    format!("AND('{msp_id}.member')")
}

/// A chaincode package together with the arguments of its lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chaincode {
    pub name: String,
    pub version: String,
    pub path: String,
    pub package: Vec<u8>,
    pub policy: Option<String>,
    pub init_args: Vec<String>,
    pub reset_args: Vec<String>,
    pub upgrade_args: Vec<String>,
}

impl Chaincode {
    /// Reads the package file if one is configured.
    pub fn from_config(config: &ChaincodeConfiguration) -> std::io::Result<Self> {
        let package = match &config.package {
            Some(path) => std::fs::read(path)?,
            None => vec![],
        };
        Ok(Self {
            name: config.name.clone(),
            version: config.version.clone(),
            path: config.path.clone(),
            package,
            policy: config.policy.clone(),
            init_args: config.init_args.clone(),
            reset_args: config.reset_args.clone(),
            upgrade_args: config.upgrade_args.clone(),
        })
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    fn install_request(&self) -> InstallRequest {
        InstallRequest {
            name: self.name.clone(),
            version: self.version.clone(),
            path: self.path.clone(),
            package: self.package.clone(),
        }
    }

    fn activate_request(&self, lead_msp_id: &str, args: &[String]) -> ActivateRequest {
        ActivateRequest {
            name: self.name.clone(),
            version: self.version.clone(),
            path: self.path.clone(),
            policy: self
                .policy
                .clone()
                .unwrap_or_else(|| one_org_policy(lead_msp_id)),
            args: to_bytes(args),
        }
    }
}

fn to_bytes(args: &[String]) -> Vec<Vec<u8>> {
    args.iter().map(|arg| arg.as_bytes().to_vec()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The version was already active; its state was reset instead.
    Reset { tx_id: String },
    Instantiated,
}

/// Brings `chaincode` to active on `channel_id`. An already active version
/// only gets its state reset.
pub async fn deploy(
    ctx: &DeploymentContext,
    channel_id: &str,
    chaincode: &Chaincode,
) -> Result<DeployOutcome> {
    if is_active(ctx, channel_id, chaincode).await? {
        let tx_id = reset(ctx, channel_id, chaincode).await?;
        return Ok(DeployOutcome::Reset { tx_id });
    }

    install_all(ctx, chaincode).await?;

    let lead = ctx.lead();
    let request = chaincode.activate_request(&lead.msp_id, &chaincode.init_args);
    info!(
        "Instantiating {} on {channel_id} with policy {}",
        chaincode.id(),
        request.policy
    );
    ctx.poller()
        .call("instantiate chaincode", || {
            lead.client.activate_chaincode(channel_id, &request)
        })
        .await
        .map_err(|err| Error::from_call(Stage::Instantiate, err))?;

    wait_active(ctx, channel_id, chaincode, Stage::Instantiate).await?;
    info!("Chaincode {} active on {channel_id}", chaincode.id());
    Ok(DeployOutcome::Instantiated)
}

/// Installs `chaincode` on every org and moves the channel to its version.
pub async fn upgrade(ctx: &DeploymentContext, channel_id: &str, chaincode: &Chaincode) -> Result<()> {
    install_all(ctx, chaincode).await?;

    let lead = ctx.lead();
    let request = chaincode.activate_request(&lead.msp_id, &chaincode.upgrade_args);
    info!("Upgrading {channel_id} to {}", chaincode.id());
    ctx.poller()
        .call("upgrade chaincode", || {
            lead.client.upgrade_chaincode(channel_id, &request)
        })
        .await
        .map_err(|err| Error::from_call(Stage::Upgrade, err))?;

    wait_active(ctx, channel_id, chaincode, Stage::Upgrade).await?;
    info!("Chaincode {} active on {channel_id}", chaincode.id());
    Ok(())
}

/// Single check of the channel's active list. Not polled.
pub async fn is_active(ctx: &DeploymentContext, channel_id: &str, chaincode: &Chaincode) -> Result<bool> {
    let lead = ctx.lead();
    let active = ctx
        .poller()
        .call("query active chaincodes", || {
            lead.client.query_active_chaincodes(channel_id)
        })
        .await
        .map_err(|err| Error::from_call(Stage::ActiveCheck, err))?;

    Ok(active
        .iter()
        .any(|info| info.matches(&chaincode.name, &chaincode.version)))
}

async fn reset(ctx: &DeploymentContext, channel_id: &str, chaincode: &Chaincode) -> Result<String> {
    info!(
        "Chaincode {} already active on {channel_id}, resetting state",
        chaincode.id()
    );
    let lead = ctx.lead();
    let args = to_bytes(&chaincode.reset_args);
    let response = ctx
        .poller()
        .call("reset chaincode", || {
            lead.client
                .invoke_transaction(channel_id, &chaincode.name, "reset", &args)
        })
        .await
        .map_err(|err| Error::from_call(Stage::Reset, err))?;
    debug!("Reset transaction {}", response.tx_id);
    Ok(response.tx_id)
}

/// Installs on one org at a time, each waiting until all its peers list the
/// package.
async fn install_all(ctx: &DeploymentContext, chaincode: &Chaincode) -> Result<()> {
    let request = chaincode.install_request();
    for org in ctx.orgs() {
        info!(
            "Installing {} on {} peers of {}",
            chaincode.id(),
            org.peers.len(),
            org.org_id
        );
        ctx.poller()
            .call("install chaincode", || {
                org.client.install_chaincode(&request, &org.peers)
            })
            .await
            .map_err(|err| Error::from_call(Stage::Install, err))?;

        wait_installed(ctx.poller(), org, chaincode).await?;
    }
    Ok(())
}

/// Polls every peer of `org` concurrently. Converged when all of them list
/// the chaincode version.
pub async fn wait_installed(poller: &Poller, org: &OrgContext, chaincode: &Chaincode) -> Result<()> {
    poller
        .invoke("wait for install", |_| async move {
            let answers = join_all(
                org.peers
                    .iter()
                    .map(|peer| org.client.query_installed_chaincodes(peer)),
            )
            .await;

            // Every answer is looked at before deciding: a permanent failure
            // anywhere wins over transient ones.
            let mut missing = vec![];
            let mut unreachable = vec![];
            for (peer, answer) in org.peers.iter().zip(answers) {
                match answer {
                    Ok(installed) => {
                        if !installed
                            .iter()
                            .any(|info| info.matches(&chaincode.name, &chaincode.version))
                        {
                            missing.push(peer.name.as_str());
                        }
                    }
                    Err(ServiceError::Transient(reason)) => {
                        unreachable.push(format!("{}: {reason}", peer.name))
                    }
                    Err(err @ ServiceError::Permanent(_)) => {
                        return Outcome::Fatal(
                            anyhow::Error::new(err).context(format!("peer {}", peer.name)),
                        )
                    }
                }
            }

            if !unreachable.is_empty() {
                Outcome::Retryable(unreachable.join(", "))
            } else if !missing.is_empty() {
                Outcome::Retryable(format!(
                    "chaincode {} not installed on peers {missing:?}",
                    chaincode.id()
                ))
            } else {
                Outcome::Success(())
            }
        })
        .await
        .map_err(|err| {
            Error::from_poll(Stage::Install, err, |reason| Error::InstallIncomplete {
                chaincode: chaincode.id(),
                org: org.org_id.clone(),
                reason,
            })
        })
}

async fn wait_active(
    ctx: &DeploymentContext,
    channel_id: &str,
    chaincode: &Chaincode,
    stage: Stage,
) -> Result<()> {
    let client = ctx.lead().client.as_ref();
    ctx.poller()
        .invoke("wait for active chaincode", |_| async move {
            Outcome::from_service(
                client
                    .query_active_chaincodes(channel_id)
                    .await
                    .map(|active| {
                        active
                            .iter()
                            .any(|info| info.matches(&chaincode.name, &chaincode.version))
                    }),
                |active| {
                    if active {
                        Outcome::Success(true)
                    } else {
                        Outcome::Retryable(format!(
                            "chaincode {} not yet active",
                            chaincode.id()
                        ))
                    }
                },
            )
        })
        .await
        .map(|_| ())
        .map_err(|err| {
            Error::from_poll(stage, err, |reason| Error::InstantiateTimeout {
                chaincode: chaincode.id(),
                channel_id: channel_id.to_string(),
                reason,
            })
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tokio::time::Instant;

    use super::*;
    use crate::config::Configuration;
    use crate::network::mock::{org_context, Call, MockLedger};
    use crate::network::ChaincodeInfo;

    const CHANNEL: &str = "orgchannel";
    const DELAY: Duration = Duration::from_millis(100);

    fn context(ledger: &Arc<MockLedger>, peers: usize, attempts: usize) -> DeploymentContext {
        let orgs = vec![
            org_context(ledger, "Org1", peers, CHANNEL),
            org_context(ledger, "Org2", peers, CHANNEL),
        ];
        DeploymentContext::from_orgs(orgs, Poller::new(DELAY, attempts)).unwrap()
    }

    fn example_cc() -> Chaincode {
        Chaincode::from_config(&Configuration::example().chaincode).unwrap()
    }

    fn bytes(args: &[&str]) -> Vec<Vec<u8>> {
        args.iter().map(|arg| arg.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_one_org_policy() {
        assert_eq!(one_org_policy("Org1MSP"), "AND('Org1MSP.member')");
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_chaincode_is_only_reset() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 2, 5);
        ledger.lock().active.push(ChaincodeInfo::new("ExampleCC", "1"));

        let outcome = deploy(&ctx, CHANNEL, &example_cc()).await.unwrap();

        assert_matches!(outcome, DeployOutcome::Reset { .. });
        assert_eq!(
            ledger.calls(),
            vec![Call::Invoke {
                channel_id: CHANNEL.to_string(),
                chaincode_id: "ExampleCC".to_string(),
                function: "reset".to_string(),
                args: bytes(&["a", "100", "b", "200"]),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_deploy_installs_per_org_then_instantiates() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 2, 5);
        ledger.lock().activate_lag = 2;

        let outcome = deploy(&ctx, CHANNEL, &example_cc()).await.unwrap();

        assert_eq!(outcome, DeployOutcome::Instantiated);
        let calls = ledger.calls();
        assert_eq!(calls.len(), 3);
        assert_matches!(&calls[0], Call::Install { msp_id, peers, .. } if msp_id == "Org1MSP" && peers.len() == 2);
        assert_matches!(&calls[1], Call::Install { msp_id, .. } if msp_id == "Org2MSP");
        assert_eq!(
            calls[2],
            Call::Activate {
                channel_id: CHANNEL.to_string(),
                name: "ExampleCC".to_string(),
                version: "1".to_string(),
                policy: "AND('Org1MSP.member')".to_string(),
                args: bytes(&["init", "a", "100", "b", "200"]),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_waits_for_slowest_peer() {
        let ledger = MockLedger::new();
        let org = org_context(&ledger, "Org1", 3, CHANNEL);
        ledger
            .lock()
            .install_lag
            .insert("peer2.org1.example.com".to_string(), 3);
        let poller = Poller::new(DELAY, 5);
        let chaincode = example_cc();

        org.client
            .install_chaincode(&chaincode.install_request(), &org.peers)
            .await
            .unwrap();

        let start = Instant::now();
        wait_installed(&poller, &org, &chaincode).await.unwrap();
        // Converged on the third poll.
        assert_eq!(start.elapsed(), DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_incomplete() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 2, 3);
        ledger
            .lock()
            .install_lag
            .insert("peer1.org2.example.com".to_string(), 10);

        let result = deploy(&ctx, CHANNEL, &example_cc()).await;

        assert_matches!(result, Err(Error::InstallIncomplete { ref org, .. }) if org == "Org2");
        assert!(!ledger
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Activate { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instantiate_timeout() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 1, 3);
        ledger.lock().activate_lag = 10;

        let result = deploy(&ctx, CHANNEL, &example_cc()).await;

        assert_matches!(
            result,
            Err(Error::InstantiateTimeout { ref chaincode, .. }) if chaincode == "ExampleCC:1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_install_query_error_is_fatal() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 1, 5);
        ledger.inject(
            "query_installed_chaincodes",
            ServiceError::Permanent("access denied".into()),
        );

        let result = deploy(&ctx, CHANNEL, &example_cc()).await;

        assert_matches!(
            result,
            Err(Error::Stage {
                stage: Stage::Install,
                ..
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_after_transient_one_is_fatal() {
        let ledger = MockLedger::new();
        let org = org_context(&ledger, "Org1", 2, CHANNEL);
        let poller = Poller::new(DELAY, 5);
        let chaincode = example_cc();
        org.client
            .install_chaincode(&chaincode.install_request(), &org.peers)
            .await
            .unwrap();

        ledger.inject(
            "query_installed_chaincodes",
            ServiceError::Transient("busy".into()),
        );
        ledger.inject(
            "query_installed_chaincodes",
            ServiceError::Permanent("access denied".into()),
        );

        let start = Instant::now();
        let result = wait_installed(&poller, &org, &chaincode).await;

        assert_matches!(
            result,
            Err(Error::Stage {
                stage: Stage::Install,
                ..
            })
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_peer_error_is_retried() {
        let ledger = MockLedger::new();
        let org = org_context(&ledger, "Org1", 2, CHANNEL);
        let poller = Poller::new(DELAY, 5);
        let chaincode = example_cc();
        org.client
            .install_chaincode(&chaincode.install_request(), &org.peers)
            .await
            .unwrap();
        ledger.inject(
            "query_installed_chaincodes",
            ServiceError::Transient("busy".into()),
        );

        let start = Instant::now();
        wait_installed(&poller, &org, &chaincode).await.unwrap();
        assert_eq!(start.elapsed(), DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_activates_new_version() {
        let ledger = MockLedger::new();
        let ctx = context(&ledger, 1, 5);
        ledger.lock().active.push(ChaincodeInfo::new("ExampleCC", "1"));

        let mut chaincode = example_cc();
        chaincode.version = "2".to_string();
        upgrade(&ctx, CHANNEL, &chaincode).await.unwrap();

        assert_eq!(
            ledger.lock().active,
            vec![ChaincodeInfo::new("ExampleCC", "2")]
        );
        let calls = ledger.calls();
        assert_eq!(
            calls.last(),
            Some(&Call::Upgrade {
                channel_id: CHANNEL.to_string(),
                name: "ExampleCC".to_string(),
                version: "2".to_string(),
                args: bytes(&["init", "a", "100", "b", "400"]),
            })
        );
    }
}
