//! Channel creation, anchor peer updates and peer joins.
//!
//! The ordering service can corrupt its state if two configuration updates
//! land in the same block, so every configuration update is followed by a
//! wait until the channel's config block number moves. Updates are never
//! submitted concurrently.

use futures::future::{join_all, try_join_all};
use log::{debug, error, info};

use crate::context::{DeploymentContext, OrgContext};
use crate::error::{Error, Result, Stage};
use crate::network::{ChannelConfigTx, LedgerClient, SigningIdentity};
use crate::poller::{Outcome, Poller};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Every expected peer was already on the channel. Nothing was written.
    AlreadyJoined,
    Created { config_block: u64 },
}

/// Makes sure `channel_tx.channel_id` exists, carries every org's anchor
/// peers, and has every discovered peer joined.
pub async fn provision_channel(
    ctx: &DeploymentContext,
    channel_tx: &ChannelConfigTx,
    signers: &[SigningIdentity],
) -> Result<ProvisionOutcome> {
    let channel_id = channel_tx.channel_id.as_str();

    if is_joined(ctx, channel_id).await? {
        info!("All peers already joined channel {channel_id}");
        return Ok(ProvisionOutcome::AlreadyJoined);
    }

    let config_block = create_channel_and_update_anchors(ctx, channel_tx, signers).await?;
    join_peers(ctx, channel_id).await?;

    info!("Channel {channel_id} provisioned, config block {config_block}");
    Ok(ProvisionOutcome::Created { config_block })
}

/// Direct membership check of every expected peer. Not polled. With no
/// peers at all there is nothing joined.
pub async fn is_joined(ctx: &DeploymentContext, channel_id: &str) -> Result<bool> {
    if ctx.orgs().iter().all(|org| org.peers.is_empty()) {
        return Ok(false);
    }

    let mut joined = true;
    for org in ctx.orgs() {
        let answers = join_all(
            org.peers
                .iter()
                .map(|peer| org.client.query_joined_channels(peer)),
        )
        .await;

        for answer in answers {
            let channels = answer.map_err(|err| Error::stage(Stage::ChannelCheck, err))?;
            joined &= channels.iter().any(|channel| channel == channel_id);
        }
    }
    Ok(joined)
}

async fn create_channel_and_update_anchors(
    ctx: &DeploymentContext,
    channel_tx: &ChannelConfigTx,
    signers: &[SigningIdentity],
) -> Result<u64> {
    let channel_id = channel_tx.channel_id.as_str();
    let poller = ctx.poller();
    let lead = ctx.lead();

    info!("Creating channel {channel_id}");
    poller
        .call("save channel", || {
            lead.client.submit_channel_config(channel_tx, signers)
        })
        .await
        .map_err(|err| Error::from_call(Stage::ChannelCreate, err))?;

    let mut last_config_block = wait_for_config_update(
        poller,
        lead.client.as_ref(),
        channel_id,
        None,
        Stage::ChannelCreate,
    )
    .await?;

    for org in ctx.orgs() {
        last_config_block = update_anchor_peers(poller, org, channel_id, last_config_block).await?;
    }

    Ok(last_config_block)
}

async fn update_anchor_peers(
    poller: &Poller,
    org: &OrgContext,
    channel_id: &str,
    last_config_block: u64,
) -> Result<u64> {
    let anchor = match &org.anchor_config {
        Some(anchor) => anchor,
        None => {
            debug!("No anchor peer update for {}", org.org_id);
            return Ok(last_config_block);
        }
    };

    info!("Updating anchor peers of {} on {channel_id}", org.org_id);
    let signers = [org.signing_identity.clone()];
    poller
        .call("save anchor peers", || {
            org.client.submit_channel_config(anchor, &signers)
        })
        .await
        .map_err(|err| Error::from_call(Stage::AnchorUpdate, err))?;

    wait_for_config_update(
        poller,
        org.client.as_ref(),
        channel_id,
        Some(last_config_block),
        Stage::AnchorUpdate,
    )
    .await
}

/// Waits until the config block of `channel_id` is committed. With no
/// `last_config_block` any config block counts (channel genesis); otherwise
/// the block number must grow past it.
///
/// Query failures are all treated as "not yet": the channel is not
/// queryable until its genesis block is committed. Cancellation is reported
/// against `stage`.
pub async fn wait_for_config_update(
    poller: &Poller,
    client: &dyn LedgerClient,
    channel_id: &str,
    last_config_block: Option<u64>,
    stage: Stage,
) -> Result<u64> {
    poller
        .invoke("wait for config update", |_| async move {
            match client.query_channel_config(channel_id).await {
                Err(err) => Outcome::Retryable(err.to_string()),
                Ok(current) => match last_config_block {
                    Some(last) if current <= last => Outcome::Retryable(format!(
                        "Block number was not incremented [{current}, {last}]"
                    )),
                    _ => Outcome::Success(current),
                },
            }
        })
        .await
        .map_err(|err| {
            Error::from_poll(stage, err, |reason| Error::ConfigCommitTimeout {
                channel_id: channel_id.to_string(),
                reason,
            })
        })
}

/// Joins all peers of every org. Orgs share no state here, so the joins run
/// concurrently.
pub async fn join_peers(ctx: &DeploymentContext, channel_id: &str) -> Result<()> {
    let poller = ctx.poller();
    try_join_all(ctx.orgs().iter().map(|org| async move {
        poller
            .call("join channel", || org.client.join_channel(channel_id, &org.peers))
            .await
            .map_err(|err| {
                error!(
                    "Failed to join peers in org [{}] to channel [{channel_id}]: {err}",
                    org.org_id
                );
                Error::from_call(Stage::ChannelJoin, err)
            })?;
        info!("Joined {} peers of {} to {channel_id}", org.peers.len(), org.org_id);
        Ok::<(), Error>(())
    }))
    .await?;
    Ok(())
}
