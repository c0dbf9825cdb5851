use log::{debug, info};

use crate::error::{Error, Result, Stage};
use crate::network::{LedgerClient, Peer};
use crate::poller::{Outcome, Poller};

/// Resolves the peers visible from `client`, retrying until at least
/// `expected` of them are reported.
pub async fn discover_peers(
    poller: &Poller,
    client: &dyn LedgerClient,
    org: &str,
    expected: usize,
) -> Result<Vec<Peer>> {
    let label = format!("discover peers of {org}");
    let result = poller
        .invoke(&label, |attempt| async move {
            Outcome::from_service(client.local_peers().await, |peers| {
                if peers.len() < expected {
                    debug!(
                        "Discovery attempt {attempt} for {org}: {} of {expected} peers",
                        peers.len()
                    );
                    Outcome::Retryable(format!(
                        "Expecting {expected} peers but got {}",
                        peers.len()
                    ))
                } else {
                    Outcome::Success(peers)
                }
            })
        })
        .await;

    let mut peers = result.map_err(|err| {
        Error::from_poll(Stage::Discovery, err, |reason| Error::DiscoveryIncomplete {
            org: org.to_string(),
            expected,
            reason,
        })
    })?;
    peers.sort();
    info!("Discovered {} peers for {org}", peers.len());
    Ok(peers)
}
