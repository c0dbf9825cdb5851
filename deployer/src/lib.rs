pub mod block;
pub mod chaincode;
pub mod channel;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod network;
pub mod poller;

pub use block::{decode_block, BlockDecoder, DecodeError, DecodedBlock, TransactionRecord};
pub use chaincode::{deploy, one_org_policy, upgrade, Chaincode, DeployOutcome};
pub use channel::{provision_channel, ProvisionOutcome};
pub use context::{DeploymentContext, OrgContext};
pub use error::{Error, Stage};
pub use ledger::{ChainInfo, LedgerReader};
pub use network::discovery::discover_peers;
pub use network::LedgerClient;
pub use poller::{Outcome, Poller};
