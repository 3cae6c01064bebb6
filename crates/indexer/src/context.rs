//! Per-chain dependencies handed to every task of that chain.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use ddocache_validator::Validator;

use crate::rbac::RbacClient;
use crate::retry::{RetryPolicy, RetryQueue};
use crate::storage::Storage;

/// Who may publish metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Empty allows every sender.
    pub allowed_publishers: Vec<Address>,
    /// Empty skips the metadata-proof check.
    pub allowed_validators: Vec<Address>,
}

impl PublishPolicy {
    #[allow(missing_docs)]
    pub fn publisher_allowed(&self, sender: &Address) -> bool {
        self.allowed_publishers.is_empty() || self.allowed_publishers.contains(sender)
    }

    /// Whether any of the validators that signed a proof is allowed.
    pub fn validators_allowed(&self, signers: &[Address]) -> bool {
        self.allowed_validators.is_empty()
            || signers.iter().any(|s| self.allowed_validators.contains(s))
    }
}

/// Event monitor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// First block to scan when no cursor exists.
    pub start_block: u64,
    /// Maximum blocks per `eth_getLogs` call while catching up.
    pub chunk_size: u64,
    /// Blocks behind head considered final.
    pub confirmations: u64,
    /// Sleep between iterations.
    pub quiet_time: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            chunk_size: 1000,
            confirmations: 0,
            quiet_time: Duration::from_secs(3),
        }
    }
}

/// Everything a chain's monitor, processors and retry worker need.
///
/// Built once per configured chain and shared behind an [`Arc`]. Storage and
/// the validator are shared across chains.
pub struct ChainContext<C, D, G> {
    #[allow(missing_docs)]
    pub chain_id: u64,
    /// Label for logs.
    pub network: String,
    #[allow(missing_docs)]
    pub chain: C,
    #[allow(missing_docs)]
    pub storage: Storage,
    #[allow(missing_docs)]
    pub validator: Arc<Validator>,
    #[allow(missing_docs)]
    pub decryptor: D,
    /// Order statistics and transfers.
    pub graph: G,
    #[allow(missing_docs)]
    pub rbac: Option<RbacClient>,
    #[allow(missing_docs)]
    pub policy: PublishPolicy,
    #[allow(missing_docs)]
    pub monitor: MonitorSettings,
    #[allow(missing_docs)]
    pub retry: RetryPolicy,
}

impl<C, D, G> ChainContext<C, D, G> {
    /// Retry queue over this context's storage.
    pub fn retry_queue(&self) -> RetryQueue {
        RetryQueue::new(self.storage.clone(), self.retry)
    }
}
