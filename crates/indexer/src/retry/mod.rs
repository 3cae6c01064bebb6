//! Retry queue for units of work that failed transiently.
//!
//! A unit is a whole transaction, a whole block or a single event. Its id is
//! the hex SHA-256 of the canonical JSON of its parameters, so the same
//! failure enqueued twice collapses into one entry that keeps its original
//! `first_added` and retry count.

pub mod worker;

use std::time::Duration;

use alloy::primitives::{Address, B256};
use anyhow::{anyhow, Context, Result};
use ddocache_core::did::lowercase_address;
use ddocache_core::{sha256, Did};
use serde_json::{json, Value};
use tracing::debug;

use crate::storage::{RetryEntry, RetryFilter, RetryKind, Storage};

pub use worker::{RetryStats, RetryWorker};

/// Back-off and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay added per attempt.
    pub base_interval: Duration,
    #[allow(missing_docs)]
    pub max_backoff_event: Duration,
    #[allow(missing_docs)]
    pub max_backoff_tx: Duration,
    #[allow(missing_docs)]
    pub max_backoff_block: Duration,
    /// Entries older than this are dropped without replay.
    pub max_hold: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(300),
            max_backoff_event: Duration::from_secs(60 * 60),
            max_backoff_tx: Duration::from_secs(2 * 60 * 60),
            max_backoff_block: Duration::from_secs(6 * 60 * 60),
            max_hold: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Longest delay between two attempts of a kind.
    pub fn max_backoff(&self, kind: RetryKind) -> Duration {
        match kind {
            RetryKind::Event => self.max_backoff_event,
            RetryKind::Tx => self.max_backoff_tx,
            RetryKind::Block => self.max_backoff_block,
        }
    }

    /// `now + min((number_retries + 1) * base, max_backoff(kind))`.
    pub fn next_retry(&self, kind: RetryKind, number_retries: u32, now: i64) -> i64 {
        let linear = self
            .base_interval
            .saturating_mul(number_retries.saturating_add(1));
        let delay = linear.min(self.max_backoff(kind));
        now.saturating_add(delay.as_secs() as i64)
    }

    /// Whether an entry is past `max_hold`.
    pub fn is_expired(&self, entry: &RetryEntry, now: i64) -> bool {
        now.saturating_sub(entry.first_added) > self.max_hold.as_secs() as i64
    }
}

/// A unit to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryUnit {
    #[allow(missing_docs)]
    pub kind: RetryKind,
    #[allow(missing_docs)]
    pub chain_id: u64,
    /// Replay parameters; the id is derived from these alone.
    pub params: Value,
    #[allow(missing_docs)]
    pub nft_address: Option<String>,
    #[allow(missing_docs)]
    pub did: Option<String>,
}

fn hex_hash(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash))
}

impl RetryUnit {
    /// Every log of a transaction.
    pub fn tx(chain_id: u64, tx: B256) -> Self {
        Self::new(
            RetryKind::Tx,
            chain_id,
            json!({"chainId": chain_id, "txId": hex_hash(&tx)}),
        )
    }

    /// Every log of a block.
    pub fn block(chain_id: u64, block: u64) -> Self {
        Self::new(
            RetryKind::Block,
            chain_id,
            json!({"chainId": chain_id, "block": block}),
        )
    }

    /// One log of a transaction.
    pub fn event(chain_id: u64, tx: B256, log_index: u64) -> Self {
        Self::new(
            RetryKind::Event,
            chain_id,
            json!({"chainId": chain_id, "txId": hex_hash(&tx), "logIndex": log_index}),
        )
    }

    fn new(kind: RetryKind, chain_id: u64, params: Value) -> Self {
        Self {
            kind,
            chain_id,
            params,
            nft_address: None,
            did: None,
        }
    }

    #[allow(missing_docs)]
    pub fn with_nft(mut self, nft: &Address) -> Self {
        self.nft_address = Some(lowercase_address(nft));
        self
    }

    #[allow(missing_docs)]
    pub fn with_did(mut self, did: &Did) -> Self {
        self.did = Some(did.to_string());
        self
    }

    /// Hex SHA-256 of the JCS-canonical params.
    pub fn id(&self) -> Result<String> {
        let canonical =
            serde_jcs::to_string(&self.params).context("Failed to canonicalize retry params")?;
        Ok(hex::encode(sha256(canonical.as_bytes())))
    }
}

/// What a stored entry asks to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTarget {
    #[allow(missing_docs)]
    Tx(B256),
    #[allow(missing_docs)]
    Block(u64),
    #[allow(missing_docs)]
    Event {
        tx: B256,
        log_index: u64,
    },
}

impl RetryTarget {
    /// Read the target back from an entry's params.
    pub fn from_entry(entry: &RetryEntry) -> Result<Self> {
        let tx = || -> Result<B256> {
            entry
                .params
                .get("txId")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("Retry entry {} has no txId", entry.id))?
                .parse()
                .with_context(|| format!("Retry entry {} has a malformed txId", entry.id))
        };

        match entry.kind {
            RetryKind::Tx => Ok(RetryTarget::Tx(tx()?)),
            RetryKind::Block => entry
                .params
                .get("block")
                .and_then(Value::as_u64)
                .map(RetryTarget::Block)
                .ok_or_else(|| anyhow!("Retry entry {} has no block", entry.id)),
            RetryKind::Event => {
                let log_index = entry
                    .params
                    .get("logIndex")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| anyhow!("Retry entry {} has no logIndex", entry.id))?;
                Ok(RetryTarget::Event {
                    tx: tx()?,
                    log_index,
                })
            }
        }
    }
}

/// Persistent retry queue.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    storage: Storage,
    policy: RetryPolicy,
}

impl RetryQueue {
    #[allow(missing_docs)]
    pub fn new(storage: Storage, policy: RetryPolicy) -> Self {
        Self { storage, policy }
    }

    #[allow(missing_docs)]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Enqueue a unit. An existing entry with the same id is left untouched.
    ///
    /// Returns the entry id.
    pub async fn add(&self, unit: &RetryUnit, error: Option<&str>, now: i64) -> Result<String> {
        let id = unit.id()?;
        let entry = RetryEntry {
            id: id.clone(),
            kind: unit.kind,
            chain_id: unit.chain_id,
            nft_address: unit.nft_address.clone(),
            did: unit.did.clone(),
            params: unit.params.clone(),
            number_retries: 0,
            next_retry: self.policy.next_retry(unit.kind, 0, now),
            first_added: now,
            last_error: error.map(str::to_string),
        };

        if self.storage.insert_retry(&entry).await? {
            debug!("Queued {} retry {} on chain {}", unit.kind, id, unit.chain_id);
        } else {
            debug!("Retry {} already queued", id);
        }
        Ok(id)
    }

    /// Entries of a chain due at `now`.
    pub async fn pop_due(&self, chain_id: u64, now: i64, limit: u32) -> Result<Vec<RetryEntry>> {
        self.storage.due_retries(chain_id, now, limit).await
    }

    /// Remove an entry after success, permanent failure or expiry.
    pub async fn ack(&self, id: &str) -> Result<bool> {
        self.storage.delete_retry(id).await
    }

    /// Count one more failed attempt and push the entry back.
    pub async fn extend(&self, entry: &RetryEntry, error: &str, now: i64) -> Result<i64> {
        let attempts = entry.number_retries.saturating_add(1);
        let next = self.policy.next_retry(entry.kind, attempts, now);
        self.storage
            .reschedule_retry(&entry.id, attempts, next, error)
            .await?;
        Ok(next)
    }

    /// Entries matching a filter.
    pub async fn list(&self, filter: &RetryFilter) -> Result<Vec<RetryEntry>> {
        self.storage.list_retries(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::storage;

    #[test]
    fn test_backoff_is_linear_then_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_retry(RetryKind::Event, 0, 1_000), 1_300);
        assert_eq!(policy.next_retry(RetryKind::Event, 3, 1_000), 2_200);
        assert_eq!(policy.next_retry(RetryKind::Event, 50, 0), 3_600);
        assert_eq!(policy.next_retry(RetryKind::Tx, 50, 0), 7_200);
        assert_eq!(policy.next_retry(RetryKind::Block, 50, 0), 21_600);
    }

    #[test]
    fn test_unit_id_ignores_key_order_and_metadata() {
        let tx = B256::repeat_byte(0xab);
        let plain = RetryUnit::event(1, tx, 4);
        let tagged = RetryUnit::event(1, tx, 4)
            .with_nft(&Address::repeat_byte(0x11))
            .with_did(&ddocache_core::make_did(&Address::repeat_byte(0x11), 1));

        assert_eq!(plain.id().unwrap(), tagged.id().unwrap());
        assert_eq!(plain.id().unwrap().len(), 64);
        assert_ne!(plain.id().unwrap(), RetryUnit::event(1, tx, 5).id().unwrap());
        assert_ne!(plain.id().unwrap(), RetryUnit::tx(1, tx).id().unwrap());
    }

    #[test]
    fn test_target_round_trip_through_params() {
        let tx = B256::repeat_byte(0x01);
        for (unit, expected) in [
            (RetryUnit::tx(5, tx), RetryTarget::Tx(tx)),
            (RetryUnit::block(5, 77), RetryTarget::Block(77)),
            (
                RetryUnit::event(5, tx, 2),
                RetryTarget::Event { tx, log_index: 2 },
            ),
        ] {
            let entry = RetryEntry {
                id: unit.id().unwrap(),
                kind: unit.kind,
                chain_id: 5,
                nft_address: None,
                did: None,
                params: unit.params.clone(),
                number_retries: 0,
                next_retry: 0,
                first_added: 0,
                last_error: None,
            };
            assert_eq!(RetryTarget::from_entry(&entry).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_add_keeps_first_entry() {
        let (storage, _file) = storage().await;
        let queue = RetryQueue::new(storage, RetryPolicy::default());
        let unit = RetryUnit::block(1, 10);

        let id = queue.add(&unit, Some("rpc down"), 1_000).await.unwrap();
        let entry = queue.pop_due(1, 1_300, 10).await.unwrap().remove(0);
        queue.extend(&entry, "still down", 1_300).await.unwrap();

        assert_eq!(queue.add(&unit, None, 5_000).await.unwrap(), id);
        let stored = queue.list(&RetryFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].first_added, 1_000);
        assert_eq!(stored[0].number_retries, 1);
        assert_eq!(stored[0].next_retry, 1_900);
        assert_eq!(stored[0].last_error.as_deref(), Some("still down"));

        assert!(queue.ack(&id).await.unwrap());
        assert!(queue.list(&RetryFilter::default()).await.unwrap().is_empty());
    }

    #[test]
    fn test_expiry_uses_max_hold() {
        let policy = RetryPolicy::default();
        let entry = RetryEntry {
            id: "x".into(),
            kind: RetryKind::Tx,
            chain_id: 1,
            nft_address: None,
            did: None,
            params: json!({}),
            number_retries: 0,
            next_retry: 0,
            first_added: 0,
            last_error: None,
        };
        let hold = policy.max_hold.as_secs() as i64;
        assert!(!policy.is_expired(&entry, hold));
        assert!(policy.is_expired(&entry, hold + 1));
    }
}
