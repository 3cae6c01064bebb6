//! Voting-escrow allocations written to `stats.allocated`.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Result;
use ddocache_core::make_did;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::FeedClient;
use crate::listener::monitor::sleep_or_cancel;
use crate::storage::{CursorKind, Storage};

/// One row of the allocation feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VeAllocation {
    #[allow(missing_docs)]
    pub nft_addr: String,
    #[allow(missing_docs)]
    #[serde(deserialize_with = "number_or_string")]
    pub ve_allocated: f64,
    #[allow(missing_docs)]
    #[serde(rename = "chainID")]
    pub chain_id: u64,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("allocation out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {other}"
        ))),
    }
}

type AllocationKey = (u64, Address);

/// Global voting-escrow loop.
pub struct VeAllocateTask {
    storage: Storage,
    feeds: FeedClient,
    url: Option<String>,
    interval: Duration,
    previous: HashMap<AllocationKey, f64>,
}

impl VeAllocateTask {
    #[allow(missing_docs)]
    pub fn new(storage: Storage, feeds: FeedClient, url: Option<String>, interval: Duration) -> Self {
        Self {
            storage,
            feeds,
            url,
            interval,
            previous: HashMap::new(),
        }
    }

    /// Fetch and apply the feed. Returns the number of records written.
    pub async fn tick(&mut self) -> Result<usize> {
        let Some(url) = self.url.clone() else {
            return Ok(0);
        };
        match self.feeds.fetch::<Vec<VeAllocation>>(&url).await {
            Ok(rows) => self.tick_with(rows).await,
            Err(e) => {
                warn!("veAllocate feed unavailable: {:#}", e);
                Ok(0)
            }
        }
    }

    /// Apply a fetched feed. NFTs missing from it since the last tick go back to 0.
    pub async fn tick_with(&mut self, rows: Vec<VeAllocation>) -> Result<usize> {
        let mut current = HashMap::with_capacity(rows.len());
        for row in rows {
            match row.nft_addr.parse::<Address>() {
                Ok(nft) => {
                    current.insert((row.chain_id, nft), row.ve_allocated);
                }
                Err(_) => debug!("Skipping malformed NFT address {}", row.nft_addr),
            }
        }

        let mut written = 0;
        for (key, allocated) in &current {
            if self.write(*key, *allocated).await? {
                written += 1;
            }
        }

        let removed: Vec<AllocationKey> = self
            .previous
            .keys()
            .filter(|key| !current.contains_key(*key))
            .copied()
            .collect();
        for key in removed {
            if self.write(key, 0.0).await? {
                written += 1;
            }
        }

        let chains: BTreeSet<u64> = current.keys().map(|(chain, _)| *chain).collect();
        for chain_id in chains {
            if let Some(block) = self.storage.get_cursor(chain_id, CursorKind::Logs).await? {
                self.storage
                    .advance_cursor(chain_id, CursorKind::Reconciliation, block)
                    .await?;
            }
        }

        self.previous = current;
        Ok(written)
    }

    async fn write(&self, (chain_id, nft): AllocationKey, allocated: f64) -> Result<bool> {
        let did = make_did(&nft, chain_id);
        let Some(record) = self.storage.get_asset(&did).await? else {
            return Ok(false);
        };
        if record.stats.allocated == allocated {
            return Ok(false);
        }
        self.storage
            .set_field(&did, "$.stats.allocated", &json!(allocated))
            .await
    }

    /// Loop until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!("veAllocate task starting");

        while !cancel.is_cancelled() {
            match self.tick().await {
                Ok(0) => {}
                Ok(written) => info!("veAllocate: {} allocations updated", written),
                Err(e) => warn!("veAllocate tick failed: {:#}", e),
            }
            sleep_or_cancel(self.interval, &cancel).await;
        }

        info!("veAllocate task stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_rows_accept_strings() {
        let rows: Vec<VeAllocation> = serde_json::from_value(json!([
            {"nft_addr": "0x0000000000000000000000000000000000000001", "ve_allocated": "12.5", "chainID": 8996},
            {"nft_addr": "0x0000000000000000000000000000000000000002", "ve_allocated": 3, "chainID": 1}
        ]))
        .unwrap();
        assert_eq!(rows[0].ve_allocated, 12.5);
        assert_eq!(rows[1].ve_allocated, 3.0);
        assert_eq!(rows[0].chain_id, 8996);
    }
}
