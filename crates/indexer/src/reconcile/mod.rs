//! Reconciliation overlays.
//!
//! These loops write only the fields they own (`purgatory`,
//! `stats.allocated`, `nft.owner`) and never touch DDO schema fields. A feed
//! that cannot be fetched is skipped for the tick and tried again on the next.

pub mod ownership;
pub mod purgatory;
pub mod ve_allocate;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;

pub use ownership::OwnershipTask;
pub use purgatory::{PurgatoryAccount, PurgatoryAsset, PurgatoryStats, PurgatoryTask};
pub use ve_allocate::{VeAllocateTask, VeAllocation};

const FEED_TIMEOUT_SECS: u64 = 30;

/// HTTP client for JSON list feeds.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    #[allow(missing_docs)]
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FEED_TIMEOUT_SECS))
            .user_agent("ddocache-indexer/reconcile")
            .build()
            .context("Failed to build feed HTTP client")?;

        Ok(Self { client })
    }

    /// GET a JSON document.
    pub async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} returned {}", url, response.status()));
        }

        response
            .json()
            .await
            .with_context(|| format!("Unexpected payload from {}", url))
    }
}
