//! Purgatory: soft-ban overlay driven by two remote lists.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use ddocache_core::{Did, Purgatory};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::FeedClient;
use crate::listener::monitor::sleep_or_cancel;
use crate::storage::{DocumentQuery, Storage};

/// Entry of the asset list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PurgatoryAsset {
    #[allow(missing_docs)]
    pub did: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub reason: String,
}

/// Entry of the account list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PurgatoryAccount {
    #[allow(missing_docs)]
    pub address: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub reason: String,
}

/// Changes made by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgatoryStats {
    /// Records newly flagged or re-flagged with another reason.
    pub flagged: usize,
    /// Records cleared.
    pub forgiven: usize,
}

/// Global purgatory loop.
///
/// A did is flagged while the asset list names it or the account list names
/// its publisher. Forgiving needs both lists: each one counts as known once
/// fetched (or when its feed is not configured), and until then nothing is
/// cleared. The set of flagged dids is rebuilt from storage on the first tick,
/// so entries dropped from a list while the process was down are still
/// forgiven.
pub struct PurgatoryTask {
    storage: Storage,
    feeds: FeedClient,
    asset_url: Option<String>,
    account_url: Option<String>,
    interval: Duration,
    assets: Option<HashMap<String, String>>,
    accounts: Option<HashMap<String, String>>,
    flagged: Option<HashSet<String>>,
}

impl PurgatoryTask {
    #[allow(missing_docs)]
    pub fn new(
        storage: Storage,
        feeds: FeedClient,
        asset_url: Option<String>,
        account_url: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            assets: asset_url.is_none().then(HashMap::new),
            accounts: account_url.is_none().then(HashMap::new),
            storage,
            feeds,
            asset_url,
            account_url,
            interval,
            flagged: None,
        }
    }

    /// Fetch both lists and apply them.
    pub async fn tick(&mut self) -> Result<PurgatoryStats> {
        let assets = match &self.asset_url {
            Some(url) => match self.feeds.fetch::<Vec<PurgatoryAsset>>(url).await {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!("Asset purgatory list unavailable: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let accounts = match &self.account_url {
            Some(url) => match self.feeds.fetch::<Vec<PurgatoryAccount>>(url).await {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!("Account purgatory list unavailable: {:#}", e);
                    None
                }
            },
            None => None,
        };

        self.tick_with(assets, accounts).await
    }

    /// Apply fetched lists. `None` keeps the last known version of that list.
    pub async fn tick_with(
        &mut self,
        assets: Option<Vec<PurgatoryAsset>>,
        accounts: Option<Vec<PurgatoryAccount>>,
    ) -> Result<PurgatoryStats> {
        let mut stats = PurgatoryStats::default();

        let mut flagged = match self.flagged.take() {
            Some(flagged) => flagged,
            None => {
                let stored = self.storage.purgatory_flagged().await?;
                if !stored.is_empty() {
                    info!("Purgatory: {} flagged assets loaded from storage", stored.len());
                }
                stored.into_iter().collect()
            }
        };

        if assets.is_none() && accounts.is_none() {
            self.flagged = Some(flagged);
            return Ok(stats);
        }
        if let Some(assets) = assets {
            self.assets = Some(
                assets
                    .into_iter()
                    .map(|entry| (entry.did, entry.reason))
                    .collect(),
            );
        }
        if let Some(accounts) = accounts {
            self.accounts = Some(
                accounts
                    .into_iter()
                    .map(|entry| (entry.address.to_ascii_lowercase(), entry.reason))
                    .collect(),
            );
        }

        // Asset entries override the reason of an account entry.
        let mut wanted: HashMap<String, String> = HashMap::new();
        if let Some(accounts) = &self.accounts {
            for (account, reason) in accounts {
                for did in self.published_by(account).await? {
                    wanted.insert(did, reason.clone());
                }
            }
        }
        if let Some(assets) = &self.assets {
            for (did, reason) in assets {
                wanted.insert(did.clone(), reason.clone());
            }
        }

        for (did, reason) in &wanted {
            if self.set(did, true, Some(reason.clone())).await? {
                stats.flagged += 1;
            }
        }

        if self.assets.is_some() && self.accounts.is_some() {
            let released: Vec<String> = flagged
                .iter()
                .filter(|did| !wanted.contains_key(*did))
                .cloned()
                .collect();
            for did in released {
                if self.set(&did, false, None).await? {
                    stats.forgiven += 1;
                }
            }
            flagged = wanted.into_keys().collect();
        } else {
            flagged.extend(wanted.into_keys());
        }
        self.flagged = Some(flagged);

        Ok(stats)
    }

    async fn published_by(&self, account: &str) -> Result<Vec<String>> {
        let docs = self
            .storage
            .search_ddos(&DocumentQuery::default().field("$.event.from", account))
            .await?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get("id").and_then(|id| id.as_str()).map(str::to_string))
            .collect())
    }

    /// Write the overlay when it differs. Returns whether a write happened.
    async fn set(&self, did: &str, state: bool, reason: Option<String>) -> Result<bool> {
        let Ok(id) = did.parse::<Did>() else {
            warn!("Ignoring malformed did in purgatory list: {}", did);
            return Ok(false);
        };
        let Some(record) = self.storage.get_asset(&id).await? else {
            return Ok(false);
        };
        if record.is_soft_deleted() {
            return Ok(false);
        }

        let wanted = Purgatory { state, reason };
        if record.purgatory == wanted {
            return Ok(false);
        }

        self.storage
            .set_field(&id, "$.purgatory", &serde_json::to_value(&wanted)?)
            .await
    }

    /// Loop until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!("Purgatory task starting");

        while !cancel.is_cancelled() {
            match self.tick().await {
                Ok(stats) if stats != PurgatoryStats::default() => info!(
                    "Purgatory: {} flagged, {} forgiven",
                    stats.flagged, stats.forgiven
                ),
                Ok(_) => {}
                Err(e) => warn!("Purgatory tick failed: {:#}", e),
            }
            sleep_or_cancel(self.interval, &cancel).await;
        }

        info!("Purgatory task stopped");
        Ok(())
    }
}
