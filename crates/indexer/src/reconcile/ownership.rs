//! NFT ownership from subgraph transfer history.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ddocache_core::make_did;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::ChainContext;
use crate::graph::{SubgraphSource, TRANSFER_PAGE_SIZE};
use crate::listener::monitor::sleep_or_cancel;
use crate::storage::CursorKind;

/// Per-chain loop applying transfers after the `nft_ownership` cursor.
///
/// The cursor only moves past blocks whose transfers were all seen. When a
/// page ends inside a block, the rows of that block already applied are
/// skipped on the next query.
pub struct OwnershipTask<C, D, G> {
    ctx: Arc<ChainContext<C, D, G>>,
    interval: Duration,
    page_size: u32,
    skip: AtomicU32,
}

impl<C, D, G> OwnershipTask<C, D, G>
where
    C: Send + Sync + 'static,
    D: Send + Sync + 'static,
    G: SubgraphSource,
{
    #[allow(missing_docs)]
    pub fn new(ctx: Arc<ChainContext<C, D, G>>, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            page_size: TRANSFER_PAGE_SIZE,
            skip: AtomicU32::new(0),
        }
    }

    /// Override the number of transfers requested per tick.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Apply one page of transfers. Returns the number of owners changed.
    pub async fn tick(&self) -> Result<usize> {
        let chain_id = self.ctx.chain_id;
        let since = self
            .ctx
            .storage
            .get_cursor(chain_id, CursorKind::NftOwnership)
            .await?
            .unwrap_or(0);

        let skip = self.skip.load(Ordering::Relaxed);
        let transfers = self
            .ctx
            .graph
            .nft_transfers_since(since, skip, self.page_size)
            .await?;
        let mut changed = 0;

        for transfer in &transfers {
            let did = make_did(&transfer.nft, chain_id);
            let Some(record) = self.ctx.storage.get_asset(&did).await? else {
                continue;
            };
            if record.nft.owner == transfer.new_owner {
                continue;
            }
            if self
                .ctx
                .storage
                .set_field(&did, "$.nft.owner", &serde_json::to_value(transfer.new_owner)?)
                .await?
            {
                changed += 1;
            }
        }

        let Some(last_block) = transfers.iter().map(|t| t.block).max() else {
            return Ok(changed);
        };

        let (complete, next_skip) = if transfers.len() < self.page_size as usize {
            (last_block, 0)
        } else {
            // Full page: the last block may continue on the next one.
            let in_last = transfers.iter().filter(|t| t.block == last_block).count() as u32;
            if last_block - 1 > since {
                (last_block - 1, in_last)
            } else {
                (since, skip + in_last)
            }
        };

        if complete > since {
            self.ctx
                .storage
                .advance_cursor(chain_id, CursorKind::NftOwnership, complete)
                .await?;
        }
        self.skip.store(next_skip, Ordering::Relaxed);
        Ok(changed)
    }

    /// Loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let chain_id = self.ctx.chain_id;
        info!(chain_id, "Ownership task starting");

        while !cancel.is_cancelled() {
            match self.tick().await {
                Ok(0) => {}
                Ok(changed) => info!(chain_id, "Ownership: {} owners updated", changed),
                Err(e) => warn!(chain_id, "Ownership tick failed: {:#}", e),
            }
            sleep_or_cancel(self.interval, &cancel).await;
        }

        info!(chain_id, "Ownership task stopped");
        Ok(())
    }
}
