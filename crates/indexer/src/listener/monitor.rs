//! Per-chain event monitor.
//!
//! Each iteration reads the `logs` cursor `C` (the next block to scan), the
//! head `H`, and scans `[C, E]` where `E` is the confirmed head, capped at
//! `C + chunk - 1` while more than a chunk behind. After every log of the
//! range has been dispatched the cursor moves to `E + 1`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chain::ChainClient;
use super::events::watched_topics;
use crate::context::ChainContext;
use crate::decryptor::MetadataDecryptor;
use crate::graph::SubgraphSource;
use crate::processor::{dispatch_log, record_state};
use crate::retry::RetryQueue;
use crate::storage::{unix_now, CursorKind};

/// Result of one monitor iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStep {
    /// Nothing confirmed beyond the cursor.
    Idle {
        #[allow(missing_docs)]
        cursor: u64,
        #[allow(missing_docs)]
        head: u64,
    },
    /// `[from, to]` was scanned.
    Processed {
        #[allow(missing_docs)]
        from: u64,
        #[allow(missing_docs)]
        to: u64,
        /// Confirmed head at the time of the scan.
        safe: u64,
        /// Logs that reached a processor.
        dispatched: usize,
    },
}

/// Range to scan for cursor `cursor` and head `head`, `None` when idle.
pub fn scan_range(cursor: u64, head: u64, chunk_size: u64, confirmations: u64) -> Option<(u64, u64)> {
    let chunk = chunk_size.max(1);
    let safe = head.saturating_sub(confirmations);
    let end = if head.saturating_sub(cursor) > chunk {
        cursor.saturating_add(chunk - 1).min(safe)
    } else {
        safe
    };

    (end >= cursor).then_some((cursor, end))
}

/// Polls one chain and feeds its logs to the processors.
pub struct EventMonitor<C, D, G> {
    ctx: Arc<ChainContext<C, D, G>>,
    queue: RetryQueue,
    topics: Vec<B256>,
}

impl<C, D, G> EventMonitor<C, D, G>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    #[allow(missing_docs)]
    pub fn new(ctx: Arc<ChainContext<C, D, G>>) -> Self {
        let queue = ctx.retry_queue();
        Self {
            ctx,
            queue,
            topics: watched_topics(),
        }
    }

    /// Move the cursor back to the start block (`IGNORE_LAST_BLOCK`).
    pub async fn reset_to_start(&self) -> Result<()> {
        let start = self.ctx.monitor.start_block;
        warn!(
            chain_id = self.ctx.chain_id,
            "Resetting logs cursor to start block {}", start
        );
        self.ctx
            .storage
            .reset_cursor(self.ctx.chain_id, CursorKind::Logs, start)
            .await
    }

    async fn cursor(&self) -> Result<u64> {
        let chain_id = self.ctx.chain_id;
        match self.ctx.storage.get_cursor(chain_id, CursorKind::Logs).await? {
            Some(cursor) => Ok(cursor),
            None => {
                let start = self.ctx.monitor.start_block;
                info!(chain_id, "No cursor yet, starting at block {}", start);
                self.ctx
                    .storage
                    .advance_cursor(chain_id, CursorKind::Logs, start)
                    .await?;
                Ok(start)
            }
        }
    }

    /// One iteration. Errors are chain-level: the cursor is left untouched.
    pub async fn process_once(&self) -> Result<MonitorStep> {
        let chain_id = self.ctx.chain_id;
        let settings = self.ctx.monitor;

        let cursor = self.cursor().await?;
        let head = self
            .ctx
            .chain
            .block_number()
            .await
            .context("Failed to get head block")?;

        let Some((from, to)) =
            scan_range(cursor, head, settings.chunk_size, settings.confirmations)
        else {
            return Ok(MonitorStep::Idle { cursor, head });
        };

        let mut logs = self
            .ctx
            .chain
            .get_logs(from, to, &self.topics)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {} to {}", from, to))?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        debug!(chain_id, "Scanning blocks {} to {}: {} logs", from, to, logs.len());

        let mut dispatched_count = 0;
        for log in &logs {
            let Some(dispatched) = dispatch_log(self.ctx.as_ref(), log).await else {
                continue;
            };
            dispatched_count += 1;

            if let Err(e) = record_state(self.ctx.as_ref(), &dispatched).await {
                warn!(chain_id, "Failed to record state for {}: {:#}", dispatched.tx_hash, e);
            }

            if let (Some(unit), Err(err)) = (dispatched.retry_unit(chain_id), &dispatched.result) {
                let message = err.to_string();
                if let Err(e) = self.queue.add(&unit, Some(&message), unix_now()).await {
                    error!(
                        chain_id,
                        "Failed to enqueue {} retry for {}: {:#}", unit.kind, dispatched.tx_hash, e
                    );
                }
            }
        }

        self.ctx
            .storage
            .advance_cursor(chain_id, CursorKind::Logs, to + 1)
            .await?;

        if dispatched_count > 0 {
            info!(
                chain_id,
                "Processed blocks {} to {}: {} events", from, to, dispatched_count
            );
        }

        Ok(MonitorStep::Processed {
            from,
            to,
            safe: head.saturating_sub(settings.confirmations),
            dispatched: dispatched_count,
        })
    }

    /// Loop until cancelled. A running iteration always completes.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            chain_id = self.ctx.chain_id,
            network = %self.ctx.network,
            "Event monitor starting"
        );

        while !cancel.is_cancelled() {
            let pause = match self.process_once().await {
                Ok(MonitorStep::Processed { to, safe, .. }) if to < safe => None,
                Ok(_) => Some(self.ctx.monitor.quiet_time),
                Err(e) => {
                    warn!(chain_id = self.ctx.chain_id, "Monitor iteration failed: {:#}", e);
                    Some(self.ctx.monitor.quiet_time)
                }
            };

            if let Some(pause) = pause {
                sleep_or_cancel(pause, &cancel).await;
            }
        }

        info!(chain_id = self.ctx.chain_id, "Event monitor stopped");
        Ok(())
    }
}

/// Sleep, returning early when cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
