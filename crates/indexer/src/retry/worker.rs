//! Per-chain replay of due retry entries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RetryQueue, RetryTarget};
use crate::context::ChainContext;
use crate::decryptor::MetadataDecryptor;
use crate::error::ProcessError;
use crate::graph::SubgraphSource;
use crate::listener::monitor::sleep_or_cancel;
use crate::listener::{watched_topics, ChainClient, LogEntry};
use crate::processor::{dispatch_log, record_state};
use crate::storage::{unix_now, DdoState, RetryEntry};

const BATCH_SIZE: u32 = 50;

/// Counts from one pass over the due entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Replayed and removed.
    pub acked: usize,
    /// Failed transiently again.
    pub rescheduled: usize,
    /// Past `max_hold`, removed without replay.
    pub expired: usize,
}

/// Replays due units of one chain.
pub struct RetryWorker<C, D, G> {
    ctx: Arc<ChainContext<C, D, G>>,
    queue: RetryQueue,
    interval: Duration,
}

impl<C, D, G> RetryWorker<C, D, G>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    /// Worker polling every `interval`.
    pub fn new(ctx: Arc<ChainContext<C, D, G>>, interval: Duration) -> Self {
        let queue = ctx.retry_queue();
        Self {
            ctx,
            queue,
            interval,
        }
    }

    /// Handle every entry due at `now`.
    pub async fn process_due(&self, now: i64) -> Result<RetryStats> {
        let mut stats = RetryStats::default();
        let due = self.queue.pop_due(self.ctx.chain_id, now, BATCH_SIZE).await?;

        for entry in due {
            if self.queue.policy().is_expired(&entry, now) {
                info!(
                    chain_id = self.ctx.chain_id,
                    "Dropping {} retry {} after {} attempts", entry.kind, entry.id, entry.number_retries
                );
                self.queue.ack(&entry.id).await?;
                stats.expired += 1;
                continue;
            }

            match self.replay(&entry).await {
                Ok(()) => {
                    self.queue.ack(&entry.id).await?;
                    stats.acked += 1;
                }
                Err(e) if e.is_transient() => {
                    let next = self.queue.extend(&entry, &e.to_string(), now).await?;
                    debug!(
                        chain_id = self.ctx.chain_id,
                        "Retry {} failed again, next attempt at {}: {}", entry.id, next, e
                    );
                    stats.rescheduled += 1;
                }
                Err(e) => {
                    self.record_permanent(&entry, &e).await;
                    self.queue.ack(&entry.id).await?;
                    stats.acked += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Replay one entry. Permanent failures of individual logs are recorded
    /// by the processors' state records and do not fail the unit; the first
    /// transient failure does.
    async fn replay(&self, entry: &RetryEntry) -> Result<(), ProcessError> {
        let target = RetryTarget::from_entry(entry)
            .map_err(|e| ProcessError::Integrity(format!("{e:#}")))?;

        let logs = match target {
            RetryTarget::Tx(tx) => self.receipt_logs(tx).await?,
            RetryTarget::Block(block) => {
                let mut logs = self
                    .ctx
                    .chain
                    .get_logs(block, block, &watched_topics())
                    .await
                    .map_err(ProcessError::block)?;
                logs.sort_by_key(|log| log.log_index);
                logs
            }
            RetryTarget::Event { tx, log_index } => {
                let logs = self.receipt_logs(tx).await?;
                let log = logs
                    .into_iter()
                    .find(|log| log.log_index == log_index)
                    .ok_or_else(|| {
                        ProcessError::Integrity(format!("log {log_index} not found in {tx}"))
                    })?;
                vec![log]
            }
        };

        let mut first_transient = None;
        for log in &logs {
            let Some(dispatched) = dispatch_log(self.ctx.as_ref(), log).await else {
                continue;
            };
            if let Err(e) = record_state(self.ctx.as_ref(), &dispatched).await {
                warn!(chain_id = self.ctx.chain_id, "Failed to record state: {:#}", e);
            }
            if let Err(e) = dispatched.result {
                if e.is_transient() && first_transient.is_none() {
                    first_transient = Some(e);
                }
            }
        }

        match first_transient {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn receipt_logs(&self, tx: alloy::primitives::B256) -> Result<Vec<LogEntry>, ProcessError> {
        let receipt = self
            .ctx
            .chain
            .get_receipt(tx)
            .await
            .map_err(ProcessError::tx)?
            .ok_or_else(|| ProcessError::tx(format!("no receipt for {tx}")))?;
        Ok(receipt.logs)
    }

    async fn record_permanent(&self, entry: &RetryEntry, error: &ProcessError) {
        warn!(
            chain_id = self.ctx.chain_id,
            class = %error.class(),
            "Retry {} failed permanently: {}", entry.id, error
        );

        let (Some(nft), Some(tx)) = (
            entry.nft_address.clone(),
            entry.params.get("txId").and_then(|v| v.as_str()),
        ) else {
            return;
        };

        let state = DdoState {
            chain_id: self.ctx.chain_id,
            nft,
            tx: tx.to_string(),
            did: entry.did.clone(),
            valid: false,
            message: error.to_string(),
            timestamp: unix_now(),
        };
        if let Err(e) = self.ctx.storage.record_state(&state).await {
            warn!(chain_id = self.ctx.chain_id, "Failed to record state: {:#}", e);
        }
    }

    /// Loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(chain_id = self.ctx.chain_id, "Retry worker starting");

        while !cancel.is_cancelled() {
            match self.process_due(unix_now()).await {
                Ok(stats) if stats != RetryStats::default() => info!(
                    chain_id = self.ctx.chain_id,
                    "Retry pass: {} acked, {} rescheduled, {} expired",
                    stats.acked,
                    stats.rescheduled,
                    stats.expired
                ),
                Ok(_) => {}
                Err(e) => warn!(chain_id = self.ctx.chain_id, "Retry pass failed: {:#}", e),
            }

            sleep_or_cancel(self.interval, &cancel).await;
        }

        info!(chain_id = self.ctx.chain_id, "Retry worker stopped");
        Ok(())
    }
}
