//! Event processors.
//!
//! [`dispatch_log`] decodes a log, resolves the NFT it concerns through the
//! factory and hands it to the processor for its event kind. Logs that do not
//! decode to a watched event, or whose NFT the factory did not deploy, yield
//! `None` and leave no trace.
//!
//! Processors return a [`ProcessOutcome`] or a classified [`ProcessError`];
//! the caller records metadata outcomes with [`record_state`] and enqueues
//! transient failures.

mod metadata;
mod order;
mod state;
mod token_uri;

use alloy::primitives::{Address, B256};
use anyhow::Result;
use ddocache_core::did::lowercase_address;
use ddocache_core::{make_did, Did};
use tracing::{debug, info, warn};

use crate::context::ChainContext;
use crate::decryptor::MetadataDecryptor;
use crate::error::ProcessError;
use crate::graph::SubgraphSource;
use crate::listener::{ChainClient, ChainEvent, EventKind, LogEntry};
use crate::retry::RetryUnit;
use crate::storage::{unix_now, DdoState, RetryKind};

/// Result of a processed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Asset touched, when one exists.
    pub did: Option<Did>,
    /// Human-readable summary, stored in the state record.
    pub message: String,
    /// `false` for duplicates and events with nothing to apply.
    pub applied: bool,
}

impl ProcessOutcome {
    pub(crate) fn applied(did: Did, message: impl Into<String>) -> Self {
        Self {
            did: Some(did),
            message: message.into(),
            applied: true,
        }
    }

    pub(crate) fn ignored(did: Did, message: impl Into<String>) -> Self {
        Self {
            did: Some(did),
            message: message.into(),
            applied: false,
        }
    }
}

/// A log that reached a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Event name as emitted on chain.
    pub event: &'static str,
    /// Whether the event gets a state record.
    pub is_metadata: bool,
    /// Resolved data NFT.
    pub nft: Address,
    #[allow(missing_docs)]
    pub tx_hash: B256,
    #[allow(missing_docs)]
    pub block_number: u64,
    #[allow(missing_docs)]
    pub log_index: u64,
    #[allow(missing_docs)]
    pub result: Result<ProcessOutcome, ProcessError>,
}

impl Dispatched {
    /// did of the resolved NFT on `chain_id`.
    pub fn did(&self, chain_id: u64) -> Did {
        match &self.result {
            Ok(ProcessOutcome { did: Some(did), .. }) => did.clone(),
            _ => make_did(&self.nft, chain_id),
        }
    }

    /// Retry unit for a transient failure.
    pub fn retry_unit(&self, chain_id: u64) -> Option<RetryUnit> {
        let kind = self.result.as_ref().err()?.retry_kind()?;
        let unit = match kind {
            RetryKind::Tx => RetryUnit::tx(chain_id, self.tx_hash),
            RetryKind::Block => RetryUnit::block(chain_id, self.block_number),
            RetryKind::Event => {
                RetryUnit::event(chain_id, self.tx_hash, self.log_index)
            }
        };
        Some(unit.with_nft(&self.nft).with_did(&self.did(chain_id)))
    }
}

/// Decode, resolve and process one log.
pub async fn dispatch_log<C, D, G>(ctx: &ChainContext<C, D, G>, log: &LogEntry) -> Option<Dispatched>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    let event = match ChainEvent::from_log(log) {
        Ok(Some(event)) => event,
        Ok(None) => return None,
        Err(e) => {
            warn!(
                chain_id = ctx.chain_id,
                tx = %log.tx_hash,
                "Undecodable log from {}: {:#}", log.address, e
            );
            return None;
        }
    };

    let (nft, result) = match resolve_nft(ctx, &event).await {
        Ok(Some(nft)) => (nft, process_event(ctx, &event, nft).await),
        Ok(None) => {
            debug!(
                chain_id = ctx.chain_id,
                "Ignoring {} from {}: not deployed by the factory",
                event.kind.name(),
                log.address
            );
            return None;
        }
        Err(e) => (log.address, Err(e)),
    };

    let dispatched = Dispatched {
        event: event.kind.name(),
        is_metadata: event.kind.is_metadata(),
        nft,
        tx_hash: log.tx_hash,
        block_number: log.block_number,
        log_index: log.log_index,
        result,
    };

    match &dispatched.result {
        Ok(outcome) if outcome.applied => info!(
            chain_id = ctx.chain_id,
            block = dispatched.block_number,
            "{} for {}: {}",
            dispatched.event,
            lowercase_address(&nft),
            outcome.message
        ),
        Ok(outcome) => debug!(
            chain_id = ctx.chain_id,
            "{} for {} ignored: {}",
            dispatched.event,
            lowercase_address(&nft),
            outcome.message
        ),
        Err(e) => warn!(
            chain_id = ctx.chain_id,
            block = dispatched.block_number,
            class = %e.class(),
            "{} for {} failed: {}",
            dispatched.event,
            lowercase_address(&nft),
            e
        ),
    }

    Some(dispatched)
}

/// The data NFT an event concerns, `None` if the factory did not deploy it.
async fn resolve_nft<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    event: &ChainEvent,
) -> Result<Option<Address>, ProcessError>
where
    C: ChainClient,
{
    let contract = event.meta.contract;
    if let EventKind::OrderStarted { .. } = event.kind {
        return Ok(ctx.chain.datatoken_nft(contract).await?);
    }

    if ctx.chain.is_factory_nft(contract).await? {
        Ok(Some(contract))
    } else {
        Ok(None)
    }
}

async fn process_event<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    event: &ChainEvent,
    nft: Address,
) -> Result<ProcessOutcome, ProcessError>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    match &event.kind {
        EventKind::MetadataCreated(payload) => {
            metadata::apply(ctx, &event.meta, payload, metadata::WriteMode::Create).await
        }
        EventKind::MetadataUpdated(payload) => {
            metadata::apply(ctx, &event.meta, payload, metadata::WriteMode::Update).await
        }
        EventKind::MetadataState { state, .. } => state::apply(ctx, &event.meta, *state).await,
        EventKind::OrderStarted { .. } => order::apply(ctx, nft).await,
        EventKind::TokenUriUpdate { token_uri, .. } => {
            token_uri::apply(ctx, &event.meta, nft, token_uri).await
        }
    }
}

/// Write the state record of a metadata event.
///
/// Transient failures are recorded too, so a lookup shows why the asset is
/// not there yet; the retry overwrites the record with the final outcome.
pub async fn record_state<C, D, G>(ctx: &ChainContext<C, D, G>, dispatched: &Dispatched) -> Result<()> {
    if !dispatched.is_metadata {
        return Ok(());
    }

    let (valid, message) = match &dispatched.result {
        Ok(outcome) => (true, outcome.message.clone()),
        Err(e) if e.is_transient() => (false, format!("retry scheduled: {e}")),
        Err(e) => (false, e.to_string()),
    };

    ctx.storage
        .record_state(&DdoState {
            chain_id: ctx.chain_id,
            nft: lowercase_address(&dispatched.nft),
            tx: format!("0x{}", hex::encode(dispatched.tx_hash)),
            did: Some(dispatched.did(ctx.chain_id).to_string()),
            valid,
            message,
            timestamp: unix_now(),
        })
        .await
}
