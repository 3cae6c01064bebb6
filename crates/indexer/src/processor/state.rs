//! `MetadataState`.

use ddocache_core::{make_did, EventPosition, NftState};

use super::metadata::{self, WriteMode};
use super::ProcessOutcome;
use crate::context::ChainContext;
use crate::decryptor::MetadataDecryptor;
use crate::error::ProcessError;
use crate::graph::SubgraphSource;
use crate::listener::{is_metadata_write, ChainClient, ChainEvent, EventKind, EventMeta};

/// Set the NFT state. Deprecated and revoked soft-delete the asset; active
/// restores a soft-deleted asset from its last create or update.
///
/// A state log at or before the last applied one is ignored, so a replayed
/// older state cannot undo a newer one.
pub(crate) async fn apply<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    raw_state: u8,
) -> Result<ProcessOutcome, ProcessError>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    let state =
        NftState::try_from(raw_state).map_err(|e| ProcessError::Integrity(e.to_string()))?;
    let did = make_did(&meta.contract, ctx.chain_id);

    let Some(mut record) = ctx.storage.get_asset(&did).await.map_err(ProcessError::storage)? else {
        return Ok(ProcessOutcome::ignored(did, "no asset to change state"));
    };

    let position = EventPosition::new(meta.block_number, meta.log_index);
    if let Some(last) = record.nft.state_event {
        if position <= last {
            return Ok(ProcessOutcome::ignored(
                did,
                format!(
                    "stale state event: {}:{} is not after {}:{}",
                    position.block, position.log_index, last.block, last.log_index
                ),
            ));
        }
    }

    let message = if state == NftState::Active && record.is_soft_deleted() {
        restore(ctx, meta, record.event.tx).await?;
        record = ctx
            .storage
            .get_asset(&did)
            .await
            .map_err(ProcessError::storage)?
            .ok_or_else(|| ProcessError::Integrity("restore left no record".into()))?;
        "restored".to_string()
    } else if state.is_soft_deleted() && !record.is_soft_deleted() {
        record.soft_delete();
        format!("soft-deleted ({state})")
    } else {
        format!("state set to {state}")
    };

    record.nft.state = state;
    record.nft.state_event = Some(position);
    ctx.storage
        .put_asset_keeping_overlays(&record)
        .await
        .map_err(ProcessError::storage)?;

    Ok(ProcessOutcome::applied(did, message))
}

/// Re-run create semantics with the last create or update log of this NFT,
/// looked up in the receipt of the stored event, then in the state event's own.
async fn restore<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    stored_tx: alloy::primitives::B256,
) -> Result<(), ProcessError>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    let mut candidates = vec![stored_tx];
    if meta.tx_hash != stored_tx {
        candidates.push(meta.tx_hash);
    }

    for tx in candidates {
        let Some(receipt) = ctx.chain.get_receipt(tx).await.map_err(ProcessError::tx)? else {
            continue;
        };
        let Some(log) = receipt
            .logs
            .iter()
            .rev()
            .find(|log| is_metadata_write(log, meta.contract))
        else {
            continue;
        };

        let event = ChainEvent::from_log(log)
            .map_err(|e| ProcessError::Integrity(format!("{e:#}")))?
            .ok_or_else(|| ProcessError::Integrity("metadata log did not decode".into()))?;
        let (EventKind::MetadataCreated(payload) | EventKind::MetadataUpdated(payload)) =
            &event.kind
        else {
            continue;
        };

        metadata::apply(ctx, &event.meta, payload, WriteMode::Create).await?;
        return Ok(());
    }

    Err(ProcessError::Integrity(
        "no create or update log found to restore from".into(),
    ))
}
