//! `TokenURIUpdate`.

use alloy::primitives::Address;
use ddocache_core::{make_did, EventPosition};

use super::ProcessOutcome;
use crate::context::ChainContext;
use crate::error::ProcessError;
use crate::listener::EventMeta;

/// Store the new token URI unless a later `TokenURIUpdate` was already applied.
pub(crate) async fn apply<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    nft: Address,
    token_uri: &str,
) -> Result<ProcessOutcome, ProcessError> {
    let did = make_did(&nft, ctx.chain_id);
    let Some(mut record) = ctx.storage.get_asset(&did).await.map_err(ProcessError::storage)? else {
        return Ok(ProcessOutcome::ignored(did, "no asset for token URI"));
    };

    let position = EventPosition::new(meta.block_number, meta.log_index);
    if record.nft.token_uri_event.is_some_and(|last| position <= last) {
        return Ok(ProcessOutcome::ignored(did, "stale token URI event"));
    }
    if record.nft.token_uri == token_uri {
        return Ok(ProcessOutcome::ignored(did, "token URI unchanged"));
    }

    record.nft.token_uri = token_uri.to_string();
    record.nft.token_uri_event = Some(position);
    ctx.storage
        .put_asset_keeping_overlays(&record)
        .await
        .map_err(ProcessError::storage)?;

    Ok(ProcessOutcome::applied(did, "token URI updated"))
}
