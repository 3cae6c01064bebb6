//! `OrderStarted`.

use alloy::primitives::Address;
use ddocache_core::make_did;

use super::ProcessOutcome;
use crate::context::ChainContext;
use crate::error::ProcessError;
use crate::graph::SubgraphSource;

/// Refresh order count and price from the subgraph. Nothing else changes.
pub(crate) async fn apply<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    nft: Address,
) -> Result<ProcessOutcome, ProcessError>
where
    G: SubgraphSource,
{
    let did = make_did(&nft, ctx.chain_id);
    let Some(mut record) = ctx.storage.get_asset(&did).await.map_err(ProcessError::storage)? else {
        return Ok(ProcessOutcome::ignored(did, "no asset for order"));
    };

    let datatokens: Vec<Address> = record.datatokens.iter().map(|dt| dt.address).collect();
    let stats = ctx
        .graph
        .order_stats(nft, &datatokens)
        .await
        .map_err(|e| ProcessError::event(format!("order stats unavailable: {e:#}")))?;

    record.stats.orders = stats.orders;
    record.stats.price = stats.price;
    ctx.storage
        .put_asset_keeping_overlays(&record)
        .await
        .map_err(ProcessError::storage)?;

    Ok(ProcessOutcome::applied(
        did,
        format!("orders = {}", record.stats.orders),
    ))
}
