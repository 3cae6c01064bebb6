//! `MetadataCreated` / `MetadataUpdated`.

use alloy::primitives::Address;
use ddocache_core::codec::{decompress, PayloadFlags};
use ddocache_core::did::lowercase_address;
use ddocache_core::hashing::metadata_hash_matches;
use ddocache_core::{
    make_did, strip_system_fields, AssetRecord, DatatokenInfo, Ddo, EventInfo, NftInfo, NftState,
    Purgatory, Stats,
};
use serde_json::Value;
use tracing::warn;

use super::ProcessOutcome;
use crate::context::ChainContext;
use crate::decryptor::{DecryptRequest, MetadataDecryptor};
use crate::error::ProcessError;
use crate::graph::SubgraphSource;
use crate::listener::{metadata_validators, ChainClient, EventMeta, MetadataPayload, TxReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Create,
    Update,
}

impl WriteMode {
    fn event_name(self) -> &'static str {
        match self {
            WriteMode::Create => "MetadataCreated",
            WriteMode::Update => "MetadataUpdated",
        }
    }
}

/// Apply a create or update.
///
/// A create is ignored while a live record exists; on a soft-deleted record it
/// restores. An update is ignored when it repeats the stored transaction or
/// is not newer than the stored block; without a stored record it creates.
pub(crate) async fn apply<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    payload: &MetadataPayload,
    mode: WriteMode,
) -> Result<ProcessOutcome, ProcessError>
where
    C: ChainClient,
    D: MetadataDecryptor,
    G: SubgraphSource,
{
    let nft = meta.contract;
    let did = make_did(&nft, ctx.chain_id);
    let existing = ctx.storage.get_asset(&did).await.map_err(ProcessError::storage)?;

    if let Some(stored) = &existing {
        match mode {
            WriteMode::Create if !stored.is_soft_deleted() => {
                return Ok(ProcessOutcome::ignored(did, "asset already exists"));
            }
            WriteMode::Update if stored.event.tx == meta.tx_hash => {
                return Ok(ProcessOutcome::ignored(did, "update already applied"));
            }
            WriteMode::Update if meta.block_number <= stored.event.block => {
                return Ok(ProcessOutcome::ignored(
                    did,
                    format!(
                        "stale update: block {} is not after stored block {}",
                        meta.block_number, stored.event.block
                    ),
                ));
            }
            _ => {}
        }
    }

    let receipt = ctx
        .chain
        .get_receipt(meta.tx_hash)
        .await
        .map_err(ProcessError::tx)?
        .ok_or_else(|| ProcessError::tx(format!("no receipt for {}", meta.tx_hash)))?;

    let cleartext = cleartext(ctx, meta, payload).await?;
    if !metadata_hash_matches(&cleartext, &payload.metadata_hash) {
        return Err(ProcessError::Integrity(
            "metadata hash does not match payload".into(),
        ));
    }

    let mut document: Value = serde_json::from_slice(&cleartext)
        .map_err(|e| ProcessError::Integrity(format!("payload is not valid JSON: {e}")))?;
    strip_system_fields(&mut document);

    let report = ctx
        .validator
        .validate_dict(&document, ctx.chain_id, &lowercase_address(&nft))
        .map_err(|e| ProcessError::Integrity(format!("validator fault: {e}")))?;
    if !report.conforms {
        return Err(ProcessError::Integrity(format!(
            "ddo failed validation: {}",
            report.summary()
        )));
    }

    authorize(ctx, mode.event_name(), &receipt, nft).await?;

    let ddo = Ddo::from_value(document)
        .map_err(|e| ProcessError::Integrity(format!("ddo does not match model: {e}")))?;
    let state = NftState::try_from(payload.state)
        .map_err(|e| ProcessError::Integrity(e.to_string()))?;

    let action = match &existing {
        Some(stored) if !stored.is_soft_deleted() => "updated",
        Some(_) => "restored",
        None => "created",
    };

    let record = materialize(ctx, meta, &receipt, ddo, state, existing).await?;
    ctx.storage
        .put_asset_keeping_overlays(&record)
        .await
        .map_err(ProcessError::storage)?;

    Ok(ProcessOutcome::applied(did, action))
}

/// Final DDO bytes: decrypted (and decompressed) by the decryptor for ECIES
/// payloads, otherwise the raw bytes, decompressed when flagged.
async fn cleartext<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    payload: &MetadataPayload,
) -> Result<Vec<u8>, ProcessError>
where
    D: MetadataDecryptor,
{
    let flags = PayloadFlags::new(payload.flags_byte());

    if flags.is_encrypted() {
        let request = DecryptRequest {
            provider_url: payload.decryptor_url.clone(),
            tx_id: meta.tx_hash,
            chain_id: ctx.chain_id,
            nft_address: meta.contract,
            metadata_hash: payload.metadata_hash.to_vec(),
            flags,
            data: payload.data.to_vec(),
        };
        return Ok(ctx.decryptor.decrypt(&request).await?);
    }

    if flags.is_compressed() {
        return decompress(&payload.data)
            .map_err(|e| ProcessError::Integrity(format!("payload could not be decompressed: {e}")));
    }

    Ok(payload.data.to_vec())
}

async fn authorize<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    event_name: &str,
    receipt: &TxReceipt,
    nft: Address,
) -> Result<(), ProcessError> {
    if !ctx.policy.publisher_allowed(&receipt.from) {
        return Err(ProcessError::Unauthorized(format!(
            "publisher {} is not allowed",
            lowercase_address(&receipt.from)
        )));
    }

    if let Some(rbac) = &ctx.rbac {
        match rbac.is_allowed(event_name, receipt.from).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ProcessError::Unauthorized(format!(
                    "RBAC denied {} for {}",
                    event_name,
                    lowercase_address(&receipt.from)
                )))
            }
            Err(e) => return Err(ProcessError::event(format!("RBAC unavailable: {e:#}"))),
        }
    }

    if !ctx.policy.allowed_validators.is_empty() {
        let signers = metadata_validators(&receipt.logs, nft);
        if !ctx.policy.validators_allowed(&signers) {
            return Err(ProcessError::Unauthorized(
                "metadata is not signed by an allowed validator".into(),
            ));
        }
    }

    Ok(())
}

/// Build the stored record: chain views, block time, order stats, and the
/// overlays kept from the previous record.
async fn materialize<C, D, G>(
    ctx: &ChainContext<C, D, G>,
    meta: &EventMeta,
    receipt: &TxReceipt,
    ddo: Ddo,
    state: NftState,
    existing: Option<AssetRecord>,
) -> Result<AssetRecord, ProcessError>
where
    C: ChainClient,
    G: SubgraphSource,
{
    let nft = meta.contract;
    let details = ctx.chain.nft_details(nft).await?;

    let mut datatokens = Vec::with_capacity(details.datatokens.len());
    for address in &details.datatokens {
        let token = ctx.chain.datatoken_details(*address).await?;
        let service_id = ddo
            .service_for_datatoken(address)
            .map(|service| service.id.clone())
            .unwrap_or_default();
        datatokens.push(DatatokenInfo {
            address: token.address,
            name: token.name,
            symbol: token.symbol,
            service_id,
        });
    }

    let timestamp = ctx
        .chain
        .block_timestamp(meta.block_number)
        .await
        .map_err(ProcessError::block)?;
    let datetime = format_datetime(timestamp)
        .ok_or_else(|| ProcessError::block(format!("block {} has no valid timestamp", meta.block_number)))?;

    let order_stats = match ctx.graph.order_stats(nft, &details.datatokens).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(
                chain_id = ctx.chain_id,
                "Order stats unavailable for {}, storing zero: {:#}",
                lowercase_address(&nft),
                e
            );
            Default::default()
        }
    };

    let (created, markers, allocated, purgatory) = match existing {
        Some(stored) => (
            stored.nft.created,
            (stored.nft.state_event, stored.nft.token_uri_event),
            stored.stats.allocated,
            stored.purgatory,
        ),
        None => (datetime.clone(), (None, None), 0.0, Purgatory::default()),
    };

    Ok(AssetRecord {
        id: make_did(&nft, ctx.chain_id),
        chain_id: ctx.chain_id,
        ddo: Some(ddo),
        event: EventInfo {
            tx: meta.tx_hash,
            block: meta.block_number,
            from: receipt.from,
            contract: nft,
            datetime,
        },
        nft: NftInfo {
            address: nft,
            name: details.name,
            symbol: details.symbol,
            state,
            token_uri: details.token_uri,
            owner: details.owner,
            created,
            state_event: markers.0,
            token_uri_event: markers.1,
        },
        datatokens,
        stats: Stats {
            orders: order_stats.orders,
            price: order_stats.price,
            allocated,
        },
        purgatory,
    })
}

/// `YYYY-MM-DDTHH:MM:SS` in UTC.
pub(crate) fn format_datetime(timestamp: u64) -> Option<String> {
    let secs = i64::try_from(timestamp).ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}
