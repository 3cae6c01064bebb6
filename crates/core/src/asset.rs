//! Stored asset records: a DDO plus the fields the cache owns.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::SYSTEM_FIELDS;
use crate::ddo::Ddo;
use crate::did::Did;
use crate::error::{CoreError, Result};
use crate::types::NftState;

/// The chain event that last wrote the DDO body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Transaction hash.
    pub tx: B256,
    /// Block number.
    pub block: u64,
    /// Sender of the transaction (publisher).
    pub from: Address,
    /// Contract that emitted the event.
    pub contract: Address,
    /// Block timestamp, ISO-8601.
    pub datetime: String,
}

/// Position of a log on chain, ordered by block then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPosition {
    #[allow(missing_docs)]
    pub block: u64,
    #[allow(missing_docs)]
    pub log_index: u64,
}

impl EventPosition {
    /// Position of log `log_index` in `block`.
    pub const fn new(block: u64, log_index: u64) -> Self {
        Self { block, log_index }
    }
}

/// On-chain view of the data NFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftInfo {
    #[allow(missing_docs)]
    pub address: Address,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub symbol: String,
    /// Lifecycle state.
    pub state: NftState,
    /// Token URI of token 1.
    #[serde(rename = "tokenURI")]
    pub token_uri: String,
    /// Current owner of token 1.
    pub owner: Address,
    /// Datetime of the first create, kept across updates.
    pub created: String,
    /// Last applied `MetadataState`; older state logs are ignored.
    #[serde(rename = "stateEvent", default, skip_serializing_if = "Option::is_none")]
    pub state_event: Option<EventPosition>,
    /// Last applied `TokenURIUpdate`; older ones are ignored.
    #[serde(rename = "tokenURIEvent", default, skip_serializing_if = "Option::is_none")]
    pub token_uri_event: Option<EventPosition>,
}

/// A datatoken attached to the NFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatokenInfo {
    #[allow(missing_docs)]
    pub address: Address,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub symbol: String,
    /// Id of the service using this datatoken, empty when none does.
    #[serde(rename = "serviceId")]
    pub service_id: String,
}

/// Price of the first active pricing schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    #[allow(missing_docs)]
    pub value: f64,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<Address>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
}

/// Order statistics and voting-escrow allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of orders across all datatokens.
    pub orders: u64,
    #[allow(missing_docs)]
    #[serde(default)]
    pub price: Price,
    /// veOCEAN allocated to the NFT.
    #[serde(default)]
    pub allocated: f64,
}

/// Soft-ban overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purgatory {
    #[allow(missing_docs)]
    pub state: bool,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One stored asset.
///
/// A record without a DDO is soft-deleted: its document keeps `id`, `event`,
/// `nft`, `datatokens` and `stats` only.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    #[allow(missing_docs)]
    pub id: Did,
    /// Chain of the NFT, kept outside the document.
    pub chain_id: u64,
    #[allow(missing_docs)]
    pub ddo: Option<Ddo>,
    #[allow(missing_docs)]
    pub event: EventInfo,
    #[allow(missing_docs)]
    pub nft: NftInfo,
    #[allow(missing_docs)]
    pub datatokens: Vec<DatatokenInfo>,
    #[allow(missing_docs)]
    pub stats: Stats,
    #[allow(missing_docs)]
    pub purgatory: Purgatory,
}

impl AssetRecord {
    /// Whether the DDO body has been removed.
    pub fn is_soft_deleted(&self) -> bool {
        self.ddo.is_none()
    }

    /// Drop the DDO body and the purgatory overlay.
    pub fn soft_delete(&mut self) {
        self.ddo = None;
        self.purgatory = Purgatory::default();
    }

    /// Render the document persisted in the store.
    pub fn to_document(&self) -> Result<Value> {
        let mut doc = match &self.ddo {
            Some(ddo) => match ddo.to_value()? {
                Value::Object(map) => map,
                _ => return Err(CoreError::MalformedDocument("ddo is not an object".into())),
            },
            None => {
                let mut map = Map::new();
                map.insert("id".into(), Value::String(self.id.to_string()));
                map
            }
        };

        doc.insert("event".into(), to_json(&self.event)?);
        doc.insert("nft".into(), to_json(&self.nft)?);
        doc.insert("datatokens".into(), to_json(&self.datatokens)?);
        doc.insert("stats".into(), to_json(&self.stats)?);
        if self.ddo.is_some() {
            doc.insert("purgatory".into(), to_json(&self.purgatory)?);
        }
        Ok(Value::Object(doc))
    }

    /// Rebuild a record from a stored document.
    pub fn from_document(chain_id: u64, mut doc: Value) -> Result<Self> {
        let id: Did = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MalformedDocument("missing id".into()))?
            .parse()?;

        let event = take_field(&mut doc, "event")?
            .ok_or_else(|| CoreError::MalformedDocument("missing event".into()))?;
        let nft = take_field(&mut doc, "nft")?
            .ok_or_else(|| CoreError::MalformedDocument("missing nft".into()))?;
        let datatokens = take_field(&mut doc, "datatokens")?.unwrap_or_default();
        let stats = take_field(&mut doc, "stats")?.unwrap_or_default();
        let purgatory = take_field(&mut doc, "purgatory")?.unwrap_or_default();

        let has_body = doc
            .as_object()
            .map(|map| map.keys().any(|k| k != "id"))
            .unwrap_or(false);
        let ddo = if has_body {
            Some(Ddo::from_value(doc)?)
        } else {
            None
        };

        Ok(Self {
            id,
            chain_id,
            ddo,
            event,
            nft,
            datatokens,
            stats,
            purgatory,
        })
    }
}

/// Remove every cache-owned key from an incoming document.
pub fn strip_system_fields(doc: &mut Value) {
    if let Value::Object(map) = doc {
        for field in SYSTEM_FIELDS {
            map.remove(field);
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::MalformedDocument(e.to_string()))
}

fn take_field<T: serde::de::DeserializeOwned>(doc: &mut Value, key: &str) -> Result<Option<T>> {
    match doc.as_object_mut().and_then(|map| map.remove(key)) {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CoreError::MalformedDocument(format!("{key}: {e}"))),
        None => Ok(None),
    }
}
