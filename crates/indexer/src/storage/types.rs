//! Database types for the indexer storage layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of per-chain block cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Last processed block of the event monitor.
    Logs,
    /// Subgraph block up to which NFT transfers were applied.
    NftOwnership,
    /// Last voting-escrow reconciliation pass.
    Reconciliation,
}

impl CursorKind {
    /// Column value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CursorKind::Logs => "logs",
            CursorKind::NftOwnership => "nft_ownership",
            CursorKind::Reconciliation => "reconciliation",
        }
    }
}

/// Stored cursor value for the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorStatus {
    /// Next block to process.
    pub last_block: u64,
    /// Unix seconds of the last write.
    pub updated_at: i64,
}

/// Unit of work held by the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    /// Every log of one transaction receipt.
    Tx,
    /// Every log of one block.
    Block,
    /// One log, addressed by transaction and log index.
    Event,
}

impl RetryKind {
    /// Column value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RetryKind::Tx => "tx",
            RetryKind::Block => "block",
            RetryKind::Event => "event",
        }
    }
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tx" => Ok(RetryKind::Tx),
            "block" => Ok(RetryKind::Block),
            "event" => Ok(RetryKind::Event),
            other => anyhow::bail!("Unknown retry kind: {}", other),
        }
    }
}

/// A persisted retry queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Hex SHA-256 of the canonical JSON of `params`.
    pub id: String,
    /// Unit kind.
    #[serde(rename = "type")]
    pub kind: RetryKind,
    /// Chain of the unit.
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    /// NFT the unit concerns, when known.
    #[serde(rename = "nftAddress", skip_serializing_if = "Option::is_none")]
    pub nft_address: Option<String>,
    /// did the unit concerns, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Replay parameters.
    pub params: serde_json::Value,
    /// Replays attempted so far.
    pub number_retries: u32,
    /// Unix seconds before which the unit is not due.
    pub next_retry: i64,
    /// Unix seconds of the first failure.
    pub first_added: i64,
    /// Message of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Filter for listing retry entries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryFilter {
    #[allow(missing_docs)]
    pub chain_id: Option<u64>,
    /// Compared case-insensitively.
    pub nft_address: Option<String>,
    #[allow(missing_docs)]
    pub did: Option<String>,
    #[allow(missing_docs)]
    pub kind: Option<RetryKind>,
}

/// Outcome of processing one transaction for one NFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdoState {
    #[serde(rename = "chainId")]
    #[allow(missing_docs)]
    pub chain_id: u64,
    /// NFT address, lowercase.
    pub nft: String,
    /// Transaction hash.
    pub tx: String,
    #[allow(missing_docs)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Whether the event was applied (or deliberately ignored).
    pub valid: bool,
    /// Diagnostic message.
    pub message: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Key for a state lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLookup {
    /// By NFT address (case-insensitive).
    Nft(String),
    /// By transaction hash (case-insensitive).
    Tx(String),
    /// By did.
    Did(String),
}

/// Query over stored documents.
///
/// `equals` holds `(json_path, value)` pairs compared case-insensitively
/// against `json_extract(document, json_path)`; `text` is a substring match
/// over the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentQuery {
    #[allow(missing_docs)]
    pub chain_id: Option<u64>,
    #[allow(missing_docs)]
    pub equals: Vec<(String, String)>,
    #[allow(missing_docs)]
    pub text: Option<String>,
    /// Maximum rows, unbounded when `None`.
    pub limit: Option<u32>,
}

impl DocumentQuery {
    /// Add a field-equality filter.
    pub fn field(mut self, json_path: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((json_path.into(), value.into()));
        self
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Stored documents, soft-deleted included.
    pub ddo_count: u64,
    /// Entries waiting in the retry queue.
    pub retry_count: u64,
    /// Recorded processing outcomes.
    pub state_count: u64,
    /// `logs` cursor per chain.
    pub chains: Vec<(u64, u64)>,
}
