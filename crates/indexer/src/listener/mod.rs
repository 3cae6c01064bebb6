//! Chain-facing side of the indexer.
//!
//! This module provides:
//! - Event definitions and decoding for the metadata contracts
//! - The [`ChainClient`] seam and its alloy RPC implementation
//! - The per-chain event monitor

pub mod chain;
pub mod events;
pub mod monitor;
pub mod provider;

pub use chain::{ChainClient, ChainError, DatatokenDetails, LogEntry, NftDetails, TxReceipt};
pub use events::{
    is_metadata_write, metadata_validators, watched_topics, ChainEvent, EventKind, EventMeta,
    MetadataPayload,
};
pub use monitor::{scan_range, EventMonitor, MonitorStep};
pub use provider::RpcProvider;
