//! Multi-chain DDO event indexer for the metadata cache.
//!
//! This crate provides:
//! - A per-chain event monitor with a persisted block cursor
//! - Event processors that decrypt, validate and materialize DDOs
//! - A retry queue for transactions, blocks and events that failed transiently
//! - Purgatory, voting-escrow and NFT ownership reconciliation
//! - A state tracker recording the outcome of every metadata event
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  ddocache-indexer (this)                   │
//! │                                            │
//! │  per chain:                                │
//! │  ┌───────────────┐      ┌──────────────┐   │
//! │  │ Event Monitor │ ───► │  Processors  │ ◄─┼── decryptor, subgraph, RBAC
//! │  └───────┬───────┘      └──────┬───────┘   │
//! │          │ transient           │           │
//! │  ┌───────▼───────┐             │           │
//! │  │ Retry Worker  │ ────────────┤           │
//! │  └───────────────┘             │           │
//! │                         ┌──────▼───────┐   │
//! │  global:                │   Storage    │   │
//! │  purgatory, veAllocate ►│   (SQLite)   │   │
//! │                         └──────┬───────┘   │
//! └────────────────────────────────┼───────────┘
//!                                  │ shared DB
//! ┌────────────────────────────────▼───────────┐
//! │  ddocache-api (separate)                   │
//! │  GET /chains/*, GET /state/*,              │
//! │  POST /ddo/validate                        │
//! └────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod decryptor;
pub mod error;
pub mod graph;
pub mod listener;
pub mod processor;
pub mod rbac;
pub mod reconcile;
pub mod retry;
pub mod shell;
pub mod storage;

pub use context::{ChainContext, MonitorSettings, PublishPolicy};
pub use error::{ErrorClass, ProcessError};
pub use shell::IndexerShell;
