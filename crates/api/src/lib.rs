//! Axum-based API server for the DDO metadata cache.
//!
//! This crate provides:
//! - `/health` - Liveness check
//! - `/ddo/validate` - Validate a DDO without storing it
//! - `/chains/list`, `/chains/status/:chainId` - Indexed chains and their cursors
//! - `/state/ddo`, `/state/retryQueue` - Processing outcomes and pending retries

#![warn(missing_docs)]

/// API server runtime and in-process app builder.
pub mod server;
