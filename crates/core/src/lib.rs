//! # DDO Cache Core
//!
//! Core types, constants, hashing utilities and the payload codec shared by the
//! metadata cache components.
//!
//! ## Features
//!
//! - **did**: deterministic asset identifiers derived from `(nftAddress, chainId)`
//! - **Hashing**: Keccak256 and SHA-256 helpers (metadata hash checks)
//! - **Codec**: flag-driven lzma compression and ECIES encryption of DDO payloads
//! - **Domain Types**: typed DDO documents, NFT state, system-owned fields

#![warn(missing_docs)]

pub mod asset;
pub mod codec;
pub mod constants;
pub mod ddo;
pub mod did;
pub mod error;
pub mod hashing;
pub mod types;

// Re-export commonly used items
pub use asset::*;
pub use constants::*;
pub use ddo::*;
pub use did::{make_did, Did};
pub use error::{CoreError, Result};
pub use hashing::{keccak256, sha256};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256};
