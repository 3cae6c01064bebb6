//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid NFT state value.
    #[error("Invalid NFT state: {0} (must be between 0 and 4)")]
    InvalidState(u8),

    /// DDO version outside the allow-list.
    #[error("Unsupported DDO version: {0}")]
    UnsupportedVersion(String),

    /// Invalid did format.
    #[error("Invalid did: {0}")]
    InvalidDid(String),

    /// Invalid address format.
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    /// Invalid hex encoding.
    #[error("Invalid hex encoding")]
    InvalidHex,

    /// Stored document could not be mapped onto the asset model.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
