//! Shared constants for the metadata cache.

/// Prefix of every asset identifier.
pub const DID_PREFIX: &str = "did:op:";

/// DDO schema versions accepted by the validator.
///
/// Unknown versions are rejected outright; there is no fallback schema.
pub const ALLOWED_VERSIONS: [&str; 3] = ["4.1.0", "4.3.0", "4.5.0"];

/// Payload flag: data is lzma (`.xz` container) compressed.
pub const FLAG_LZMA: u8 = 0b0000_0001;

/// Payload flag: data is ECIES encrypted.
pub const FLAG_ECIES: u8 = 0b0000_0010;

/// Top-level document keys owned by the cache, never trusted from input.
pub const SYSTEM_FIELDS: [&str; 5] = ["event", "nft", "datatokens", "stats", "purgatory"];

/// Keys a soft-deleted document keeps besides `id`.
pub const SOFT_DELETE_FIELDS: [&str; 4] = ["event", "nft", "datatokens", "stats"];

/// Token id used for the single ERC-721 token of a data NFT.
pub const DATA_NFT_TOKEN_ID: u64 = 1;
