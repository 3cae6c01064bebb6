//! Asset identifiers.
//!
//! A did is `did:op:` followed by the 64 lowercase hex characters of
//! `keccak256(lowercase(nftAddress) || decimal(chainId))`, where both parts are
//! concatenated as UTF-8 text.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::DID_PREFIX;
use crate::error::CoreError;
use crate::hashing::keccak256;

/// Deterministic asset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Borrow the textual form (`did:op:<hex>`).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64-char hex part after the prefix.
    pub fn hex_part(&self) -> &str {
        &self.0[DID_PREFIX.len()..]
    }
}

/// Derive the did of a data NFT on a given chain.
///
/// # Example
///
/// ```
/// use ddocache_core::{make_did, Address};
///
/// let nft = Address::repeat_byte(0x11);
/// let did = make_did(&nft, 1337);
/// assert!(did.as_str().starts_with("did:op:"));
/// assert_eq!(did, make_did(&nft, 1337));
/// ```
pub fn make_did(nft_address: &Address, chain_id: u64) -> Did {
    let preimage = format!("{}{}", lowercase_address(nft_address), chain_id);
    let digest = keccak256(preimage.as_bytes());
    Did(format!("{}{}", DID_PREFIX, hex::encode(digest)))
}

/// Render an address as `0x` + lowercase hex.
pub fn lowercase_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| CoreError::InvalidDid(s.to_string()))?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidDid(s.to_string()));
        }
        Ok(Did(format!("{}{}", DID_PREFIX, hex_part.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Did {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn test_make_did_is_deterministic() {
        let nft = Address::from(hex!("1111111111111111111111111111111111111111"));

        let a = make_did(&nft, 1337);
        let b = make_did(&nft, 1337);
        assert_eq!(a, b);
        assert_ne!(a, make_did(&nft, 1));
        assert_eq!(a.hex_part().len(), 64);
    }

    #[test]
    fn test_make_did_matches_preimage() {
        let nft = Address::from(hex!("AbCdEf0123456789aBcDeF0123456789AbCdEf01"));
        let expected = keccak256(b"0xabcdef0123456789abcdef0123456789abcdef018996");

        let did = make_did(&nft, 8996);
        assert_eq!(did.hex_part(), hex::encode(expected));
    }

    #[test]
    fn test_did_parse() {
        let nft = Address::repeat_byte(0x42);
        let did = make_did(&nft, 137);

        let parsed: Did = did.as_str().parse().unwrap();
        assert_eq!(parsed, did);

        let upper = format!("did:op:{}", did.hex_part().to_uppercase());
        assert_eq!(upper.parse::<Did>().unwrap(), did);

        assert!("did:op:1234".parse::<Did>().is_err());
        assert!("did:web:example.com".parse::<Did>().is_err());
    }

    #[test]
    fn test_did_serde() {
        let did = make_did(&Address::repeat_byte(0x01), 1);
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, format!("\"{}\"", did));

        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
        assert!(serde_json::from_str::<Did>("\"not-a-did\"").is_err());
    }
}
