//! Hashing utilities.
//!
//! Keccak256 is used for did derivation and signed messages; SHA-256 is the
//! metadata hash committed on chain for every DDO payload.

use alloy_primitives::{keccak256 as alloy_keccak256, B256};
use sha2::{Digest, Sha256};

/// Compute keccak256 hash of input data.
///
/// # Example
///
/// ```
/// use ddocache_core::hashing::keccak256;
///
/// let hash = keccak256(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> B256 {
    alloy_keccak256(data)
}

/// Compute the SHA-256 digest of input data.
pub fn sha256(data: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(data))
}

/// Compare the SHA-256 of `cleartext` against an on-chain metadata hash.
///
/// The on-chain value is an opaque `bytes` field; anything other than a
/// 32-byte digest never matches.
pub fn metadata_hash_matches(cleartext: &[u8], expected: &[u8]) -> bool {
    expected.len() == 32 && sha256(cleartext).as_slice() == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn test_keccak256() {
        // Keccak256 (not SHA3-256) of the empty string
        let expected = B256::from(hex!(
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        ));
        assert_eq!(keccak256(b""), expected);
    }

    #[test]
    fn test_sha256() {
        let expected = B256::from(hex!(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        ));
        assert_eq!(sha256(b"abc"), expected);
    }

    #[test]
    fn test_metadata_hash_matches() {
        let body = br#"{"id":"did:op:00"}"#;
        let digest = sha256(body);

        assert!(metadata_hash_matches(body, digest.as_slice()));
        assert!(!metadata_hash_matches(b"other", digest.as_slice()));
        assert!(!metadata_hash_matches(body, &digest.as_slice()[..31]));
    }
}
