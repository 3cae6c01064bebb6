//! Flag-driven payload codec for on-chain DDO payloads.
//!
//! The first byte of an event's `flags` field selects the transforms applied to
//! the serialized DDO before it was written on chain:
//!
//! | bit | meaning |
//! |-----|---------|
//! | 0   | lzma compressed (`.xz` container) |
//! | 1   | ECIES encrypted for the decrypting party |
//!
//! Encoding compresses first and encrypts second; decoding reverses the order.
//!
//! The ECIES envelope is `ephemeral_pubkey (65, uncompressed SEC1) || nonce (12)
//! || AES-256-GCM ciphertext+tag`, keyed by
//! `HKDF-SHA256(salt = ephemeral_pubkey, ikm = ECDH shared x-coordinate)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ecdh, PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::io::{Read, Write};
use thiserror::Error;

use crate::constants::{FLAG_ECIES, FLAG_LZMA};

const EPHEMERAL_KEY_LEN: usize = 65;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const XZ_PRESET: u32 = 6;

/// Codec failures.
#[derive(Error, Debug)]
pub enum CodecError {
    /// lzma stream could not be produced or read.
    #[error("lzma error: {0}")]
    Lzma(#[from] std::io::Error),

    /// ECIES envelope is truncated or its key is malformed.
    #[error("malformed ECIES envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// AEAD open/seal failed (wrong key or tampered data).
    #[error("ECIES decryption failed")]
    Decryption,

    /// The flags require a key that was not supplied.
    #[error("payload is ECIES encrypted but no key was supplied")]
    MissingKey,

    /// HKDF refused to produce the symmetric key.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Parsed payload flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PayloadFlags(u8);

impl PayloadFlags {
    /// No transform.
    pub const NONE: PayloadFlags = PayloadFlags(0);
    /// Compressed only.
    pub const LZMA: PayloadFlags = PayloadFlags(FLAG_LZMA);
    /// Encrypted only.
    pub const ECIES: PayloadFlags = PayloadFlags(FLAG_ECIES);
    /// Compressed, then encrypted.
    pub const ECIES_LZMA: PayloadFlags = PayloadFlags(FLAG_ECIES | FLAG_LZMA);

    /// Build flags from the raw byte.
    pub const fn new(bits: u8) -> Self {
        PayloadFlags(bits)
    }

    /// Read the flags byte from an event `flags` field (empty means none).
    pub fn from_event_bytes(bytes: &[u8]) -> Self {
        PayloadFlags(bytes.first().copied().unwrap_or(0))
    }

    /// Raw byte.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether the payload is lzma compressed.
    pub const fn is_compressed(&self) -> bool {
        self.0 & FLAG_LZMA != 0
    }

    /// Whether the payload is ECIES encrypted.
    pub const fn is_encrypted(&self) -> bool {
        self.0 & FLAG_ECIES != 0
    }
}

impl fmt::Display for PayloadFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Compress bytes into an `.xz` stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), XZ_PRESET);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress an `.xz` stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = xz2::read::XzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn derive_key(ephemeral: &[u8], shared_x: &[u8]) -> Result<[u8; 32], CodecError> {
    let hk = Hkdf::<Sha256>::new(Some(ephemeral), shared_x);
    let mut okm = [0u8; 32];
    hk.expand(&[], &mut okm)
        .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Encrypt `plaintext` for `recipient`.
pub fn ecies_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let ephemeral = ecdh::EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(recipient);

    let key = derive_key(ephemeral_point.as_bytes(), shared.raw_secret_bytes())?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::Decryption)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::Decryption)?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_LEN + NONCE_LEN + sealed.len());
    out.extend_from_slice(ephemeral_point.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt an ECIES envelope with the recipient's secret key.
pub fn ecies_decrypt(secret: &SecretKey, envelope: &[u8]) -> Result<Vec<u8>, CodecError> {
    if envelope.len() < EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN {
        return Err(CodecError::MalformedEnvelope("envelope too short"));
    }
    let (ephemeral_bytes, rest) = envelope.split_at(EPHEMERAL_KEY_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_bytes)
        .map_err(|_| CodecError::MalformedEnvelope("invalid ephemeral key"))?;
    let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());

    let key = derive_key(ephemeral_bytes, shared.raw_secret_bytes())?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CodecError::Decryption)
}

/// Apply the transforms selected by `flags` to a serialized DDO.
pub fn encode_payload(
    plaintext: &[u8],
    flags: PayloadFlags,
    recipient: Option<&PublicKey>,
) -> Result<Vec<u8>, CodecError> {
    let mut data = plaintext.to_vec();
    if flags.is_compressed() {
        data = compress(&data)?;
    }
    if flags.is_encrypted() {
        let recipient = recipient.ok_or(CodecError::MissingKey)?;
        data = ecies_encrypt(recipient, &data)?;
    }
    Ok(data)
}

/// Reverse [`encode_payload`].
pub fn decode_payload(
    data: &[u8],
    flags: PayloadFlags,
    secret: Option<&SecretKey>,
) -> Result<Vec<u8>, CodecError> {
    let mut out = data.to_vec();
    if flags.is_encrypted() {
        let secret = secret.ok_or(CodecError::MissingKey)?;
        out = ecies_decrypt(secret, &out)?;
    }
    if flags.is_compressed() {
        out = decompress(&out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ddo() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "@context": ["https://w3id.org/did/v1"],
            "version": "4.1.0",
            "metadata": {"name": "Sample asset", "description": "x".repeat(256)}
        }))
        .unwrap()
    }

    #[test]
    fn test_flags_from_event_bytes() {
        assert_eq!(PayloadFlags::from_event_bytes(&[]), PayloadFlags::NONE);
        let flags = PayloadFlags::from_event_bytes(&[0x03, 0xff]);
        assert!(flags.is_compressed());
        assert!(flags.is_encrypted());
        assert_eq!(flags.to_string(), "0x03");
    }

    #[test]
    fn test_payload_round_trip_for_every_flag_combination() {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        let ddo = sample_ddo();

        for flags in [
            PayloadFlags::NONE,
            PayloadFlags::LZMA,
            PayloadFlags::ECIES,
            PayloadFlags::ECIES_LZMA,
        ] {
            let encoded = encode_payload(&ddo, flags, Some(&public)).unwrap();
            if flags.bits() != 0 {
                assert_ne!(encoded, ddo, "flags {} must transform the payload", flags);
            }
            let decoded = decode_payload(&encoded, flags, Some(&secret)).unwrap();
            assert_eq!(decoded, ddo, "round trip failed for flags {}", flags);
        }
    }

    #[test]
    fn test_derive_key_depends_on_both_inputs() {
        let key = derive_key(b"ephemeral", b"shared").unwrap();
        assert_eq!(key, derive_key(b"ephemeral", b"shared").unwrap());
        assert_ne!(key, derive_key(b"ephemeral", b"other").unwrap());
        assert_ne!(key, derive_key(b"other", b"shared").unwrap());
        assert_ne!(key, [0u8; 32]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = SecretKey::random(&mut OsRng);
        let other = SecretKey::random(&mut OsRng);
        let envelope = ecies_encrypt(&secret.public_key(), b"payload").unwrap();

        assert!(matches!(
            ecies_decrypt(&other, &envelope),
            Err(CodecError::Decryption)
        ));
    }

    #[test]
    fn test_truncated_envelope() {
        let secret = SecretKey::random(&mut OsRng);
        assert!(matches!(
            ecies_decrypt(&secret, &[0u8; 40]),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_encrypted_payload_requires_key() {
        assert!(matches!(
            encode_payload(b"x", PayloadFlags::ECIES, None),
            Err(CodecError::MissingKey)
        ));
        assert!(matches!(
            decode_payload(b"x", PayloadFlags::ECIES, None),
            Err(CodecError::MissingKey)
        ));
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress(b"definitely not xz").is_err());
    }
}
