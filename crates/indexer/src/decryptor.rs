//! Payload decryption for encrypted metadata events.
//!
//! Encrypted payloads are normally opened by the provider that encrypted
//! them: the cache proves who it is with a signed nonce and the provider
//! answers with the cleartext DDO. [`LocalDecryptor`] opens envelopes
//! addressed to a key the cache holds itself.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use anyhow::{Context, Result};
use ddocache_core::codec::{decode_payload, CodecError, PayloadFlags};
use ddocache_core::hashing::{keccak256, metadata_hash_matches};
use k256::SecretKey;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Upper bound on one provider round trip.
pub const MAX_DECRYPT_TIMEOUT: Duration = Duration::from_secs(4);

/// Decryption failure.
#[derive(Error, Debug)]
pub enum DecryptError {
    /// Provider answered 403.
    #[error("decryptor refused access (403): {0}")]
    Unauthorized(String),

    /// Cleartext does not hash to the announced metadata hash.
    #[error("decrypted payload failed integrity check: {0}")]
    Integrity(String),

    /// Provider unreachable or timed out.
    #[error("decryptor unreachable: {0}")]
    Transport(String),

    /// Any other provider status.
    #[error("decryptor returned {0}: {1}")]
    Status(u16, String),

    /// Local envelope could not be opened.
    #[error("payload could not be decoded: {0}")]
    Codec(#[from] CodecError),
}

/// Everything a decryptor may need about one event.
#[derive(Debug, Clone)]
pub struct DecryptRequest {
    /// `decryptorUrl` from the event.
    pub provider_url: String,
    #[allow(missing_docs)]
    pub tx_id: B256,
    #[allow(missing_docs)]
    pub chain_id: u64,
    #[allow(missing_docs)]
    pub nft_address: Address,
    /// `metaDataHash` from the event.
    pub metadata_hash: Vec<u8>,
    #[allow(missing_docs)]
    pub flags: PayloadFlags,
    /// Raw event `data`.
    pub data: Vec<u8>,
}

/// Turns an encrypted event payload into cleartext DDO bytes.
pub trait MetadataDecryptor: Send + Sync + 'static {
    /// Return the final cleartext (already decompressed).
    fn decrypt(
        &self,
        request: &DecryptRequest,
    ) -> impl Future<Output = Result<Vec<u8>, DecryptError>> + Send;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptBody {
    transaction_id: String,
    chain_id: u64,
    decrypter_address: String,
    data_nft_address: String,
    signature: String,
    nonce: String,
}

/// Decrypts through the provider's `/api/services/decrypt` endpoint.
#[derive(Clone)]
pub struct ProviderDecryptor {
    client: Client,
    signer: PrivateKeySigner,
}

impl ProviderDecryptor {
    /// Build from a hex private key. The timeout is clamped to [`MAX_DECRYPT_TIMEOUT`].
    pub fn new(private_key: &str, timeout: Duration) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("Invalid decryptor private key")?;

        let client = Client::builder()
            .timeout(timeout.min(MAX_DECRYPT_TIMEOUT))
            .user_agent("ddocache-indexer/decryptor")
            .build()
            .context("Failed to build decryptor HTTP client")?;

        Ok(Self { client, signer })
    }

    /// Address presented to providers.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// EIP-191 signature over `keccak256(tx_id || address || chain_id || nonce)`.
    fn sign(&self, tx_id: &str, chain_id: u64, nonce: &str) -> Result<String, DecryptError> {
        let message = format!(
            "{}{}{}{}",
            tx_id,
            self.signer.address().to_checksum(None),
            chain_id,
            nonce
        );
        let digest = keccak256(message.as_bytes());
        let signature = self
            .signer
            .sign_message_sync(digest.as_slice())
            .map_err(|e| DecryptError::Transport(format!("signing failed: {e}")))?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

impl MetadataDecryptor for ProviderDecryptor {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>, DecryptError> {
        let tx_id = format!("0x{}", hex::encode(request.tx_id));
        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        let body = DecryptBody {
            transaction_id: tx_id.clone(),
            chain_id: request.chain_id,
            decrypter_address: self.signer.address().to_checksum(None),
            data_nft_address: request.nft_address.to_checksum(None),
            signature: self.sign(&tx_id, request.chain_id, &nonce)?,
            nonce,
        };

        let url = format!(
            "{}/api/services/decrypt",
            request.provider_url.trim_end_matches('/')
        );
        debug!("Requesting decryption of {} from {}", tx_id, url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DecryptError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DecryptError::Transport(e.to_string()))?;

        match status {
            StatusCode::CREATED => {
                if !metadata_hash_matches(&bytes, &request.metadata_hash) {
                    return Err(DecryptError::Integrity(format!(
                        "sha256 of provider response does not match metadata hash for tx {tx_id}"
                    )));
                }
                Ok(bytes.to_vec())
            }
            StatusCode::FORBIDDEN => Err(DecryptError::Unauthorized(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            other => Err(DecryptError::Status(
                other.as_u16(),
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
        }
    }
}

/// Opens envelopes addressed to a key held by the cache.
#[derive(Clone)]
pub struct LocalDecryptor {
    secret: SecretKey,
}

impl LocalDecryptor {
    #[allow(missing_docs)]
    pub fn new(secret: SecretKey) -> Self {
        Self { secret }
    }

    /// Build from a hex private key.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let raw = hex::decode(private_key.trim().trim_start_matches("0x"))
            .context("Decryptor key is not hex")?;
        let secret = SecretKey::from_slice(&raw).context("Decryptor key is not a secp256k1 scalar")?;
        Ok(Self { secret })
    }
}

impl MetadataDecryptor for LocalDecryptor {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>, DecryptError> {
        Ok(decode_payload(&request.data, request.flags, Some(&self.secret))?)
    }
}

/// Decryptor selected by configuration.
#[derive(Clone)]
pub enum Decryptor {
    #[allow(missing_docs)]
    Provider(ProviderDecryptor),
    #[allow(missing_docs)]
    Local(LocalDecryptor),
}

impl MetadataDecryptor for Decryptor {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>, DecryptError> {
        match self {
            Decryptor::Provider(inner) => inner.decrypt(request).await,
            Decryptor::Local(inner) => inner.decrypt(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddocache_core::codec::encode_payload;
    use rand::rngs::OsRng;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_signature_is_65_bytes() {
        let decryptor = ProviderDecryptor::new(KEY, Duration::from_secs(30)).unwrap();
        let signature = decryptor.sign("0xabc", 8996, "1700000000000").unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 130);
    }

    #[test]
    fn test_body_uses_camel_case() {
        let body = DecryptBody {
            transaction_id: "0x01".into(),
            chain_id: 1,
            decrypter_address: "0x02".into(),
            data_nft_address: "0x03".into(),
            signature: "0x04".into(),
            nonce: "5".into(),
        };
        let value = serde_json::to_value(&body).unwrap();
        for key in ["transactionId", "chainId", "decrypterAddress", "dataNftAddress", "signature", "nonce"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_local_decryptor_opens_compressed_envelope() {
        let secret = SecretKey::random(&mut OsRng);
        let plain = br#"{"id":"did:op:00"}"#.to_vec();
        let data = encode_payload(&plain, PayloadFlags::ECIES_LZMA, Some(&secret.public_key())).unwrap();

        let request = DecryptRequest {
            provider_url: String::new(),
            tx_id: B256::ZERO,
            chain_id: 1,
            nft_address: Address::ZERO,
            metadata_hash: Vec::new(),
            flags: PayloadFlags::ECIES_LZMA,
            data,
        };
        let decryptor = Decryptor::Local(LocalDecryptor::new(secret));
        assert_eq!(decryptor.decrypt(&request).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn test_local_decryptor_wrong_key_is_codec_error() {
        let secret = SecretKey::random(&mut OsRng);
        let other = SecretKey::random(&mut OsRng);
        let data = encode_payload(b"{}", PayloadFlags::ECIES, Some(&secret.public_key())).unwrap();

        let request = DecryptRequest {
            provider_url: String::new(),
            tx_id: B256::ZERO,
            chain_id: 1,
            nft_address: Address::ZERO,
            metadata_hash: Vec::new(),
            flags: PayloadFlags::ECIES,
            data,
        };
        let err = LocalDecryptor::new(other).decrypt(&request).await.unwrap_err();
        assert!(matches!(err, DecryptError::Codec(_)));
    }
}
