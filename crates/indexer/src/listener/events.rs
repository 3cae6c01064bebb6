//! Event definitions for the metadata contracts.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};

use super::chain::LogEntry;

sol! {
    /// Emitted by an ERC-721 template when metadata is first set.
    #[derive(Debug, PartialEq, Eq)]
    event MetadataCreated(
        address indexed createdBy,
        uint8 state,
        string decryptorUrl,
        bytes flags,
        bytes data,
        bytes metaDataHash,
        uint256 timestamp,
        uint256 blockNumber
    );

    /// Emitted when metadata is replaced.
    #[derive(Debug, PartialEq, Eq)]
    event MetadataUpdated(
        address indexed updatedBy,
        uint8 state,
        string decryptorUrl,
        bytes flags,
        bytes data,
        bytes metaDataHash,
        uint256 timestamp,
        uint256 blockNumber
    );

    /// Emitted when the NFT lifecycle state changes.
    #[derive(Debug, PartialEq, Eq)]
    event MetadataState(
        address indexed updatedBy,
        uint8 state,
        uint256 timestamp,
        uint256 blockNumber
    );

    /// Emitted by a datatoken when an order starts.
    #[derive(Debug, PartialEq, Eq)]
    event OrderStarted(
        address indexed consumer,
        address payer,
        uint256 amount,
        uint256 serviceIndex,
        uint256 timestamp,
        address indexed publishMarketAddress,
        uint256 blockNumber
    );

    /// Emitted when the token URI changes.
    #[derive(Debug, PartialEq, Eq)]
    event TokenURIUpdate(
        address indexed updatedBy,
        string tokenURI,
        uint256 tokenID,
        uint256 timestamp,
        uint256 blockNumber
    );

    /// Metadata proof emitted alongside create/update by a validator.
    #[derive(Debug, PartialEq, Eq)]
    event MetadataValidated(
        address indexed validator,
        bytes metaDataHash,
        uint8 v,
        bytes32 r,
        bytes32 s
    );
}

/// Topics the monitor requests from the chain.
pub fn watched_topics() -> Vec<B256> {
    vec![
        MetadataCreated::SIGNATURE_HASH,
        MetadataUpdated::SIGNATURE_HASH,
        MetadataState::SIGNATURE_HASH,
        OrderStarted::SIGNATURE_HASH,
        TokenURIUpdate::SIGNATURE_HASH,
    ]
}

/// Position of a log on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// Contract that emitted the log (NFT, or datatoken for orders).
    pub contract: Address,
    #[allow(missing_docs)]
    pub block_number: u64,
    #[allow(missing_docs)]
    pub tx_hash: B256,
    #[allow(missing_docs)]
    pub log_index: u64,
}

/// Body shared by `MetadataCreated` and `MetadataUpdated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPayload {
    /// `createdBy` / `updatedBy`.
    pub sender: Address,
    /// Raw NFT state.
    pub state: u8,
    /// Provider URL for encrypted payloads.
    pub decryptor_url: String,
    /// First byte carries the payload flags.
    pub flags: Bytes,
    /// Possibly compressed and encrypted DDO.
    pub data: Bytes,
    /// SHA-256 of the cleartext DDO.
    pub metadata_hash: Bytes,
}

impl MetadataPayload {
    /// Flags byte, `0` when the field is empty.
    pub fn flags_byte(&self) -> u8 {
        self.flags.first().copied().unwrap_or(0)
    }
}

/// Decoded event body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    #[allow(missing_docs)]
    MetadataCreated(MetadataPayload),
    #[allow(missing_docs)]
    MetadataUpdated(MetadataPayload),
    #[allow(missing_docs)]
    MetadataState {
        updated_by: Address,
        state: u8,
    },
    #[allow(missing_docs)]
    OrderStarted {
        consumer: Address,
        payer: Address,
        service_index: U256,
    },
    #[allow(missing_docs)]
    TokenUriUpdate {
        updated_by: Address,
        token_uri: String,
        token_id: U256,
    },
}

impl EventKind {
    /// Event name as emitted on chain; also the RBAC event type.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MetadataCreated(_) => "MetadataCreated",
            EventKind::MetadataUpdated(_) => "MetadataUpdated",
            EventKind::MetadataState { .. } => "MetadataState",
            EventKind::OrderStarted { .. } => "OrderStarted",
            EventKind::TokenUriUpdate { .. } => "TokenURIUpdate",
        }
    }

    /// Whether the event changes the DDO itself and gets a state record.
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            EventKind::MetadataCreated(_)
                | EventKind::MetadataUpdated(_)
                | EventKind::MetadataState { .. }
        )
    }
}

/// A decoded, positioned chain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    #[allow(missing_docs)]
    pub meta: EventMeta,
    #[allow(missing_docs)]
    pub kind: EventKind,
}

impl ChainEvent {
    /// Decode a log. `Ok(None)` for topics the cache does not handle.
    pub fn from_log(log: &LogEntry) -> Result<Option<Self>> {
        let Some(topic0) = log.topics.first().copied() else {
            return Ok(None);
        };
        let topics = log.topics.iter().copied();
        let data = log.data.as_ref();

        let kind = if topic0 == MetadataCreated::SIGNATURE_HASH {
            let ev = MetadataCreated::decode_raw_log(topics, data, true)
                .context("Failed to decode MetadataCreated event")?;
            EventKind::MetadataCreated(MetadataPayload {
                sender: ev.createdBy,
                state: ev.state,
                decryptor_url: ev.decryptorUrl,
                flags: ev.flags,
                data: ev.data,
                metadata_hash: ev.metaDataHash,
            })
        } else if topic0 == MetadataUpdated::SIGNATURE_HASH {
            let ev = MetadataUpdated::decode_raw_log(topics, data, true)
                .context("Failed to decode MetadataUpdated event")?;
            EventKind::MetadataUpdated(MetadataPayload {
                sender: ev.updatedBy,
                state: ev.state,
                decryptor_url: ev.decryptorUrl,
                flags: ev.flags,
                data: ev.data,
                metadata_hash: ev.metaDataHash,
            })
        } else if topic0 == MetadataState::SIGNATURE_HASH {
            let ev = MetadataState::decode_raw_log(topics, data, true)
                .context("Failed to decode MetadataState event")?;
            EventKind::MetadataState {
                updated_by: ev.updatedBy,
                state: ev.state,
            }
        } else if topic0 == OrderStarted::SIGNATURE_HASH {
            let ev = OrderStarted::decode_raw_log(topics, data, true)
                .context("Failed to decode OrderStarted event")?;
            EventKind::OrderStarted {
                consumer: ev.consumer,
                payer: ev.payer,
                service_index: ev.serviceIndex,
            }
        } else if topic0 == TokenURIUpdate::SIGNATURE_HASH {
            let ev = TokenURIUpdate::decode_raw_log(topics, data, true)
                .context("Failed to decode TokenURIUpdate event")?;
            EventKind::TokenUriUpdate {
                updated_by: ev.updatedBy,
                token_uri: ev.tokenURI,
                token_id: ev.tokenID,
            }
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            meta: EventMeta {
                contract: log.address,
                block_number: log.block_number,
                tx_hash: log.tx_hash,
                log_index: log.log_index,
            },
            kind,
        }))
    }
}

/// Validators that signed a metadata proof for `nft` in a receipt's logs.
pub fn metadata_validators(logs: &[LogEntry], nft: Address) -> Vec<Address> {
    logs.iter()
        .filter(|log| log.address == nft)
        .filter(|log| log.topics.first() == Some(&MetadataValidated::SIGNATURE_HASH))
        .filter_map(|log| {
            MetadataValidated::decode_raw_log(log.topics.iter().copied(), log.data.as_ref(), true)
                .ok()
                .map(|ev| ev.validator)
        })
        .collect()
}

/// Whether a log is a create or update of `nft`.
pub fn is_metadata_write(log: &LogEntry, nft: Address) -> bool {
    log.address == nft
        && log.topics.first().is_some_and(|topic| {
            *topic == MetadataCreated::SIGNATURE_HASH || *topic == MetadataUpdated::SIGNATURE_HASH
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_from(address: Address, data: alloy::primitives::LogData, log_index: u64) -> LogEntry {
        LogEntry {
            address,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number: 7,
            tx_hash: B256::repeat_byte(0x01),
            log_index,
        }
    }

    #[test]
    fn test_decode_metadata_created() {
        let nft = Address::repeat_byte(0x11);
        let event = MetadataCreated {
            createdBy: Address::repeat_byte(0x22),
            state: 0,
            decryptorUrl: "https://provider".into(),
            flags: Bytes::from(vec![0x02]),
            data: Bytes::from(vec![1, 2, 3]),
            metaDataHash: Bytes::from(vec![0u8; 32]),
            timestamp: U256::from(1),
            blockNumber: U256::from(7),
        };
        let log = log_from(nft, event.encode_log_data(), 3);

        let decoded = ChainEvent::from_log(&log).unwrap().unwrap();
        assert_eq!(decoded.meta.contract, nft);
        assert_eq!(decoded.meta.log_index, 3);
        match decoded.kind {
            EventKind::MetadataCreated(payload) => {
                assert_eq!(payload.sender, Address::repeat_byte(0x22));
                assert_eq!(payload.flags_byte(), 0x02);
                assert_eq!(payload.decryptor_url, "https://provider");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(is_metadata_write(&log, nft));
        assert!(!is_metadata_write(&log, Address::repeat_byte(0x99)));
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let log = LogEntry {
            address: Address::ZERO,
            topics: vec![B256::repeat_byte(0xee)],
            data: Bytes::new(),
            block_number: 1,
            tx_hash: B256::ZERO,
            log_index: 0,
        };
        assert!(ChainEvent::from_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_metadata_validators() {
        let nft = Address::repeat_byte(0x11);
        let proof = MetadataValidated {
            validator: Address::repeat_byte(0x55),
            metaDataHash: Bytes::from(vec![0u8; 32]),
            v: 27,
            r: B256::ZERO,
            s: B256::ZERO,
        };
        let logs = vec![
            log_from(nft, proof.encode_log_data(), 0),
            log_from(Address::repeat_byte(0x12), proof.encode_log_data(), 1),
        ];
        assert_eq!(
            metadata_validators(&logs, nft),
            vec![Address::repeat_byte(0x55)]
        );
    }
}
