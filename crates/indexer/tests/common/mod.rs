//! In-memory chain, decryptor and subgraph doubles for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::sol_types::SolEvent;
use anyhow::Result;
use ddocache_core::codec::{encode_payload, PayloadFlags};
use ddocache_core::{make_did, sha256};
use ddocache_indexer::context::{ChainContext, MonitorSettings, PublishPolicy};
use ddocache_indexer::decryptor::{DecryptError, DecryptRequest, LocalDecryptor, MetadataDecryptor};
use ddocache_indexer::graph::{NftTransfer, OrderStats, SubgraphSource};
use ddocache_indexer::listener::events::{
    MetadataCreated, MetadataState, MetadataUpdated, MetadataValidated, OrderStarted,
    TokenURIUpdate,
};
use ddocache_indexer::listener::{
    ChainClient, ChainError, DatatokenDetails, LogEntry, NftDetails, TxReceipt,
};
use ddocache_indexer::rbac::RbacClient;
use ddocache_indexer::retry::RetryPolicy;
use ddocache_indexer::storage::Storage;
use ddocache_validator::Validator;
use k256::{PublicKey, SecretKey};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

pub const CHAIN_ID: u64 = 1337;
pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 12;

pub fn publisher() -> Address {
    Address::repeat_byte(0x5a)
}

pub fn nft() -> Address {
    "0x6f7f1e9b3b8ffaa3e04e1b66e4f1b2c7d6d9c8e1".parse().unwrap()
}

pub fn tx(n: u8) -> B256 {
    B256::repeat_byte(n)
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<LogEntry>,
    receipts: HashMap<B256, TxReceipt>,
    nfts: HashSet<Address>,
    datatokens: HashMap<Address, Address>,
    receipts_down: bool,
    log_ranges: Vec<(u64, u64)>,
}

/// A chain held in memory. Every submitted transaction is mined at once.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn with_nft(nft: Address) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().nfts.insert(nft);
        chain
    }

    pub fn with_datatoken(self, datatoken: Address, nft: Address) -> Self {
        self.state.lock().unwrap().datatokens.insert(datatoken, nft);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_receipts_down(&self, down: bool) {
        self.state.lock().unwrap().receipts_down = down;
    }

    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_ranges.clone()
    }

    /// Mine `events` in one transaction; returns the logs as positioned.
    pub fn submit(
        &self,
        tx_hash: B256,
        from: Address,
        block: u64,
        events: Vec<(Address, LogData)>,
    ) -> Vec<LogEntry> {
        let mut state = self.state.lock().unwrap();
        let first_index = state
            .logs
            .iter()
            .filter(|log| log.block_number == block)
            .count() as u64;

        let logs: Vec<LogEntry> = events
            .into_iter()
            .enumerate()
            .map(|(i, (address, data))| LogEntry {
                address,
                topics: data.topics().to_vec(),
                data: data.data.clone(),
                block_number: block,
                tx_hash,
                log_index: first_index + i as u64,
            })
            .collect();

        state.logs.extend(logs.iter().cloned());
        state.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                from,
                block_number: block,
                logs: logs.clone(),
            },
        );
        state.head = state.head.max(block);
        logs
    }
}

impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_logs(&self, from: u64, to: u64, topics: &[B256]) -> Result<Vec<LogEntry>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.log_ranges.push((from, to));
        Ok(state
            .logs
            .iter()
            .filter(|log| (from..=to).contains(&log.block_number))
            .filter(|log| log.topics.first().is_some_and(|t| topics.contains(t)))
            .cloned()
            .collect())
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let state = self.state.lock().unwrap();
        if state.receipts_down {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError> {
        Ok(block_time(block))
    }

    async fn is_factory_nft(&self, nft: Address) -> Result<bool, ChainError> {
        Ok(self.state.lock().unwrap().nfts.contains(&nft))
    }

    async fn datatoken_nft(&self, datatoken: Address) -> Result<Option<Address>, ChainError> {
        Ok(self.state.lock().unwrap().datatokens.get(&datatoken).copied())
    }

    async fn nft_details(&self, _nft: Address) -> Result<NftDetails, ChainError> {
        Ok(NftDetails {
            name: "Data NFT".into(),
            symbol: "DN-1".into(),
            token_uri: "https://nft.example/1".into(),
            owner: publisher(),
            datatokens: Vec::new(),
        })
    }

    async fn datatoken_details(&self, datatoken: Address) -> Result<DatatokenDetails, ChainError> {
        Ok(DatatokenDetails {
            address: datatoken,
            name: "Datatoken".into(),
            symbol: "DT-1".into(),
        })
    }
}

pub fn block_time(block: u64) -> u64 {
    GENESIS_TIME + block * BLOCK_TIME
}

/// Decryptor that is always refused, as by a provider answering 403.
pub struct RefusingDecryptor;

impl MetadataDecryptor for RefusingDecryptor {
    async fn decrypt(&self, _request: &DecryptRequest) -> Result<Vec<u8>, DecryptError> {
        Err(DecryptError::Unauthorized("consumer not allowed".into()))
    }
}

/// Fixed order statistics and a settable transfer history.
#[derive(Default)]
pub struct StaticGraph {
    pub stats: Mutex<OrderStats>,
    pub transfers: Mutex<Vec<NftTransfer>>,
}

impl SubgraphSource for StaticGraph {
    async fn order_stats(&self, _nft: Address, _datatokens: &[Address]) -> Result<OrderStats> {
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn nft_transfers_since(&self, block: u64, skip: u32, first: u32) -> Result<Vec<NftTransfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.block > block)
            .skip(skip as usize)
            .take(first as usize)
            .cloned()
            .collect())
    }
}

pub async fn storage() -> (Storage, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(file.path()).await.unwrap();
    storage.run_migrations().await.unwrap();
    (storage, file)
}

pub fn context<D: MetadataDecryptor>(
    chain: MockChain,
    storage: Storage,
    decryptor: D,
) -> Arc<ChainContext<MockChain, D, StaticGraph>> {
    context_with(chain, storage, decryptor, PublishPolicy::default(), settings())
}

pub fn settings() -> MonitorSettings {
    MonitorSettings {
        start_block: 0,
        chunk_size: 1000,
        confirmations: 0,
        quiet_time: std::time::Duration::from_secs(3),
    }
}

pub fn context_with<D: MetadataDecryptor>(
    chain: MockChain,
    storage: Storage,
    decryptor: D,
    policy: PublishPolicy,
    monitor: MonitorSettings,
) -> Arc<ChainContext<MockChain, D, StaticGraph>> {
    Arc::new(build_context(chain, storage, decryptor, policy, monitor, None))
}

pub fn context_with_rbac<D: MetadataDecryptor>(
    chain: MockChain,
    storage: Storage,
    decryptor: D,
    rbac: RbacClient,
) -> Arc<ChainContext<MockChain, D, StaticGraph>> {
    Arc::new(build_context(
        chain,
        storage,
        decryptor,
        PublishPolicy::default(),
        settings(),
        Some(rbac),
    ))
}

fn build_context<D: MetadataDecryptor>(
    chain: MockChain,
    storage: Storage,
    decryptor: D,
    policy: PublishPolicy,
    monitor: MonitorSettings,
    rbac: Option<RbacClient>,
) -> ChainContext<MockChain, D, StaticGraph> {
    ChainContext {
        chain_id: CHAIN_ID,
        network: "test".into(),
        chain,
        storage,
        validator: Arc::new(Validator::new().unwrap()),
        decryptor,
        graph: StaticGraph::default(),
        rbac,
        policy,
        monitor,
        retry: RetryPolicy::default(),
    }
}

/// RBAC server on a random local port answering every query with `allowed`.
pub async fn rbac_server(allowed: bool) -> String {
    let app = axum::Router::new().route(
        "/",
        axum::routing::post(move || async move { axum::Json(allowed) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

pub fn local_key() -> (LocalDecryptor, PublicKey) {
    let secret = SecretKey::random(&mut rand::rngs::OsRng);
    let public = secret.public_key();
    (LocalDecryptor::new(secret), public)
}

pub fn ddo(nft: Address, name: &str) -> Value {
    json!({
        "@context": ["https://w3id.org/did/v1"],
        "id": make_did(&nft, CHAIN_ID).to_string(),
        "version": "4.1.0",
        "chainId": CHAIN_ID,
        "nftAddress": nft.to_string(),
        "metadata": {
            "created": "2021-12-20T14:35:20Z",
            "updated": "2021-12-20T14:35:20Z",
            "type": "dataset",
            "name": name,
            "description": "Hourly readings from 40 stations",
            "author": "Met",
            "license": "MIT"
        },
        "services": [{
            "id": "0",
            "type": "access",
            "files": "0xdeadbeef",
            "datatokenAddress": Address::repeat_byte(0x22).to_string(),
            "serviceEndpoint": "https://provider.example",
            "timeout": 0
        }]
    })
}

struct Encoded {
    flags: Bytes,
    data: Bytes,
    hash: Bytes,
}

fn encode(ddo: &Value, flags: PayloadFlags, recipient: Option<&PublicKey>) -> Encoded {
    let body = serde_json::to_vec(ddo).unwrap();
    Encoded {
        flags: Bytes::from(vec![flags.bits()]),
        data: Bytes::from(encode_payload(&body, flags, recipient).unwrap()),
        hash: Bytes::from(sha256(&body).to_vec()),
    }
}

pub fn created(ddo: &Value, flags: PayloadFlags, recipient: Option<&PublicKey>) -> LogData {
    let payload = encode(ddo, flags, recipient);
    MetadataCreated {
        createdBy: publisher(),
        state: 0,
        decryptorUrl: "https://provider.example".into(),
        flags: payload.flags,
        data: payload.data,
        metaDataHash: payload.hash,
        timestamp: U256::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}

/// A create whose declared hash is `hash` instead of the payload's.
pub fn created_with_hash(ddo: &Value, hash: [u8; 32]) -> LogData {
    let payload = encode(ddo, PayloadFlags::NONE, None);
    MetadataCreated {
        createdBy: publisher(),
        state: 0,
        decryptorUrl: "https://provider.example".into(),
        flags: payload.flags,
        data: payload.data,
        metaDataHash: Bytes::from(hash.to_vec()),
        timestamp: U256::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}

/// Proof that `validator` checked `ddo`, emitted by the NFT in the same tx.
pub fn metadata_validated(validator: Address, ddo: &Value) -> LogData {
    let body = serde_json::to_vec(ddo).unwrap();
    MetadataValidated {
        validator,
        metaDataHash: Bytes::from(sha256(&body).to_vec()),
        v: 27,
        r: B256::ZERO,
        s: B256::ZERO,
    }
    .encode_log_data()
}

pub fn updated(ddo: &Value) -> LogData {
    let payload = encode(ddo, PayloadFlags::NONE, None);
    MetadataUpdated {
        updatedBy: publisher(),
        state: 0,
        decryptorUrl: "https://provider.example".into(),
        flags: payload.flags,
        data: payload.data,
        metaDataHash: payload.hash,
        timestamp: U256::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}

pub fn state_change(state: u8) -> LogData {
    MetadataState {
        updatedBy: publisher(),
        state,
        timestamp: U256::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}

pub fn datatoken() -> Address {
    Address::repeat_byte(0x22)
}

pub fn order_started() -> LogData {
    OrderStarted {
        consumer: Address::repeat_byte(0x33),
        payer: Address::repeat_byte(0x33),
        amount: U256::from(1u64),
        serviceIndex: U256::ZERO,
        timestamp: U256::ZERO,
        publishMarketAddress: Address::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}

pub fn token_uri_update(uri: &str) -> LogData {
    TokenURIUpdate {
        updatedBy: publisher(),
        tokenURI: uri.into(),
        tokenID: U256::from(1u64),
        timestamp: U256::ZERO,
        blockNumber: U256::ZERO,
    }
    .encode_log_data()
}
