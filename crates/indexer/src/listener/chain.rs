//! Chain access used by the monitor, processors and retry worker.
//!
//! [`ChainClient`] is the seam between the pipeline and a node. The RPC
//! implementation lives in [`super::provider`]; tests provide in-memory ones.

use std::future::Future;

use alloy::primitives::{Address, Bytes, B256};
use thiserror::Error;

/// Chain access failure. Always transient from the pipeline's point of view.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// The node could not be reached or returned an error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A contract call reverted or returned garbage.
    #[error("Contract call failed: {0}")]
    Contract(String),
}

/// A log with its position, independent of the RPC types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields.
    pub data: Bytes,
    #[allow(missing_docs)]
    pub block_number: u64,
    #[allow(missing_docs)]
    pub tx_hash: B256,
    #[allow(missing_docs)]
    pub log_index: u64,
}

/// The parts of a transaction receipt the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    #[allow(missing_docs)]
    pub tx_hash: B256,
    /// Transaction sender.
    pub from: Address,
    #[allow(missing_docs)]
    pub block_number: u64,
    /// Logs in log-index order.
    pub logs: Vec<LogEntry>,
}

/// ERC-721 template view of a data NFT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftDetails {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub symbol: String,
    /// `tokenURI(1)`.
    pub token_uri: String,
    /// `ownerOf(1)`.
    pub owner: Address,
    /// `getTokensList()`.
    pub datatokens: Vec<Address>,
}

/// ERC-20 template view of a datatoken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatatokenDetails {
    #[allow(missing_docs)]
    pub address: Address,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub symbol: String,
}

/// Read-only access to one chain.
pub trait ChainClient: Send + Sync + 'static {
    /// Latest block number.
    fn block_number(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Logs with any of `topics` as `topics[0]` in `[from, to]`.
    fn get_logs(
        &self,
        from: u64,
        to: u64,
        topics: &[B256],
    ) -> impl Future<Output = Result<Vec<LogEntry>, ChainError>> + Send;

    /// Receipt of a mined transaction, `None` if unknown.
    fn get_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TxReceipt>, ChainError>> + Send;

    /// Unix timestamp of a block.
    fn block_timestamp(&self, block: u64) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Whether the factory deployed this NFT (`erc721List(nft) == nft`).
    fn is_factory_nft(&self, nft: Address) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// NFT owning a factory-deployed datatoken, `None` if the factory does not know it.
    fn datatoken_nft(
        &self,
        datatoken: Address,
    ) -> impl Future<Output = Result<Option<Address>, ChainError>> + Send;

    /// Template data of an NFT.
    fn nft_details(
        &self,
        nft: Address,
    ) -> impl Future<Output = Result<NftDetails, ChainError>> + Send;

    /// Template data of a datatoken.
    fn datatoken_details(
        &self,
        datatoken: Address,
    ) -> impl Future<Output = Result<DatatokenDetails, ChainError>> + Send;
}
