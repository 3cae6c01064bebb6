//! RPC provider wrapper for Ethereum communication.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::sol;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use ddocache_core::DATA_NFT_TOKEN_ID;
use tracing::warn;

use super::chain::{
    ChainClient, ChainError, DatatokenDetails, LogEntry, NftDetails, TxReceipt,
};

sol! {
    #[sol(rpc)]
    interface IERC721Template {
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function tokenURI(uint256 tokenId) external view returns (string memory);
        function ownerOf(uint256 tokenId) external view returns (address);
        function getTokensList() external view returns (address[] memory);
    }

    #[sol(rpc)]
    interface IERC20Template {
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function getERC721Address() external view returns (address);
    }

    #[sol(rpc)]
    interface IERC721Factory {
        function erc721List(address nft) external view returns (address);
        function erc20List(address datatoken) external view returns (bool);
    }
}

/// HTTP RPC provider for one chain.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    factory: Address,
}

impl RpcProvider {
    /// Create a new RPC provider bound to an ERC-721 factory.
    pub fn new(rpc_url: &str, factory: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider, factory })
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")
    }

    fn to_entry(log: &Log) -> Option<LogEntry> {
        Some(LogEntry {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?,
        })
    }
}

fn rpc_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

fn contract_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Contract(e.to_string())
}

impl ChainClient for RpcProvider {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(rpc_err)
    }

    async fn get_logs(&self, from: u64, to: u64, topics: &[B256]) -> Result<Vec<LogEntry>, ChainError> {
        let filter = Filter::new()
            .event_signature(topics.to_vec())
            .from_block(from)
            .to_block(to);

        let logs: Vec<Log> = self.provider.get_logs(&filter).await.map_err(rpc_err)?;

        let mut entries = Vec::with_capacity(logs.len());
        for log in &logs {
            match Self::to_entry(log) {
                Some(entry) => entries.push(entry),
                None => warn!("Skipping log without block coordinates: {:?}", log),
            }
        }
        Ok(entries)
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_err)?
        else {
            return Ok(None);
        };

        let mut logs: Vec<LogEntry> = receipt.inner.logs().iter().filter_map(Self::to_entry).collect();
        logs.sort_by_key(|log| log.log_index);

        Ok(Some(TxReceipt {
            tx_hash,
            from: receipt.from,
            block_number: receipt.block_number.unwrap_or_default(),
            logs,
        }))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError> {
        let header = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block), BlockTransactionsKind::Hashes)
            .await
            .map_err(rpc_err)?
            .ok_or_else(|| ChainError::Rpc(format!("Block {} not found", block)))?;

        Ok(header.header.timestamp)
    }

    async fn is_factory_nft(&self, nft: Address) -> Result<bool, ChainError> {
        let factory = IERC721Factory::new(self.factory, self.provider.clone());
        let listed = factory.erc721List(nft).call().await.map_err(contract_err)?._0;
        Ok(listed == nft)
    }

    async fn datatoken_nft(&self, datatoken: Address) -> Result<Option<Address>, ChainError> {
        let factory = IERC721Factory::new(self.factory, self.provider.clone());
        let known = factory
            .erc20List(datatoken)
            .call()
            .await
            .map_err(contract_err)?
            ._0;
        if !known {
            return Ok(None);
        }

        let token = IERC20Template::new(datatoken, self.provider.clone());
        let nft = token
            .getERC721Address()
            .call()
            .await
            .map_err(contract_err)?
            ._0;
        Ok(Some(nft))
    }

    async fn nft_details(&self, nft: Address) -> Result<NftDetails, ChainError> {
        let contract = IERC721Template::new(nft, self.provider.clone());
        let token_id = U256::from(DATA_NFT_TOKEN_ID);

        let name = contract.name().call().await.map_err(contract_err)?._0;
        let symbol = contract.symbol().call().await.map_err(contract_err)?._0;
        let token_uri = contract
            .tokenURI(token_id)
            .call()
            .await
            .map_err(contract_err)?
            ._0;
        let owner = contract
            .ownerOf(token_id)
            .call()
            .await
            .map_err(contract_err)?
            ._0;
        let datatokens = contract
            .getTokensList()
            .call()
            .await
            .map_err(contract_err)?
            ._0;

        Ok(NftDetails {
            name,
            symbol,
            token_uri,
            owner,
            datatokens,
        })
    }

    async fn datatoken_details(&self, datatoken: Address) -> Result<DatatokenDetails, ChainError> {
        let contract = IERC20Template::new(datatoken, self.provider.clone());
        let name = contract.name().call().await.map_err(contract_err)?._0;
        let symbol = contract.symbol().call().await.map_err(contract_err)?._0;

        Ok(DatatokenDetails {
            address: datatoken,
            name,
            symbol,
        })
    }
}
