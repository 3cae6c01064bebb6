//! Subgraph client for order statistics and NFT transfers.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use ddocache_core::did::lowercase_address;
use ddocache_core::Price;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Transfers requested per subgraph query.
pub const TRANSFER_PAGE_SIZE: u32 = 1000;

/// Order count and current price of an asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderStats {
    /// Orders across all datatokens.
    pub orders: u64,
    #[allow(missing_docs)]
    pub price: Price,
}

/// One NFT ownership change seen by the subgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftTransfer {
    #[allow(missing_docs)]
    pub nft: Address,
    #[allow(missing_docs)]
    pub new_owner: Address,
    #[allow(missing_docs)]
    pub block: u64,
}

/// Indexed view of marketplace activity.
pub trait SubgraphSource: Send + Sync + 'static {
    /// Orders and price for the datatokens of an NFT.
    fn order_stats(
        &self,
        nft: Address,
        datatokens: &[Address],
    ) -> impl Future<Output = Result<OrderStats>> + Send;

    /// One page of NFT transfers in blocks strictly after `block`, oldest
    /// first: at most `first` rows, after skipping `skip`.
    fn nft_transfers_since(
        &self,
        block: u64,
        skip: u32,
        first: u32,
    ) -> impl Future<Output = Result<Vec<NftTransfer>>> + Send;
}

/// GraphQL client for one chain's subgraph.
///
/// Without a URL every query answers empty, so assets still index with zero
/// stats on chains that have no subgraph.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    url: Option<String>,
}

#[derive(Deserialize)]
struct GraphResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenStats {
    #[serde(default)]
    order_count: Option<String>,
    #[serde(default)]
    fixed_rate_exchanges: Vec<FixedRate>,
    #[serde(default)]
    dispensers: Vec<Dispenser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixedRate {
    price: String,
    active: bool,
    base_token: BaseToken,
}

#[derive(Deserialize)]
struct BaseToken {
    address: String,
    symbol: Option<String>,
}

#[derive(Deserialize)]
struct Dispenser {
    active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRow {
    nft: IdRef,
    new_owner: IdRef,
    block: Value,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

impl GraphClient {
    /// Build a client; `url = None` disables queries.
    pub fn new(url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent("ddocache-indexer/graph")
            .build()
            .context("Failed to build subgraph HTTP client")?;

        Ok(Self { client, url })
    }

    async fn query(&self, url: &str, query: String, variables: Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await
            .context("Subgraph request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Subgraph returned {}", response.status()));
        }

        let body: GraphResponse = response
            .json()
            .await
            .context("Subgraph response is not JSON")?;
        if let Some(first) = body.errors.first() {
            return Err(anyhow!("Subgraph error: {}", first));
        }
        body.data.ok_or_else(|| anyhow!("Subgraph response has no data"))
    }

    async fn token_stats(&self, url: &str, datatoken: Address) -> Result<Option<TokenStats>> {
        let query = r#"
            query TokenStats($id: ID!) {
              token(id: $id) {
                orderCount
                fixedRateExchanges { price active baseToken { address symbol } }
                dispensers { active }
              }
            }
        "#;
        let data = self
            .query(url, query.to_string(), json!({"id": lowercase_address(&datatoken)}))
            .await?;

        match data.get("token") {
            None | Some(Value::Null) => Ok(None),
            Some(token) => Ok(Some(
                serde_json::from_value(token.clone()).context("Unexpected token shape")?,
            )),
        }
    }
}

/// Fold per-datatoken stats: orders add up, the first active exchange sets
/// the price, an active dispenser means free.
fn fold_stats(tokens: &[TokenStats]) -> OrderStats {
    let orders = tokens
        .iter()
        .filter_map(|t| t.order_count.as_deref())
        .filter_map(|count| count.parse::<u64>().ok())
        .sum();

    let exchange = tokens
        .iter()
        .flat_map(|t| t.fixed_rate_exchanges.iter())
        .find(|fre| fre.active);

    let price = match exchange {
        Some(fre) => Price {
            value: fre.price.parse().unwrap_or(0.0),
            token_address: fre.base_token.address.parse().ok(),
            token_symbol: fre.base_token.symbol.clone(),
        },
        None => Price::default(),
    };

    if exchange.is_none() && !tokens.iter().any(|t| t.dispensers.iter().any(|d| d.active)) {
        debug!("No active exchange or dispenser; price stays 0");
    }

    OrderStats { orders, price }
}

fn parse_block(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl SubgraphSource for GraphClient {
    async fn order_stats(&self, nft: Address, datatokens: &[Address]) -> Result<OrderStats> {
        let Some(url) = self.url.as_deref() else {
            return Ok(OrderStats::default());
        };

        let mut tokens = Vec::with_capacity(datatokens.len());
        for datatoken in datatokens {
            if let Some(stats) = self.token_stats(url, *datatoken).await? {
                tokens.push(stats);
            }
        }
        debug!("Fetched order stats for {} datatokens of {}", tokens.len(), nft);

        Ok(fold_stats(&tokens))
    }

    async fn nft_transfers_since(&self, block: u64, skip: u32, first: u32) -> Result<Vec<NftTransfer>> {
        let Some(url) = self.url.as_deref() else {
            return Ok(Vec::new());
        };

        let query = r#"
            query Transfers($block: Int!, $first: Int!, $skip: Int!) {
              nftTransferHistories(
                where: { block_gt: $block }
                orderBy: block
                orderDirection: asc
                first: $first
                skip: $skip
              ) {
                nft { id }
                newOwner { id }
                block
              }
            }
        "#;
        let data = self
            .query(
                url,
                query.to_string(),
                json!({"block": block, "first": first, "skip": skip}),
            )
            .await?;

        let rows: Vec<TransferRow> = match data.get("nftTransferHistories") {
            Some(rows) => serde_json::from_value(rows.clone()).context("Unexpected transfer shape")?,
            None => Vec::new(),
        };

        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            let (Ok(nft), Ok(new_owner), Some(block)) = (
                row.nft.id.parse::<Address>(),
                row.new_owner.id.parse::<Address>(),
                parse_block(&row.block),
            ) else {
                debug!("Skipping malformed transfer row for {}", row.nft.id);
                continue;
            };
            transfers.push(NftTransfer {
                nft,
                new_owner,
                block,
            });
        }
        Ok(transfers)
    }
}
