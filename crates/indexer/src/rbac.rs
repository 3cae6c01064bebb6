//! Optional role-based permission gate.

use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

const RBAC_TIMEOUT_SECS: u64 = 5;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RbacRequest<'a> {
    event_type: &'a str,
    component: &'a str,
    credentials: Credentials,
}

#[derive(Serialize)]
struct Credentials {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

/// Client for the RBAC server.
#[derive(Clone)]
pub struct RbacClient {
    client: Client,
    url: String,
}

impl RbacClient {
    #[allow(missing_docs)]
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RBAC_TIMEOUT_SECS))
            .user_agent("ddocache-indexer/rbac")
            .build()
            .context("Failed to build RBAC HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Ask whether `publisher` may emit `event_type`.
    ///
    /// The server answers a bare JSON boolean. Errors mean the server could
    /// not be asked, not that access was denied.
    pub async fn is_allowed(&self, event_type: &str, publisher: Address) -> Result<bool> {
        let body = RbacRequest {
            event_type,
            component: "metadatacache",
            credentials: Credentials {
                kind: "address",
                value: publisher.to_checksum(None),
            },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("RBAC request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("RBAC server returned {}", response.status()));
        }

        let answer: Value = response.json().await.context("RBAC answer is not JSON")?;
        answer
            .as_bool()
            .ok_or_else(|| anyhow!("RBAC answer is not a boolean: {}", answer))
    }
}
