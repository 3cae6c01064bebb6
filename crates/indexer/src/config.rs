//! Configuration management for the DDO indexer.
//!
//! Configuration is read from a TOML file. `${VAR}` placeholders are expanded
//! from the environment before parsing, then the well-known environment
//! variables listed on [`Config::apply_env`] override individual settings.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::context::MonitorSettings;
use crate::retry::RetryPolicy;

/// Smallest accepted sleep between monitor iterations.
pub const MIN_QUIET_TIME_SECS: u64 = 3;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chains to index, one monitor each.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// Network name to RPC URL, used to resolve `EVENTS_RPC`.
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
    #[allow(missing_docs)]
    pub database: DatabaseConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub retry: RetryConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub decryptor: DecryptorConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub policy: PolicyConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[allow(missing_docs)]
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One indexed chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[allow(missing_docs)]
    pub chain_id: u64,
    /// Label used in logs.
    #[serde(default = "default_network")]
    pub network: String,
    /// HTTP(S) JSON-RPC endpoint.
    pub rpc_url: String,
    /// ERC-721 factory that deployed the data NFTs.
    pub factory: Address,
    /// Genesis block of the metadata contracts.
    #[serde(default)]
    pub start_block: u64,
    /// Blocks behind head considered final.
    #[serde(default)]
    pub confirmations: u64,
    /// Subgraph serving order statistics and NFT transfers.
    #[serde(default)]
    pub subgraph_url: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL.
    pub url: String,
    #[allow(missing_docs)]
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[allow(missing_docs)]
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Event monitor settings shared by every chain.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between iterations once caught up.
    #[serde(default = "default_quiet_time_secs")]
    pub quiet_time_secs: u64,
    /// Maximum blocks per `eth_getLogs` call.
    #[serde(default = "default_blocks_chunk_size")]
    pub blocks_chunk_size: u64,
    /// Restart every chain from its genesis block.
    #[serde(default)]
    pub ignore_last_block: bool,
}

/// Retry queue back-off and retention.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[allow(missing_docs)]
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,
    #[allow(missing_docs)]
    #[serde(default = "default_max_backoff_event_secs")]
    pub max_backoff_event_secs: u64,
    #[allow(missing_docs)]
    #[serde(default = "default_max_backoff_tx_secs")]
    pub max_backoff_tx_secs: u64,
    #[allow(missing_docs)]
    #[serde(default = "default_max_backoff_block_secs")]
    pub max_backoff_block_secs: u64,
    /// Entries older than this are dropped.
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,
    /// How often each chain's worker looks for due entries.
    #[serde(default = "default_worker_interval_secs")]
    pub worker_interval_secs: u64,
}

/// Where encrypted payloads are opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptorMode {
    /// POST to the provider URL carried by the event.
    #[default]
    Provider,
    /// Open ECIES payloads with the configured key.
    Local,
}

/// Decryptor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DecryptorConfig {
    /// Hex secp256k1 key, with or without `0x`.
    #[serde(default)]
    pub private_key: String,
    #[allow(missing_docs)]
    #[serde(default = "default_decrypt_timeout_secs")]
    pub timeout_secs: u64,
    #[allow(missing_docs)]
    #[serde(default)]
    pub mode: DecryptorMode,
}

/// Publishing policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Empty allows every publisher.
    #[serde(default)]
    pub allowed_publishers: Vec<Address>,
    /// Empty skips the validation-proof check.
    #[serde(default)]
    pub allowed_validators: Vec<Address>,
    /// Optional permission server consulted before writes.
    #[serde(default)]
    pub rbac_server_url: Option<String>,
}

/// Reconciliation feeds and intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[allow(missing_docs)]
    #[serde(default)]
    pub asset_purgatory_url: Option<String>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub account_purgatory_url: Option<String>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub veallocate_url: Option<String>,
    #[allow(missing_docs)]
    #[serde(default = "default_update_interval_mins")]
    pub purgatory_interval_mins: u64,
    #[allow(missing_docs)]
    #[serde(default = "default_update_interval_mins")]
    pub veallocate_interval_mins: u64,
    #[allow(missing_docs)]
    #[serde(default = "default_ownership_interval_secs")]
    pub ownership_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_network() -> String {
    "development".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_quiet_time_secs() -> u64 {
    MIN_QUIET_TIME_SECS
}

fn default_blocks_chunk_size() -> u64 {
    1000
}

fn default_base_interval_secs() -> u64 {
    300
}

fn default_max_backoff_event_secs() -> u64 {
    3600
}

fn default_max_backoff_tx_secs() -> u64 {
    7200
}

fn default_max_backoff_block_secs() -> u64 {
    21600
}

fn default_max_hold_secs() -> u64 {
    14 * 24 * 3600
}

fn default_worker_interval_secs() -> u64 {
    60
}

fn default_decrypt_timeout_secs() -> u64 {
    4
}

fn default_update_interval_mins() -> u64 {
    60
}

fn default_ownership_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            quiet_time_secs: default_quiet_time_secs(),
            blocks_chunk_size: default_blocks_chunk_size(),
            ignore_last_block: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
            max_backoff_event_secs: default_max_backoff_event_secs(),
            max_backoff_tx_secs: default_max_backoff_tx_secs(),
            max_backoff_block_secs: default_max_backoff_block_secs(),
            max_hold_secs: default_max_hold_secs(),
            worker_interval_secs: default_worker_interval_secs(),
        }
    }
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            timeout_secs: default_decrypt_timeout_secs(),
            mode: DecryptorMode::default(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            asset_purgatory_url: None,
            account_purgatory_url: None,
            veallocate_url: None,
            purgatory_interval_mins: default_update_interval_mins(),
            veallocate_interval_mins: default_update_interval_mins(),
            ownership_interval_secs: default_ownership_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MonitorConfig {
    /// Monitor settings for one chain.
    pub fn settings_for(&self, chain: &ChainConfig) -> MonitorSettings {
        MonitorSettings {
            start_block: chain.start_block,
            chunk_size: self.blocks_chunk_size.max(1),
            confirmations: chain.confirmations,
            quiet_time: Duration::from_secs(self.quiet_time_secs.max(MIN_QUIET_TIME_SECS)),
        }
    }
}

impl RetryConfig {
    #[allow(missing_docs)]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_interval: Duration::from_secs(self.base_interval_secs),
            max_backoff_event: Duration::from_secs(self.max_backoff_event_secs),
            max_backoff_tx: Duration::from_secs(self.max_backoff_tx_secs),
            max_backoff_block: Duration::from_secs(self.max_backoff_block_secs),
            max_hold: Duration::from_secs(self.max_hold_secs),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    ///
    /// # Example
    /// ```no_run
    /// # use ddocache_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents, |name| std::env::var(name).ok())?;

        let mut config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string. No environment is consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Apply the environment overrides.
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `EVENTS_RPC` | RPC URL, or a key of `[networks]` |
    /// | `NETWORK_NAME` | chain label |
    /// | `METADATA_CONTRACT_BLOCK` | `start_block` |
    /// | `ASSET_PURGATORY_URL`, `ACCOUNT_PURGATORY_URL`, `VEALLOCATE_URL` | reconciliation feeds |
    /// | `RBAC_SERVER_URL` | permission server |
    /// | `ALLOWED_PUBLISHERS`, `ALLOWED_VALIDATORS` | JSON or comma separated addresses |
    /// | `BLOCKS_CHUNK_SIZE` | non-integer falls back to 1000 |
    /// | `OCN_EVENTS_MONITOR_QUITE_TIME` | seconds, at least 3 |
    /// | `PURGATORY_UPDATE_INTERVAL`, `VEALLOCATE_UPDATE_INTERVAL` | minutes |
    /// | `IGNORE_LAST_BLOCK` | truthy restarts from genesis |
    /// | `PRIVATE_KEY`, `DATABASE_URL` | decryptor key, database |
    ///
    /// Chain-scoped variables require exactly one configured chain.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(rpc) = get("EVENTS_RPC") {
            let url = self.resolve_rpc(rpc.trim())?;
            self.single_chain("EVENTS_RPC")?.rpc_url = url;
        }
        if let Some(name) = get("NETWORK_NAME") {
            self.single_chain("NETWORK_NAME")?.network = name;
        }
        if let Some(block) = get("METADATA_CONTRACT_BLOCK") {
            let block = block
                .trim()
                .parse()
                .with_context(|| format!("METADATA_CONTRACT_BLOCK is not a block number: {block}"))?;
            self.single_chain("METADATA_CONTRACT_BLOCK")?.start_block = block;
        }

        if let Some(url) = get("ASSET_PURGATORY_URL") {
            self.reconciliation.asset_purgatory_url = Some(url);
        }
        if let Some(url) = get("ACCOUNT_PURGATORY_URL") {
            self.reconciliation.account_purgatory_url = Some(url);
        }
        if let Some(url) = get("VEALLOCATE_URL") {
            self.reconciliation.veallocate_url = Some(url);
        }
        if let Some(url) = get("RBAC_SERVER_URL") {
            self.policy.rbac_server_url = Some(url);
        }
        if let Some(list) = lookup("ALLOWED_PUBLISHERS") {
            self.policy.allowed_publishers =
                parse_address_list(&list).context("Invalid ALLOWED_PUBLISHERS")?;
        }
        if let Some(list) = lookup("ALLOWED_VALIDATORS") {
            self.policy.allowed_validators =
                parse_address_list(&list).context("Invalid ALLOWED_VALIDATORS")?;
        }

        if let Some(size) = get("BLOCKS_CHUNK_SIZE") {
            self.monitor.blocks_chunk_size = size
                .trim()
                .parse::<u64>()
                .unwrap_or_else(|_| default_blocks_chunk_size())
                .max(1);
        }
        if let Some(secs) = get("OCN_EVENTS_MONITOR_QUITE_TIME") {
            self.monitor.quiet_time_secs = secs
                .trim()
                .parse::<u64>()
                .unwrap_or_else(|_| default_quiet_time_secs())
                .max(MIN_QUIET_TIME_SECS);
        }
        if let Some(mins) = get("PURGATORY_UPDATE_INTERVAL") {
            self.reconciliation.purgatory_interval_mins = parse_minutes(&mins);
        }
        if let Some(mins) = get("VEALLOCATE_UPDATE_INTERVAL") {
            self.reconciliation.veallocate_interval_mins = parse_minutes(&mins);
        }
        if let Some(flag) = get("IGNORE_LAST_BLOCK") {
            self.monitor.ignore_last_block = is_truthy(&flag);
        }

        if let Some(key) = get("PRIVATE_KEY") {
            self.decryptor.private_key = key.trim().to_string();
        }
        if let Some(url) = get("DATABASE_URL") {
            self.database.url = url;
        }

        Ok(())
    }

    fn resolve_rpc(&self, value: &str) -> Result<String> {
        let schemes = ["http://", "https://", "ws://", "wss://"];
        if schemes.iter().any(|s| value.starts_with(s)) {
            return Ok(value.to_string());
        }
        self.networks.get(value).cloned().with_context(|| {
            format!("EVENTS_RPC '{value}' is neither a URL nor a network in [networks]")
        })
    }

    fn single_chain(&mut self, variable: &str) -> Result<&mut ChainConfig> {
        match self.chains.as_mut_slice() {
            [chain] => Ok(chain),
            chains => anyhow::bail!(
                "{} applies to a single chain, but {} are configured",
                variable,
                chains.len()
            ),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one [[chains]] entry is required");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.chain_id == 0 {
                anyhow::bail!("Chain ID must be non-zero");
            }
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Chain {} is configured twice", chain.chain_id);
            }
            if chain.rpc_url.is_empty() {
                anyhow::bail!("Chain {} RPC URL cannot be empty", chain.chain_id);
            }
            // The provider speaks JSON-RPC over HTTP only.
            if !(chain.rpc_url.starts_with("http://") || chain.rpc_url.starts_with("https://")) {
                anyhow::bail!(
                    "Chain {} RPC URL must be http(s) (got '{}')",
                    chain.chain_id,
                    chain.rpc_url
                );
            }
            if chain.factory.is_zero() {
                anyhow::bail!("Chain {} factory must be a non-zero address", chain.chain_id);
            }
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.retry.base_interval_secs == 0 || self.retry.worker_interval_secs == 0 {
            anyhow::bail!("Retry base_interval_secs and worker_interval_secs must be > 0");
        }
        if self.reconciliation.purgatory_interval_mins == 0
            || self.reconciliation.veallocate_interval_mins == 0
            || self.reconciliation.ownership_interval_secs == 0
        {
            anyhow::bail!("Reconciliation intervals must be > 0");
        }

        if self.decryptor.private_key.is_empty() {
            anyhow::bail!("Decryptor private_key cannot be empty (set PRIVATE_KEY)");
        }
        let key = self.decryptor.private_key.trim_start_matches("0x");
        if key.len() != 64 {
            anyhow::bail!(
                "Decryptor private_key must be 64 hex characters (got {})",
                key.len()
            );
        }
        if !key.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Decryptor private_key must be a valid hex string");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

/// Parse `["0x..", ..]` or `0x..,0x..`. Blank input is an empty list.
pub fn parse_address_list(input: &str) -> Result<Vec<Address>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if input.starts_with('[') {
        let items: Vec<String> =
            serde_json::from_str(input).context("Address list is not a JSON array of strings")?;
        return items
            .iter()
            .map(|item| {
                item.trim()
                    .parse()
                    .with_context(|| format!("Invalid address: {item}"))
            })
            .collect();
    }
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse().with_context(|| format!("Invalid address: {item}")))
        .collect()
}

fn parse_minutes(value: &str) -> u64 {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|m| *m > 0)
        .unwrap_or_else(default_update_interval_mins)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Expand `${VAR}` placeholders.
///
/// Placeholders inside TOML comments are left alone; those inside strings are
/// expanded. An unset variable is an error.
fn expand_env_vars<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let mut quote: Option<char> = None;
    let mut in_comment = false;
    let mut escaped = false;

    while let Some((pos, ch)) = chars.next() {
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }

        match ch {
            '\n' => in_comment = false,
            _ if in_comment => {}
            '\\' if quote == Some('"') => escaped = true,
            '"' | '\'' => match quote {
                None => quote = Some(ch),
                Some(open) if open == ch => quote = None,
                Some(_) => {}
            },
            '#' if quote.is_none() => in_comment = true,
            '$' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    anyhow::bail!("Unclosed environment variable placeholder at position {}", pos);
                }
                if name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", pos);
                }
                let value = lookup(&name).with_context(|| {
                    format!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        name, pos
                    )
                })?;
                out.push_str(&value);
                continue;
            }
            _ => {}
        }

        out.push(ch);
    }

    Ok(out)
}
