//! Configuration management for the newsnet node.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables referenced as `${VAR_NAME}`
//! - Default values (fallbacks)

use alloy::dyn_abi::DynSolType;
use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Main configuration for the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database locations
    pub storage: StorageConfig,

    /// Trie settings
    #[serde(default)]
    pub trie: TrieConfig,

    /// RPC endpoints shared by crawler paths
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Crawler paths
    #[serde(default)]
    pub paths: Vec<PathConfig>,

    /// Which paths feed the allowlist registry
    #[serde(default)]
    pub registry: RegistryConfig,

    /// HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// File of the live message trie. Migration stages next to it.
    pub trie_path: String,

    /// Crawler database URL (e.g., "sqlite://crawler.db")
    pub crawler_database_url: String,

    /// Maximum number of connections in the crawler pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the crawler pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Trie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrieConfig {
    /// Bound on concurrent node lookups during a walk.
    #[serde(default = "default_walk_concurrency")]
    pub walk_concurrency: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            walk_concurrency: default_walk_concurrency(),
        }
    }
}

/// An RPC endpoint. Paths refer to it by `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// HTTP JSON-RPC URL
    pub url: String,

    /// Extra request headers, e.g. `Authorization`
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests allowed per `unit_secs`. Unlimited when absent.
    #[serde(default)]
    pub requests_per_unit: Option<u32>,

    /// Length of the rate-limit window, one second when absent
    #[serde(default)]
    pub unit_secs: Option<u64>,
}

/// One crawler path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Unique path name, also the key of its checkpoint and record log
    pub name: String,

    /// Tick scheduling
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Log source
    pub extractor: ExtractorConfig,

    /// ABI description of the event
    #[serde(default)]
    pub transformer: TransformerConfig,

    /// Record derivation
    pub loader: LoaderConfig,

    /// Hook run after every successful tick
    #[serde(default)]
    pub end: Option<EndHook>,
}

/// Coordinator settings of a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds between ticks.
    ///
    /// **Must be > 0**, tokio intervals cannot be zero.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Keep raw extracted logs in the crawler database
    #[serde(default)]
    pub archive: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            archive: false,
        }
    }
}

/// Extractor settings of a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// URL of one of the `[[endpoints]]`
    pub endpoint: String,

    /// Log filter and enrichment
    pub args: ExtractorArgs,
}

/// Log filter and enrichment flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorArgs {
    /// First block of a fresh path
    pub start: u64,

    /// Last block to crawl, follow the head when absent
    #[serde(default)]
    pub end: Option<u64>,

    /// Emitting contract
    pub address: Address,

    /// Topic filter by position, starting at the event signature
    #[serde(default)]
    pub topics: Vec<B256>,

    /// Blocks per tick
    #[serde(default = "default_blockspan")]
    pub blockspan: u64,

    /// Attach the block timestamp
    #[serde(default)]
    pub include_timestamp: bool,

    /// Attach the transaction value
    #[serde(default)]
    pub include_value: bool,

    /// Attach the transaction sender
    #[serde(default)]
    pub include_sender: bool,
}

/// Transformer settings of a path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Event inputs. Empty means the loader module's own event.
    #[serde(default)]
    pub args: Vec<AbiInput>,
}

/// One event input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiInput {
    /// Input name
    pub name: String,

    /// Solidity type, e.g. `address` or `bytes32[3]`
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether the input is carried in a topic
    #[serde(default)]
    pub indexed: bool,
}

impl AbiInput {
    fn new(name: &str, kind: &str, indexed: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            indexed,
        }
    }
}

/// Loader settings of a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Record type produced
    pub module: LoaderModule,

    /// Fields of the ordering key
    #[serde(default)]
    pub order: OrderKey,
}

/// Loader modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderModule {
    /// Transfers become account records
    Accounts,
    /// `Delegate` events become delegation records
    Delegations,
    /// Decoded values stored as JSON
    Logs,
}

impl LoaderModule {
    /// Event inputs used when the path does not list its own.
    pub fn default_inputs(self) -> Vec<AbiInput> {
        match self {
            LoaderModule::Accounts => vec![
                AbiInput::new("from", "address", true),
                AbiInput::new("to", "address", true),
                AbiInput::new("tokenId", "uint256", true),
            ],
            LoaderModule::Delegations => vec![AbiInput::new("data", "bytes32[3]", false)],
            LoaderModule::Logs => Vec::new(),
        }
    }
}

/// Ordering key layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    /// `[blockNumber, transactionIndex]`
    BlockTx,
    /// `[blockNumber, transactionIndex, logIndex]`
    #[default]
    BlockTxLog,
}

/// End hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndHook {
    /// Rebuild the account snapshot of the registry
    RefreshAccounts,
    /// Rebuild the delegation snapshot of the registry
    RefreshDelegations,
}

impl PathConfig {
    /// The transformer inputs in effect for this path.
    pub fn abi_inputs(&self) -> Vec<AbiInput> {
        if self.transformer.args.is_empty() {
            self.loader.module.default_inputs()
        } else {
            self.transformer.args.clone()
        }
    }
}

/// Registry sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path whose records are account records
    #[serde(default)]
    pub accounts_path: Option<String>,

    /// Path whose records are delegation records
    #[serde(default)]
    pub delegations_path: Option<String>,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the API from `run`
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Cap of `amount` on message listing
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_walk_concurrency() -> usize {
    newsnet_trie::DEFAULT_WALK_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_blockspan() -> u64 {
    5000
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_page_size() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `url = "${RPC_HTTP_HOST}"`
    ///
    /// # Example
    /// ```no_run
    /// # use newsnet_node::config::Config;
    /// let config = Config::from_file("node.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Endpoint configured under `url`.
    pub fn endpoint(&self, url: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.url == url)
    }

    /// Path configured under `name`.
    pub fn path(&self, name: &str) -> Option<&PathConfig> {
        self.paths.iter().find(|p| p.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.storage.trie_path.trim().is_empty() {
            anyhow::bail!("Storage trie_path cannot be empty");
        }
        if self.storage.crawler_database_url.is_empty() {
            anyhow::bail!("Storage crawler_database_url cannot be empty");
        }
        if self.storage.max_connections == 0 {
            anyhow::bail!("Storage max_connections must be > 0");
        }
        if self.storage.min_connections > self.storage.max_connections {
            anyhow::bail!(
                "Storage min_connections ({}) cannot exceed max_connections ({})",
                self.storage.min_connections,
                self.storage.max_connections
            );
        }

        if self.trie.walk_concurrency == 0 {
            anyhow::bail!("Trie walk_concurrency must be > 0");
        }

        let mut urls = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.url.is_empty() {
                anyhow::bail!("Endpoint url cannot be empty");
            }
            if !urls.insert(endpoint.url.as_str()) {
                anyhow::bail!("Endpoint '{}' is configured twice", endpoint.url);
            }
            if endpoint.timeout_secs == 0 {
                anyhow::bail!("Endpoint '{}' timeout_secs must be > 0", endpoint.url);
            }
            if endpoint.requests_per_unit == Some(0) {
                anyhow::bail!("Endpoint '{}' requests_per_unit must be > 0", endpoint.url);
            }
            if endpoint.unit_secs == Some(0) {
                anyhow::bail!("Endpoint '{}' unit_secs must be > 0", endpoint.url);
            }
        }

        let mut names = HashSet::new();
        for path in &self.paths {
            self.validate_path(path)?;
            if !names.insert(path.name.as_str()) {
                anyhow::bail!("Path name '{}' is used twice", path.name);
            }
        }

        self.validate_registry_source(
            "accounts_path",
            self.registry.accounts_path.as_deref(),
            LoaderModule::Accounts,
        )?;
        self.validate_registry_source(
            "delegations_path",
            self.registry.delegations_path.as_deref(),
            LoaderModule::Delegations,
        )?;

        if self.api.max_page_size == 0 {
            anyhow::bail!("Api max_page_size must be > 0");
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        // Validate logging format
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

    fn validate_path(&self, path: &PathConfig) -> Result<()> {
        if path.name.trim().is_empty() {
            anyhow::bail!("Path name cannot be empty");
        }
        let name = &path.name;

        if path.coordinator.interval_secs == 0 {
            anyhow::bail!(
                "Path '{}' interval_secs must be > 0 (tokio interval cannot be zero)",
                name
            );
        }

        if self.endpoint(&path.extractor.endpoint).is_none() {
            anyhow::bail!(
                "Path '{}' refers to unknown endpoint '{}'",
                name,
                path.extractor.endpoint
            );
        }

        let args = &path.extractor.args;
        if args.blockspan == 0 {
            anyhow::bail!("Path '{}' blockspan must be > 0", name);
        }
        if let Some(end) = args.end {
            if end < args.start {
                anyhow::bail!(
                    "Path '{}' end block {} is before start block {}",
                    name,
                    end,
                    args.start
                );
            }
        }
        if args.topics.len() > 4 {
            anyhow::bail!("Path '{}' has {} topics, at most 4", name, args.topics.len());
        }

        let inputs = path.abi_inputs();
        if inputs.is_empty() {
            anyhow::bail!("Path '{}' transformer args cannot be empty", name);
        }
        for input in &inputs {
            input.kind.parse::<DynSolType>().with_context(|| {
                format!(
                    "Path '{}' input '{}' has invalid ABI type '{}'",
                    name, input.name, input.kind
                )
            })?;
        }
        let indexed = inputs.iter().filter(|i| i.indexed).count();
        if indexed > 3 {
            anyhow::bail!("Path '{}' has {} indexed inputs, at most 3", name, indexed);
        }

        match path.end {
            Some(EndHook::RefreshAccounts) if self.registry.accounts_path.is_none() => {
                anyhow::bail!(
                    "Path '{}' uses refresh-accounts but registry accounts_path is not set",
                    name
                );
            }
            Some(EndHook::RefreshDelegations) if self.registry.delegations_path.is_none() => {
                anyhow::bail!(
                    "Path '{}' uses refresh-delegations but registry delegations_path is not set",
                    name
                );
            }
            _ => {}
        }

        Ok(())
    }

    fn validate_registry_source(
        &self,
        field: &str,
        name: Option<&str>,
        module: LoaderModule,
    ) -> Result<()> {
        let Some(name) = name else {
            return Ok(());
        };
        let Some(path) = self.path(name) else {
            anyhow::bail!("Registry {} refers to unknown path '{}'", field, name);
        };
        if path.loader.module != module {
            anyhow::bail!(
                "Registry {} path '{}' must use the {:?} loader",
                field,
                name,
                module
            );
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Plain,
    Comment,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

/// Expand `${VAR_NAME}` placeholders.
///
/// Placeholders inside TOML comments are left as they are. Placeholders in
/// every string flavor are expanded. A referenced variable that is not set is
/// an error.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut state = Scan::Plain;
    let mut rest = input;

    while let Some(ch) = rest.chars().next() {
        match (state, ch) {
            (Scan::Comment, '\n') => state = Scan::Plain,
            (Scan::Comment, _) => {}
            (Scan::Basic | Scan::MultiBasic, '\\') => {
                // Keep the escape and the escaped char together.
                let len = rest
                    .char_indices()
                    .nth(2)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                out.push_str(&rest[..len]);
                rest = &rest[len..];
                continue;
            }
            (_, '$') if rest.starts_with("${") => {
                let body = &rest[2..];
                let Some(close) = body.find('}') else {
                    anyhow::bail!(
                        "Unclosed environment variable placeholder at byte {}",
                        input.len() - rest.len()
                    );
                };
                let var = &body[..close];
                if var.is_empty() {
                    anyhow::bail!(
                        "Empty environment variable name at byte {}",
                        input.len() - rest.len()
                    );
                }
                let value = std::env::var(var)
                    .with_context(|| format!("Environment variable '{}' is not set", var))?;
                out.push_str(&value);
                rest = &body[close + 1..];
                continue;
            }
            (Scan::Plain, '#') => state = Scan::Comment,
            (Scan::Plain, '"') if rest.starts_with("\"\"\"") => {
                state = Scan::MultiBasic;
                out.push_str("\"\"\"");
                rest = &rest[3..];
                continue;
            }
            (Scan::Plain, '\'') if rest.starts_with("'''") => {
                state = Scan::MultiLiteral;
                out.push_str("'''");
                rest = &rest[3..];
                continue;
            }
            (Scan::MultiBasic, '"') if rest.starts_with("\"\"\"") => {
                state = Scan::Plain;
                out.push_str("\"\"\"");
                rest = &rest[3..];
                continue;
            }
            (Scan::MultiLiteral, '\'') if rest.starts_with("'''") => {
                state = Scan::Plain;
                out.push_str("'''");
                rest = &rest[3..];
                continue;
            }
            (Scan::Plain, '"') => state = Scan::Basic,
            (Scan::Basic, '"') => state = Scan::Plain,
            (Scan::Plain, '\'') => state = Scan::Literal,
            (Scan::Literal, '\'') => state = Scan::Plain,
            _ => {}
        }

        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    Ok(out)
}
