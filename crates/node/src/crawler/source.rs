//! Chain access for the extractor.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::rate_limit::RateLimiter;
use crate::config::EndpointConfig;

/// A log as extracted, plus any enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Event signature followed by indexed inputs
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed inputs
    pub data: Bytes,
    /// Block of the log
    pub block_number: u64,
    /// Transaction index within the block
    pub transaction_index: u64,
    /// Log index within the block
    pub log_index: u64,
    /// Transaction hash
    pub transaction_hash: B256,
    /// Transaction sender, when enriched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    /// Block timestamp, when enriched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<u64>,
    /// Transaction value, when enriched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl RawLog {
    /// Convert an RPC log. Pending logs without block coordinates are rejected.
    pub fn from_rpc(log: &Log) -> Result<Self> {
        Ok(Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number.context("Log missing block_number")?,
            transaction_index: log
                .transaction_index
                .context("Log missing transaction_index")?,
            log_index: log.log_index.context("Log missing log_index")?,
            transaction_hash: log
                .transaction_hash
                .context("Log missing transaction_hash")?,
            sender: None,
            block_timestamp: None,
            value: None,
        })
    }

    /// Position of the log on chain.
    pub fn position(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}

/// Log filter over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Emitting contract
    pub address: Address,
    /// Topic filter by position
    pub topics: Vec<B256>,
    /// First block
    pub from_block: u64,
    /// Last block
    pub to_block: u64,
}

/// The chain calls a crawler path needs.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// Logs matching `query`, in chain order.
    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>>;

    /// `from` of the transaction receipt.
    async fn transaction_sender(&self, tx: B256) -> Result<Address>;

    /// Timestamp of `block`.
    async fn block_timestamp(&self, block: u64) -> Result<u64>;

    /// Value transferred by the transaction.
    async fn transaction_value(&self, tx: B256) -> Result<U256>;
}

/// HTTP JSON-RPC source. Every call passes through the endpoint's limiter.
#[derive(Clone)]
pub struct RpcChainSource {
    provider: RootProvider<Http<Client>>,
    limiter: Arc<RateLimiter>,
    url: String,
}

impl RpcChainSource {
    /// Build a source for one endpoint.
    pub fn new(endpoint: &EndpointConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let url = endpoint
            .url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", endpoint.url))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let transport = Http::with_client(client, url);
        let provider = ProviderBuilder::new().on_client(RpcClient::new(transport, false));

        Ok(Self {
            provider,
            limiter,
            url: endpoint.url.clone(),
        })
    }
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn block_number(&self) -> Result<u64> {
        self.limiter.acquire().await;
        self.provider
            .get_block_number()
            .await
            .with_context(|| format!("Failed to get block number from {}", self.url))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        let mut filter = Filter::new()
            .address(query.address)
            .from_block(query.from_block)
            .to_block(query.to_block);
        for (position, topic) in query.topics.iter().enumerate() {
            filter = match position {
                0 => filter.event_signature(*topic),
                1 => filter.topic1(*topic),
                2 => filter.topic2(*topic),
                _ => filter.topic3(*topic),
            };
        }

        self.limiter.acquire().await;
        let logs: Vec<Log> = self.provider.get_logs(&filter).await.with_context(|| {
            format!(
                "Failed to fetch logs for blocks {} to {} from {}",
                query.from_block, query.to_block, self.url
            )
        })?;

        let mut raw = logs
            .iter()
            .filter(|log| !log.removed)
            .map(RawLog::from_rpc)
            .collect::<Result<Vec<_>>>()?;
        raw.sort_by_key(RawLog::position);
        Ok(raw)
    }

    async fn transaction_sender(&self, tx: B256) -> Result<Address> {
        self.limiter.acquire().await;
        let receipt = self
            .provider
            .get_transaction_receipt(tx)
            .await
            .with_context(|| format!("Failed to fetch receipt of {}", tx))?
            .with_context(|| format!("No receipt for {}", tx))?;
        Ok(receipt.from)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        self.limiter.acquire().await;
        let header: Option<serde_json::Value> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (U64::from(block), false))
            .await
            .with_context(|| format!("Failed to fetch block {} from {}", block, self.url))?;
        let timestamp = header
            .as_ref()
            .and_then(|h| h.get("timestamp"))
            .and_then(|t| t.as_str())
            .with_context(|| format!("Block {} has no timestamp", block))?;
        let timestamp = U64::from_str(timestamp)
            .with_context(|| format!("Invalid timestamp {} of block {}", timestamp, block))?;
        Ok(timestamp.to::<u64>())
    }

    async fn transaction_value(&self, tx: B256) -> Result<U256> {
        self.limiter.acquire().await;
        let transaction: Option<serde_json::Value> = self
            .provider
            .raw_request("eth_getTransactionByHash".into(), (tx,))
            .await
            .with_context(|| format!("Failed to fetch transaction {} from {}", tx, self.url))?;
        let value = transaction
            .as_ref()
            .and_then(|t| t.get("value"))
            .and_then(|v| v.as_str())
            .with_context(|| format!("Transaction {} has no value", tx))?;
        U256::from_str(value).with_context(|| format!("Invalid value {} of {}", value, tx))
    }
}

/// One source per distinct endpoint URL, each with its own limiter.
pub fn build_sources(endpoints: &[EndpointConfig]) -> Result<HashMap<String, Arc<dyn ChainSource>>> {
    let mut sources: HashMap<String, Arc<dyn ChainSource>> = HashMap::new();

    for endpoint in endpoints {
        if sources.contains_key(&endpoint.url) {
            continue;
        }

        let limiter = match endpoint.requests_per_unit {
            Some(max) => {
                let unit = Duration::from_secs(endpoint.unit_secs.unwrap_or(1));
                info!(
                    url = %endpoint.url,
                    requests = max,
                    unit_secs = unit.as_secs(),
                    "Rate limiting endpoint"
                );
                RateLimiter::new(max, unit)
            }
            None => RateLimiter::unlimited(),
        };

        let source = RpcChainSource::new(endpoint, Arc::new(limiter))?;
        sources.insert(endpoint.url.clone(), Arc::new(source));
    }

    Ok(sources)
}
