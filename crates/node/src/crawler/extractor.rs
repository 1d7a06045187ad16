//! Log extraction and enrichment for one path.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use super::source::{ChainSource, LogQuery, RawLog};
use crate::config::ExtractorArgs;

/// Fetches a path's logs from its endpoint.
#[derive(Clone)]
pub struct Extractor {
    source: Arc<dyn ChainSource>,
    args: ExtractorArgs,
}

impl Extractor {
    /// Create an extractor over `source`.
    pub fn new(source: Arc<dyn ChainSource>, args: ExtractorArgs) -> Self {
        Self { source, args }
    }

    /// Filter and enrichment settings.
    pub fn args(&self) -> &ExtractorArgs {
        &self.args
    }

    /// Latest block of the chain.
    pub async fn head(&self) -> Result<u64> {
        self.source.block_number().await
    }

    /// Logs of the path in `[from, to]`, in chain order.
    pub async fn extract(&self, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let query = LogQuery {
            address: self.args.address,
            topics: self.args.topics.clone(),
            from_block: from,
            to_block: to,
        };
        let logs = self.source.logs(&query).await?;
        debug!(from, to, count = logs.len(), "Extracted logs");
        Ok(logs)
    }

    /// Attach sender, timestamp and value as the path asks.
    pub async fn enrich(&self, log: &mut RawLog) -> Result<()> {
        if self.args.include_sender && log.sender.is_none() {
            log.sender = Some(self.source.transaction_sender(log.transaction_hash).await?);
        }
        if self.args.include_timestamp && log.block_timestamp.is_none() {
            log.block_timestamp = Some(self.source.block_timestamp(log.block_number).await?);
        }
        if self.args.include_value && log.value.is_none() {
            log.value = Some(self.source.transaction_value(log.transaction_hash).await?);
        }
        Ok(())
    }
}
