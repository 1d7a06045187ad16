//! Chain crawler.
//!
//! Every configured path runs the same four stages on its own interval:
//!
//! 1. **Coordinator**: picks the next block range from the path checkpoint
//! 2. **Extractor**: fetches matching logs through a rate-limited endpoint
//! 3. **Transformer**: decodes topics and data into named values
//! 4. **Loader**: derives the ordered record and appends it to the path log
//!
//! Paths share nothing but their endpoint's rate limiter.

pub mod coordinator;
pub mod events;
pub mod extractor;
pub mod loader;
pub mod ordering;
pub mod rate_limit;
pub mod source;
pub mod transformer;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub use coordinator::{next_range, PathPipeline, TickOutcome, TickReport};
pub use extractor::Extractor;
pub use loader::{LoadError, LoadedRecord, Loader};
pub use rate_limit::RateLimiter;
pub use source::{build_sources, ChainSource, LogQuery, RawLog, RpcChainSource};
pub use transformer::{DecodeError, DecodedLog, Transformer};

use crate::config::PathConfig;
use crate::registry::Registry;
use crate::storage::Storage;

/// All configured paths.
pub struct Crawler {
    pipelines: Vec<Arc<PathPipeline>>,
}

impl Crawler {
    /// Assemble one pipeline per path over the given sources, keyed by
    /// endpoint URL.
    pub fn new(
        paths: &[PathConfig],
        sources: &HashMap<String, Arc<dyn ChainSource>>,
        storage: Storage,
        registry: Registry,
    ) -> Result<Self> {
        let pipelines = paths
            .iter()
            .map(|path| {
                let source = sources
                    .get(&path.extractor.endpoint)
                    .cloned()
                    .with_context(|| {
                        format!(
                            "Path '{}' refers to unknown endpoint {}",
                            path.name, path.extractor.endpoint
                        )
                    })?;
                PathPipeline::new(path.clone(), source, storage.clone(), registry.clone())
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { pipelines })
    }

    /// The path pipelines, in configuration order.
    pub fn pipelines(&self) -> &[Arc<PathPipeline>] {
        &self.pipelines
    }

    /// Start every path coordinator.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        info!(paths = self.pipelines.len(), "Starting crawler");
        self.pipelines
            .iter()
            .map(|pipeline| tokio::spawn(Arc::clone(pipeline).run()))
            .collect()
    }
}
