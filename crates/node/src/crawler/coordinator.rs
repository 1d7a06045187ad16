//! Per-path tick scheduling.
//!
//! A [`PathPipeline`] owns one path's extractor, transformer and loader. Each
//! tick retries parked logs, crawls the next block range, appends the derived
//! records and advances the checkpoint. Ticks of one path never overlap.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::extractor::Extractor;
use super::loader::Loader;
use super::ordering;
use super::source::{ChainSource, RawLog};
use super::transformer::Transformer;
use crate::config::{EndHook, ExtractorArgs, OrderKey, PathConfig};
use crate::registry::Registry;
use crate::storage::Storage;

/// Inclusive block range of the next tick, or `None` when there is nothing to
/// crawl yet.
///
/// A fresh path starts at `start`; afterwards the range begins right after the
/// checkpoint. The end is clamped to the chain head and to the path's `end`.
pub fn next_range(checkpoint: Option<u64>, head: u64, args: &ExtractorArgs) -> Option<(u64, u64)> {
    let (from, to) = match checkpoint {
        None => (args.start, args.start.saturating_add(args.blockspan)),
        Some(last) => (
            last.checked_add(1)?,
            last.saturating_add(args.blockspan),
        ),
    };

    let mut to = to.min(head);
    if let Some(end) = args.end {
        to = to.min(end);
    }

    (from <= to).then_some((from, to))
}

/// Counters of one processed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// First block crawled
    pub from: u64,
    /// Last block crawled, the new checkpoint
    pub to: u64,
    /// Logs returned by the endpoint
    pub extracted: usize,
    /// Records appended, retries included
    pub loaded: usize,
    /// Logs that decoded or loaded to nothing
    pub skipped: usize,
    /// Logs parked after an enrichment failure
    pub parked: usize,
    /// Parked logs that loaded this tick
    pub retried: usize,
}

/// Result of [`PathPipeline::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick of the path is still running.
    Busy,
    /// The head has not moved past the checkpoint.
    Idle,
    /// A block range was crawled.
    Processed(TickReport),
}

enum LogOutcome {
    Loaded,
    Skipped,
}

/// The four crawler stages of one path.
pub struct PathPipeline {
    config: PathConfig,
    storage: Storage,
    extractor: Extractor,
    transformer: Transformer,
    loader: Loader,
    registry: Registry,
    running: Mutex<()>,
}

impl PathPipeline {
    /// Assemble a path over `source`. Fails when the path's ABI description
    /// does not parse.
    pub fn new(
        config: PathConfig,
        source: Arc<dyn ChainSource>,
        storage: Storage,
        registry: Registry,
    ) -> Result<Self> {
        let transformer = Transformer::new(&config.abi_inputs())
            .with_context(|| format!("Invalid transformer args for path {}", config.name))?;
        let extractor = Extractor::new(source, config.extractor.args.clone());
        let loader = Loader::new(config.loader.module, config.loader.order);

        Ok(Self {
            config,
            storage,
            extractor,
            transformer,
            loader,
            registry,
            running: Mutex::new(()),
        })
    }

    /// Path name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Tick forever on the path's interval. Each tick runs on its own task so
    /// a slow tick makes later ones report [`TickOutcome::Busy`].
    pub async fn run(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.coordinator.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(path = %self.name(), interval_secs = period.as_secs(), "Path coordinator started");

        loop {
            interval.tick().await;
            let pipeline = Arc::clone(&self);
            tokio::spawn(async move {
                match pipeline.tick().await {
                    Ok(TickOutcome::Processed(report)) => info!(
                        path = %pipeline.name(),
                        from = report.from,
                        to = report.to,
                        extracted = report.extracted,
                        loaded = report.loaded,
                        skipped = report.skipped,
                        parked = report.parked,
                        retried = report.retried,
                        "Tick complete"
                    ),
                    Ok(TickOutcome::Idle) => debug!(path = %pipeline.name(), "Nothing to crawl"),
                    Ok(TickOutcome::Busy) => {
                        debug!(path = %pipeline.name(), "Previous tick still running")
                    }
                    Err(e) => error!(path = %pipeline.name(), "Tick failed: {:#}", e),
                }
            });
        }
    }

    /// Run one tick. An error leaves the checkpoint where it was.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            return Ok(TickOutcome::Busy);
        };

        let mut report = TickReport::default();
        self.retry_parked(&mut report).await?;

        let head = self.extractor.head().await.context("Failed to fetch chain head")?;
        let checkpoint = self.storage.get_checkpoint(self.name()).await?;

        let Some((from, to)) = next_range(checkpoint, head, self.extractor.args()) else {
            if report.retried > 0 {
                self.run_end_hook().await?;
            }
            return Ok(TickOutcome::Idle);
        };
        report.from = from;
        report.to = to;

        let logs = self
            .extractor
            .extract(from, to)
            .await
            .with_context(|| format!("Failed to extract blocks {} to {}", from, to))?;
        report.extracted = logs.len();

        if self.config.coordinator.archive {
            self.archive(&logs).await?;
        }

        for mut log in logs {
            if let Err(e) = self.extractor.enrich(&mut log).await {
                let key = raw_key(&log);
                warn!(path = %self.name(), key = %key, "Enrichment failed, parking log: {:#}", e);
                self.storage
                    .park_failed_log(self.name(), &key, &serde_json::to_string(&log)?, &e.to_string())
                    .await?;
                report.parked += 1;
                continue;
            }

            match self.process(&log).await? {
                LogOutcome::Loaded => report.loaded += 1,
                LogOutcome::Skipped => report.skipped += 1,
            }
        }

        self.storage.set_checkpoint(self.name(), to).await?;
        self.run_end_hook().await?;

        Ok(TickOutcome::Processed(report))
    }

    /// Retry every parked log of the path, oldest first.
    async fn retry_parked(&self, report: &mut TickReport) -> Result<()> {
        for failed in self.storage.failed_logs(self.name()).await? {
            let mut log: RawLog = match serde_json::from_str(&failed.raw_log) {
                Ok(log) => log,
                Err(e) => {
                    warn!(path = %self.name(), key = %failed.key, "Dropping unreadable parked log: {}", e);
                    self.storage.clear_failed_log(self.name(), &failed.key).await?;
                    continue;
                }
            };

            if let Err(e) = self.extractor.enrich(&mut log).await {
                debug!(
                    path = %self.name(),
                    key = %failed.key,
                    attempts = failed.attempts + 1,
                    "Enrichment retry failed: {:#}", e
                );
                self.storage
                    .park_failed_log(self.name(), &failed.key, &failed.raw_log, &e.to_string())
                    .await?;
                continue;
            }

            if let LogOutcome::Loaded = self.process(&log).await? {
                report.loaded += 1;
                report.retried += 1;
            } else {
                report.skipped += 1;
            }
            self.storage.clear_failed_log(self.name(), &failed.key).await?;
        }
        Ok(())
    }

    /// Decode, load and append one enriched log. Bad logs are skipped, storage
    /// failures fail the tick.
    async fn process(&self, log: &RawLog) -> Result<LogOutcome> {
        let decoded = match self.transformer.decode(log) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(path = %self.name(), key = %raw_key(log), "Skipping undecodable log: {}", e);
                return Ok(LogOutcome::Skipped);
            }
        };

        let record = match self.loader.load(&decoded) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %self.name(), key = %raw_key(log), "Skipping log: {}", e);
                return Ok(LogOutcome::Skipped);
            }
        };

        let appended = self
            .storage
            .append_record(self.name(), &record.key, &record.value)
            .await?;
        if !appended {
            debug!(path = %self.name(), key = %record.key, "Record already present");
        }
        Ok(LogOutcome::Loaded)
    }

    async fn archive(&self, logs: &[RawLog]) -> Result<()> {
        let entries = logs
            .iter()
            .map(|log| -> Result<(String, String)> {
                Ok((raw_key(log), serde_json::to_string(log)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.storage.archive_logs(self.name(), &entries).await
    }

    async fn run_end_hook(&self) -> Result<()> {
        match self.config.end {
            Some(EndHook::RefreshAccounts) => {
                self.registry.refresh_accounts().await?;
            }
            Some(EndHook::RefreshDelegations) => {
                self.registry.refresh_delegations().await?;
            }
            None => {}
        }
        Ok(())
    }
}

/// Full `block/tx/log` key of a raw log, independent of the path's layout.
fn raw_key(log: &RawLog) -> String {
    ordering::key_for(
        OrderKey::BlockTxLog,
        log.block_number,
        log.transaction_index,
        log.log_index,
    )
}
