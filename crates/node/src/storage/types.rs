//! Database types for the crawler storage layer.

use serde::{Deserialize, Serialize};

/// Progress of one crawler path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    /// Path name.
    pub path: String,
    /// Last block whose logs were fully processed.
    pub last_block: u64,
    /// Unix seconds of the last advance.
    pub updated_at: i64,
}

/// One entry of a path's ordered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    /// Zero-padded ordering key.
    pub key: String,
    /// JSON-encoded record.
    pub value: String,
}

/// A raw log parked after its enrichment failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLog {
    /// Path name.
    pub path: String,
    /// `block/tx/log` ordering key of the log.
    pub key: String,
    /// JSON-encoded raw log.
    pub raw_log: String,
    /// Last failure.
    pub reason: String,
    /// Number of failed attempts so far.
    pub attempts: u32,
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Paths with a checkpoint
    pub path_count: u64,

    /// Records across all path logs
    pub record_count: u64,

    /// Logs awaiting enrichment retry
    pub failed_count: u64,

    /// Archived raw logs
    pub archived_count: u64,
}
