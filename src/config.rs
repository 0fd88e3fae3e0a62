//! Runtime configuration from environment variables
//!
//! Every tunable the periodic tasks use lives here. Values are read once at
//! startup; `validate()` turns nonsensical combinations into a systemic error
//! before any task is spawned.

use crate::error::{IndexerError, IndexerResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Configuration for the reconciliation runtime
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Transfer records, aggregates, cursors and resolved denoms
    pub db_path: String,

    /// Raw per-chain transactions (read-only)
    pub tx_db_path: String,

    /// JSON chain/channel registry
    pub chain_registry_path: String,

    pub source_sync_interval_ms: u64,
    pub correlate_interval_ms: u64,
    pub fix_fail_interval_ms: u64,
    pub aggregate_interval_ms: u64,
    pub migrate_interval_ms: u64,

    /// Upper bound on every transaction store call
    pub query_timeout_ms: u64,

    /// First retry delay after an inconclusive correlation pass
    pub retry_initial_secs: u64,

    /// Cap on the exponential retry delay
    pub retry_max_secs: u64,

    /// Inconclusive passes a Processing record survives before it is marked Failed
    pub fail_after_retries: u32,

    /// Due Processing records examined per source chain per pass
    pub correlate_page_size: usize,

    /// Page size for segment scans
    pub segment_page_size: usize,

    /// Transfer transactions read per chain per source sync pass
    pub source_sync_batch: usize,

    pub segment_step_active_secs: i64,
    pub segment_step_history_secs: i64,

    /// Terminal records older than this move from active to history
    pub archive_retention_secs: i64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IndexerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `IBCFLOW_DB_PATH` (default: data/ibcflow.db)
    /// - `IBCFLOW_TX_DB_PATH` (default: data/chain_txs.db)
    /// - `IBCFLOW_CHAIN_REGISTRY` (default: config/chains.json)
    /// - `SOURCE_SYNC_INTERVAL_MS` (default: 5000)
    /// - `CORRELATE_INTERVAL_MS` (default: 10000)
    /// - `FIX_FAIL_INTERVAL_MS` (default: 600000)
    /// - `AGGREGATE_INTERVAL_MS` (default: 3600000)
    /// - `MIGRATE_INTERVAL_MS` (default: 3600000)
    /// - `QUERY_TIMEOUT_MS` (default: 10000)
    /// - `RETRY_INITIAL_SECS` (default: 30)
    /// - `RETRY_MAX_SECS` (default: 3600)
    /// - `FAIL_AFTER_RETRIES` (default: 20)
    /// - `CORRELATE_PAGE_SIZE` (default: 100)
    /// - `SEGMENT_PAGE_SIZE` (default: 1000)
    /// - `SOURCE_SYNC_BATCH` (default: 500)
    /// - `SEGMENT_STEP_ACTIVE_SECS` (default: 1 day)
    /// - `SEGMENT_STEP_HISTORY_SECS` (default: 30 days)
    /// - `ARCHIVE_RETENTION_SECS` (default: 90 days)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("IBCFLOW_DB_PATH").unwrap_or_else(|_| "data/ibcflow.db".to_string()),
            tx_db_path: env::var("IBCFLOW_TX_DB_PATH")
                .unwrap_or_else(|_| "data/chain_txs.db".to_string()),
            chain_registry_path: env::var("IBCFLOW_CHAIN_REGISTRY")
                .unwrap_or_else(|_| "config/chains.json".to_string()),

            source_sync_interval_ms: env_or("SOURCE_SYNC_INTERVAL_MS", 5_000),
            correlate_interval_ms: env_or("CORRELATE_INTERVAL_MS", 10_000),
            fix_fail_interval_ms: env_or("FIX_FAIL_INTERVAL_MS", 600_000),
            aggregate_interval_ms: env_or("AGGREGATE_INTERVAL_MS", 3_600_000),
            migrate_interval_ms: env_or("MIGRATE_INTERVAL_MS", 3_600_000),

            query_timeout_ms: env_or("QUERY_TIMEOUT_MS", 10_000),
            retry_initial_secs: env_or("RETRY_INITIAL_SECS", 30),
            retry_max_secs: env_or("RETRY_MAX_SECS", 3_600),
            fail_after_retries: env_or("FAIL_AFTER_RETRIES", 20),

            correlate_page_size: env_or("CORRELATE_PAGE_SIZE", 100),
            segment_page_size: env_or("SEGMENT_PAGE_SIZE", 1_000),
            source_sync_batch: env_or("SOURCE_SYNC_BATCH", 500),

            segment_step_active_secs: env_or("SEGMENT_STEP_ACTIVE_SECS", DAY_SECS),
            segment_step_history_secs: env_or("SEGMENT_STEP_HISTORY_SECS", 30 * DAY_SECS),
            archive_retention_secs: env_or("ARCHIVE_RETENTION_SECS", 90 * DAY_SECS),
        }
    }

    pub fn validate(&self) -> IndexerResult<()> {
        if self.correlate_page_size == 0 || self.segment_page_size == 0 || self.source_sync_batch == 0 {
            return Err(IndexerError::Config("page sizes must be positive".into()));
        }
        if self.segment_step_active_secs <= 0 || self.segment_step_history_secs <= 0 {
            return Err(IndexerError::Config("segment steps must be positive".into()));
        }
        if self.retry_initial_secs == 0 || self.retry_initial_secs > self.retry_max_secs {
            return Err(IndexerError::Config(format!(
                "retry delays out of order: initial={}s max={}s",
                self.retry_initial_secs, self.retry_max_secs
            )));
        }
        if self.archive_retention_secs < 0 {
            return Err(IndexerError::Config("archive retention cannot be negative".into()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            db_path: "data/ibcflow.db".to_string(),
            tx_db_path: "data/chain_txs.db".to_string(),
            chain_registry_path: "config/chains.json".to_string(),
            source_sync_interval_ms: 5_000,
            correlate_interval_ms: 10_000,
            fix_fail_interval_ms: 600_000,
            aggregate_interval_ms: 3_600_000,
            migrate_interval_ms: 3_600_000,
            query_timeout_ms: 10_000,
            retry_initial_secs: 30,
            retry_max_secs: 3_600,
            fail_after_retries: 20,
            correlate_page_size: 100,
            segment_page_size: 1_000,
            source_sync_batch: 500,
            segment_step_active_secs: DAY_SECS,
            segment_step_history_secs: 30 * DAY_SECS,
            archive_retention_secs: 90 * DAY_SECS,
        }
    }
}
