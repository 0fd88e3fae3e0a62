//! Periodic reconciliation tasks
//!
//! Each task runs on its own interval. A cycle that fails with a transient or
//! per-record error is logged and retried on the next tick; a systemic error
//! stops the task and is returned to the runtime.

use crate::aggregate::{chain_fee::CHAIN_FEE_CURSOR, ChainFeeAggregator, ChannelAggregator};
use crate::config::IndexerConfig;
use crate::correlator::PacketCorrelator;
use crate::error::{ErrorKind, IndexerResult};
use crate::fixer::FailFixer;
use crate::migrator::ArchivalMigrator;
use crate::registry::ChainRegistry;
use crate::source_sync::SourceSync;
use crate::state_machine::RetryPolicy;
use crate::store::IndexStore;
use crate::tx_store::TxStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[async_trait]
pub trait CycleTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one cycle as of unix time `now`
    async fn run_once(&self, now: i64) -> IndexerResult<()>;
}

/// Shared handles every task works with
#[derive(Clone)]
pub struct TaskContext {
    pub store: IndexStore,
    pub tx_store: Arc<dyn TxStore>,
    pub registry: Arc<ChainRegistry>,
    pub config: Arc<IndexerConfig>,
}

impl TaskContext {
    fn correlator(&self) -> PacketCorrelator {
        PacketCorrelator::new(self.tx_store.clone())
    }

    fn source_sync(&self) -> SourceSync {
        SourceSync::new(
            self.tx_store.clone(),
            self.registry.clone(),
            self.config.source_sync_batch,
        )
    }
}

/// Run a blocking store job off the async workers
async fn blocking<T, F>(job: F) -> IndexerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> IndexerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job).await?
}

pub struct SourceSyncTask(pub TaskContext);

#[async_trait]
impl CycleTask for SourceSyncTask {
    fn name(&self) -> &'static str {
        "source_sync"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        self.0.source_sync().sync_all(&self.0.store, now).await?;
        Ok(())
    }
}

pub struct CorrelateTask(pub TaskContext);

#[async_trait]
impl CycleTask for CorrelateTask {
    fn name(&self) -> &'static str {
        "correlate"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        let ctx = &self.0;
        let sync = ctx.source_sync();
        sync.promote_setting(&ctx.store, ctx.config.segment_page_size, now)?;
        sync.refresh_partial_denoms(&ctx.store, ctx.config.segment_page_size, now)?;

        let report = ctx
            .correlator()
            .correlate_all(
                &ctx.store,
                ctx.registry.chains(),
                RetryPolicy::from_config(&ctx.config),
                ctx.config.correlate_page_size,
                now,
            )
            .await?;
        if report.examined > 0 {
            log::info!(
                "🔄 Correlated {} transfers: {} success, {} refunded, {} failed, {} pending, {} skipped",
                report.examined,
                report.succeeded,
                report.refunded,
                report.failed,
                report.pending,
                report.skipped
            );
        }
        Ok(())
    }
}

pub struct FixFailTask(pub TaskContext);

#[async_trait]
impl CycleTask for FixFailTask {
    fn name(&self) -> &'static str {
        "fix_fail"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        let ctx = &self.0;
        let report = FailFixer::new(ctx.correlator())
            .fix_all(
                &ctx.store,
                ctx.config.segment_step_active_secs,
                ctx.config.segment_step_history_secs,
                ctx.config.segment_page_size,
                now,
            )
            .await?;
        log::info!(
            "🩹 Fail fixer examined {}: {} settled, {} demoted, {} still failed, {} skipped",
            report.examined,
            report.settled,
            report.demoted,
            report.left_failed,
            report.skipped
        );
        Ok(())
    }
}

pub struct ChannelStatisticsTask(pub TaskContext);

#[async_trait]
impl CycleTask for ChannelStatisticsTask {
    fn name(&self) -> &'static str {
        "channel_statistics"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        let store = self.0.store.clone();
        let aggregator = ChannelAggregator::new(
            self.0.config.segment_step_active_secs,
            self.0.config.segment_page_size,
        );
        let rows = blocking(move || aggregator.rebuild(&store, now)).await?;
        log::info!("📊 Published {} channel statistics rows", rows);
        Ok(())
    }
}

/// Full rebuild the first time, incremental refresh from the cursor afterwards
pub struct ChainFeeStatisticsTask(pub TaskContext);

#[async_trait]
impl CycleTask for ChainFeeStatisticsTask {
    fn name(&self) -> &'static str {
        "chain_fee_statistics"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        let store = self.0.store.clone();
        let step = self.0.config.segment_step_active_secs;
        let aggregator = ChainFeeAggregator::new(step, self.0.config.segment_page_size, step);
        blocking(move || {
            if store.get_cursor(CHAIN_FEE_CURSOR)?.is_none() {
                let rows = aggregator.rebuild(&store, now)?;
                log::info!("💸 Published {} chain fee rows (full rebuild)", rows);
            } else {
                let rows = aggregator.refresh(&store, now)?;
                log::debug!("💸 Refreshed {} chain fee rows", rows);
            }
            Ok(())
        })
        .await
    }
}

pub struct MigrateTask(pub TaskContext);

#[async_trait]
impl CycleTask for MigrateTask {
    fn name(&self) -> &'static str {
        "migrate"
    }

    async fn run_once(&self, now: i64) -> IndexerResult<()> {
        let store = self.0.store.clone();
        let migrator = ArchivalMigrator::new(
            self.0.config.archive_retention_secs,
            self.0.config.segment_step_active_secs,
            self.0.config.segment_page_size,
        );
        blocking(move || migrator.migrate(&store, now)).await?;
        Ok(())
    }
}

/// Every task with the interval it runs on
pub fn all_tasks(ctx: &TaskContext) -> Vec<(Arc<dyn CycleTask>, Duration)> {
    let ms = Duration::from_millis;
    let config = &ctx.config;
    vec![
        (
            Arc::new(SourceSyncTask(ctx.clone())) as Arc<dyn CycleTask>,
            ms(config.source_sync_interval_ms),
        ),
        (Arc::new(CorrelateTask(ctx.clone())), ms(config.correlate_interval_ms)),
        (Arc::new(FixFailTask(ctx.clone())), ms(config.fix_fail_interval_ms)),
        (
            Arc::new(ChannelStatisticsTask(ctx.clone())),
            ms(config.aggregate_interval_ms),
        ),
        (
            Arc::new(ChainFeeStatisticsTask(ctx.clone())),
            ms(config.aggregate_interval_ms),
        ),
        (Arc::new(MigrateTask(ctx.clone())), ms(config.migrate_interval_ms)),
    ]
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Run `task` every `period` until it hits a systemic error
pub fn spawn_periodic(task: Arc<dyn CycleTask>, period: Duration) -> JoinHandle<IndexerResult<()>> {
    tokio::spawn(async move {
        log::info!("⏰ Starting {} (interval: {}ms)", task.name(), period.as_millis());
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            match task.run_once(now_unix()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Systemic => {
                    log::error!("❌ {} stopped: {}", task.name(), e);
                    return Err(e);
                }
                Err(e) => log::warn!("⚠️  {} cycle failed, retrying next tick: {}", task.name(), e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl CycleTask for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run_once(&self, _now: i64) -> IndexerResult<()> {
            match self.runs.fetch_add(1, Ordering::SeqCst) {
                0 => Err(IndexerError::TxStore {
                    chain: "osmosis-1".into(),
                    message: "down".into(),
                }),
                1 => Ok(()),
                _ => Err(IndexerError::Config("broken".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_periodic_task_survives_transient_and_stops_on_systemic() {
        let task = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let handle = spawn_periodic(task.clone(), Duration::from_millis(5));

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(IndexerError::Config(_))));
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_every_task_is_scheduled() {
        let ctx = TaskContext {
            store: IndexStore::in_memory().unwrap(),
            tx_store: Arc::new(crate::tx_store::MemoryTxStore::new()),
            registry: Arc::new(ChainRegistry::default()),
            config: Arc::new(IndexerConfig::default()),
        };
        let names: Vec<_> = all_tasks(&ctx).iter().map(|(t, _)| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "source_sync",
                "correlate",
                "fix_fail",
                "channel_statistics",
                "chain_fee_statistics",
                "migrate"
            ]
        );
    }
}
