//! ibcflow runtime - periodic IBC transfer reconciliation
//!
//! Opens the record store and the transaction store, loads the chain registry
//! and runs every reconciliation task on its own interval until CTRL+C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin ibcflow_runtime
//! cargo run --release --bin ibcflow_runtime -- --once correlate
//! ```
//!
//! `--once <task>` runs a single cycle of one task and exits; the exit code is
//! non-zero when the cycle fails. Tasks: source_sync, correlate, fix_fail,
//! channel_statistics, chain_fee_statistics, migrate.
//!
//! ## Environment Variables
//!
//! See `IndexerConfig::from_env`. `RUST_LOG` sets the log level (default: info).

use anyhow::{anyhow, bail, Context, Result};
use dotenv::dotenv;
use ibcflow::registry::ChainRegistry;
use ibcflow::scheduler::{all_tasks, now_unix, spawn_periodic, TaskContext};
use ibcflow::tx_store::{SqliteTxStore, TimedTxStore, TxStore};
use ibcflow::{IndexStore, IndexerConfig};
use log::{error, info};
use std::env;
use std::sync::Arc;
use tokio::task::JoinSet;

fn parse_once_from_args() -> Result<Option<String>> {
    let args: Vec<String> = env::args().collect();
    match args.iter().position(|x| x == "--once") {
        Some(idx) => match args.get(idx + 1) {
            Some(task) => Ok(Some(task.clone())),
            None => bail!("--once needs a task name"),
        },
        None => Ok(None),
    }
}

fn build_context(config: IndexerConfig) -> Result<TaskContext> {
    let store = IndexStore::open(&config.db_path)
        .with_context(|| format!("opening record store {}", config.db_path))?;
    let raw_txs: Arc<dyn TxStore> = Arc::new(
        SqliteTxStore::open(&config.tx_db_path)
            .with_context(|| format!("opening transaction store {}", config.tx_db_path))?,
    );
    let tx_store: Arc<dyn TxStore> = Arc::new(TimedTxStore::new(raw_txs, config.query_timeout()));
    let registry = ChainRegistry::load(&config.chain_registry_path)?;

    Ok(TaskContext {
        store,
        tx_store,
        registry: Arc::new(registry),
        config: Arc::new(config),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 ibcflow runtime");

    let config = IndexerConfig::from_env();
    config.validate()?;
    info!("   ├─ Record store: {}", config.db_path);
    info!("   ├─ Transaction store: {}", config.tx_db_path);
    info!("   ├─ Chain registry: {}", config.chain_registry_path);
    info!("   └─ Fail after: {} retries", config.fail_after_retries);

    let once = parse_once_from_args()?;
    let ctx = build_context(config)?;
    let tasks = all_tasks(&ctx);

    if let Some(name) = once {
        let (task, _) = tasks
            .iter()
            .find(|(t, _)| t.name() == name)
            .ok_or_else(|| anyhow!("unknown task {}", name))?;
        info!("▶️  Running one {} cycle", name);
        task.run_once(now_unix())
            .await
            .with_context(|| format!("{} cycle failed", name))?;
        info!("✅ {} cycle finished", name);
        return Ok(());
    }

    let mut running = JoinSet::new();
    for (task, period) in tasks {
        let name = task.name();
        let handle = spawn_periodic(task, period);
        running.spawn(async move { (name, handle.await) });
    }
    info!("✅ All tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!("❌ Failed to listen for CTRL+C: {}", err);
            }
            info!("⚠️  Received CTRL+C, shutting down...");
            running.abort_all();
            Ok(())
        }
        Some(joined) = running.join_next() => {
            let (name, outcome) = joined?;
            running.abort_all();
            match outcome? {
                Ok(()) => bail!("{} exited unexpectedly", name),
                Err(e) => Err(anyhow!(e).context(format!("{} stopped", name))),
            }
        }
    }
}
