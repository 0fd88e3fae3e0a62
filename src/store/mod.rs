//! SQLite persistence for transfer records, cursors, resolved denoms and aggregates
//!
//! Only this module talks to the record database. Tasks receive an
//! `IndexStore` handle and call its methods; the per-domain `impl` blocks live
//! in the submodules.

mod cursor;
mod denom;
pub mod shadow;
mod statistics;
mod transfer;

pub use shadow::{AggregateTable, ShadowBuild};
pub use statistics::{CHAIN_FEE_STATISTICS, CHANNEL_STATISTICS};
pub use transfer::TransferFilter;

use crate::error::IndexerResult;
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Schema files, applied in order; each uses IF NOT EXISTS and is safe to rerun
const SCHEMA_FILES: &[(&str, &str)] = &[
    ("01_transfers.sql", include_str!("../../sql/01_transfers.sql")),
    ("02_task_cursor.sql", include_str!("../../sql/02_task_cursor.sql")),
    ("03_denom_trace.sql", include_str!("../../sql/03_denom_trace.sql")),
];

/// Which half of the record store a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Active,
    History,
}

impl Partition {
    pub fn table(&self) -> &'static str {
        match self {
            Partition::Active => "transfer_active",
            Partition::History => "transfer_history",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Active => "active",
            Partition::History => "history",
        }
    }

    pub fn all() -> [Partition; 2] {
        [Partition::Active, Partition::History]
    }
}

/// Run the embedded schema files against `conn`
pub fn run_schema_migrations(conn: &Connection) -> IndexerResult<()> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in SCHEMA_FILES {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }
    statistics::ensure_published_tables(conn)?;

    log::info!("✅ Schema migrations completed");
    Ok(())
}

/// Shared handle to the record database
///
/// Cloning is cheap; clones share one connection. Clones and reopened
/// handles also share the partition gate: scans that read both partitions
/// hold it shared, archival holds it exclusively, so no scan sees a record
/// in both partitions or in neither.
#[derive(Clone)]
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    partition_gate: Arc<RwLock<()>>,
}

impl IndexStore {
    pub fn open(path: impl AsRef<Path>) -> IndexerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
            partition_gate: Arc::default(),
        })
    }

    /// Private in-memory database, used in tests
    pub fn in_memory() -> IndexerResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
            partition_gate: Arc::default(),
        })
    }

    /// Independent connection to the same database file
    ///
    /// For in-memory stores this returns a fresh, empty database.
    pub fn reopen(&self) -> IndexerResult<Self> {
        let mut reopened = match &self.path {
            Some(p) => Self::open(p)?,
            None => Self::in_memory()?,
        };
        reopened.partition_gate = Arc::clone(&self.partition_gate);
        Ok(reopened)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Held for the length of a scan across both partitions
    pub(crate) fn partitions_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.partition_gate.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Held while records move between partitions
    pub(crate) fn partitions_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.partition_gate.write().unwrap_or_else(|e| e.into_inner())
    }
}
