//! Shadow-table republishing of aggregate tables
//!
//! A full rebuild never writes into the published table. Rows go into
//! `<table>_new` together with its indexes, and `ShadowBuild::publish` swaps
//! the shadow in with a drop + rename inside one transaction. A reader on any
//! connection sees either the complete previous table or the complete new one.
//!
//! SQLite index names are global to the database, so each build names its
//! indexes with a generation number one above the published table's.

use super::IndexStore;
use crate::error::IndexerResult;
use rusqlite::{params, Connection};

/// Layout of a published aggregate table
#[derive(Debug)]
pub struct AggregateTable {
    pub name: &'static str,
    pub columns: &'static str,
    pub unique_key: &'static str,
    pub lookup_key: &'static str,
}

impl AggregateTable {
    pub fn shadow_name(&self) -> String {
        format!("{}_new", self.name)
    }

    fn create_table(&self, conn: &Connection, table: &str) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table, self.columns
        ))
    }

    fn create_indexes(&self, conn: &Connection, table: &str, generation: i64) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX uk_{name}_g{gen} ON {table} ({unique});
             CREATE INDEX idx_{name}_g{gen} ON {table} ({lookup});",
            name = self.name,
            gen = generation,
            table = table,
            unique = self.unique_key,
            lookup = self.lookup_key,
        ))
    }

    /// Highest index generation currently attached to `table`, if any
    fn current_generation(&self, conn: &Connection, table: &str) -> rusqlite::Result<Option<i64>> {
        let prefix = format!("uk_{}_g", self.name);
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1",
        )?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(names
            .iter()
            .filter_map(|n| n.strip_prefix(&prefix))
            .filter_map(|g| g.parse::<i64>().ok())
            .max())
    }

    /// Create the published table with its indexes when missing
    pub(crate) fn ensure_published(&self, conn: &Connection) -> rusqlite::Result<()> {
        self.create_table(conn, self.name)?;
        if self.current_generation(conn, self.name)?.is_none() {
            self.create_indexes(conn, self.name, 0)?;
        }
        Ok(())
    }
}

/// A shadow table being filled
///
/// Dropping a build without publishing leaves the published table as it was;
/// the stale shadow is replaced by the next `begin_shadow`.
pub struct ShadowBuild<'s> {
    store: &'s IndexStore,
    table: &'static AggregateTable,
    generation: i64,
    rows: usize,
}

impl IndexStore {
    /// Start a full rebuild of `table` in a fresh shadow table
    pub fn begin_shadow(&self, table: &'static AggregateTable) -> IndexerResult<ShadowBuild<'_>> {
        let shadow = table.shadow_name();
        let generation = {
            let conn = self.lock();
            let generation = table.current_generation(&conn, table.name)?.unwrap_or(0) + 1;

            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", shadow))?;
            table.create_table(&conn, &shadow)?;
            table.create_indexes(&conn, &shadow, generation)?;
            generation
        };

        log::debug!("🧱 Shadow table {} created (generation {})", shadow, generation);
        Ok(ShadowBuild {
            store: self,
            table,
            generation,
            rows: 0,
        })
    }
}

impl<'s> ShadowBuild<'s> {
    pub fn shadow_name(&self) -> String {
        self.table.shadow_name()
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn store(&self) -> &'s IndexStore {
        self.store
    }

    pub(crate) fn add_rows(&mut self, n: usize) {
        self.rows += n;
    }

    /// Replace the published table with the shadow in one transaction
    pub fn publish(self) -> IndexerResult<usize> {
        let shadow = self.table.shadow_name();
        {
            let mut conn = self.store.lock();
            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {prod};
                 ALTER TABLE {shadow} RENAME TO {prod};",
                prod = self.table.name,
                shadow = shadow,
            ))?;
            tx.commit()?;
        }

        log::info!(
            "🔁 Published {} ({} rows, generation {})",
            self.table.name,
            self.rows,
            self.generation
        );
        Ok(self.rows)
    }

    /// Discard the shadow table
    pub fn abort(self) -> IndexerResult<()> {
        let conn = self.store.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table.shadow_name()))?;
        log::warn!("🗑️  Discarded shadow build of {}", self.table.name);
        Ok(())
    }
}
