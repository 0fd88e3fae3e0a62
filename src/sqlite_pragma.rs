//! Shared SQLite connection tuning
//!
//! Every connection opened by the record store and the transaction store goes
//! through `apply_optimized_pragmas` so that readers and writers agree on the
//! journal mode.

use rusqlite::Connection;

/// Apply WAL, NORMAL sync, MEMORY temp store, mmap, page cache and autocheckpoint
///
/// `journal_mode` is ignored by SQLite for `:memory:` databases, which keep
/// their own in-memory journal.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1_000i64)?;
    conn.pragma_update(None, "busy_timeout", 5_000i64)?;

    log::debug!("📊 Applied SQLite pragmas (WAL, NORMAL, MEMORY, mmap, cache, autocheckpoint)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pragmas_enable_wal_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("pragma.db")).unwrap();

        apply_optimized_pragmas(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_pragmas_accepted_on_memory_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_optimized_pragmas(&conn).is_ok());
    }
}
