//! Task cursors: where each recurring task resumes

use super::IndexStore;
use crate::error::IndexerResult;
use crate::tx_store::TxPosition;
use rusqlite::{params, OptionalExtension};

impl IndexStore {
    pub fn get_cursor(&self, task_name: &str) -> IndexerResult<Option<i64>> {
        let conn = self.lock();
        let position = conn
            .query_row(
                "SELECT position FROM task_cursor WHERE task_name = ?1",
                params![task_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position)
    }

    pub fn set_cursor(&self, task_name: &str, position: i64, now: i64) -> IndexerResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO task_cursor (task_name, position, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_name) DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at",
            params![task_name, position, now],
        )?;
        Ok(())
    }

    pub fn get_sync_position(&self, chain: &str) -> IndexerResult<Option<TxPosition>> {
        let conn = self.lock();
        let position = conn
            .query_row(
                "SELECT height, tx_hash FROM sync_position WHERE chain_id = ?1",
                params![chain],
                |row| {
                    Ok(TxPosition {
                        height: row.get(0)?,
                        tx_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(position)
    }

    pub fn set_sync_position(&self, chain: &str, position: &TxPosition, now: i64) -> IndexerResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_position (chain_id, height, tx_hash, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chain_id) DO UPDATE SET
                 height = excluded.height, tx_hash = excluded.tx_hash, updated_at = excluded.updated_at",
            params![chain, position.height, position.tx_hash, now],
        )?;
        Ok(())
    }
}
