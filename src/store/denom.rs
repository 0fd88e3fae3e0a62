//! Resolved denomination set

use super::IndexStore;
use crate::denom::DenomTrace;
use crate::error::IndexerResult;
use rusqlite::{params, OptionalExtension, Row};

const COLUMNS: &str = "chain, denom, denom_path, base_denom, base_denom_chain,
    prev_chain, prev_denom, hop_count, complete";

fn read_trace(row: &Row<'_>) -> rusqlite::Result<DenomTrace> {
    Ok(DenomTrace {
        chain: row.get(0)?,
        denom: row.get(1)?,
        denom_path: row.get(2)?,
        base_denom: row.get(3)?,
        base_denom_chain: row.get(4)?,
        prev_chain: row.get(5)?,
        prev_denom: row.get(6)?,
        hop_count: row.get::<_, i64>(7)? as u32,
        complete: row.get(8)?,
    })
}

impl IndexStore {
    /// Insert or refresh resolved denoms
    ///
    /// A complete resolution always replaces an incomplete one; an incomplete
    /// resolution never overwrites a complete one.
    pub fn upsert_denom_traces(&self, traces: &[DenomTrace], now: i64) -> IndexerResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO denom_trace (chain, denom, denom_path, base_denom, base_denom_chain,
                     prev_chain, prev_denom, hop_count, complete, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(chain, denom) DO UPDATE SET
                     denom_path = excluded.denom_path,
                     base_denom = excluded.base_denom,
                     base_denom_chain = excluded.base_denom_chain,
                     prev_chain = excluded.prev_chain,
                     prev_denom = excluded.prev_denom,
                     hop_count = excluded.hop_count,
                     complete = excluded.complete,
                     updated_at = excluded.updated_at
                 WHERE excluded.complete >= denom_trace.complete",
            )?;
            for t in traces {
                written += stmt.execute(params![
                    t.chain,
                    t.denom,
                    t.denom_path,
                    t.base_denom,
                    t.base_denom_chain,
                    t.prev_chain,
                    t.prev_denom,
                    t.hop_count,
                    t.complete,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn get_denom_trace(&self, chain: &str, denom: &str) -> IndexerResult<Option<DenomTrace>> {
        let conn = self.lock();
        let trace = conn
            .query_row(
                &format!("SELECT {} FROM denom_trace WHERE chain = ?1 AND denom = ?2", COLUMNS),
                params![chain, denom],
                read_trace,
            )
            .optional()?;
        Ok(trace)
    }

    /// Every resolved denom descending from one base asset
    pub fn denom_traces_for_base(
        &self,
        base_denom: &str,
        base_denom_chain: &str,
    ) -> IndexerResult<Vec<DenomTrace>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM denom_trace
             WHERE base_denom = ?1 AND base_denom_chain = ?2
             ORDER BY hop_count ASC, chain ASC",
            COLUMNS
        ))?;
        let traces = stmt
            .query_map(params![base_denom, base_denom_chain], read_trace)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(traces)
    }
}
