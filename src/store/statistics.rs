//! Channel and chain-fee statistics tables

use super::shadow::{AggregateTable, ShadowBuild};
use super::IndexStore;
use crate::error::{IndexerError, IndexerResult};
use crate::model::statistics::DenomAmount;
use crate::model::{ChainFeeStatistics, ChannelStatistics, LegTxStatus, PayerType};
use crate::segment::Segment;
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;

pub static CHANNEL_STATISTICS: AggregateTable = AggregateTable {
    name: "channel_statistics",
    columns: "channel_id TEXT NOT NULL,
        base_denom TEXT NOT NULL,
        base_denom_chain TEXT NOT NULL,
        segment_start_time INTEGER NOT NULL,
        segment_end_time INTEGER NOT NULL,
        transfer_count INTEGER NOT NULL,
        transfer_amount TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL",
    unique_key: "channel_id, base_denom, base_denom_chain, segment_start_time, segment_end_time",
    lookup_key: "segment_start_time, segment_end_time",
};

pub static CHAIN_FEE_STATISTICS: AggregateTable = AggregateTable {
    name: "chain_fee_statistics",
    columns: "chain TEXT NOT NULL,
        tx_status INTEGER NOT NULL,
        payer_type INTEGER NOT NULL,
        fee_denom TEXT NOT NULL,
        fee_amount TEXT NOT NULL,
        segment_start_time INTEGER NOT NULL,
        segment_end_time INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL",
    unique_key: "chain, payer_type, tx_status, fee_denom, segment_start_time, segment_end_time",
    lookup_key: "chain, segment_start_time, segment_end_time",
};

pub(super) fn ensure_published_tables(conn: &Connection) -> IndexerResult<()> {
    CHANNEL_STATISTICS.ensure_published(conn)?;
    CHAIN_FEE_STATISTICS.ensure_published(conn)?;
    Ok(())
}

fn insert_channel_rows(conn: &Connection, table: &str, rows: &[ChannelStatistics]) -> IndexerResult<usize> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (channel_id, base_denom, base_denom_chain, segment_start_time,
             segment_end_time, transfer_count, transfer_amount, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        table
    ))?;
    let mut n = 0;
    for r in rows {
        n += stmt.execute(params![
            r.channel_id,
            r.base_denom,
            r.base_denom_chain,
            r.segment_start_time,
            r.segment_end_time,
            r.transfer_count as i64,
            r.transfer_amount,
            r.created_at,
            r.updated_at,
        ])?;
    }
    Ok(n)
}

fn insert_fee_rows(conn: &Connection, table: &str, rows: &[ChainFeeStatistics]) -> IndexerResult<usize> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (chain, tx_status, payer_type, fee_denom, fee_amount,
             segment_start_time, segment_end_time, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        table
    ))?;
    let mut n = 0;
    for r in rows {
        n += stmt.execute(params![
            r.chain,
            r.tx_status.as_i64(),
            r.payer_type.as_i64(),
            r.fee_denom,
            r.fee_amount,
            r.segment_start_time,
            r.segment_end_time,
            r.created_at,
            r.updated_at,
        ])?;
    }
    Ok(n)
}

fn read_channel_row(row: &Row<'_>) -> rusqlite::Result<ChannelStatistics> {
    Ok(ChannelStatistics {
        channel_id: row.get(0)?,
        base_denom: row.get(1)?,
        base_denom_chain: row.get(2)?,
        segment_start_time: row.get(3)?,
        segment_end_time: row.get(4)?,
        transfer_count: row.get::<_, i64>(5)? as u64,
        transfer_amount: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn read_fee_row(row: &Row<'_>) -> rusqlite::Result<ChainFeeStatistics> {
    let status: i64 = row.get(1)?;
    let payer: i64 = row.get(2)?;
    Ok(ChainFeeStatistics {
        chain: row.get(0)?,
        tx_status: LegTxStatus::from_i64(status)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, status))?,
        payer_type: PayerType::from_i64(payer)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, payer))?,
        fee_denom: row.get(3)?,
        fee_amount: row.get(4)?,
        segment_start_time: row.get(5)?,
        segment_end_time: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl<'s> ShadowBuild<'s> {
    pub fn append_channel_statistics(&mut self, rows: &[ChannelStatistics]) -> IndexerResult<usize> {
        let n = {
            let mut conn = self.store().lock();
            let tx = conn.transaction()?;
            let n = insert_channel_rows(&tx, &self.shadow_name(), rows)?;
            tx.commit()?;
            n
        };
        self.add_rows(n);
        Ok(n)
    }

    pub fn append_chain_fee_statistics(&mut self, rows: &[ChainFeeStatistics]) -> IndexerResult<usize> {
        let n = {
            let mut conn = self.store().lock();
            let tx = conn.transaction()?;
            let n = insert_fee_rows(&tx, &self.shadow_name(), rows)?;
            tx.commit()?;
            n
        };
        self.add_rows(n);
        Ok(n)
    }
}

impl IndexStore {
    /// Replace every published row of one channel in one transaction
    pub fn replace_channel_statistics(
        &self,
        channel_id: &str,
        rows: &[ChannelStatistics],
    ) -> IndexerResult<usize> {
        if let Some(stray) = rows.iter().find(|r| r.channel_id != channel_id) {
            return Err(IndexerError::inconsistent(
                channel_id,
                format!("row for channel {} in per-channel swap", stray.channel_id),
            ));
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE channel_id = ?1", CHANNEL_STATISTICS.name),
            params![channel_id],
        )?;
        let n = insert_channel_rows(&tx, CHANNEL_STATISTICS.name, rows)?;
        tx.commit()?;
        Ok(n)
    }

    /// Replace the published fee rows of one chain and segment in one transaction
    pub fn replace_chain_fee_segment(
        &self,
        chain: &str,
        segment: &Segment,
        rows: &[ChainFeeStatistics],
    ) -> IndexerResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE chain = ?1 AND segment_start_time = ?2 AND segment_end_time = ?3",
                CHAIN_FEE_STATISTICS.name
            ),
            params![chain, segment.start_time, segment.end_time],
        )?;
        let n = insert_fee_rows(&tx, CHAIN_FEE_STATISTICS.name, rows)?;
        tx.commit()?;
        Ok(n)
    }

    /// Published channel rows whose segment lies inside `[start, end]`
    pub fn channel_statistics_in_range(
        &self,
        channel_id: Option<&str>,
        start: i64,
        end: i64,
    ) -> IndexerResult<Vec<ChannelStatistics>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT channel_id, base_denom, base_denom_chain, segment_start_time, segment_end_time,
                    transfer_count, transfer_amount, created_at, updated_at
             FROM {}
             WHERE segment_start_time >= ?1 AND segment_end_time <= ?2
               AND (?3 IS NULL OR channel_id = ?3)
             ORDER BY channel_id, segment_start_time, base_denom",
            CHANNEL_STATISTICS.name
        ))?;
        let rows = stmt
            .query_map(params![start, end, channel_id], read_channel_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn chain_fee_statistics_in_range(
        &self,
        chain: &str,
        start: i64,
        end: i64,
    ) -> IndexerResult<Vec<ChainFeeStatistics>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT chain, tx_status, payer_type, fee_denom, fee_amount,
                    segment_start_time, segment_end_time, created_at, updated_at
             FROM {}
             WHERE chain = ?1 AND segment_start_time >= ?2 AND segment_end_time <= ?3
             ORDER BY segment_start_time, fee_denom",
            CHAIN_FEE_STATISTICS.name
        ))?;
        let rows = stmt
            .query_map(params![chain, start, end], read_fee_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fees paid on `chain` in `[start, end]`, summed per denom, optionally by one payer type
    pub fn chain_fee_totals(
        &self,
        chain: &str,
        start: i64,
        end: i64,
        payer: Option<PayerType>,
    ) -> IndexerResult<Vec<DenomAmount>> {
        let mut totals: BTreeMap<String, u128> = BTreeMap::new();
        for row in self.chain_fee_statistics_in_range(chain, start, end)? {
            if payer.map_or(false, |p| p != row.payer_type) {
                continue;
            }
            let amount: u128 = row.fee_amount.parse().unwrap_or(0);
            *totals.entry(row.fee_denom).or_default() += amount;
        }
        Ok(totals
            .into_iter()
            .map(|(denom, amount)| DenomAmount {
                denom,
                amount: amount.to_string(),
            })
            .collect())
    }
}
