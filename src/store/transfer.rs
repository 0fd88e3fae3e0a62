//! Transfer record persistence for both partitions

use super::{IndexStore, Partition};
use crate::error::{IndexerError, IndexerResult};
use crate::model::{TransferRecord, TransferStatus, TxInfo};
use crate::segment::Segment;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

const COLUMNS: &str = "record_id, packet_id, sequence, source_chain, source_port, source_channel,
    dest_chain, dest_port, dest_channel, sender, receiver, source_denom, dest_denom,
    base_denom, base_denom_chain, denom_path, amount, status,
    source_tx_hash, source_tx_code, source_tx_info, dest_tx_hash, dest_tx_info,
    refund_tx_hash, refund_tx_info, retry_count, next_retry_time, tx_time, created_at, updated_at";

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        serde_json::from_str(&r)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    let status_raw: i64 = row.get(17)?;
    let status = TransferStatus::from_i64(status_raw)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(17, status_raw))?;

    Ok(TransferRecord {
        record_id: row.get(0)?,
        packet_id: row.get(1)?,
        sequence: row.get::<_, i64>(2)? as u64,
        source_chain: row.get(3)?,
        source_port: row.get(4)?,
        source_channel: row.get(5)?,
        dest_chain: row.get(6)?,
        dest_port: row.get(7)?,
        dest_channel: row.get(8)?,
        sender: row.get(9)?,
        receiver: row.get(10)?,
        source_denom: row.get(11)?,
        dest_denom: row.get(12)?,
        base_denom: row.get(13)?,
        base_denom_chain: row.get(14)?,
        denom_path: row.get(15)?,
        amount: row.get(16)?,
        status,
        source_tx_info: json_col(row, 20)?,
        dest_tx_info: opt_json_col(row, 22)?,
        refund_tx_info: opt_json_col(row, 24)?,
        retry_count: row.get::<_, i64>(25)? as u32,
        next_retry_time: row.get(26)?,
        tx_time: row.get(27)?,
        created_at: row.get(28)?,
        updated_at: row.get(29)?,
    })
}

fn leg_json(leg: &Option<TxInfo>) -> IndexerResult<(Option<String>, Option<String>)> {
    match leg {
        Some(info) => Ok((Some(info.hash.clone()), Some(serde_json::to_string(info)?))),
        None => Ok((None, None)),
    }
}

fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Filters of the transfer list query; every field is optional
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    /// Inclusive lower bound on `tx_time`
    pub start_time: Option<i64>,
    /// Inclusive upper bound on `tx_time`
    pub end_time: Option<i64>,
    pub source_chain: Option<String>,
    pub dest_chain: Option<String>,
    /// Matches a record sent from or received on this chain
    pub either_chain: Option<String>,
    /// `ibc/...` denoms match the local denom on either chain, anything else the base denom
    pub denom: Option<String>,
    pub base_denom_chain: Option<String>,
    /// Empty means the countable statuses
    pub statuses: Vec<TransferStatus>,
}

impl TransferFilter {
    /// WHERE clause with numbered parameters, reusable across both partitions
    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        let next = |args: &mut Vec<Box<dyn ToSql>>, value: Box<dyn ToSql>| {
            args.push(value);
            format!("?{}", args.len())
        };

        if let Some(start) = self.start_time {
            let p = next(&mut args, Box::new(start));
            clauses.push(format!("tx_time >= {}", p));
        }
        if let Some(end) = self.end_time {
            let p = next(&mut args, Box::new(end));
            clauses.push(format!("tx_time <= {}", p));
        }
        if let Some(chain) = &self.source_chain {
            let p = next(&mut args, Box::new(chain.clone()));
            clauses.push(format!("source_chain = {}", p));
        }
        if let Some(chain) = &self.dest_chain {
            let p = next(&mut args, Box::new(chain.clone()));
            clauses.push(format!("dest_chain = {}", p));
        }
        if let Some(chain) = &self.either_chain {
            let p = next(&mut args, Box::new(chain.clone()));
            clauses.push(format!("(source_chain = {p} OR dest_chain = {p})"));
        }
        if let Some(denom) = &self.denom {
            let p = next(&mut args, Box::new(denom.clone()));
            if denom.starts_with("ibc/") {
                clauses.push(format!("(source_denom = {p} OR dest_denom = {p})"));
            } else {
                clauses.push(format!("base_denom = {}", p));
            }
        }
        if let Some(chain) = &self.base_denom_chain {
            let p = next(&mut args, Box::new(chain.clone()));
            clauses.push(format!("base_denom_chain = {}", p));
        }

        let statuses: Vec<TransferStatus> = if self.statuses.is_empty() {
            TransferStatus::countable().to_vec()
        } else {
            self.statuses.clone()
        };
        let marks: Vec<String> = statuses
            .iter()
            .map(|s| next(&mut args, Box::new(s.as_i64())))
            .collect();
        clauses.push(format!("status IN ({})", marks.join(", ")));

        (clauses.join(" AND "), args)
    }
}

impl IndexStore {
    /// Insert new records; records whose id already exists are left untouched
    ///
    /// Returns the number of rows actually inserted.
    pub fn insert_transfers(
        &self,
        partition: Partition,
        records: &[TransferRecord],
    ) -> IndexerResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                partition.table(),
                COLUMNS,
                placeholders(1, 30)
            ))?;
            for r in records {
                let (dest_hash, dest_json) = leg_json(&r.dest_tx_info)?;
                let (refund_hash, refund_json) = leg_json(&r.refund_tx_info)?;
                let source_json = serde_json::to_string(&r.source_tx_info)?;
                inserted += stmt.execute(params![
                    r.record_id,
                    r.packet_id,
                    r.sequence as i64,
                    r.source_chain,
                    r.source_port,
                    r.source_channel,
                    r.dest_chain,
                    r.dest_port,
                    r.dest_channel,
                    r.sender,
                    r.receiver,
                    r.source_denom,
                    r.dest_denom,
                    r.base_denom,
                    r.base_denom_chain,
                    r.denom_path,
                    r.amount,
                    r.status.as_i64(),
                    r.source_tx_info.hash,
                    r.source_tx_info.code,
                    source_json,
                    dest_hash,
                    dest_json,
                    refund_hash,
                    refund_json,
                    r.retry_count,
                    r.next_retry_time,
                    r.tx_time,
                    r.created_at,
                    r.updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Write the mutable fields of `record`, provided it is still in `expected`
    ///
    /// Returns false when another writer moved the record first. Records that
    /// would violate the leg invariants are rejected before touching the row.
    pub fn update_transfer(
        &self,
        partition: Partition,
        record: &TransferRecord,
        expected: TransferStatus,
    ) -> IndexerResult<bool> {
        record.check_invariants()?;
        let (dest_hash, dest_json) = leg_json(&record.dest_tx_info)?;
        let (refund_hash, refund_json) = leg_json(&record.refund_tx_info)?;

        let conn = self.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, dest_chain = ?2, dest_port = ?3, dest_channel = ?4,
                    dest_denom = ?5, dest_tx_hash = ?6, dest_tx_info = ?7,
                    refund_tx_hash = ?8, refund_tx_info = ?9,
                    retry_count = ?10, next_retry_time = ?11, updated_at = ?12
                 WHERE record_id = ?13 AND status = ?14",
                partition.table()
            ),
            params![
                record.status.as_i64(),
                record.dest_chain,
                record.dest_port,
                record.dest_channel,
                record.dest_denom,
                dest_hash,
                dest_json,
                refund_hash,
                refund_json,
                record.retry_count,
                record.next_retry_time,
                record.updated_at,
                record.record_id,
                expected.as_i64(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn get_transfer(
        &self,
        partition: Partition,
        record_id: &str,
    ) -> IndexerResult<Option<TransferRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE record_id = ?1", COLUMNS, partition.table()),
                params![record_id],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    fn select_records(
        &self,
        sql: &str,
        args: &[&dyn ToSql],
    ) -> IndexerResult<Vec<TransferRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Source channels of `source_chain` that have due Processing records
    pub fn due_routes(
        &self,
        partition: Partition,
        source_chain: &str,
        now: i64,
    ) -> IndexerResult<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT source_port, source_channel FROM {}
             WHERE source_chain = ?1 AND status = ?2 AND next_retry_time <= ?3
             ORDER BY source_port, source_channel",
            partition.table()
        ))?;
        let routes = stmt
            .query_map(
                params![source_chain, TransferStatus::Processing.as_i64(), now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    /// Processing records sent through one source channel whose retry time
    /// has come, earliest first
    pub fn find_due_processing(
        &self,
        partition: Partition,
        source_chain: &str,
        source_port: &str,
        source_channel: &str,
        now: i64,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        self.select_records(
            &format!(
                "SELECT {} FROM {}
                 WHERE source_chain = ?1 AND source_port = ?2 AND source_channel = ?3
                   AND status = ?4 AND next_retry_time <= ?5
                 ORDER BY next_retry_time ASC, record_id ASC
                 LIMIT ?6",
                COLUMNS,
                partition.table()
            ),
            &[
                &source_chain,
                &source_port,
                &source_channel,
                &TransferStatus::Processing.as_i64(),
                &now,
                &(limit as i64),
            ],
        )
    }

    /// Distinct source channels of records still waiting for their route
    pub fn setting_routes(&self, partition: Partition) -> IndexerResult<Vec<(String, String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT source_chain, source_port, source_channel FROM {}
             WHERE status = ?1
             ORDER BY source_chain, source_port, source_channel",
            partition.table()
        ))?;
        let routes = stmt
            .query_map(params![TransferStatus::Setting.as_i64()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    /// Records of one source channel still waiting for their route, oldest first
    pub fn find_setting_on_route(
        &self,
        partition: Partition,
        source_chain: &str,
        source_port: &str,
        source_channel: &str,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        self.select_records(
            &format!(
                "SELECT {} FROM {}
                 WHERE status = ?1 AND source_chain = ?2 AND source_port = ?3 AND source_channel = ?4
                 ORDER BY created_at ASC, record_id ASC
                 LIMIT ?5",
                COLUMNS,
                partition.table()
            ),
            &[
                &TransferStatus::Setting.as_i64(),
                &source_chain,
                &source_port,
                &source_channel,
                &(limit as i64),
            ],
        )
    }

    /// Records whose base denom is still a voucher, in record id order after `after_id`
    pub fn find_partial_denoms(
        &self,
        partition: Partition,
        after_id: &str,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        self.select_records(
            &format!(
                "SELECT {} FROM {}
                 WHERE base_denom LIKE 'ibc/%' AND record_id > ?1
                 ORDER BY record_id ASC
                 LIMIT ?2",
                COLUMNS,
                partition.table()
            ),
            &[&after_id, &(limit as i64)],
        )
    }

    /// Replace the resolved origin of one record
    pub fn update_base_denom(
        &self,
        partition: Partition,
        record_id: &str,
        base_denom: &str,
        base_denom_chain: &str,
        now: i64,
    ) -> IndexerResult<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET base_denom = ?1, base_denom_chain = ?2, updated_at = ?3
                 WHERE record_id = ?4",
                partition.table()
            ),
            params![base_denom, base_denom_chain, now, record_id],
        )?;
        Ok(changed == 1)
    }

    /// Failed records of a segment whose source send itself succeeded on chain
    pub fn find_failed_in_segment(
        &self,
        partition: Partition,
        segment: &Segment,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        self.select_records(
            &format!(
                "SELECT {} FROM {}
                 WHERE status = ?1 AND source_tx_code = 0
                   AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at ASC, record_id ASC
                 LIMIT ?4 OFFSET ?5",
                COLUMNS,
                partition.table()
            ),
            &[
                &TransferStatus::Failed.as_i64(),
                &segment.start_time,
                &segment.end_time,
                &(limit as i64),
                &(offset as i64),
            ],
        )
    }

    /// Records of a segment in one of `statuses`, stable order for paging
    pub fn find_in_segment(
        &self,
        partition: Partition,
        segment: &Segment,
        statuses: &[TransferStatus],
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        let status_marks = placeholders(5, statuses.len());
        let sql = format!(
            "SELECT {} FROM {}
             WHERE created_at >= ?1 AND created_at < ?2 AND status IN ({})
             ORDER BY created_at ASC, record_id ASC
             LIMIT ?3 OFFSET ?4",
            COLUMNS,
            partition.table(),
            status_marks
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![
            Box::new(segment.start_time),
            Box::new(segment.end_time),
            Box::new(limit as i64),
            Box::new(offset as i64),
        ];
        args.extend(statuses.iter().map(|s| Box::new(s.as_i64()) as Box<dyn ToSql>));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Ids of terminal active records created inside `segment` and before `cutoff`
    pub fn find_archivable_ids(
        &self,
        segment: &Segment,
        cutoff: i64,
        limit: usize,
    ) -> IndexerResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT record_id FROM transfer_active
             WHERE status IN (?1, ?2)
               AND created_at >= ?3 AND created_at < ?4 AND created_at < ?5
             ORDER BY created_at ASC, record_id ASC
             LIMIT ?6",
        )?;
        let ids = stmt
            .query_map(
                params![
                    TransferStatus::Success.as_i64(),
                    TransferStatus::Refunded.as_i64(),
                    segment.start_time,
                    segment.end_time,
                    cutoff,
                    limit as i64
                ],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Copy a batch of active records into history, then remove them from active
    ///
    /// Both statements run in one transaction. Ids already present in history
    /// are ignored on insert, so re-running a batch after a partial failure is
    /// harmless. Returns (copied, removed).
    pub fn migrate_to_history(&self, record_ids: &[String]) -> IndexerResult<(usize, usize)> {
        if record_ids.is_empty() {
            return Ok((0, 0));
        }
        let marks = placeholders(1, record_ids.len());

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let copied = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO transfer_history ({cols})
                 SELECT {cols} FROM transfer_active WHERE record_id IN ({marks})",
                cols = COLUMNS,
                marks = marks
            ),
            params_from_iter(record_ids.iter()),
        )?;
        let removed = tx.execute(
            &format!("DELETE FROM transfer_active WHERE record_id IN ({})", marks),
            params_from_iter(record_ids.iter()),
        )?;
        tx.commit()?;

        Ok((copied, removed))
    }

    /// Earliest and latest `created_at` of a partition, None when empty
    pub fn created_at_bounds(&self, partition: Partition) -> IndexerResult<Option<(i64, i64)>> {
        let conn = self.lock();
        let bounds: (Option<i64>, Option<i64>) = conn.query_row(
            &format!("SELECT MIN(created_at), MAX(created_at) FROM {}", partition.table()),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match bounds {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    /// Filtered transfers across `partitions`, newest first
    pub fn query_transfers(
        &self,
        partitions: &[Partition],
        filter: &TransferFilter,
        offset: usize,
        limit: usize,
    ) -> IndexerResult<Vec<TransferRecord>> {
        if partitions.is_empty() {
            return Ok(Vec::new());
        }
        let (clause, mut args) = filter.where_clause();
        let union = partitions
            .iter()
            .map(|p| format!("SELECT {} FROM {} WHERE {}", COLUMNS, p.table(), clause))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        args.push(Box::new(limit as i64));
        let limit_mark = args.len();
        args.push(Box::new(offset as i64));
        let offset_mark = args.len();
        let sql = format!(
            "{} ORDER BY tx_time DESC, record_id ASC LIMIT ?{} OFFSET ?{}",
            union, limit_mark, offset_mark
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), read_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_transfers(
        &self,
        partitions: &[Partition],
        filter: &TransferFilter,
    ) -> IndexerResult<u64> {
        let (clause, args) = filter.where_clause();
        let conn = self.lock();
        let mut total = 0u64;
        for p in partitions {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {}", p.table(), clause),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Record with `hash` as any of its legs and a countable status, active partition first
    pub fn find_by_tx_hash(&self, hash: &str) -> IndexerResult<Option<(Partition, TransferRecord)>> {
        let countable: Vec<i64> = TransferStatus::countable().iter().map(|s| s.as_i64()).collect();
        for partition in Partition::all() {
            let sql = format!(
                "SELECT {} FROM {}
                 WHERE (source_tx_hash = ?1 OR dest_tx_hash = ?1 OR refund_tx_hash = ?1)
                   AND status IN (?2, ?3, ?4, ?5)
                 ORDER BY created_at DESC LIMIT 1",
                COLUMNS,
                partition.table()
            );
            let found = {
                let conn = self.lock();
                conn.query_row(
                    &sql,
                    params![hash, countable[0], countable[1], countable[2], countable[3]],
                    read_record,
                )
                .optional()?
            };
            if let Some(record) = found {
                return Ok(Some((partition, record)));
            }
        }
        Ok(None)
    }

    pub fn count_by_status(
        &self,
        partition: Partition,
    ) -> IndexerResult<HashMap<TransferStatus, u64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status",
            partition.table()
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, n) in rows {
            match TransferStatus::from_i64(status) {
                Some(s) => {
                    counts.insert(s, n as u64);
                }
                None => {
                    return Err(IndexerError::inconsistent(
                        partition.table(),
                        format!("unknown status {}", status),
                    ))
                }
            }
        }
        Ok(counts)
    }
}
