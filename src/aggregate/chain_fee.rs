//! Per-chain fee statistics
//!
//! Every bound leg of a transfer paid a fee on the chain it executed on. The
//! source leg is paid by the user; receive, acknowledge and timeout legs are
//! paid by relayers. Rows are keyed by chain, payer, leg status, fee denom and
//! the segment of the record's creation time.

use super::{all_segments, all_statuses, record_bounds, scan_both_partitions, widen};
use crate::error::IndexerResult;
use crate::model::{ChainFeeStatistics, LegTxStatus, PayerType, TransferRecord, TxInfo};
use crate::segment::{segments_between, Segment};
use crate::store::{IndexStore, CHAIN_FEE_STATISTICS};
use std::collections::BTreeMap;

/// Cursor holding the start of the last segment refreshed incrementally
pub const CHAIN_FEE_CURSOR: &str = "chain_fee_statistics";

type FeeKey = (String, PayerType, LegTxStatus, String);

/// Every (chain, payer, leg status, coin) paid by the legs of `record`
fn fee_entries(record: &TransferRecord) -> Vec<(FeeKey, u128)> {
    let mut legs: Vec<(&str, PayerType, &TxInfo)> =
        vec![(record.source_chain.as_str(), PayerType::User, &record.source_tx_info)];
    if let Some(dest) = &record.dest_tx_info {
        legs.push((record.dest_chain.as_str(), PayerType::Relayer, dest));
    }
    if let Some(refund) = &record.refund_tx_info {
        legs.push((record.source_chain.as_str(), PayerType::Relayer, refund));
    }

    legs.into_iter()
        .flat_map(|(chain, payer, leg)| {
            let status = LegTxStatus::from_code(leg.code);
            leg.fee.amount.iter().map(move |coin| {
                (
                    (chain.to_string(), payer, status, coin.denom.clone()),
                    coin.amount_u128(),
                )
            })
        })
        .collect()
}

fn tally_segment(
    store: &IndexStore,
    segment: &Segment,
    page_size: usize,
) -> IndexerResult<BTreeMap<FeeKey, u128>> {
    let mut totals: BTreeMap<FeeKey, u128> = BTreeMap::new();
    scan_both_partitions(store, segment, &all_statuses(), page_size, |record| {
        for (key, amount) in fee_entries(record) {
            let total = totals.entry(key).or_default();
            *total = total.saturating_add(amount);
        }
    })?;
    Ok(totals)
}

fn to_rows(totals: BTreeMap<FeeKey, u128>, segment: &Segment, now: i64) -> Vec<ChainFeeStatistics> {
    totals
        .into_iter()
        .map(|((chain, payer_type, tx_status, fee_denom), amount)| ChainFeeStatistics {
            chain,
            tx_status,
            payer_type,
            fee_denom,
            fee_amount: amount.to_string(),
            segment_start_time: segment.start_time,
            segment_end_time: segment.end_time,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ChainFeeAggregator {
    step: i64,
    page_size: usize,
    lookback_secs: i64,
}

impl ChainFeeAggregator {
    /// `lookback_secs` is how far before the cursor an incremental refresh
    /// starts again, so legs bound late to older records are picked up.
    pub fn new(step: i64, page_size: usize, lookback_secs: i64) -> Self {
        Self {
            step,
            page_size,
            lookback_secs,
        }
    }

    /// Recompute every chain and segment and republish the table in one swap
    pub fn rebuild(&self, store: &IndexStore, now: i64) -> IndexerResult<usize> {
        let _partitions = store.partitions_shared();
        let segments = all_segments(store, self.step)?;
        let mut build = store.begin_shadow(&CHAIN_FEE_STATISTICS)?;

        let filled = (|| -> IndexerResult<()> {
            for segment in &segments {
                let totals = tally_segment(store, segment, self.page_size)?;
                if !totals.is_empty() {
                    build.append_chain_fee_statistics(&to_rows(totals, segment, now))?;
                }
            }
            Ok(())
        })();

        match filled {
            Ok(()) => {
                let rows = build.publish()?;
                if let Some(last) = segments.last() {
                    store.set_cursor(CHAIN_FEE_CURSOR, last.start_time, now)?;
                }
                Ok(rows)
            }
            Err(e) => {
                log::error!("❌ Chain fee rebuild failed, keeping previous table: {}", e);
                build.abort()?;
                Err(e)
            }
        }
    }

    /// Recompute segments from the cursor (minus lookback) onwards
    ///
    /// Each chain × segment is swapped on its own. The cursor ends on the
    /// last, still open segment so it is recomputed next time.
    pub fn refresh(&self, store: &IndexStore, now: i64) -> IndexerResult<usize> {
        let _partitions = store.partitions_shared();
        let Some((_, last)) = record_bounds(store)? else {
            return Ok(0);
        };
        let from = match store.get_cursor(CHAIN_FEE_CURSOR)? {
            Some(cursor) => cursor - self.lookback_secs,
            None => match all_segments(store, self.step)?.first() {
                Some(first) => first.start_time,
                None => return Ok(0),
            },
        };

        let mut written = 0;
        let mut last_start = None;
        for segment in segments_between(from, last, self.step) {
            let segment = widen(segment, self.step);
            let totals = tally_segment(store, &segment, self.page_size)?;

            let mut by_chain: BTreeMap<String, Vec<ChainFeeStatistics>> = BTreeMap::new();
            for row in to_rows(totals, &segment, now) {
                by_chain.entry(row.chain.clone()).or_default().push(row);
            }
            for (chain, rows) in by_chain {
                written += store.replace_chain_fee_segment(&chain, &segment, &rows)?;
            }
            last_start = Some(segment.start_time);
        }

        if let Some(start) = last_start {
            store.set_cursor(CHAIN_FEE_CURSOR, start, now)?;
        }
        Ok(written)
    }
}
