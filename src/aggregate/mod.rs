//! Aggregate rebuilders
//!
//! Both aggregates are computed segment by segment over the two record
//! partitions. A full rebuild streams every segment into a shadow table and
//! publishes it in one swap; partial refreshes replace the rows of one key
//! (a channel, or a chain × segment) transactionally.

pub mod chain_fee;
pub mod channel;

pub use chain_fee::ChainFeeAggregator;
pub use channel::{ChannelAggregator, ChannelId};

use crate::error::IndexerResult;
use crate::model::{TransferRecord, TransferStatus};
use crate::segment::{scan_segment, segments_between, Segment};
use crate::store::{IndexStore, Partition};

/// Full-width segment starting where `segment` starts
///
/// Aggregate rows are keyed by segment, so the open tail segment is widened to
/// the full step and keeps the same key as it fills up.
pub(crate) fn widen(segment: Segment, step: i64) -> Segment {
    Segment::new(segment.start_time, segment.start_time + step)
}

/// Creation-time bounds over both partitions
pub(crate) fn record_bounds(store: &IndexStore) -> IndexerResult<Option<(i64, i64)>> {
    let mut bounds: Option<(i64, i64)> = None;
    for partition in Partition::all() {
        if let Some((first, last)) = store.created_at_bounds(partition)? {
            bounds = Some(match bounds {
                Some((f, l)) => (f.min(first), l.max(last)),
                None => (first, last),
            });
        }
    }
    Ok(bounds)
}

/// Segments covering every record of both partitions
pub(crate) fn all_segments(store: &IndexStore, step: i64) -> IndexerResult<Vec<Segment>> {
    Ok(match record_bounds(store)? {
        Some((first, last)) => segments_between(first, last, step)
            .into_iter()
            .map(|s| widen(s, step))
            .collect(),
        None => Vec::new(),
    })
}

/// Feed every record of `segment` in `statuses`, from both partitions, to `visit`
pub(crate) fn scan_both_partitions<V>(
    store: &IndexStore,
    segment: &Segment,
    statuses: &[TransferStatus],
    page_size: usize,
    mut visit: V,
) -> IndexerResult<usize>
where
    V: FnMut(&TransferRecord),
{
    let mut seen = 0;
    for partition in Partition::all() {
        seen += scan_segment(
            page_size,
            |offset, limit| store.find_in_segment(partition, segment, statuses, offset, limit),
            |page| {
                page.iter().for_each(&mut visit);
                Ok(())
            },
        )?;
    }
    Ok(seen)
}

pub(crate) fn all_statuses() -> [TransferStatus; 5] {
    [
        TransferStatus::Setting,
        TransferStatus::Processing,
        TransferStatus::Success,
        TransferStatus::Refunded,
        TransferStatus::Failed,
    ]
}
