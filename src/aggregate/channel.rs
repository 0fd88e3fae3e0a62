//! Per-channel transfer statistics
//!
//! A channel is identified by both of its ends. Transfers in either direction
//! count towards the same channel, so ids are normalized with the
//! lexicographically smaller end first.

use super::{all_segments, scan_both_partitions};
use crate::error::IndexerResult;
use crate::model::{ChannelStatistics, TransferRecord, TransferStatus};
use crate::segment::Segment;
use crate::store::{IndexStore, CHANNEL_STATISTICS};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    pub chain_a: String,
    pub channel_a: String,
    pub chain_b: String,
    pub channel_b: String,
}

impl ChannelId {
    pub fn new(
        chain_a: impl Into<String>,
        channel_a: impl Into<String>,
        chain_b: impl Into<String>,
        channel_b: impl Into<String>,
    ) -> Self {
        Self {
            chain_a: chain_a.into(),
            channel_a: channel_a.into(),
            chain_b: chain_b.into(),
            channel_b: channel_b.into(),
        }
    }

    pub fn of_record(record: &TransferRecord) -> Self {
        Self::new(
            &record.source_chain,
            &record.source_channel,
            &record.dest_chain,
            &record.dest_channel,
        )
    }

    /// Same channel seen from the other end
    pub fn mirror(&self) -> Self {
        Self::new(&self.chain_b, &self.channel_b, &self.chain_a, &self.channel_a)
    }

    pub fn canonical(&self) -> Self {
        let mirror = self.mirror();
        if (&mirror.chain_a, &mirror.channel_a) < (&self.chain_a, &self.channel_a) {
            mirror
        } else {
            self.clone()
        }
    }

    /// Direction-insensitive equality
    pub fn same_channel(&self, other: &ChannelId) -> bool {
        self.canonical() == other.canonical()
    }

    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('|').collect();
        match parts.as_slice() {
            [a, ca, b, cb] if parts.iter().all(|p| !p.is_empty()) => Some(Self::new(*a, *ca, *b, *cb)),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.chain_a, self.channel_a, self.chain_b, self.channel_b
        )
    }
}

type ChannelKey = (String, String, String);

#[derive(Debug, Default)]
struct Tally {
    count: u64,
    amount: u128,
}

fn tally_segment(
    store: &IndexStore,
    segment: &Segment,
    page_size: usize,
    only: Option<&ChannelId>,
) -> IndexerResult<BTreeMap<ChannelKey, Tally>> {
    let mut tallies: BTreeMap<ChannelKey, Tally> = BTreeMap::new();
    scan_both_partitions(
        store,
        segment,
        &TransferStatus::countable(),
        page_size,
        |record| {
            if record.dest_chain.is_empty() {
                return;
            }
            let channel = ChannelId::of_record(record).canonical();
            if only.map_or(false, |c| c.canonical() != channel) {
                return;
            }
            let tally = tallies
                .entry((
                    channel.to_string(),
                    record.base_denom.clone(),
                    record.base_denom_chain.clone(),
                ))
                .or_default();
            tally.count += 1;
            tally.amount = tally.amount.saturating_add(record.amount_u128());
        },
    )?;
    Ok(tallies)
}

fn to_rows(
    tallies: BTreeMap<ChannelKey, Tally>,
    segment: &Segment,
    now: i64,
) -> Vec<ChannelStatistics> {
    tallies
        .into_iter()
        .map(|((channel_id, base_denom, base_denom_chain), t)| ChannelStatistics {
            channel_id,
            base_denom,
            base_denom_chain,
            segment_start_time: segment.start_time,
            segment_end_time: segment.end_time,
            transfer_count: t.count,
            transfer_amount: t.amount.to_string(),
            created_at: now,
            updated_at: now,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelAggregator {
    step: i64,
    page_size: usize,
}

impl ChannelAggregator {
    pub fn new(step: i64, page_size: usize) -> Self {
        Self { step, page_size }
    }

    /// Recompute every channel and republish the table in one swap
    pub fn rebuild(&self, store: &IndexStore, now: i64) -> IndexerResult<usize> {
        let _partitions = store.partitions_shared();
        let mut build = store.begin_shadow(&CHANNEL_STATISTICS)?;

        let filled = (|| -> IndexerResult<()> {
            for segment in all_segments(store, self.step)? {
                let tallies = tally_segment(store, &segment, self.page_size, None)?;
                if !tallies.is_empty() {
                    build.append_channel_statistics(&to_rows(tallies, &segment, now))?;
                }
            }
            Ok(())
        })();

        match filled {
            Ok(()) => build.publish(),
            Err(e) => {
                log::error!("❌ Channel statistics rebuild failed, keeping previous table: {}", e);
                build.abort()?;
                Err(e)
            }
        }
    }

    /// Recompute one channel and swap only its rows
    pub fn refresh_channel(
        &self,
        store: &IndexStore,
        channel: &ChannelId,
        now: i64,
    ) -> IndexerResult<usize> {
        let _partitions = store.partitions_shared();
        let canonical = channel.canonical();
        let mut rows = Vec::new();
        for segment in all_segments(store, self.step)? {
            let tallies = tally_segment(store, &segment, self.page_size, Some(&canonical))?;
            rows.extend(to_rows(tallies, &segment, now));
        }
        store.replace_channel_statistics(&canonical.to_string(), &rows)
    }
}
