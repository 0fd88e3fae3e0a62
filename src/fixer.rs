//! Re-examination of Failed transfers
//!
//! A record can end up Failed because its retry budget ran out while a chain
//! was lagging, or because the destination leg bound to it was wrong. The
//! fixer looks again:
//! 1. the bound destination transaction, re-fetched by hash
//! 2. failing that, every receive of the packet on the destination chain
//! 3. with an acknowledgement in hand, the source-chain relay of that exact ack
//!
//! A complete round trip settles the record; a receive without a usable
//! acknowledgement hands it back to the correlator as Processing; no receive
//! at all leaves it Failed.

use crate::correlator::{AckedReceive, PacketCorrelator};
use crate::error::{ErrorKind, IndexerResult};
use crate::model::{AckOutcome, TransferRecord, TransferStatus, TxInfo};
use crate::segment::segments_between;
use crate::state_machine::{apply_fix, FixOutcome, Transition};
use crate::store::{IndexStore, Partition};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixReport {
    pub examined: usize,
    pub settled: usize,
    pub demoted: usize,
    pub left_failed: usize,
    pub skipped: usize,
}

impl FixReport {
    fn merge(&mut self, other: FixReport) {
        self.examined += other.examined;
        self.settled += other.settled;
        self.demoted += other.demoted;
        self.left_failed += other.left_failed;
        self.skipped += other.skipped;
    }
}

#[derive(Clone)]
pub struct FailFixer {
    correlator: PacketCorrelator,
}

impl FailFixer {
    pub fn new(correlator: PacketCorrelator) -> Self {
        Self { correlator }
    }

    /// Decide what should happen to a Failed record
    pub async fn diagnose(&self, record: &TransferRecord) -> IndexerResult<FixOutcome> {
        if let Some(bound) = &record.dest_tx_info {
            let refetched = self
                .correlator
                .tx_store()
                .tx_by_hash(&record.dest_chain, &bound.hash)
                .await?;
            if let Some(tx) = refetched {
                if let Some((idx, ack)) = tx.ack_for_packet(&record.packet_id) {
                    return self.resettle(record, TxInfo::from_tx(&tx, idx), ack).await;
                }
            }
        }

        let receives = self.correlator.receives(record).await?;
        if receives.is_empty() {
            return Ok(FixOutcome::LeaveFailed);
        }
        match PacketCorrelator::first_acked(&receives, &record.packet_id) {
            Some(AckedReceive { recv, ack }) => self.resettle(record, recv, ack).await,
            None => Ok(FixOutcome::Demote),
        }
    }

    async fn resettle(
        &self,
        record: &TransferRecord,
        recv: TxInfo,
        ack: AckOutcome,
    ) -> IndexerResult<FixOutcome> {
        match self.correlator.source_acknowledgement(record, &ack).await? {
            Some(ack_tx) => Ok(FixOutcome::Settled { recv, ack, ack_tx }),
            None => Ok(FixOutcome::Demote),
        }
    }

    /// Diagnose one record and persist the result
    ///
    /// The write is conditional on the record still being Failed, so a
    /// concurrent writer wins and the record is reported unchanged.
    pub async fn fix_record(
        &self,
        store: &IndexStore,
        partition: Partition,
        record: &mut TransferRecord,
        now: i64,
    ) -> IndexerResult<Transition> {
        let outcome = self.diagnose(record).await?;
        let transition = apply_fix(record, outcome, now)?;
        if transition.changed_status()
            && !store.update_transfer(partition, record, TransferStatus::Failed)?
        {
            log::debug!("↪️  {} changed under the fixer, skipped", record.record_id);
            return Ok(Transition {
                from: TransferStatus::Failed,
                to: TransferStatus::Failed,
            });
        }
        Ok(transition)
    }

    /// Walk every segment of `partition` and fix its Failed records
    ///
    /// Segments run in order, each paged by `page_size`. Per-record errors
    /// are logged and skipped; only systemic errors abort the walk.
    pub async fn fix_partition(
        &self,
        store: &IndexStore,
        partition: Partition,
        step: i64,
        page_size: usize,
        now: i64,
    ) -> IndexerResult<FixReport> {
        let mut report = FixReport::default();
        let Some((first, last)) = store.created_at_bounds(partition)? else {
            return Ok(report);
        };

        for segment in segments_between(first, last, step) {
            let mut offset = 0;
            loop {
                let page = store.find_failed_in_segment(partition, &segment, offset, page_size)?;
                let fetched = page.len();
                let mut moved = 0;

                for mut record in page {
                    report.examined += 1;
                    match self.fix_record(store, partition, &mut record, now).await {
                        Ok(t) if t.to == TransferStatus::Processing => {
                            report.demoted += 1;
                            moved += 1;
                        }
                        Ok(t) if t.changed_status() => {
                            report.settled += 1;
                            moved += 1;
                        }
                        Ok(_) => report.left_failed += 1,
                        Err(e) if e.kind() == ErrorKind::Systemic => return Err(e),
                        Err(e) => {
                            log::warn!("⚠️  Fixer skipped {}: {}", record.record_id, e);
                            report.skipped += 1;
                        }
                    }
                }

                // Records that left Failed no longer occupy the filtered page
                offset += fetched - moved;
                if fetched < page_size {
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Fix both partitions concurrently
    pub async fn fix_all(
        &self,
        store: &IndexStore,
        active_step: i64,
        history_step: i64,
        page_size: usize,
        now: i64,
    ) -> IndexerResult<FixReport> {
        let (active, history) = tokio::join!(
            self.fix_partition(store, Partition::Active, active_step, page_size, now),
            self.fix_partition(store, Partition::History, history_step, page_size, now),
        );
        let mut report = active?;
        report.merge(history?);
        Ok(report)
    }
}
