//! Packet correlation across the two chains of a transfer
//!
//! Given a record, look for its receive on the destination chain, read the
//! acknowledgement the destination wrote, then look for the source-chain
//! transaction that relayed that exact acknowledgement back. Missing data is
//! reported as an in-flight outcome; only store failures are errors, and they
//! never mutate the record.

use crate::error::{ErrorKind, IndexerResult};
use crate::model::{AckOutcome, ChainTx, MsgType, TransferRecord, TransferStatus, TxInfo};
use crate::state_machine::{apply_correlation, Correlation, RetryPolicy};
use crate::store::{IndexStore, Partition};
use crate::tx_store::TxStore;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A successful receive of the packet together with the acknowledgement it wrote
#[derive(Debug, Clone)]
pub struct AckedReceive {
    pub recv: TxInfo,
    pub ack: AckOutcome,
}

#[derive(Clone)]
pub struct PacketCorrelator {
    tx_store: Arc<dyn TxStore>,
}

impl PacketCorrelator {
    pub fn new(tx_store: Arc<dyn TxStore>) -> Self {
        Self { tx_store }
    }

    pub fn tx_store(&self) -> &Arc<dyn TxStore> {
        &self.tx_store
    }

    /// Successful receive transactions for the record's packet, newest first
    pub async fn receives(&self, record: &TransferRecord) -> IndexerResult<Vec<ChainTx>> {
        let txs = self
            .tx_store
            .txs_by_packet(&record.dest_chain, MsgType::RecvPacket, &record.packet_id)
            .await?;
        Ok(txs.into_iter().filter(ChainTx::is_success).collect())
    }

    /// First receive among `receives` that carries a `write_acknowledgement` for the packet
    pub fn first_acked(receives: &[ChainTx], packet_id: &str) -> Option<AckedReceive> {
        receives.iter().find_map(|tx| {
            tx.ack_for_packet(packet_id).map(|(idx, ack)| AckedReceive {
                recv: TxInfo::from_tx(tx, idx),
                ack,
            })
        })
    }

    /// Source-chain transaction relaying exactly `ack` for the record's packet
    pub async fn source_acknowledgement(
        &self,
        record: &TransferRecord,
        ack: &AckOutcome,
    ) -> IndexerResult<Option<TxInfo>> {
        let txs = self
            .tx_store
            .txs_by_packet(&record.source_chain, MsgType::Acknowledgement, &record.packet_id)
            .await?;
        Ok(txs.iter().filter(|tx| tx.is_success()).find_map(|tx| {
            tx.acknowledges(&record.packet_id, ack.payload())
                .map(|idx| TxInfo::from_tx(tx, idx))
        }))
    }

    async fn source_timeout(&self, record: &TransferRecord) -> IndexerResult<Option<TxInfo>> {
        let txs = self
            .tx_store
            .txs_by_packet(&record.source_chain, MsgType::Timeout, &record.packet_id)
            .await?;
        Ok(txs.iter().filter(|tx| tx.is_success()).find_map(|tx| {
            tx.first_msg_index(MsgType::Timeout, &record.packet_id)
                .map(|idx| TxInfo::from_tx(tx, idx))
        }))
    }

    /// Determine how far the record's packet has progressed
    pub async fn correlate(&self, record: &TransferRecord) -> IndexerResult<Correlation> {
        let receives = self.receives(record).await?;

        if receives.is_empty() {
            return Ok(match self.source_timeout(record).await? {
                Some(timeout_tx) => Correlation::TimedOut { timeout_tx },
                None => Correlation::InFlight,
            });
        }

        let Some(AckedReceive { recv, ack }) = Self::first_acked(&receives, &record.packet_id) else {
            log::debug!("⏳ {} received without acknowledgement yet", record.record_id);
            return Ok(Correlation::InFlight);
        };

        match self.source_acknowledgement(record, &ack).await? {
            Some(ack_tx) => Ok(Correlation::Settled { recv, ack, ack_tx }),
            None => Ok(Correlation::AwaitingAck { recv, ack }),
        }
    }

    /// Correlate one Processing record and persist the outcome
    ///
    /// Nothing is written when the store query fails. The write is
    /// conditional on the record still being Processing.
    pub async fn correlate_record(
        &self,
        store: &IndexStore,
        partition: Partition,
        record: &mut TransferRecord,
        policy: &RetryPolicy,
        now: i64,
    ) -> IndexerResult<TransferStatus> {
        let outcome = self.correlate(record).await?;
        apply_correlation(record, outcome, policy, now)?;
        if !store.update_transfer(partition, record, TransferStatus::Processing)? {
            log::debug!("↪️  {} changed under the correlator, skipped", record.record_id);
            return Ok(TransferStatus::Processing);
        }
        Ok(record.status)
    }

    /// One pass over the due Processing records of `chain` in both partitions
    ///
    /// Each source channel gets its own page of `page_size` records.
    pub async fn correlate_chain(
        &self,
        store: &IndexStore,
        chain: &str,
        policy: &RetryPolicy,
        page_size: usize,
        now: i64,
    ) -> IndexerResult<PassReport> {
        let mut report = PassReport::default();
        for partition in Partition::all() {
            for (port, channel) in store.due_routes(partition, chain, now)? {
                let due = store.find_due_processing(partition, chain, &port, &channel, now, page_size)?;
                for mut record in due {
                    report.examined += 1;
                    match self
                        .correlate_record(store, partition, &mut record, policy, now)
                        .await
                    {
                        Ok(TransferStatus::Success) => report.succeeded += 1,
                        Ok(TransferStatus::Refunded) => report.refunded += 1,
                        Ok(TransferStatus::Failed) => report.failed += 1,
                        Ok(_) => report.pending += 1,
                        Err(e) if e.kind() == ErrorKind::Systemic => return Err(e),
                        Err(e) => {
                            log::warn!("⚠️  Correlation skipped {}: {}", record.record_id, e);
                            report.skipped += 1;
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Correlate every source chain concurrently
    pub async fn correlate_all(
        &self,
        store: &IndexStore,
        chains: &[String],
        policy: RetryPolicy,
        page_size: usize,
        now: i64,
    ) -> IndexerResult<PassReport> {
        let mut set = JoinSet::new();
        for chain in chains {
            let correlator = self.clone();
            let store = store.clone();
            let chain = chain.clone();
            set.spawn(async move {
                correlator
                    .correlate_chain(&store, &chain, &policy, page_size, now)
                    .await
            });
        }

        let mut report = PassReport::default();
        let mut systemic = None;
        while let Some(joined) = set.join_next().await {
            match joined? {
                Ok(chain_report) => report.merge(chain_report),
                Err(e) => systemic = Some(e),
            }
        }
        match systemic {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Outcome counts of one correlation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub examined: usize,
    pub succeeded: usize,
    pub refunded: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
}

impl PassReport {
    fn merge(&mut self, other: PassReport) {
        self.examined += other.examined;
        self.succeeded += other.succeeded;
        self.refunded += other.refunded;
        self.failed += other.failed;
        self.pending += other.pending;
        self.skipped += other.skipped;
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::model::transfer::fixtures::processing_record;
    use crate::tx_store::MemoryTxStore;

    const OK_ACK: &str = r#"{"result":"AQ=="}"#;
    const ERR_ACK: &str = r#"{"error":"ABCI code: 5"}"#;

    #[tokio::test]
    async fn test_no_receive_is_in_flight() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        assert_eq!(outcome, Correlation::InFlight);
    }

    #[tokio::test]
    async fn test_receive_without_ack_event_is_in_flight() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.insert(recv_tx(&record, "RECV", None));

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        assert_eq!(outcome, Correlation::InFlight);
    }

    #[tokio::test]
    async fn test_ack_without_source_relay_awaits() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.insert(recv_tx(&record, "RECV", Some(OK_ACK)));

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        match outcome {
            Correlation::AwaitingAck { recv, ack } => {
                assert_eq!(recv.hash, "RECV");
                assert!(ack.is_success());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_round_trip_settles() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.insert(recv_tx(&record, "RECV", Some(ERR_ACK)));
        store.insert(ack_tx(&record, "ACK", ERR_ACK));

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        match outcome {
            Correlation::Settled { recv, ack, ack_tx } => {
                assert_eq!(recv.hash, "RECV");
                assert_eq!(ack_tx.hash, "ACK");
                assert!(!ack.is_success());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mismatched_ack_payload_is_ignored() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.insert(recv_tx(&record, "RECV", Some(OK_ACK)));
        store.insert(ack_tx(&record, "ACK", ERR_ACK));

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        assert!(matches!(outcome, Correlation::AwaitingAck { .. }));
    }

    #[tokio::test]
    async fn test_failed_receive_does_not_count() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        let mut failed = recv_tx(&record, "RECV", Some(OK_ACK));
        failed.code = 11;
        store.insert(failed);

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        assert_eq!(outcome, Correlation::InFlight);
    }

    #[tokio::test]
    async fn test_timeout_without_receive() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.insert(timeout_tx(&record, "TIMEOUT"));

        let outcome = PacketCorrelator::new(store).correlate(&record).await.unwrap();
        match outcome {
            Correlation::TimedOut { timeout_tx } => assert_eq!(timeout_tx.hash, "TIMEOUT"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pass_settles_and_schedules_retries() {
        let txs = Arc::new(MemoryTxStore::new());
        let store = IndexStore::in_memory().unwrap();
        let settled = processing_record(1, 1_000);
        let pending = processing_record(2, 1_000);
        txs.insert(recv_tx(&settled, "RECV", Some(OK_ACK)));
        txs.insert(ack_tx(&settled, "ACK", OK_ACK));
        store
            .insert_transfers(Partition::Active, &[settled.clone(), pending.clone()])
            .unwrap();

        let policy = RetryPolicy::new(30, 600, 3);
        let report = PacketCorrelator::new(txs)
            .correlate_all(&store, &["cosmoshub-4".to_string()], policy, 10, 2_000)
            .await
            .unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.pending, 1);

        let waiting = store.get_transfer(Partition::Active, &pending.record_id).unwrap().unwrap();
        assert_eq!(waiting.retry_count, 1);
        assert_eq!(waiting.next_retry_time, 2_030);
        let done = store.get_transfer(Partition::Active, &settled.record_id).unwrap().unwrap();
        assert_eq!(done.dest_tx_info.unwrap().hash, "RECV");
    }

    #[tokio::test]
    async fn test_pass_isolates_unavailable_destination() {
        let txs = Arc::new(MemoryTxStore::new());
        txs.set_unavailable("osmosis-1", true);
        let store = IndexStore::in_memory().unwrap();
        let record = processing_record(1, 1_000);
        store.insert_transfers(Partition::Active, &[record.clone()]).unwrap();

        let report = PacketCorrelator::new(txs)
            .correlate_chain(&store, "cosmoshub-4", &RetryPolicy::new(30, 600, 3), 10, 2_000)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        let untouched = store.get_transfer(Partition::Active, &record.record_id).unwrap().unwrap();
        assert_eq!(untouched.status, TransferStatus::Processing);
        assert_eq!(untouched.retry_count, 0);
        assert_eq!(untouched.next_retry_time, record.next_retry_time);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let store = Arc::new(MemoryTxStore::new());
        let record = processing_record(1, 1_000);
        store.set_unavailable("osmosis-1", true);

        let err = PacketCorrelator::new(store).correlate(&record).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_busy_channel_leaves_room_for_others() {
        let txs = Arc::new(MemoryTxStore::new());
        let store = IndexStore::in_memory().unwrap();
        let mut records: Vec<_> = (1..=5).map(|seq| processing_record(seq, 1_000)).collect();
        let mut quiet = processing_record(6, 1_500);
        quiet.source_channel = "channel-7".into();
        quiet.record_id = "cosmoshub-4:quiet".into();
        records.push(quiet);
        store.insert_transfers(Partition::Active, &records).unwrap();

        let report = PacketCorrelator::new(txs)
            .correlate_chain(&store, "cosmoshub-4", &RetryPolicy::new(30, 600, 10), 2, 2_000)
            .await
            .unwrap();

        assert_eq!(report.examined, 3);
        let quiet = store.get_transfer(Partition::Active, "cosmoshub-4:quiet").unwrap().unwrap();
        assert_eq!(quiet.retry_count, 1);
    }

    #[tokio::test]
    async fn test_settled_transfer_is_stable_across_passes() {
        let txs = Arc::new(MemoryTxStore::new());
        let store = IndexStore::in_memory().unwrap();
        let record = processing_record(1, 1_000);
        txs.insert(recv_tx(&record, "RECV", Some(OK_ACK)));
        txs.insert(ack_tx(&record, "ACK", OK_ACK));
        store.insert_transfers(Partition::Active, &[record.clone()]).unwrap();
        let correlator = PacketCorrelator::new(txs);
        let policy = RetryPolicy::new(30, 600, 10);

        assert_eq!(
            correlator.correlate(&record).await.unwrap(),
            correlator.correlate(&record).await.unwrap()
        );

        let first = correlator
            .correlate_chain(&store, "cosmoshub-4", &policy, 10, 2_000)
            .await
            .unwrap();
        assert_eq!(first.succeeded, 1);
        let after_first = store.get_transfer(Partition::Active, &record.record_id).unwrap().unwrap();

        let second = correlator
            .correlate_chain(&store, "cosmoshub-4", &policy, 10, 5_000)
            .await
            .unwrap();
        assert_eq!(second, PassReport::default());
        let after_second = store.get_transfer(Partition::Active, &record.record_id).unwrap().unwrap();
        assert_eq!(after_second, after_first);
        assert_eq!(after_second.status, TransferStatus::Success);
    }

    #[tokio::test]
    async fn test_awaiting_ack_is_stable_across_passes() {
        let txs = Arc::new(MemoryTxStore::new());
        let store = IndexStore::in_memory().unwrap();
        let record = processing_record(1, 1_000);
        txs.insert(recv_tx(&record, "RECV", Some(OK_ACK)));
        store.insert_transfers(Partition::Active, &[record.clone()]).unwrap();
        let correlator = PacketCorrelator::new(txs);
        let policy = RetryPolicy::new(30, 600, 10);

        correlator
            .correlate_chain(&store, "cosmoshub-4", &policy, 10, 2_000)
            .await
            .unwrap();
        let after_first = store.get_transfer(Partition::Active, &record.record_id).unwrap().unwrap();

        let second = correlator
            .correlate_chain(&store, "cosmoshub-4", &policy, 10, 5_000)
            .await
            .unwrap();
        assert_eq!(second.pending, 1);
        let after_second = store.get_transfer(Partition::Active, &record.record_id).unwrap().unwrap();

        for r in [&after_first, &after_second] {
            assert_eq!(r.status, TransferStatus::Processing);
            assert_eq!(r.dest_tx_info.as_ref().map(|l| l.hash.as_str()), Some("RECV"));
            assert!(r.refund_tx_info.is_none());
        }
        assert_eq!(after_second.dest_tx_info, after_first.dest_tx_info);
        assert_eq!(after_second.retry_count, after_first.retry_count + 1);
    }
}
