//! Record creation from source-chain transfer transactions
//!
//! Each chain is read forward from its sync position, the (height, hash) of
//! the last transaction consumed. Every transfer message becomes one record
//! in the active partition; re-reading a transaction is harmless because
//! inserts ignore existing record ids.

use crate::denom::{ibc_denom, next_denom_path, split_path, DenomResolver, DenomTrace};
use crate::error::{ErrorKind, IndexerResult};
use crate::model::chain_tx::TransferMsg;
use crate::model::{ChainTx, MsgType, TransferRecord, TransferStatus, TxInfo};
use crate::registry::ChainRegistry;
use crate::state_machine::resolve_route;
use crate::store::{IndexStore, Partition};
use crate::tx_store::{TxPosition, TxStore};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Records and denom traces derived from one source transaction
#[derive(Debug, Default)]
pub struct SyncBatch {
    pub records: Vec<TransferRecord>,
    pub traces: Vec<DenomTrace>,
}

fn record_from_transfer(
    tx: &ChainTx,
    msg_index: usize,
    msg: &TransferMsg,
    registry: &ChainRegistry,
    now: i64,
    batch: &mut SyncBatch,
) {
    let packet = &msg.packet;
    let path = packet.data.denom.as_str();
    let packet_id = packet.packet_id();
    let resolved = DenomResolver::new(registry).resolve(&tx.chain_id, path);

    let dest_path = next_denom_path(
        &packet.source_port,
        &packet.source_channel,
        &packet.destination_port,
        &packet.destination_channel,
        path,
    );
    let dest_denom = ibc_denom(&dest_path);
    let route = registry.counterparty(&tx.chain_id, &packet.source_port, &packet.source_channel);

    let status = match (tx.is_success(), route) {
        (false, _) => TransferStatus::Failed,
        (true, Some(_)) => TransferStatus::Processing,
        (true, None) => TransferStatus::Setting,
    };
    let (hops, _) = split_path(path);

    // A token moving further away from home gains a new trace on the destination
    if let Some(end) = route {
        let (dest_hops, _) = split_path(&dest_path);
        if dest_hops.len() > hops.len() {
            batch.traces.push(DenomTrace {
                chain: end.chain.clone(),
                denom: dest_denom.clone(),
                denom_path: dest_path.clone(),
                base_denom: resolved.base_denom.clone(),
                base_denom_chain: resolved.base_denom_chain.clone(),
                prev_chain: tx.chain_id.clone(),
                prev_denom: ibc_denom(path),
                hop_count: resolved.hop_count + 1,
                complete: resolved.complete,
            });
        }
    }

    batch.records.push(TransferRecord {
        record_id: TransferRecord::record_id_for(&tx.chain_id, &packet_id),
        packet_id,
        sequence: packet.sequence,
        source_chain: tx.chain_id.clone(),
        source_port: packet.source_port.clone(),
        source_channel: packet.source_channel.clone(),
        dest_chain: route.map(|e| e.chain.clone()).unwrap_or_default(),
        dest_port: packet.destination_port.clone(),
        dest_channel: packet.destination_channel.clone(),
        sender: packet.data.sender.clone(),
        receiver: packet.data.receiver.clone(),
        source_denom: ibc_denom(path),
        dest_denom,
        base_denom: resolved.base_denom.clone(),
        base_denom_chain: resolved.base_denom_chain.clone(),
        denom_path: if hops.is_empty() { String::new() } else { path.to_string() },
        amount: packet.data.amount.clone(),
        status,
        source_tx_info: TxInfo::from_tx(tx, msg_index),
        dest_tx_info: None,
        refund_tx_info: None,
        retry_count: 0,
        next_retry_time: now,
        tx_time: tx.time,
        created_at: now,
        updated_at: now,
    });
    batch.traces.extend(resolved.traces);
}

/// Build a record for every transfer message of `tx`
pub fn build_records(tx: &ChainTx, registry: &ChainRegistry, now: i64) -> SyncBatch {
    let mut batch = SyncBatch::default();
    for (idx, msg) in tx.msgs.iter().enumerate() {
        if let Some(transfer) = msg.as_transfer() {
            record_from_transfer(tx, idx, transfer, registry, now, &mut batch);
        }
    }
    batch
}

#[derive(Clone)]
pub struct SourceSync {
    tx_store: Arc<dyn TxStore>,
    registry: Arc<ChainRegistry>,
    batch_size: usize,
}

impl SourceSync {
    pub fn new(tx_store: Arc<dyn TxStore>, registry: Arc<ChainRegistry>, batch_size: usize) -> Self {
        Self {
            tx_store,
            registry,
            batch_size,
        }
    }

    /// Read one batch of transfers on `chain` past its sync position; returns records created
    pub async fn sync_chain(&self, store: &IndexStore, chain: &str, now: i64) -> IndexerResult<usize> {
        let after = store.get_sync_position(chain)?.unwrap_or_default();
        let txs = self
            .tx_store
            .txs_by_type_after(chain, MsgType::Transfer, &after, self.batch_size)
            .await?;
        let Some(last) = txs.last() else {
            return Ok(0);
        };
        let position = TxPosition::of(last);

        let mut batch = SyncBatch::default();
        for tx in &txs {
            let built = build_records(tx, &self.registry, now);
            batch.records.extend(built.records);
            batch.traces.extend(built.traces);
        }

        let inserted = store.insert_transfers(Partition::Active, &batch.records)?;
        store.upsert_denom_traces(&batch.traces, now)?;
        store.set_sync_position(chain, &position, now)?;

        if inserted > 0 {
            log::info!(
                "📥 {}: {} new transfers from {} txs (height {} → {})",
                chain,
                inserted,
                txs.len(),
                after.height,
                position.height
            );
        }
        Ok(inserted)
    }

    /// Sync every registered chain concurrently
    ///
    /// A chain whose store is unavailable is skipped for this pass; systemic
    /// errors are returned after all chains finish.
    pub async fn sync_all(&self, store: &IndexStore, now: i64) -> IndexerResult<usize> {
        let mut set = JoinSet::new();
        for chain in self.registry.chains() {
            let sync = self.clone();
            let store = store.clone();
            let chain = chain.clone();
            set.spawn(async move {
                let result = sync.sync_chain(&store, &chain, now).await;
                (chain, result)
            });
        }

        let mut total = 0;
        let mut systemic = None;
        while let Some(joined) = set.join_next().await {
            let (chain, result) = joined?;
            match result {
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Systemic => {
                    log::error!("❌ Source sync of {} failed: {}", chain, e);
                    systemic = Some(e);
                }
                Err(e) => log::warn!("⚠️  Source sync of {} skipped: {}", chain, e),
            }
        }
        match systemic {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Promote Setting records whose route the registry now knows
    ///
    /// Only source channels the registry can resolve are read, so records
    /// stuck on unknown channels never crowd out the promotable ones. At most
    /// `limit` records are promoted per channel.
    pub fn promote_setting(&self, store: &IndexStore, limit: usize, now: i64) -> IndexerResult<usize> {
        let mut promoted = 0;
        for (chain, port, channel) in store.setting_routes(Partition::Active)? {
            let Some(end) = self.registry.counterparty(&chain, &port, &channel).cloned() else {
                continue;
            };
            for mut record in store.find_setting_on_route(Partition::Active, &chain, &port, &channel, limit)? {
                let dest_denom = record.dest_denom.clone();
                let transition = resolve_route(&mut record, &end, dest_denom, now)?;
                if transition.changed_status()
                    && store.update_transfer(Partition::Active, &record, TransferStatus::Setting)?
                {
                    promoted += 1;
                }
            }
        }
        if promoted > 0 {
            log::info!("🧭 Promoted {} transfers with a newly known route", promoted);
        }
        Ok(promoted)
    }

    /// Re-resolve records whose origin stopped at an unknown channel
    ///
    /// Walks every such record in both partitions, `page_size` at a time.
    /// Records the registry still cannot resolve are left as they are.
    pub fn refresh_partial_denoms(
        &self,
        store: &IndexStore,
        page_size: usize,
        now: i64,
    ) -> IndexerResult<usize> {
        let resolver = DenomResolver::new(&self.registry);
        let mut refreshed = 0;
        for partition in Partition::all() {
            let mut after = String::new();
            loop {
                let page = store.find_partial_denoms(partition, &after, page_size)?;
                let Some(last) = page.last() else { break };
                after = last.record_id.clone();

                for record in page.iter().filter(|r| !r.denom_path.is_empty()) {
                    let resolved = resolver.resolve(&record.source_chain, &record.denom_path);
                    if !resolved.complete {
                        continue;
                    }
                    if store.update_base_denom(
                        partition,
                        &record.record_id,
                        &resolved.base_denom,
                        &resolved.base_denom_chain,
                        now,
                    )? {
                        refreshed += 1;
                    }
                    store.upsert_denom_traces(&resolved.traces, now)?;
                }
                if page.len() < page_size {
                    break;
                }
            }
        }
        if refreshed > 0 {
            log::info!("🔍 Completed the origin of {} transfers", refreshed);
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chain_tx::fixtures::{packet, tx};
    use crate::model::{Coin, TxMsg};
    use crate::registry::{ChainConfig, ChannelConfig};
    use crate::tx_store::MemoryTxStore;

    fn registry(with_route: bool) -> ChainRegistry {
        let channels = if with_route {
            vec![ChannelConfig {
                port_id: "transfer".into(),
                channel_id: "channel-141".into(),
                counterparty_chain: "osmosis-1".into(),
                counterparty_port: "transfer".into(),
                counterparty_channel: "channel-0".into(),
            }]
        } else {
            Vec::new()
        };
        ChainRegistry::from_configs(vec![ChainConfig {
            chain: "cosmoshub-4".into(),
            channels,
        }])
    }

    fn send_tx(hash: &str, height: i64, sequences: &[u64]) -> ChainTx {
        let msgs = sequences
            .iter()
            .map(|seq| {
                let p = packet(*seq, "uatom");
                TxMsg::Transfer(TransferMsg {
                    token: Coin::new("uatom", "1000"),
                    sender: p.data.sender.clone(),
                    receiver: p.data.receiver.clone(),
                    packet: p,
                })
            })
            .collect();
        tx("cosmoshub-4", hash, height, msgs)
    }

    #[test]
    fn test_known_route_creates_processing_record() {
        let batch = build_records(&send_tx("SEND", 10, &[7]), &registry(true), 1_000);

        let record = &batch.records[0];
        assert_eq!(record.status, TransferStatus::Processing);
        assert_eq!(record.record_id, "cosmoshub-4:transfer/channel-141/transfer/channel-0/7");
        assert_eq!(record.dest_chain, "osmosis-1");
        assert_eq!(
            record.dest_denom,
            "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
        );
        assert_eq!(record.base_denom, "uatom");
        assert_eq!(record.base_denom_chain, "cosmoshub-4");
        assert!(batch.traces.iter().any(|t| t.chain == "osmosis-1" && t.hop_count == 1));
    }

    #[test]
    fn test_unknown_route_and_failed_send() {
        let batch = build_records(&send_tx("SEND", 10, &[1]), &registry(false), 1_000);
        assert_eq!(batch.records[0].status, TransferStatus::Setting);
        assert!(batch.records[0].dest_chain.is_empty());

        let mut failed = send_tx("SEND", 10, &[2]);
        failed.code = 13;
        let batch = build_records(&failed, &registry(true), 1_000);
        assert_eq!(batch.records[0].status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_sync_chain_advances_cursor_and_is_idempotent() {
        let txs = Arc::new(MemoryTxStore::new());
        txs.insert(send_tx("A", 10, &[1, 2]));
        txs.insert(send_tx("B", 11, &[3]));
        let store = IndexStore::in_memory().unwrap();
        let sync = SourceSync::new(txs.clone(), Arc::new(registry(true)), 100);

        assert_eq!(sync.sync_chain(&store, "cosmoshub-4", 1_000).await.unwrap(), 3);
        assert_eq!(
            store.get_sync_position("cosmoshub-4").unwrap(),
            Some(TxPosition {
                height: 11,
                tx_hash: "B".into()
            })
        );
        assert_eq!(sync.sync_chain(&store, "cosmoshub-4", 1_001).await.unwrap(), 0);

        txs.insert(send_tx("C", 12, &[4]));
        assert_eq!(sync.sync_all(&store, 1_002).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_batches_within_one_height_lose_nothing() {
        let txs = Arc::new(MemoryTxStore::new());
        txs.insert(send_tx("A", 10, &[1]));
        txs.insert(send_tx("B", 10, &[2]));
        txs.insert(send_tx("C", 10, &[3]));
        let store = IndexStore::in_memory().unwrap();
        let sync = SourceSync::new(txs, Arc::new(registry(true)), 2);

        let mut created = 0;
        for round in 0..5 {
            created += sync.sync_chain(&store, "cosmoshub-4", 1_000 + round).await.unwrap();
        }

        assert_eq!(created, 3);
        assert_eq!(
            store.get_sync_position("cosmoshub-4").unwrap(),
            Some(TxPosition {
                height: 10,
                tx_hash: "C".into()
            })
        );
    }

    #[test]
    fn test_promote_setting_once_route_is_known() {
        let store = IndexStore::in_memory().unwrap();
        let batch = build_records(&send_tx("SEND", 10, &[1]), &registry(false), 1_000);
        store.insert_transfers(Partition::Active, &batch.records).unwrap();

        let txs: Arc<dyn TxStore> = Arc::new(MemoryTxStore::new());
        let blind = SourceSync::new(txs.clone(), Arc::new(registry(false)), 10);
        assert_eq!(blind.promote_setting(&store, 10, 2_000).unwrap(), 0);

        let informed = SourceSync::new(txs, Arc::new(registry(true)), 10);
        assert_eq!(informed.promote_setting(&store, 10, 2_000).unwrap(), 1);

        let record = store
            .get_transfer(Partition::Active, &batch.records[0].record_id)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransferStatus::Processing);
        assert_eq!(record.dest_chain, "osmosis-1");
    }

    #[test]
    fn test_unknown_channels_do_not_starve_promotion() {
        let store = IndexStore::in_memory().unwrap();
        let mut stuck = Vec::new();
        for seq in 1..=3 {
            let mut r = build_records(&send_tx("OLD", 10, &[seq]), &registry(false), 1_000).records.remove(0);
            r.source_channel = "channel-999".into();
            r.record_id = format!("cosmoshub-4:stuck/{}", seq);
            stuck.push(r);
        }
        store.insert_transfers(Partition::Active, &stuck).unwrap();
        let known = build_records(&send_tx("NEW", 20, &[4]), &registry(false), 2_000).records;
        store.insert_transfers(Partition::Active, &known).unwrap();

        let sync = SourceSync::new(Arc::new(MemoryTxStore::new()), Arc::new(registry(true)), 10);
        let mut promoted = 0;
        for round in 0..5 {
            promoted += sync.promote_setting(&store, 3, 3_000 + round).unwrap();
        }

        assert_eq!(promoted, 1);
        let record = store
            .get_transfer(Partition::Active, &known[0].record_id)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransferStatus::Processing);
        let still = store.get_transfer(Partition::Active, "cosmoshub-4:stuck/1").unwrap().unwrap();
        assert_eq!(still.status, TransferStatus::Setting);
    }

    #[test]
    fn test_partial_origin_is_completed_once_channel_is_known() {
        let p = packet(1, "transfer/channel-141/uosmo");
        let send = tx(
            "cosmoshub-4",
            "SEND",
            10,
            vec![TxMsg::Transfer(TransferMsg {
                token: Coin::new("ibc/X", "5"),
                sender: p.data.sender.clone(),
                receiver: p.data.receiver.clone(),
                packet: p,
            })],
        );
        let batch = build_records(&send, &registry(false), 1_000);
        let record_id = batch.records[0].record_id.clone();
        assert!(batch.records[0].base_denom.starts_with("ibc/"));
        assert_eq!(batch.records[0].base_denom_chain, "cosmoshub-4");

        let store = IndexStore::in_memory().unwrap();
        store.insert_transfers(Partition::Active, &batch.records).unwrap();
        let txs: Arc<dyn TxStore> = Arc::new(MemoryTxStore::new());

        let blind = SourceSync::new(txs.clone(), Arc::new(registry(false)), 10);
        assert_eq!(blind.refresh_partial_denoms(&store, 1, 2_000).unwrap(), 0);

        let informed = SourceSync::new(txs, Arc::new(registry(true)), 10);
        assert_eq!(informed.refresh_partial_denoms(&store, 1, 2_000).unwrap(), 1);
        let record = store.get_transfer(Partition::Active, &record_id).unwrap().unwrap();
        assert_eq!(record.base_denom, "uosmo");
        assert_eq!(record.base_denom_chain, "osmosis-1");
        assert_eq!(informed.refresh_partial_denoms(&store, 1, 2_001).unwrap(), 0);
    }
}
