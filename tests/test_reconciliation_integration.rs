//! End-to-end reconciliation against file-backed stores
//!
//! Transactions are written to a SQLite transaction store, then the periodic
//! tasks are driven one cycle at a time with explicit clocks.

#[cfg(test)]
mod reconciliation_integration_tests {
    use ibcflow::model::chain_tx::{
        AcknowledgementMsg, Event, EventAttribute, Fee, FungibleTokenPacketData, MsgEvents,
        RecvPacketMsg, TransferMsg, PACKET_ACK_ATTR, WRITE_ACK_EVENT,
    };
    use ibcflow::model::{
        ChainTx, ChannelStatistics, Coin, Packet, PayerType, TransferRecord, TransferStatus, TxMsg,
    };
    use ibcflow::query::{QueryService, TransferQuery};
    use ibcflow::registry::ChainRegistry;
    use ibcflow::scheduler::{
        ChainFeeStatisticsTask, ChannelStatisticsTask, CorrelateTask, CycleTask, FixFailTask,
        MigrateTask, SourceSyncTask, TaskContext,
    };
    use ibcflow::store::CHANNEL_STATISTICS;
    use ibcflow::tx_store::{SqliteTxStore, TxStore};
    use ibcflow::{IndexStore, IndexerConfig, Partition};
    use std::sync::Arc;
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000;
    const OK_ACK: &str = r#"{"result":"AQ=="}"#;
    const ERR_ACK: &str = r#"{"error":"ABCI code: 5: insufficient funds"}"#;

    const REGISTRY: &str = r#"[
        {"chain": "cosmoshub-4", "channels": [
            {"channel_id": "channel-141", "counterparty_chain": "osmosis-1", "counterparty_channel": "channel-0"}
        ]},
        {"chain": "osmosis-1", "channels": [
            {"channel_id": "channel-0", "counterparty_chain": "cosmoshub-4", "counterparty_channel": "channel-141"}
        ]}
    ]"#;

    struct Harness {
        _dir: TempDir,
        txs: Arc<SqliteTxStore>,
        ctx: TaskContext,
    }

    fn harness(fail_after_retries: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(dir.path().join("ibcflow.db")).unwrap();
        let txs = Arc::new(SqliteTxStore::open(dir.path().join("chain_txs.db")).unwrap());
        let config = IndexerConfig {
            fail_after_retries,
            archive_retention_secs: 100,
            ..IndexerConfig::default()
        };
        let ctx = TaskContext {
            store,
            tx_store: txs.clone() as Arc<dyn TxStore>,
            registry: Arc::new(ChainRegistry::from_json(REGISTRY).unwrap()),
            config: Arc::new(config),
        };
        Harness { _dir: dir, txs, ctx }
    }

    fn packet(sequence: u64) -> Packet {
        Packet {
            sequence,
            source_port: "transfer".into(),
            source_channel: "channel-141".into(),
            destination_port: "transfer".into(),
            destination_channel: "channel-0".into(),
            data: FungibleTokenPacketData {
                denom: "uatom".into(),
                amount: "1000".into(),
                sender: "cosmos1sender".into(),
                receiver: "osmo1receiver".into(),
                memo: String::new(),
            },
            timeout_timestamp: 0,
        }
    }

    fn chain_tx(chain: &str, hash: &str, height: i64, msg: TxMsg) -> ChainTx {
        let fee = match chain {
            "osmosis-1" => Coin::new("uosmo", "300"),
            _ => Coin::new("uatom", "500"),
        };
        ChainTx {
            chain_id: chain.into(),
            tx_hash: hash.into(),
            height,
            time: T - 1_000 + height,
            code: 0,
            fee: Fee {
                amount: vec![fee],
                gas_limit: 200_000,
            },
            memo: String::new(),
            signers: vec!["signer".into()],
            msgs: vec![msg],
            events: Vec::new(),
        }
    }

    fn send(sequence: u64) -> ChainTx {
        let p = packet(sequence);
        chain_tx(
            "cosmoshub-4",
            &format!("SEND{}", sequence),
            10 + sequence as i64,
            TxMsg::Transfer(TransferMsg {
                token: Coin::new("uatom", "1000"),
                sender: p.data.sender.clone(),
                receiver: p.data.receiver.clone(),
                packet: p,
            }),
        )
    }

    fn recv(sequence: u64, ack: Option<&str>) -> ChainTx {
        let mut tx = chain_tx(
            "osmosis-1",
            &format!("RECV{}", sequence),
            100 + sequence as i64,
            TxMsg::RecvPacket(RecvPacketMsg {
                packet: packet(sequence),
                signer: "osmo1relayer".into(),
            }),
        );
        if let Some(payload) = ack {
            tx.events.push(MsgEvents {
                msg_index: 0,
                events: vec![Event {
                    kind: WRITE_ACK_EVENT.into(),
                    attributes: vec![EventAttribute {
                        key: PACKET_ACK_ATTR.into(),
                        value: payload.into(),
                    }],
                }],
            });
        }
        tx
    }

    fn source_ack(sequence: u64, payload: &str) -> ChainTx {
        chain_tx(
            "cosmoshub-4",
            &format!("ACK{}", sequence),
            200 + sequence as i64,
            TxMsg::Acknowledgement(AcknowledgementMsg {
                packet: packet(sequence),
                acknowledgement: payload.into(),
                signer: "cosmos1relayer".into(),
            }),
        )
    }

    fn record(h: &Harness, sequence: u64) -> (Partition, TransferRecord) {
        let id = format!("cosmoshub-4:transfer/channel-141/transfer/channel-0/{}", sequence);
        for partition in Partition::all() {
            if let Some(r) = h.ctx.store.get_transfer(partition, &id).unwrap() {
                return (partition, r);
            }
        }
        panic!("record {} missing", id);
    }

    fn assert_leg_invariant(r: &TransferRecord) {
        if matches!(r.status, TransferStatus::Success | TransferStatus::Refunded) {
            assert!(
                r.dest_tx_info.is_some() != r.refund_tx_info.is_some(),
                "{} must carry exactly one terminal leg",
                r.record_id
            );
        }
    }

    #[tokio::test]
    async fn test_transfer_lifecycle_end_to_end() {
        let h = harness(2);
        for seq in 1..=4 {
            h.txs.insert_tx(&send(seq)).unwrap();
        }
        // 1: never received; 2: success round trip; 3: error round trip; 4: ack not relayed back
        h.txs.insert_tx(&recv(2, Some(OK_ACK))).unwrap();
        h.txs.insert_tx(&source_ack(2, OK_ACK)).unwrap();
        h.txs.insert_tx(&recv(3, Some(ERR_ACK))).unwrap();
        h.txs.insert_tx(&source_ack(3, ERR_ACK)).unwrap();
        h.txs.insert_tx(&recv(4, Some(OK_ACK))).unwrap();

        SourceSyncTask(h.ctx.clone()).run_once(T).await.unwrap();
        CorrelateTask(h.ctx.clone()).run_once(T).await.unwrap();

        let (_, r1) = record(&h, 1);
        assert_eq!(r1.status, TransferStatus::Processing);
        assert_eq!(r1.retry_count, 1);

        let (_, r2) = record(&h, 2);
        assert_eq!(r2.status, TransferStatus::Success);
        assert_eq!(r2.dest_tx_info.as_ref().unwrap().hash, "RECV2");

        let (_, r3) = record(&h, 3);
        assert_eq!(r3.status, TransferStatus::Refunded);
        assert_eq!(r3.refund_tx_info.as_ref().unwrap().hash, "ACK3");
        assert!(r3.dest_tx_info.is_none());

        let (_, r4) = record(&h, 4);
        assert_eq!(r4.status, TransferStatus::Processing);
        assert_eq!(r4.dest_tx_info.as_ref().unwrap().hash, "RECV4");

        // Retry budget runs out for 1 and 4
        CorrelateTask(h.ctx.clone()).run_once(T + 1_000).await.unwrap();
        assert_eq!(record(&h, 1).1.status, TransferStatus::Failed);
        assert_eq!(record(&h, 4).1.status, TransferStatus::Failed);

        // The fixer finds 4's receive but no relayed ack: back to Processing, leg cleared
        FixFailTask(h.ctx.clone()).run_once(T + 2_000).await.unwrap();
        assert_eq!(record(&h, 1).1.status, TransferStatus::Failed);
        let (_, r4) = record(&h, 4);
        assert_eq!(r4.status, TransferStatus::Processing);
        assert!(r4.dest_tx_info.is_none());
        assert_eq!(r4.retry_count, 0);

        // The relayer finally delivers the ack
        h.txs.insert_tx(&source_ack(4, OK_ACK)).unwrap();
        CorrelateTask(h.ctx.clone()).run_once(T + 3_000).await.unwrap();
        assert_eq!(record(&h, 4).1.status, TransferStatus::Success);

        // Further passes leave settled records alone
        let before = record(&h, 2).1;
        CorrelateTask(h.ctx.clone()).run_once(T + 10_000).await.unwrap();
        assert_eq!(record(&h, 2).1, before);

        for seq in 1..=4 {
            assert_leg_invariant(&record(&h, seq).1);
        }
    }

    #[tokio::test]
    async fn test_archival_statistics_and_queries_span_partitions() {
        let h = harness(20);
        for seq in 1..=3 {
            h.txs.insert_tx(&send(seq)).unwrap();
        }
        h.txs.insert_tx(&recv(2, Some(OK_ACK))).unwrap();
        h.txs.insert_tx(&source_ack(2, OK_ACK)).unwrap();
        h.txs.insert_tx(&recv(3, Some(ERR_ACK))).unwrap();
        h.txs.insert_tx(&source_ack(3, ERR_ACK)).unwrap();

        SourceSyncTask(h.ctx.clone()).run_once(T).await.unwrap();
        CorrelateTask(h.ctx.clone()).run_once(T).await.unwrap();

        // Settled records age out; migration twice is the same as once
        MigrateTask(h.ctx.clone()).run_once(T + 1_000).await.unwrap();
        MigrateTask(h.ctx.clone()).run_once(T + 1_000).await.unwrap();
        assert_eq!(record(&h, 1).0, Partition::Active);
        assert_eq!(record(&h, 2).0, Partition::History);
        assert_eq!(record(&h, 3).0, Partition::History);
        let history = h.ctx.store.count_by_status(Partition::History).unwrap();
        assert_eq!(history.values().sum::<u64>(), 2);

        ChannelStatisticsTask(h.ctx.clone()).run_once(T + 1_000).await.unwrap();
        ChainFeeStatisticsTask(h.ctx.clone()).run_once(T + 1_000).await.unwrap();

        let query = QueryService::new(h.ctx.store.clone());
        let channels = query
            .channel_statistics(Some("osmosis-1|channel-0|cosmoshub-4|channel-141"), 0, T + 86_400 * 2)
            .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].transfer_count, 3);
        assert_eq!(channels[0].transfer_amount, "3000");

        let users = h
            .ctx
            .store
            .chain_fee_totals("cosmoshub-4", 0, T + 86_400 * 2, Some(PayerType::User))
            .unwrap();
        assert_eq!(users[0].amount, "1500");
        let relayers = query.relayer_fees("osmosis-1", 0, T + 86_400 * 2).unwrap();
        assert_eq!(relayers[0].denom, "uosmo");
        assert_eq!(relayers[0].amount, "300");
        let refunds = query.relayer_fees("cosmoshub-4", 0, T + 86_400 * 2).unwrap();
        assert_eq!(refunds[0].amount, "500");

        let page = query
            .list_transfers(&TransferQuery {
                chain_a: Some("allchain".into()),
                denom: Some("uatom".into()),
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);

        let detail = query.transfer_by_hash("RECV2").unwrap().unwrap();
        assert_eq!(detail.partition, "history");
        assert_eq!(detail.record.status, TransferStatus::Success);

        let tree = query.denom_tree("uatom", "cosmoshub-4").unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].chain, "osmosis-1");
        assert_eq!(
            tree.children[0].denom,
            "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
        );
    }

    fn channel_row(channel_id: &str, count: u64) -> ChannelStatistics {
        ChannelStatistics {
            channel_id: channel_id.into(),
            base_denom: "uatom".into(),
            base_denom_chain: "cosmoshub-4".into(),
            segment_start_time: 0,
            segment_end_time: 86_400,
            transfer_count: count,
            transfer_amount: (count * 1000).to_string(),
            created_at: T,
            updated_at: T,
        }
    }

    #[tokio::test]
    async fn test_readers_see_old_table_until_publish() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IndexStore::open(dir.path().join("ibcflow.db")).unwrap();
        let reader = writer.reopen().unwrap();
        writer
            .replace_channel_statistics("a|channel-0|b|channel-1", &[channel_row("a|channel-0|b|channel-1", 1)])
            .unwrap();

        // Abandoned build: published rows untouched
        let mut build = writer.begin_shadow(&CHANNEL_STATISTICS).unwrap();
        build.append_channel_statistics(&[channel_row("c|channel-2|d|channel-3", 9)]).unwrap();
        build.abort().unwrap();
        let rows = reader.channel_statistics_in_range(None, 0, 86_400).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transfer_count, 1);

        let mut build = writer.begin_shadow(&CHANNEL_STATISTICS).unwrap();
        build.append_channel_statistics(&[channel_row("c|channel-2|d|channel-3", 5)]).unwrap();
        let before = reader.channel_statistics_in_range(None, 0, 86_400).unwrap();
        assert_eq!(before[0].channel_id, "a|channel-0|b|channel-1");

        build.publish().unwrap();
        let after = reader.channel_statistics_in_range(None, 0, 86_400).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].channel_id, "c|channel-2|d|channel-3");
        assert_eq!(after[0].transfer_count, 5);
    }
}
