//! In-memory transaction store used by tests and local replays

use super::{TxPosition, TxStore};
use crate::error::{IndexerError, IndexerResult};
use crate::model::{ChainTx, MsgType};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryTxStore {
    txs: RwLock<HashMap<String, Vec<ChainTx>>>,
    unavailable: RwLock<HashSet<String>>,
    delay: RwLock<Option<Duration>>,
}

impl MemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: ChainTx) {
        let mut txs = self.txs.write().unwrap_or_else(|e| e.into_inner());
        let chain = txs.entry(tx.chain_id.clone()).or_default();
        chain.retain(|t| t.tx_hash != tx.tx_hash);
        chain.push(tx);
    }

    /// Every query against `chain` fails until re-enabled
    pub fn set_unavailable(&self, chain: &str, unavailable: bool) {
        let mut set = self.unavailable.write().unwrap_or_else(|e| e.into_inner());
        if unavailable {
            set.insert(chain.to_string());
        } else {
            set.remove(chain);
        }
    }

    /// Delay every query, for exercising timeouts
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    async fn gate(&self, chain: &str) -> IndexerResult<()> {
        let delay = *self.delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let down = self
            .unavailable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(chain);
        if down {
            return Err(IndexerError::TxStore {
                chain: chain.to_string(),
                message: "store unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn select<F>(&self, chain: &str, pred: F) -> Vec<ChainTx>
    where
        F: Fn(&ChainTx) -> bool,
    {
        self.txs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(chain)
            .map(|txs| txs.iter().filter(|t| pred(t)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TxStore for MemoryTxStore {
    async fn txs_by_packet(
        &self,
        chain: &str,
        msg_type: MsgType,
        packet_id: &str,
    ) -> IndexerResult<Vec<ChainTx>> {
        self.gate(chain).await?;
        let mut found = self.select(chain, |t| t.msgs_for_packet(msg_type, packet_id).next().is_some());
        found.sort_by(|a, b| b.height.cmp(&a.height));
        Ok(found)
    }

    async fn tx_by_hash(&self, chain: &str, hash: &str) -> IndexerResult<Option<ChainTx>> {
        self.gate(chain).await?;
        Ok(self.select(chain, |t| t.tx_hash == hash).into_iter().next())
    }

    async fn txs_by_type_after(
        &self,
        chain: &str,
        msg_type: MsgType,
        after: &TxPosition,
        limit: usize,
    ) -> IndexerResult<Vec<ChainTx>> {
        self.gate(chain).await?;
        let mut found = self.select(chain, |t| {
            after.precedes(t) && t.msgs.iter().any(|m| m.msg_type() == Some(msg_type))
        });
        found.sort_by(|a, b| (a.height, &a.tx_hash).cmp(&(b.height, &b.tx_hash)));
        found.truncate(limit);
        Ok(found)
    }
}
