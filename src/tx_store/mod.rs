//! Read access to raw per-chain transactions
//!
//! Raw ingestion from chain nodes happens elsewhere; the reconciliation tasks
//! only query what has already been stored. Every implementation is wrapped in
//! `TimedTxStore` at runtime so a stuck backend surfaces as a transient error
//! instead of stalling a task.

mod memory;
mod sqlite;

pub use memory::MemoryTxStore;
pub use sqlite::SqliteTxStore;

use crate::error::{IndexerError, IndexerResult};
use crate::model::{ChainTx, MsgType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait TxStore: Send + Sync {
    /// Transactions on `chain` carrying a `msg_type` message for `packet_id`, newest first
    async fn txs_by_packet(
        &self,
        chain: &str,
        msg_type: MsgType,
        packet_id: &str,
    ) -> IndexerResult<Vec<ChainTx>>;

    /// Single transaction with its full event log
    async fn tx_by_hash(&self, chain: &str, hash: &str) -> IndexerResult<Option<ChainTx>>;

    /// Transactions carrying a `msg_type` message strictly past `after`,
    /// ordered by height then hash
    async fn txs_by_type_after(
        &self,
        chain: &str,
        msg_type: MsgType,
        after: &TxPosition,
        limit: usize,
    ) -> IndexerResult<Vec<ChainTx>>;
}

/// A point in a chain's transaction order: height first, hash breaks ties
///
/// The default position sorts before every stored transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxPosition {
    pub height: i64,
    pub tx_hash: String,
}

impl TxPosition {
    pub fn of(tx: &ChainTx) -> Self {
        Self {
            height: tx.height,
            tx_hash: tx.tx_hash.clone(),
        }
    }

    pub fn precedes(&self, tx: &ChainTx) -> bool {
        (self.height, self.tx_hash.as_str()) < (tx.height, tx.tx_hash.as_str())
    }
}

/// Bounds every call of the inner store by `timeout`
pub struct TimedTxStore {
    inner: Arc<dyn TxStore>,
    timeout: Duration,
}

impl TimedTxStore {
    pub fn new(inner: Arc<dyn TxStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, chain: &str, fut: F) -> IndexerResult<T>
    where
        T: Send,
        F: std::future::Future<Output = IndexerResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(IndexerError::Timeout {
                chain: chain.to_string(),
                elapsed: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl TxStore for TimedTxStore {
    async fn txs_by_packet(
        &self,
        chain: &str,
        msg_type: MsgType,
        packet_id: &str,
    ) -> IndexerResult<Vec<ChainTx>> {
        self.bounded(chain, self.inner.txs_by_packet(chain, msg_type, packet_id))
            .await
    }

    async fn tx_by_hash(&self, chain: &str, hash: &str) -> IndexerResult<Option<ChainTx>> {
        self.bounded(chain, self.inner.tx_by_hash(chain, hash)).await
    }

    async fn txs_by_type_after(
        &self,
        chain: &str,
        msg_type: MsgType,
        after: &TxPosition,
        limit: usize,
    ) -> IndexerResult<Vec<ChainTx>> {
        self.bounded(chain, self.inner.txs_by_type_after(chain, msg_type, after, limit))
            .await
    }
}
