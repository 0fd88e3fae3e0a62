//! Reconstructed cross-chain transfer records

use super::chain_tx::{ChainTx, Coin, Fee, TxMsg};
use crate::error::{IndexerError, IndexerResult};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a transfer
///
/// Stored as an integer; the numbering is part of the persisted format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Source send observed, destination chain of the route still unknown
    Setting,
    Processing,
    Success,
    Refunded,
    Failed,
}

impl TransferStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            TransferStatus::Success => 1,
            TransferStatus::Failed => 2,
            TransferStatus::Processing => 3,
            TransferStatus::Refunded => 4,
            TransferStatus::Setting => 5,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(TransferStatus::Success),
            2 => Some(TransferStatus::Failed),
            3 => Some(TransferStatus::Processing),
            4 => Some(TransferStatus::Refunded),
            5 => Some(TransferStatus::Setting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Setting => "setting",
            TransferStatus::Processing => "processing",
            TransferStatus::Success => "success",
            TransferStatus::Refunded => "refunded",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Success | TransferStatus::Refunded)
    }

    /// Statuses that count towards statistics and default queries
    pub fn countable() -> [TransferStatus; 4] {
        [
            TransferStatus::Success,
            TransferStatus::Failed,
            TransferStatus::Processing,
            TransferStatus::Refunded,
        ]
    }
}

/// One on-chain leg of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub hash: String,
    pub height: i64,
    pub time: i64,
    pub code: u32,
    pub fee: Fee,
    pub memo: String,
    pub signers: Vec<String>,
    pub msg_index: usize,
    /// The message of the leg itself
    pub msg: Option<TxMsg>,
}

impl TxInfo {
    pub fn from_tx(tx: &ChainTx, msg_index: usize) -> Self {
        Self {
            hash: tx.tx_hash.clone(),
            height: tx.height,
            time: tx.time,
            code: tx.code,
            fee: tx.fee.clone(),
            memo: tx.memo.clone(),
            signers: tx.signers.clone(),
            msg_index,
            msg: tx.msgs.get(msg_index).cloned(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub record_id: String,
    pub packet_id: String,
    pub sequence: u64,

    pub source_chain: String,
    pub source_port: String,
    pub source_channel: String,
    /// Empty while the route is unresolved
    pub dest_chain: String,
    pub dest_port: String,
    pub dest_channel: String,

    pub sender: String,
    pub receiver: String,
    pub source_denom: String,
    pub dest_denom: String,
    pub base_denom: String,
    pub base_denom_chain: String,
    /// Trace path on the source chain (empty for native tokens)
    pub denom_path: String,
    pub amount: String,

    pub status: TransferStatus,
    pub source_tx_info: TxInfo,
    pub dest_tx_info: Option<TxInfo>,
    pub refund_tx_info: Option<TxInfo>,

    pub retry_count: u32,
    pub next_retry_time: i64,

    pub tx_time: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferRecord {
    pub fn record_id_for(source_chain: &str, packet_id: &str) -> String {
        format!("{}:{}", source_chain, packet_id)
    }

    pub fn token(&self) -> Coin {
        Coin::new(self.source_denom.clone(), self.amount.clone())
    }

    pub fn amount_u128(&self) -> u128 {
        self.amount.trim().parse().unwrap_or(0)
    }

    /// Legs currently bound to the record, in source / dest / refund order
    pub fn legs(&self) -> impl Iterator<Item = &TxInfo> {
        std::iter::once(&self.source_tx_info)
            .chain(self.dest_tx_info.iter())
            .chain(self.refund_tx_info.iter())
    }

    /// Terminal records carry exactly one of the destination and refund legs
    pub fn check_invariants(&self) -> IndexerResult<()> {
        if self.dest_tx_info.is_some() && self.refund_tx_info.is_some() {
            return Err(IndexerError::inconsistent(
                &self.record_id,
                "destination and refund legs both set",
            ));
        }
        if self.status.is_terminal() {
            let expected_refund = self.status == TransferStatus::Refunded;
            let ok = match expected_refund {
                true => self.refund_tx_info.is_some(),
                false => self.dest_tx_info.is_some(),
            };
            if !ok {
                return Err(IndexerError::inconsistent(
                    &self.record_id,
                    format!("{} without its terminal leg", self.status.as_str()),
                ));
            }
        }
        Ok(())
    }
}
