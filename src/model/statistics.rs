//! Rows of the published aggregate tables

use serde::{Deserialize, Serialize};

/// Who paid a leg's fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayerType {
    /// Sender of the source-chain transfer
    User,
    /// Relayer submitting receive, acknowledge or timeout
    Relayer,
}

impl PayerType {
    pub fn as_i64(&self) -> i64 {
        match self {
            PayerType::User => 1,
            PayerType::Relayer => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(PayerType::User),
            2 => Some(PayerType::Relayer),
            _ => None,
        }
    }
}

/// On-chain result of the leg the fee was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LegTxStatus {
    Success,
    Failed,
}

impl LegTxStatus {
    pub fn from_code(code: u32) -> Self {
        if code == 0 {
            LegTxStatus::Success
        } else {
            LegTxStatus::Failed
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            LegTxStatus::Success => 1,
            LegTxStatus::Failed => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(LegTxStatus::Success),
            2 => Some(LegTxStatus::Failed),
            _ => None,
        }
    }
}

/// Transfers through one channel (either direction) for one base asset and segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    /// Canonical channel id, see `aggregate::channel::ChannelId`
    pub channel_id: String,
    pub base_denom: String,
    pub base_denom_chain: String,
    pub segment_start_time: i64,
    pub segment_end_time: i64,
    pub transfer_count: u64,
    /// Sum of transferred amounts, decimal string
    pub transfer_amount: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fees paid on one chain for one (status, payer, denom) combination and segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFeeStatistics {
    pub chain: String,
    pub tx_status: LegTxStatus,
    pub payer_type: PayerType,
    pub fee_denom: String,
    pub fee_amount: String,
    pub segment_start_time: i64,
    pub segment_end_time: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Summed fee for one denom over a time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomAmount {
    pub denom: String,
    pub amount: String,
}
