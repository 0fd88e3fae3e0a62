//! Domain types shared by the stores and the reconciliation tasks

pub mod chain_tx;
pub mod statistics;
pub mod transfer;

pub use chain_tx::{AckOutcome, ChainTx, Coin, MsgType, Packet, TxMsg};
pub use statistics::{ChainFeeStatistics, ChannelStatistics, DenomAmount, LegTxStatus, PayerType};
pub use transfer::{TransferRecord, TransferStatus, TxInfo};
