//! Transfer lifecycle
//!
//! Transitions:
//! - `Setting -> Processing` once the route's destination chain is known
//! - `Processing -> Success | Refunded` when the acknowledgement round trip is complete
//! - `Processing -> Failed` when the retry budget runs out
//! - `Failed -> Success | Refunded | Processing` by the fail fixer
//!
//! `Success` and `Refunded` are terminal: applying anything to a terminal
//! record leaves it unchanged.

use crate::config::IndexerConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::model::{AckOutcome, TransferRecord, TransferStatus, TxInfo};
use crate::registry::ChannelEnd;

/// Exponential retry schedule for records without a terminal outcome
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    initial_delay: u64,
    max_delay: u64,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(initial_delay: u64, max_delay: u64, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_retries,
        }
    }

    pub fn from_config(config: &IndexerConfig) -> Self {
        Self::new(
            config.retry_initial_secs,
            config.retry_max_secs,
            config.fail_after_retries,
        )
    }

    /// Delay in seconds before attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay)
    }

    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

/// What one correlation attempt found out about a Processing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// Nothing conclusive on the destination chain yet
    InFlight,
    /// Received and acknowledged on the destination chain, source-side ack not seen yet
    AwaitingAck { recv: TxInfo, ack: AckOutcome },
    /// Full round trip
    Settled {
        recv: TxInfo,
        ack: AckOutcome,
        ack_tx: TxInfo,
    },
    /// Never received; the source chain timed the packet out
    TimedOut { timeout_tx: TxInfo },
}

/// What the fail fixer concluded for a Failed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Settled {
        recv: TxInfo,
        ack: AckOutcome,
        ack_tx: TxInfo,
    },
    /// Received but not (yet) acknowledged: hand back to the correlator
    Demote,
    /// No receive anywhere
    LeaveFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TransferStatus,
    pub to: TransferStatus,
}

impl Transition {
    pub fn changed_status(&self) -> bool {
        self.from != self.to
    }
}

pub fn is_allowed(from: TransferStatus, to: TransferStatus) -> bool {
    use TransferStatus::*;
    matches!(
        (from, to),
        (Setting, Processing)
            | (Processing, Processing)
            | (Processing, Success)
            | (Processing, Refunded)
            | (Processing, Failed)
            | (Failed, Success)
            | (Failed, Refunded)
            | (Failed, Processing)
    )
}

fn move_to(record: &mut TransferRecord, to: TransferStatus, now: i64) -> IndexerResult<Transition> {
    let from = record.status;
    if !is_allowed(from, to) {
        return Err(IndexerError::IllegalTransition {
            record_id: record.record_id.clone(),
            from,
            to,
        });
    }
    record.status = to;
    record.updated_at = now;
    Ok(Transition { from, to })
}

fn unchanged(record: &TransferRecord) -> Transition {
    Transition {
        from: record.status,
        to: record.status,
    }
}

fn settle(
    record: &mut TransferRecord,
    recv: TxInfo,
    ack: &AckOutcome,
    ack_tx: TxInfo,
    now: i64,
) -> IndexerResult<Transition> {
    if ack.is_success() {
        let t = move_to(record, TransferStatus::Success, now)?;
        record.dest_tx_info = Some(recv);
        record.refund_tx_info = None;
        Ok(t)
    } else {
        let t = move_to(record, TransferStatus::Refunded, now)?;
        record.dest_tx_info = None;
        record.refund_tx_info = Some(ack_tx);
        Ok(t)
    }
}

/// Count one inconclusive attempt; gives up with Failed once the budget is spent
fn schedule_retry(record: &mut TransferRecord, policy: &RetryPolicy, now: i64) -> IndexerResult<Transition> {
    let delay = policy.delay_for(record.retry_count);
    record.retry_count = record.retry_count.saturating_add(1);
    record.next_retry_time = now + delay as i64;

    if policy.exhausted(record.retry_count) {
        log::warn!(
            "⌛ {} gave up after {} retries",
            record.record_id,
            record.retry_count
        );
        move_to(record, TransferStatus::Failed, now)
    } else {
        move_to(record, TransferStatus::Processing, now)
    }
}

/// Promote a Setting record whose destination became known
pub fn resolve_route(
    record: &mut TransferRecord,
    dest: &ChannelEnd,
    dest_denom: String,
    now: i64,
) -> IndexerResult<Transition> {
    if record.status != TransferStatus::Setting {
        return Ok(unchanged(record));
    }
    let t = move_to(record, TransferStatus::Processing, now)?;
    record.dest_chain = dest.chain.clone();
    record.dest_port = dest.port.clone();
    record.dest_channel = dest.channel.clone();
    record.dest_denom = dest_denom;
    record.next_retry_time = now;
    Ok(t)
}

/// Apply a correlation result to a Processing record
pub fn apply_correlation(
    record: &mut TransferRecord,
    outcome: Correlation,
    policy: &RetryPolicy,
    now: i64,
) -> IndexerResult<Transition> {
    if record.status != TransferStatus::Processing {
        return Ok(unchanged(record));
    }

    match outcome {
        Correlation::InFlight => schedule_retry(record, policy, now),
        Correlation::AwaitingAck { recv, .. } => {
            record.dest_tx_info = Some(recv);
            schedule_retry(record, policy, now)
        }
        Correlation::Settled { recv, ack, ack_tx } => settle(record, recv, &ack, ack_tx, now),
        Correlation::TimedOut { timeout_tx } => {
            let t = move_to(record, TransferStatus::Refunded, now)?;
            record.dest_tx_info = None;
            record.refund_tx_info = Some(timeout_tx);
            Ok(t)
        }
    }
}

/// Apply a fail-fixer conclusion to a Failed record
pub fn apply_fix(record: &mut TransferRecord, outcome: FixOutcome, now: i64) -> IndexerResult<Transition> {
    if record.status != TransferStatus::Failed {
        return Ok(unchanged(record));
    }

    match outcome {
        FixOutcome::Settled { recv, ack, ack_tx } => settle(record, recv, &ack, ack_tx, now),
        FixOutcome::Demote => {
            let t = move_to(record, TransferStatus::Processing, now)?;
            record.dest_tx_info = None;
            record.refund_tx_info = None;
            record.retry_count = 0;
            record.next_retry_time = now;
            Ok(t)
        }
        FixOutcome::LeaveFailed => Ok(unchanged(record)),
    }
}
