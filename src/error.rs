//! Crate-wide error type
//!
//! Errors are classified into three kinds that decide what a periodic task
//! does with them:
//! - `Transient`: store or network trouble, the record is left untouched and
//!   picked up again on the next cycle
//! - `DataInconsistency`: the record is skipped and logged, the batch continues
//! - `Systemic`: configuration or schema failure, the task aborts
//!
//! Data that has simply not arrived yet is never an error.

use crate::model::transfer::TransferStatus;
use std::time::Duration;
use thiserror::Error;

pub type IndexerResult<T> = Result<T, IndexerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    DataInconsistency,
    Systemic,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction store error on chain {chain}: {message}")]
    TxStore { chain: String, message: String },

    #[error("transaction store query on chain {chain} timed out after {elapsed:?}")]
    Timeout { chain: String, elapsed: Duration },

    #[error("inconsistent record {record_id}: {reason}")]
    DataInconsistency { record_id: String, reason: String },

    #[error("illegal status transition for {record_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        record_id: String,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexerError::TxStore { .. } | IndexerError::Timeout { .. } => ErrorKind::Transient,
            // A busy or locked database clears up on its own.
            IndexerError::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                ErrorKind::Transient
            }
            IndexerError::Database(_) => ErrorKind::Systemic,
            IndexerError::Serialization(_)
            | IndexerError::DataInconsistency { .. }
            | IndexerError::IllegalTransition { .. }
            | IndexerError::InvalidQuery(_) => ErrorKind::DataInconsistency,
            IndexerError::Config(_) | IndexerError::Io(_) | IndexerError::Join(_) => {
                ErrorKind::Systemic
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn inconsistent(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        IndexerError::DataInconsistency {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }
}
