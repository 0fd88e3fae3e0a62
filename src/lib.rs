//! ibcflow - IBC transfer reconciliation
//!
//! Rebuilds cross-chain ICS-20 transfers from the per-chain transactions that
//! make them up (send, receive, acknowledge or timeout), tracks each transfer
//! through its lifecycle, and keeps denom provenance and channel / fee
//! statistics current.

pub mod aggregate;
pub mod config;
pub mod correlator;
pub mod denom;
pub mod error;
pub mod fixer;
pub mod migrator;
pub mod model;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod segment;
pub mod source_sync;
pub mod sqlite_pragma;
pub mod state_machine;
pub mod store;
pub mod tx_store;

pub use config::IndexerConfig;
pub use error::{ErrorKind, IndexerError, IndexerResult};
pub use store::{IndexStore, Partition};
