//! Read-side queries served to the API layer

use crate::aggregate::ChannelId;
use crate::denom::{build_denom_tree, DenomTreeNode};
use crate::error::{IndexerError, IndexerResult};
use crate::model::{ChannelStatistics, DenomAmount, PayerType, TransferRecord, TransferStatus};
use crate::store::{IndexStore, Partition, TransferFilter};
use serde::Serialize;

/// Chain selector meaning "no constraint"
pub const ANY_CHAIN: &str = "allchain";

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub chain_a: Option<String>,
    pub chain_b: Option<String>,
    pub denom: Option<String>,
    pub base_denom_chain: Option<String>,
    pub statuses: Vec<TransferStatus>,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

fn selector(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != ANY_CHAIN)
        .map(str::to_string)
}

fn is_wildcard(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim) == Some(ANY_CHAIN)
}

impl TransferQuery {
    /// `(source, dest, either)` constraints of the chain pair
    ///
    /// A lone chain matches either end. Paired with the wildcard it is pinned
    /// to its own side: `chain_a` to the source, `chain_b` to the destination.
    fn chain_constraints(&self) -> (Option<String>, Option<String>, Option<String>) {
        match (selector(&self.chain_a), selector(&self.chain_b)) {
            (Some(a), Some(b)) => (Some(a), Some(b), None),
            (Some(a), None) if is_wildcard(&self.chain_b) => (Some(a), None, None),
            (None, Some(b)) if is_wildcard(&self.chain_a) => (None, Some(b), None),
            (Some(c), None) | (None, Some(c)) => (None, None, Some(c)),
            (None, None) => (None, None, None),
        }
    }

    fn filter(&self) -> TransferFilter {
        let (source_chain, dest_chain, either_chain) = self.chain_constraints();
        TransferFilter {
            start_time: self.start_time,
            end_time: self.end_time,
            source_chain,
            dest_chain,
            either_chain,
            denom: selector(&self.denom),
            base_denom_chain: selector(&self.base_denom_chain),
            statuses: self.statuses.clone(),
        }
    }

    fn bounds(&self) -> (usize, usize) {
        let size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        let page = self.page.max(1);
        ((page - 1) * size, size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferPage {
    pub items: Vec<TransferRecord>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    pub partition: &'static str,
    pub record: TransferRecord,
}

#[derive(Clone)]
pub struct QueryService {
    store: IndexStore,
}

impl QueryService {
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    /// Transfers across both partitions, newest first
    pub fn list_transfers(&self, query: &TransferQuery) -> IndexerResult<TransferPage> {
        let filter = query.filter();
        let (offset, limit) = query.bounds();
        let partitions = Partition::all();
        let items = self.store.query_transfers(&partitions, &filter, offset, limit)?;
        let total = self.store.count_transfers(&partitions, &filter)?;
        Ok(TransferPage {
            items,
            total,
            page: query.page.max(1),
            page_size: limit,
        })
    }

    /// The transfer that has `hash` as one of its legs
    pub fn transfer_by_hash(&self, hash: &str) -> IndexerResult<Option<TransferDetail>> {
        Ok(self
            .store
            .find_by_tx_hash(hash.trim())?
            .map(|(partition, record)| TransferDetail {
                partition: partition.as_str(),
                record,
            }))
    }

    pub fn denom_tree(&self, base_denom: &str, base_denom_chain: &str) -> IndexerResult<DenomTreeNode> {
        let traces = self.store.denom_traces_for_base(base_denom, base_denom_chain)?;
        Ok(build_denom_tree(base_denom, base_denom_chain, &traces))
    }

    /// Channel rows in `[start, end]`; `channel` may name either direction
    pub fn channel_statistics(
        &self,
        channel: Option<&str>,
        start: i64,
        end: i64,
    ) -> IndexerResult<Vec<ChannelStatistics>> {
        let canonical = match channel {
            Some(raw) => Some(
                ChannelId::parse(raw)
                    .ok_or_else(|| IndexerError::InvalidQuery(format!("malformed channel id {}", raw)))?
                    .canonical()
                    .to_string(),
            ),
            None => None,
        };
        self.store
            .channel_statistics_in_range(canonical.as_deref(), start, end)
    }

    /// Fees paid on `chain` in `[start, end]`, per denom
    pub fn chain_fees(&self, chain: &str, start: i64, end: i64) -> IndexerResult<Vec<DenomAmount>> {
        self.store.chain_fee_totals(chain, start, end, None)
    }

    /// Fees relayers paid on `chain` in `[start, end]`, per denom
    pub fn relayer_fees(&self, chain: &str, start: i64, end: i64) -> IndexerResult<Vec<DenomAmount>> {
        self.store
            .chain_fee_totals(chain, start, end, Some(PayerType::Relayer))
    }
}
