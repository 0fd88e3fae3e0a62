//! Denomination provenance
//!
//! An ICS-20 voucher is named on each chain by its trace path
//! `port/channel/.../base`: every `port/channel` pair is one hop, the leftmost
//! being the channel through which the token arrived on the current chain.
//! Resolution strips one hop at a time and follows the channel to the chain it
//! came from until only the base denomination is left.

mod tree;

pub use tree::{build_denom_tree, DenomTreeNode};

use crate::registry::ChainRegistry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One resolved (chain, denom) pair and its immediate predecessor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomTrace {
    pub chain: String,
    /// Denom as seen on `chain`: `ibc/<hash>` for vouchers, the base denom otherwise
    pub denom: String,
    /// Full trace path on `chain`
    pub denom_path: String,
    pub base_denom: String,
    pub base_denom_chain: String,
    /// Empty for the native asset
    pub prev_chain: String,
    pub prev_denom: String,
    pub hop_count: u32,
    /// False when a channel on the way could not be resolved
    pub complete: bool,
}

/// Outcome of resolving one trace path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDenom {
    pub base_denom: String,
    pub base_denom_chain: String,
    pub hop_count: u32,
    pub complete: bool,
    /// Every hop visited, starting at the queried chain
    pub traces: Vec<DenomTrace>,
}

/// Split a trace path into its hops and the base denomination
///
/// A hop is a `port/channel-N` pair; base denominations may themselves
/// contain slashes (`gamm/pool/1`).
pub fn split_path(path: &str) -> (Vec<(&str, &str)>, &str) {
    let mut hops = Vec::new();
    let mut rest = path;
    loop {
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(port), Some(channel), Some(tail))
                if !port.is_empty() && channel.starts_with("channel-") && !tail.is_empty() =>
            {
                hops.push((port, channel));
                rest = tail;
            }
            _ => return (hops, rest),
        }
    }
}

/// On-chain denom of a trace path: `ibc/` + upper-case SHA-256 for vouchers
pub fn ibc_denom(path: &str) -> String {
    let (hops, base) = split_path(path);
    if hops.is_empty() {
        return base.to_string();
    }
    format!("ibc/{}", hex::encode_upper(Sha256::digest(path.as_bytes())))
}

/// Trace path on the receiving chain of a token sent with path `path`
///
/// A token leaving through the channel it arrived on is unwound; any other
/// token gains the destination channel as new leftmost hop.
pub fn next_denom_path(
    source_port: &str,
    source_channel: &str,
    dest_port: &str,
    dest_channel: &str,
    path: &str,
) -> String {
    let prefix = format!("{}/{}/", source_port, source_channel);
    match path.strip_prefix(&prefix) {
        Some(unwound) => unwound.to_string(),
        None => format!("{}/{}/{}", dest_port, dest_channel, path),
    }
}

pub struct DenomResolver<'a> {
    registry: &'a ChainRegistry,
}

impl<'a> DenomResolver<'a> {
    pub fn new(registry: &'a ChainRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `path` as observed on `chain`
    ///
    /// Each step consumes one hop of the path, so resolution ends after at
    /// most `hop_count` lookups whatever the registry contains. An unknown
    /// channel stops the walk: the voucher held on the last chain reached is
    /// the most specific origin known, so it becomes the base, flagged
    /// incomplete. Its `ibc/` prefix tells readers the walk stopped early.
    pub fn resolve(&self, chain: &str, path: &str) -> ResolvedDenom {
        let (hops, base) = split_path(path);
        let total = hops.len() as u32;
        let mut traces = Vec::with_capacity(hops.len() + 1);
        let mut current_chain = chain.to_string();
        let mut remaining = path;

        for (idx, (port, channel)) in hops.iter().enumerate() {
            let hop_count = total - idx as u32;
            let Some(end) = self.registry.counterparty(&current_chain, port, channel) else {
                log::debug!(
                    "🔍 Unknown channel {}/{} on {} while resolving {}",
                    port,
                    channel,
                    current_chain,
                    path
                );
                let voucher = ibc_denom(remaining);
                traces.push(DenomTrace {
                    chain: current_chain.clone(),
                    denom: voucher.clone(),
                    denom_path: remaining.to_string(),
                    base_denom: voucher.clone(),
                    base_denom_chain: current_chain.clone(),
                    prev_chain: String::new(),
                    prev_denom: String::new(),
                    hop_count,
                    complete: false,
                });
                return Self::finish(&voucher, current_chain, total, false, traces);
            };

            let prev_path = &remaining[port.len() + channel.len() + 2..];
            traces.push(DenomTrace {
                chain: current_chain.clone(),
                denom: ibc_denom(remaining),
                denom_path: remaining.to_string(),
                base_denom: base.to_string(),
                base_denom_chain: String::new(),
                prev_chain: end.chain.clone(),
                prev_denom: ibc_denom(prev_path),
                hop_count,
                complete: true,
            });
            current_chain = end.chain.clone();
            remaining = prev_path;
        }

        traces.push(DenomTrace {
            chain: current_chain.clone(),
            denom: base.to_string(),
            denom_path: base.to_string(),
            base_denom: base.to_string(),
            base_denom_chain: current_chain.clone(),
            prev_chain: String::new(),
            prev_denom: String::new(),
            hop_count: 0,
            complete: true,
        });
        Self::finish(base, current_chain, total, true, traces)
    }

    fn finish(
        base: &str,
        base_chain: String,
        hop_count: u32,
        complete: bool,
        mut traces: Vec<DenomTrace>,
    ) -> ResolvedDenom {
        for t in traces.iter_mut() {
            t.base_denom = base.to_string();
            t.base_denom_chain = base_chain.clone();
            t.complete = complete;
        }
        ResolvedDenom {
            base_denom: base.to_string(),
            base_denom_chain: base_chain,
            hop_count,
            complete,
            traces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChainRegistry {
        ChainRegistry::from_json(
            r#"[
            {"chain": "juno-1", "channels": [
                {"channel_id": "channel-1", "counterparty_chain": "osmosis-1", "counterparty_channel": "channel-42"}
            ]},
            {"chain": "osmosis-1", "channels": [
                {"channel_id": "channel-0", "counterparty_chain": "cosmoshub-4", "counterparty_channel": "channel-141"},
                {"channel_id": "channel-42", "counterparty_chain": "juno-1", "counterparty_channel": "channel-1"}
            ]},
            {"chain": "cosmoshub-4", "channels": [
                {"channel_id": "channel-141", "counterparty_chain": "osmosis-1", "counterparty_channel": "channel-0"}
            ]}
        ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_two_hop_path_resolves_to_native_chain() {
        let registry = registry();
        let resolved = DenomResolver::new(&registry)
            .resolve("juno-1", "transfer/channel-1/transfer/channel-0/uatom");

        assert_eq!(resolved.base_denom, "uatom");
        assert_eq!(resolved.base_denom_chain, "cosmoshub-4");
        assert_eq!(resolved.hop_count, 2);
        assert!(resolved.complete);

        let chains: Vec<_> = resolved.traces.iter().map(|t| t.chain.as_str()).collect();
        assert_eq!(chains, vec!["juno-1", "osmosis-1", "cosmoshub-4"]);
        assert_eq!(resolved.traces[0].prev_denom, resolved.traces[1].denom);
        assert_eq!(resolved.traces[1].prev_denom, "uatom");
    }

    #[test]
    fn test_native_denom_has_zero_hops() {
        let registry = registry();
        let resolved = DenomResolver::new(&registry).resolve("osmosis-1", "uosmo");
        assert_eq!(resolved.hop_count, 0);
        assert_eq!(resolved.base_denom_chain, "osmosis-1");
        assert_eq!(resolved.traces.len(), 1);
    }

    #[test]
    fn test_unknown_channel_returns_partial_result() {
        let registry = registry();
        let resolved = DenomResolver::new(&registry)
            .resolve("juno-1", "transfer/channel-1/transfer/channel-99/uatom");

        assert!(!resolved.complete);
        assert_eq!(resolved.base_denom, ibc_denom("transfer/channel-99/uatom"));
        assert_eq!(resolved.base_denom_chain, "osmosis-1");
        assert_eq!(resolved.hop_count, 2);
        assert!(resolved.traces.iter().all(|t| t.base_denom == resolved.base_denom));
    }

    #[test]
    fn test_partial_result_completes_once_channel_is_known() {
        let partial = DenomResolver::new(&registry()).resolve("osmosis-1", "transfer/channel-5/ujuno");
        assert!(!partial.complete);
        assert!(partial.base_denom.starts_with("ibc/"));
        assert_eq!(partial.base_denom_chain, "osmosis-1");

        let learned = ChainRegistry::from_json(
            r#"[
            {"chain": "osmosis-1", "channels": [
                {"channel_id": "channel-5", "counterparty_chain": "juno-1", "counterparty_channel": "channel-0"}
            ]}
        ]"#,
        )
        .unwrap();
        let full = DenomResolver::new(&learned).resolve("osmosis-1", "transfer/channel-5/ujuno");
        assert!(full.complete);
        assert_eq!(full.base_denom, "ujuno");
        assert_eq!(full.base_denom_chain, "juno-1");
    }

    #[test]
    fn test_cyclic_registry_terminates() {
        let cyclic = ChainRegistry::from_json(
            r#"[
            {"chain": "a", "channels": [{"channel_id": "channel-0", "counterparty_chain": "b", "counterparty_channel": "channel-0"}]},
            {"chain": "b", "channels": [{"channel_id": "channel-0", "counterparty_chain": "a", "counterparty_channel": "channel-0"}]}
        ]"#,
        )
        .unwrap();
        let path = "transfer/channel-0/".repeat(50) + "token";

        let resolved = DenomResolver::new(&cyclic).resolve("a", &path);

        assert_eq!(resolved.hop_count, 50);
        assert_eq!(resolved.traces.len(), 51);
        assert_eq!(resolved.base_denom, "token");
    }

    #[test]
    fn test_split_path_keeps_slashed_base() {
        let (hops, base) = split_path("transfer/channel-3/gamm/pool/1");
        assert_eq!(hops, vec![("transfer", "channel-3")]);
        assert_eq!(base, "gamm/pool/1");
    }

    #[test]
    fn test_ibc_denom_hash() {
        assert_eq!(
            ibc_denom("transfer/channel-0/uatom"),
            "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
        );
        assert_eq!(ibc_denom("uatom"), "uatom");
    }

    #[test]
    fn test_next_path_prepends_or_unwinds() {
        assert_eq!(
            next_denom_path("transfer", "channel-141", "transfer", "channel-0", "uatom"),
            "transfer/channel-0/uatom"
        );
        assert_eq!(
            next_denom_path("transfer", "channel-0", "transfer", "channel-141", "transfer/channel-0/uatom"),
            "uatom"
        );
    }
}
