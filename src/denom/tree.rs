//! Provenance tree of one base asset across chains

use super::DenomTrace;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenomTreeNode {
    pub chain: String,
    pub denom: String,
    pub denom_path: String,
    pub hop_count: u32,
    pub children: Vec<DenomTreeNode>,
}

impl DenomTreeNode {
    /// Number of nodes in this subtree, root included
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(DenomTreeNode::size).sum::<usize>()
    }
}

/// Tree rooted at (`base_chain`, `base_denom`) over a flat set of resolved denoms
///
/// Children of a node at depth h are the traces with h + 1 hops whose
/// predecessor is that node. Hop counts strictly increase along every edge,
/// so the recursion is bounded by the largest hop count in `traces`.
pub fn build_denom_tree(base_denom: &str, base_chain: &str, traces: &[DenomTrace]) -> DenomTreeNode {
    let related: Vec<&DenomTrace> = traces
        .iter()
        .filter(|t| t.base_denom == base_denom && t.base_denom_chain == base_chain)
        .collect();

    let mut root = DenomTreeNode {
        chain: base_chain.to_string(),
        denom: base_denom.to_string(),
        denom_path: base_denom.to_string(),
        hop_count: 0,
        children: Vec::new(),
    };
    attach_children(&mut root, &related);
    root
}

fn attach_children(parent: &mut DenomTreeNode, traces: &[&DenomTrace]) {
    let mut children: Vec<DenomTreeNode> = traces
        .iter()
        .filter(|t| {
            t.hop_count == parent.hop_count + 1
                && t.prev_chain == parent.chain
                && t.prev_denom == parent.denom
        })
        .map(|t| DenomTreeNode {
            chain: t.chain.clone(),
            denom: t.denom.clone(),
            denom_path: t.denom_path.clone(),
            hop_count: t.hop_count,
            children: Vec::new(),
        })
        .collect();
    children.sort_by(|a, b| a.chain.cmp(&b.chain).then_with(|| a.denom.cmp(&b.denom)));

    for child in children.iter_mut() {
        attach_children(child, traces);
    }
    parent.children = children;
}
