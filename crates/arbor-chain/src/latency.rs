//! Bottom-up latency accounting for the chain tree.
//!
//! | Node | Latency |
//! |------|---------|
//! | Ready plugin leaf | latency recorded at the last rebuild |
//! | Unavailable leaf | 0 |
//! | Serial group | sum of children |
//! | Parallel group | max of children |
//!
//! Inside a parallel group every branch is delayed by
//! `max_latency - own_latency`, so all branches reach the sum at the same
//! time. Utility nodes inserted by the wiring (gains, meters, mid/side,
//! dry/wet, ducking) add no latency, so these figures match what the
//! compiled graph reports.

use crate::tree::{ChainNode, GroupMode, NodeKind};

/// Latency of a subtree in samples.
pub fn compute_node_latency(node: &ChainNode) -> usize {
    match &node.kind {
        NodeKind::Plugin(leaf) => {
            if leaf.is_ready() {
                leaf.recorded_latency()
            } else {
                0
            }
        }
        NodeKind::Group(group) => {
            let children = group.children.iter().map(compute_node_latency);
            match group.mode {
                GroupMode::Serial => children.sum(),
                GroupMode::Parallel => children.max().unwrap_or(0),
            }
        }
    }
}

/// Compensation delay per child of a group.
///
/// Only parallel groups compensate; serial groups and leaves yield zeros.
pub fn branch_compensation(node: &ChainNode) -> Vec<usize> {
    let Some(group) = node.as_group() else {
        return Vec::new();
    };
    let latencies: Vec<usize> = group.children.iter().map(compute_node_latency).collect();
    if group.mode == GroupMode::Serial {
        return vec![0; latencies.len()];
    }
    let max = latencies.iter().copied().max().unwrap_or(0);
    latencies.iter().map(|&lat| max - lat).collect()
}
