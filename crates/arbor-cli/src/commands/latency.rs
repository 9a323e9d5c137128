//! Latency report for a chain.

use std::sync::Arc;

use arbor_chain::{
    BuiltinProvider, ChainNode, ChainProcessor, EngineConfig, branch_compensation,
    compute_node_latency,
};
use arbor_core::OversamplingFactor;
use clap::Args;

use super::common::{ChainSource, load_chain};

#[derive(Args)]
pub struct LatencyArgs {
    #[command(flatten)]
    source: ChainSource,
}

pub fn run(args: LatencyArgs, config: EngineConfig) -> anyhow::Result<()> {
    let (mut chain, _audio) = ChainProcessor::new(Arc::new(BuiltinProvider::new()), &config);
    load_chain(&mut chain, &args.source)?;

    println!("Node latency (samples at the graph rate):\n");
    for line in report(chain.root()) {
        println!("  {line}");
    }

    let chain_latency = chain.total_latency_samples();
    println!("\nChain latency: {chain_latency} samples");
    println!("Host latency by oversampling factor:");
    for factor in [OversamplingFactor::Off, OversamplingFactor::X2, OversamplingFactor::X4] {
        println!(
            "  {}x  {:>6} samples  (filter {})",
            factor.factor(),
            factor.host_latency(chain_latency),
            factor.filter_latency()
        );
    }
    Ok(())
}

/// One line per node: latency, and compensation for parallel branches.
fn report(root: &ChainNode) -> Vec<String> {
    let mut lines = Vec::new();
    report_into(root, 0, None, &mut lines);
    lines
}

fn report_into(node: &ChainNode, depth: usize, compensation: Option<usize>, lines: &mut Vec<String>) {
    let mut line = format!(
        "{}{:<24} {:>6}",
        "  ".repeat(depth),
        node.name,
        compute_node_latency(node)
    );
    if let Some(comp) = compensation.filter(|&c| c > 0) {
        line.push_str(&format!("  (+{comp} compensation)"));
    }
    lines.push(line);

    if let Some(group) = node.as_group() {
        let comps = branch_compensation(node);
        for (i, child) in group.children.iter().enumerate() {
            report_into(child, depth + 1, comps.get(i).copied(), lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_chain::ChainNodeId;

    use crate::chain_spec::{build_chain, parse_chain};

    #[test]
    fn report_shows_compensation() {
        let (mut chain, _audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        let items = parse_chain("par(gain | delay:samples=32)").unwrap();
        build_chain(&mut chain, ChainNodeId::ROOT, &items).unwrap();

        let lines = report(chain.root());
        assert_eq!(lines.len(), 4);
        assert!(lines[0].trim_end().ends_with("32"), "got: {}", lines[0]);
        assert!(lines[2].contains("(+32 compensation)"), "got: {}", lines[2]);
        assert!(!lines[3].contains("compensation"), "got: {}", lines[3]);
    }
}
