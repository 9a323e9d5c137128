//! Chain document inspection.

use std::path::PathBuf;
use std::sync::Arc;

use arbor_chain::{
    BuiltinProvider, ChainNode, ChainProcessor, EngineConfig, GroupMode, MidSideMode, NodeKind,
    SidechainSource, serialize, tree_from_document,
};
use clap::Args;

#[derive(Args)]
pub struct InspectArgs {
    /// Chain document (JSON)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Also try to instantiate every plugin with the bundled provider
    #[arg(long)]
    check: bool,
}

pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("failed to read '{}': {e}", args.file.display()))?;
    let doc = serialize::from_json(&json)?;
    let root = tree_from_document(&doc)?;

    println!("{}", args.file.display());
    println!(
        "  version {}, {} plugin(s), {} slot(s)\n",
        doc.version,
        root.count_plugins(),
        doc.slots.len()
    );
    for line in describe(&root) {
        println!("  {line}");
    }

    if args.check {
        let (mut chain, _audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        match chain.import_json(&json) {
            Ok(()) => println!(
                "\nAll plugins available, latency {} samples",
                chain.host_latency_samples()
            ),
            Err(err) => println!("\nNot loadable: {err}"),
        }
    }
    Ok(())
}

/// One line per node, indented by depth.
fn describe(root: &ChainNode) -> Vec<String> {
    let mut lines = Vec::new();
    describe_into(root, 0, &mut lines);
    lines
}

fn describe_into(node: &ChainNode, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    let mut attrs = Vec::new();
    if node.branch_gain_db() != 0.0 {
        attrs.push(format!("branch {:+.1} dB", node.branch_gain_db()));
    }
    if node.is_solo() {
        attrs.push("solo".to_string());
    }
    if node.is_muted() {
        attrs.push("muted".to_string());
    }

    match &node.kind {
        NodeKind::Plugin(leaf) => {
            if leaf.is_bypassed() {
                attrs.push("bypassed".to_string());
            }
            if leaf.input_gain_db() != 0.0 || leaf.output_gain_db() != 0.0 {
                attrs.push(format!(
                    "trim {:+.1}/{:+.1} dB",
                    leaf.input_gain_db(),
                    leaf.output_gain_db()
                ));
            }
            if leaf.dry_wet() < 1.0 {
                attrs.push(format!("mix {:.0}%", leaf.dry_wet() * 100.0));
            }
            if leaf.mid_side() != MidSideMode::Off {
                attrs.push(format!("{:?}", leaf.mid_side()).to_lowercase());
            }
            if leaf.sidechain() == SidechainSource::LeafInput {
                attrs.push("sidechain".to_string());
            }
            if let Some(state) = leaf.pending_state() {
                attrs.push(format!("state {} B", state.len()));
            }
            lines.push(format!(
                "{indent}[{}] {} ({}/{}){}",
                node.id,
                node.name,
                leaf.identity.format,
                leaf.identity.uid,
                suffix(&attrs)
            ));
        }
        NodeKind::Group(group) => {
            let mode = match group.mode() {
                GroupMode::Serial => "serial",
                GroupMode::Parallel => "parallel",
            };
            if group.dry_wet() < 1.0 {
                attrs.push(format!("mix {:.0}%", group.dry_wet() * 100.0));
            }
            if group.duck_amount() > 0.0 {
                attrs.push(format!(
                    "duck {:.0}% / {:.0} ms",
                    group.duck_amount() * 100.0,
                    group.duck_release_ms()
                ));
            }
            lines.push(format!(
                "{indent}[{}] {} <{mode}>{}",
                node.id,
                node.name,
                suffix(&attrs)
            ));
            for child in &group.children {
                describe_into(child, depth + 1, lines);
            }
        }
    }
}

fn suffix(attrs: &[String]) -> String {
    if attrs.is_empty() {
        String::new()
    } else {
        format!("  {}", attrs.join(", "))
    }
}
