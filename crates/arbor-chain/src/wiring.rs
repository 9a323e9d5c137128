//! Compiles the chain tree into a processing graph.
//!
//! [`wire_node`] turns one subtree into a graph fragment hanging off the
//! given input handles and returns the fragment's output handles. Plugin
//! nodes already live in the graph; everything else the wiring adds is a
//! utility node, recorded so the next rebuild can remove it again.
//!
//! ## Leaf
//!
//! ```text
//! in ─┬─ [in gain] ─┬─ [M/S enc] ─ meter ─ plugin ─ meter ─ [M/S dec] ─ [out gain] ─ [dry/wet] ─ out
//!     │             └──────── [delay] ─────────────────────┘ aux          │
//!     ├──────────────────────────────── plugin aux (sidechain)            │
//!     └────────────────────── [delay] ────────────────────────────────────┘ dry
//! ```
//!
//! ## Serial group
//!
//! Children chained in order, then `[ducker]` keyed by the group input, then
//! `[dry/wet]` with the group input delayed by the group latency as dry.
//!
//! ## Parallel group
//!
//! The group input fans out to every child; each branch continues through
//! its branch gain and `[compensation delay]` into one sum-gain node. Ducking
//! and dry/wet follow as for serial groups. MIDI leaves from the last branch.

use std::sync::Arc;

use arbor_core::{
    AtomicF32, AudioNode, BranchGain, DryWetMix, Ducker, FixedDelay, GraphError, MeterTap,
    MidSideComponent, MidSideNode, MidSideStage, NodeId, Port, ProcessingGraph,
};

use crate::latency::{branch_compensation, compute_node_latency};
use crate::tree::{ChainNode, FULL_WET, GroupCache, GroupMode, NodeKind, SidechainSource};

/// Audio and MIDI handles of a wired fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireResult {
    /// Node producing the fragment's audio.
    pub audio: NodeId,
    /// Node producing the fragment's MIDI.
    pub midi: NodeId,
}

impl WireResult {
    /// Both streams from one node.
    pub fn from_node(node: NodeId) -> Self {
        Self {
            audio: node,
            midi: node,
        }
    }
}

/// Graph plus the list of utility nodes added during one rebuild.
pub(crate) struct Wiring<'a> {
    graph: &'a mut ProcessingGraph,
    utilities: &'a mut Vec<NodeId>,
}

impl<'a> Wiring<'a> {
    pub(crate) fn new(graph: &'a mut ProcessingGraph, utilities: &'a mut Vec<NodeId>) -> Self {
        Self { graph, utilities }
    }

    fn add(&mut self, node: impl AudioNode + 'static) -> NodeId {
        let id = self.graph.add_node(Box::new(node));
        self.utilities.push(id);
        id
    }

    fn chain(
        &mut self,
        from: NodeId,
        node: impl AudioNode + 'static,
    ) -> Result<NodeId, GraphError> {
        let id = self.add(node);
        self.graph.connect(from, id, Port::Main)?;
        Ok(id)
    }

    /// `source` delayed by `samples`, or `source` itself when zero.
    fn delayed(
        &mut self,
        source: NodeId,
        samples: usize,
        label: &'static str,
    ) -> Result<NodeId, GraphError> {
        if samples == 0 {
            Ok(source)
        } else {
            self.chain(source, FixedDelay::with_label(samples, label))
        }
    }

    /// Two-port crossfade between `dry` (main) and `wet` (aux).
    fn dry_wet(
        &mut self,
        dry: NodeId,
        wet: NodeId,
        control: &Arc<AtomicF32>,
    ) -> Result<NodeId, GraphError> {
        let mix = self.add(DryWetMix::new(Arc::clone(control)));
        self.graph.connect(dry, mix, Port::Main)?;
        self.graph.connect(wet, mix, Port::Aux)?;
        Ok(mix)
    }
}

/// Wires `node` after `input` and returns the fragment's outputs.
pub(crate) fn wire_node(
    wiring: &mut Wiring<'_>,
    node: &mut ChainNode,
    input: WireResult,
    is_root: bool,
) -> Result<WireResult, GraphError> {
    let latency = compute_node_latency(node);
    if let NodeKind::Plugin(_) = node.kind {
        return wire_leaf(wiring, node, input, latency);
    }
    let compensation = branch_compensation(node);
    let NodeKind::Group(group) = &mut node.kind else {
        return Ok(input);
    };

    group.cache = GroupCache::default();
    if group.children.is_empty() {
        return Ok(input);
    }
    let mut cache = GroupCache::default();
    let mut out = match group.mode {
        GroupMode::Serial => {
            let mut cur = input;
            for child in &mut group.children {
                cur = wire_node(wiring, child, cur, false)?;
            }
            cur
        }
        GroupMode::Parallel => {
            let sum = wiring.add(BranchGain::with_label(
                Arc::clone(&group.controls.sum_gain),
                "sum_gain",
            ));
            let mut midi = input.midi;
            for (child, &delay) in group.children.iter_mut().zip(&compensation) {
                let branch_out = wire_node(wiring, child, input, false)?;
                let gain = wiring.chain(
                    branch_out.audio,
                    BranchGain::with_label(Arc::clone(&child.branch_control), "branch_gain"),
                )?;
                let aligned = wiring.delayed(gain, delay, "branch_compensation")?;
                wiring.graph.connect(aligned, sum, Port::Main)?;
                cache.branch_gains.push(gain);
                cache.compensation.push((aligned != gain).then_some(aligned));
                midi = branch_out.midi;
            }
            cache.sum_gain = Some(sum);
            WireResult { audio: sum, midi }
        }
    };

    if group.duck_amount > 0.0 {
        let ducker = wiring.chain(out.audio, Ducker::new(Arc::clone(&group.controls.duck)))?;
        wiring.graph.connect(input.audio, ducker, Port::Aux)?;
        cache.ducker = Some(ducker);
        out.audio = ducker;
    }

    if !is_root && group.dry_wet < FULL_WET {
        let dry = wiring.delayed(input.audio, latency, "group_dry_delay")?;
        let mix = wiring.dry_wet(dry, out.audio, &group.controls.dry_wet)?;
        cache.dry_wet = Some(mix);
        out.audio = mix;
    }

    group.cache = cache;
    Ok(out)
}

fn wire_leaf(
    wiring: &mut Wiring<'_>,
    node: &ChainNode,
    input: WireResult,
    latency: usize,
) -> Result<WireResult, GraphError> {
    let Some(leaf) = node.as_plugin() else {
        return Ok(input);
    };
    let Some(plugin) = leaf.graph_node().filter(|_| leaf.is_ready()) else {
        return Ok(input);
    };
    let controls = &leaf.controls;

    let mut audio = input.audio;
    if leaf.input_gain_db != 0.0 {
        audio = wiring.chain(
            audio,
            BranchGain::with_label(Arc::clone(&controls.input_gain), "input_gain"),
        )?;
    }
    let gained_input = audio;

    let component = leaf.mid_side.component();
    if let Some(component) = component {
        audio = wiring.chain(audio, MidSideNode::new(MidSideStage::Encode(component)))?;
    }

    audio = wiring.chain(
        audio,
        MeterTap::new(Arc::clone(&controls.input_meter), "input_meter"),
    )?;

    wiring.graph.connect(audio, plugin, Port::Main)?;
    wiring.graph.connect(input.midi, plugin, Port::Midi)?;
    if leaf.sidechain == SidechainSource::LeafInput {
        wiring.graph.connect(input.audio, plugin, Port::Aux)?;
    }

    audio = wiring.chain(
        plugin,
        MeterTap::new(Arc::clone(&controls.output_meter), "output_meter"),
    )?;

    if let Some(component) = component {
        let decode = wiring.chain(audio, MidSideNode::new(MidSideStage::Decode(component)))?;
        if component != MidSideComponent::Both {
            let bypassed = wiring.delayed(gained_input, latency, "mid_side_align")?;
            wiring.graph.connect(bypassed, decode, Port::Aux)?;
        }
        audio = decode;
    }

    if leaf.output_gain_db != 0.0 {
        audio = wiring.chain(
            audio,
            BranchGain::with_label(Arc::clone(&controls.output_gain), "output_gain"),
        )?;
    }

    if leaf.dry_wet < FULL_WET {
        let dry = wiring.delayed(input.audio, latency, "plugin_dry_delay")?;
        audio = wiring.dry_wet(dry, audio, &controls.dry_wet)?;
    }

    Ok(WireResult {
        audio,
        midi: plugin,
    })
}
