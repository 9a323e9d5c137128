//! Integration tests for arbor-core: graphs built from the utility nodes and
//! run through the real-time runner.
//!
//! Covers latency-compensated parallel sums, dry/wet alignment, ducking with
//! an undelayed sidechain, mid/side round trips through the graph, garbage
//! hand-back, and the oversampling stage around a runner.

use std::sync::Arc;

use arbor_core::{
    AtomicF32, BranchGain, DryWetMix, DuckControl, Ducker, FixedDelay, GraphRunner, MeterReadings,
    MeterTap, MidSideComponent, MidSideNode, MidSideStage, MidiBuffer, NodeId, Oversampler,
    OversamplingFactor, Port, ProcessingGraph,
};

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK: usize = 256;

fn impulse_response(runner: &mut GraphRunner, blocks: usize) -> Vec<f32> {
    let mut response = Vec::with_capacity(blocks * BLOCK);
    let mut midi_out = MidiBuffer::default();
    for b in 0..blocks {
        let mut input = vec![0.0; BLOCK];
        if b == 0 {
            input[0] = 1.0;
        }
        let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
        runner.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
        response.extend_from_slice(&l);
    }
    response
}

fn nonzero_taps(response: &[f32]) -> Vec<(usize, f32)> {
    response
        .iter()
        .enumerate()
        .filter(|(_, s)| s.abs() > 1e-9)
        .map(|(i, &s)| (i, s))
        .collect()
}

fn gain(graph: &mut ProcessingGraph, value: f32) -> NodeId {
    graph.add_node(Box::new(BranchGain::new(Arc::new(AtomicF32::new(value)))))
}

// ============================================================================
// Parallel alignment
// ============================================================================

/// Two branches, one delayed by 128 samples, compensated on the other branch:
/// both impulses land on the same sample and the schedule reports no
/// misaligned merge.
#[test]
fn compensated_parallel_branches_align() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());

    let slow = graph.add_node(Box::new(FixedDelay::new(128)));
    let fast = gain(&mut graph, 1.0);
    let comp = graph.add_node(Box::new(FixedDelay::new(128)));
    let sum = gain(&mut graph, 0.5);

    graph.connect(input, slow, Port::Main).unwrap();
    graph.connect(input, fast, Port::Main).unwrap();
    graph.connect(fast, comp, Port::Main).unwrap();
    graph.connect(slow, sum, Port::Main).unwrap();
    graph.connect(comp, sum, Port::Main).unwrap();
    graph.connect(sum, output, Port::Main).unwrap();

    let update = graph.compile().unwrap();
    let schedule = update.schedule().unwrap();
    assert_eq!(schedule.total_latency(), 128);
    assert_eq!(schedule.misaligned_inputs(), 0);

    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    runner.apply(update);
    let taps = nonzero_taps(&impulse_response(&mut runner, 2));
    assert_eq!(taps, vec![(128, 1.0)]);
}

/// Without compensation the same graph produces two taps and is flagged.
#[test]
fn uncompensated_parallel_branches_are_flagged() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());
    let slow = graph.add_node(Box::new(FixedDelay::new(64)));
    graph.connect(input, slow, Port::Main).unwrap();
    graph.connect(input, output, Port::Main).unwrap();
    graph.connect(slow, output, Port::Main).unwrap();

    let update = graph.compile().unwrap();
    assert_eq!(update.schedule().unwrap().misaligned_inputs(), 1);

    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    runner.apply(update);
    let taps = nonzero_taps(&impulse_response(&mut runner, 1));
    assert_eq!(taps, vec![(0, 1.0), (64, 1.0)]);
}

// ============================================================================
// Dry/wet
// ============================================================================

/// A dry tap delayed by the wet path's latency makes both halves of a 50 %
/// mix land on the same sample.
#[test]
fn aligned_dry_wet_sums_on_one_sample() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());
    let wet = graph.add_node(Box::new(FixedDelay::new(32)));
    let dry = graph.add_node(Box::new(FixedDelay::new(32)));
    let mix = graph.add_node(Box::new(DryWetMix::new(Arc::new(AtomicF32::new(0.5)))));
    graph.connect(input, wet, Port::Main).unwrap();
    graph.connect(input, dry, Port::Main).unwrap();
    graph.connect(dry, mix, Port::Main).unwrap();
    graph.connect(wet, mix, Port::Aux).unwrap();
    graph.connect(mix, output, Port::Main).unwrap();

    let update = graph.compile().unwrap();
    assert_eq!(update.schedule().unwrap().misaligned_inputs(), 0);
    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    runner.apply(update);
    let taps = nonzero_taps(&impulse_response(&mut runner, 1));
    assert_eq!(taps.len(), 1);
    assert_eq!(taps[0].0, 32);
    assert!((taps[0].1 - 1.0).abs() < 1e-6);
}

// ============================================================================
// Ducking
// ============================================================================

#[test]
fn ducker_in_graph_attenuates_by_sidechain() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());
    let control = Arc::new(DuckControl::new(1.0, 100.0));
    let duck = graph.add_node(Box::new(Ducker::new(Arc::clone(&control))));
    graph.connect(input, duck, Port::Main).unwrap();
    graph.connect(input, duck, Port::Aux).unwrap();
    graph.connect(duck, output, Port::Main).unwrap();

    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    runner.apply(graph.compile().unwrap());

    let input = vec![0.8_f32; BLOCK];
    let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    let mut midi_out = MidiBuffer::default();
    for _ in 0..40 {
        runner.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
    }
    // Envelope settles at 0.8, so the gain settles at 0.2.
    assert!((l[BLOCK - 1] - 0.8 * 0.2).abs() < 1e-3, "{}", l[BLOCK - 1]);

    control.set(0.0, 100.0);
    for _ in 0..40 {
        runner.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
    }
    assert!(l.iter().all(|&s| s == 0.8));
}

// ============================================================================
// Mid/side
// ============================================================================

#[test]
fn mid_side_sandwich_is_transparent() {
    for component in [MidSideComponent::Both, MidSideComponent::Mid, MidSideComponent::Side] {
        let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
        let (input, output) = (graph.input(), graph.output());
        let enc = graph.add_node(Box::new(MidSideNode::new(MidSideStage::Encode(component))));
        let plugin = gain(&mut graph, 1.0);
        let dec = graph.add_node(Box::new(MidSideNode::new(MidSideStage::Decode(component))));
        graph.connect(input, enc, Port::Main).unwrap();
        graph.connect(enc, plugin, Port::Main).unwrap();
        graph.connect(plugin, dec, Port::Main).unwrap();
        if component != MidSideComponent::Both {
            graph.connect(input, dec, Port::Aux).unwrap();
        }
        graph.connect(dec, output, Port::Main).unwrap();

        let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
        runner.apply(graph.compile().unwrap());

        let left: Vec<f32> = (0..BLOCK).map(|i| (i as f32 * 0.05).sin()).collect();
        let right: Vec<f32> = (0..BLOCK).map(|i| (i as f32 * 0.09).cos() * 0.3).collect();
        let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
        let mut midi_out = MidiBuffer::default();
        runner.process(&left, &right, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
        for i in 0..BLOCK {
            assert!((l[i] - left[i]).abs() < 1e-5, "{component:?} L[{i}]");
            assert!((r[i] - right[i]).abs() < 1e-5, "{component:?} R[{i}]");
        }
    }
}

// ============================================================================
// Metering and lifecycle
// ============================================================================

#[test]
fn meter_tap_reports_block_levels() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());
    let readings = Arc::new(MeterReadings::new());
    let tap = graph.add_node(Box::new(MeterTap::new(Arc::clone(&readings), "meter")));
    graph.connect(input, tap, Port::Main).unwrap();
    graph.connect(tap, output, Port::Main).unwrap();

    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    runner.apply(graph.compile().unwrap());
    let input = vec![0.25_f32; BLOCK];
    let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    let mut midi_out = MidiBuffer::default();
    runner.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);

    let snap = readings.snapshot();
    assert_eq!(snap.peak_l, 0.25);
    assert!((snap.rms_r - 0.25).abs() < 1e-6);
}

/// Rebuilding the same topology repeatedly keeps the runner's node count
/// stable and hands every replaced node back.
#[test]
fn repeated_rebuilds_return_all_garbage() {
    let mut graph = ProcessingGraph::new(SAMPLE_RATE, BLOCK);
    let mut runner = GraphRunner::new(SAMPLE_RATE, BLOCK);
    let (input, output) = (graph.input(), graph.output());
    let mut utilities: Vec<NodeId> = Vec::new();

    for round in 0..10 {
        for id in utilities.drain(..) {
            graph.remove_node(id).unwrap();
        }
        graph.disconnect_all();
        let mut prev = input;
        for _ in 0..3 {
            let n = gain(&mut graph, 1.0);
            graph.connect(prev, n, Port::Main).unwrap();
            utilities.push(n);
            prev = n;
        }
        graph.connect(prev, output, Port::Main).unwrap();

        let mut returned = runner.apply(graph.compile().unwrap());
        let expected = if round == 0 { 0 } else { 3 };
        assert_eq!(returned.take_retired().len(), expected);
        assert_eq!(runner.node_count(), 3);
    }
}

// ============================================================================
// Oversampling around a runner
// ============================================================================

#[test]
fn oversampled_runner_sees_scaled_block() {
    let factor = OversamplingFactor::X2;
    let inner_block = BLOCK * factor.factor();
    let mut graph = ProcessingGraph::new(SAMPLE_RATE * 2.0, inner_block);
    let (input, output) = (graph.input(), graph.output());
    let n = gain(&mut graph, 1.0);
    graph.connect(input, n, Port::Main).unwrap();
    graph.connect(n, output, Port::Main).unwrap();

    let mut runner = GraphRunner::new(SAMPLE_RATE * 2.0, inner_block);
    runner.apply(graph.compile().unwrap());
    let mut oversampler = Oversampler::new(factor, BLOCK);

    let input = vec![0.5_f32; BLOCK];
    let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    let mut midi_out = MidiBuffer::default();
    let midi_in = MidiBuffer::default();
    for _ in 0..4 {
        oversampler.process(&input, &input, &mut l, &mut r, |li, ri, lo, ro| {
            assert_eq!(li.len(), inner_block);
            runner.process(li, ri, lo, ro, &midi_in, &mut midi_out);
        });
    }
    assert!((l[BLOCK - 1] - 0.5).abs() < 1e-3);
    assert_eq!(factor.host_latency(runner.latency_samples()), 4);
}
