//! Audio-side executor for compiled graphs.
//!
//! [`GraphRunner`] owns every live [`AudioNode`] and the buffer pool. It is
//! driven from the audio callback: [`apply()`](GraphRunner::apply) installs a
//! [`GraphUpdate`] with moves only, and [`process()`](GraphRunner::process)
//! walks the current schedule. Neither allocates, locks or frees; everything
//! the runner lets go of travels back inside the returned update.
//!
//! Schedule swaps crossfade from the last rendered block into the new output
//! over a few milliseconds (5 ms by default) so rebuilds do not click.

#[cfg(not(feature = "std"))]
use alloc::{sync::Arc, vec, vec::Vec};
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::NodeInputs;
use crate::midi::{MidiBuffer, MidiEvent};
use crate::param::SmoothedParam;

use super::buffer::{BufferPool, StereoBuffer};
use super::schedule::{CompiledSchedule, MidiSource, ProcessStep};
use super::update::{GraphUpdate, LiveNode};

/// Default schedule-swap crossfade.
pub const DEFAULT_SWAP_CROSSFADE_MS: f32 = 5.0;

/// Executes compiled schedules on the audio thread.
pub struct GraphRunner {
    slots: Vec<Option<LiveNode>>,
    pool: BufferPool,
    schedule: Option<Arc<CompiledSchedule>>,
    silence: StereoBuffer,
    no_midi: MidiBuffer,
    chunk_midi: MidiBuffer,
    swap_fade: SmoothedParam,
    crossfade_ms: f32,
    crossfade_left: Vec<f32>,
    crossfade_right: Vec<f32>,
    sample_rate: f32,
    max_block: usize,
}

impl GraphRunner {
    /// Creates an empty runner. Until the first update it passes audio through.
    pub fn new(sample_rate: f32, max_block: usize) -> Self {
        let mut swap_fade = SmoothedParam::with_config(1.0, sample_rate, DEFAULT_SWAP_CROSSFADE_MS);
        swap_fade.snap_to_target();
        Self {
            slots: Vec::new(),
            pool: BufferPool::default(),
            schedule: None,
            silence: StereoBuffer::new(max_block),
            no_midi: MidiBuffer::with_capacity(0),
            chunk_midi: MidiBuffer::default(),
            swap_fade,
            crossfade_ms: DEFAULT_SWAP_CROSSFADE_MS,
            crossfade_left: vec![0.0; max_block],
            crossfade_right: vec![0.0; max_block],
            sample_rate,
            max_block,
        }
    }

    /// Sets the schedule-swap crossfade time. Zero disables it.
    pub fn set_crossfade_ms(&mut self, ms: f32) {
        self.crossfade_ms = ms.max(0.0);
        if self.crossfade_ms > 0.0 {
            self.swap_fade.set_smoothing_time_ms(self.crossfade_ms);
        } else {
            self.swap_fade.snap_to_target();
        }
    }

    /// Re-prepares every live node for a new format and resizes buffers.
    ///
    /// Allocates; call only while the audio callback is not running.
    pub fn prepare(&mut self, sample_rate: f32, max_block: usize) {
        self.sample_rate = sample_rate;
        self.max_block = max_block;
        for live in self.slots.iter_mut().flatten() {
            live.node.prepare(sample_rate, max_block);
            live.midi_out.clear();
        }
        self.pool.resize_all(max_block);
        self.silence.resize(max_block);
        self.silence.clear();
        self.crossfade_left.resize(max_block, 0.0);
        self.crossfade_right.resize(max_block, 0.0);
        self.swap_fade.set_sample_rate(sample_rate);
        self.swap_fade.snap_to_target();
    }

    /// Installs an update and returns it holding what the runner released.
    ///
    /// Order: storage swap, removals, insertions, buffers, schedule. A node
    /// that finds its slot occupied displaces the occupant into the retired
    /// list.
    pub fn apply(&mut self, mut update: GraphUpdate) -> GraphUpdate {
        if let Some(mut slots) = update.slots.take() {
            for (dst, src) in slots.iter_mut().zip(self.slots.iter_mut()) {
                *dst = src.take();
            }
            update.slots = Some(core::mem::replace(&mut self.slots, slots));
        }

        for &slot in &update.removed {
            if let Some(live) = self.slots.get_mut(slot).and_then(Option::take) {
                update.retired.push(live);
            }
        }

        for (slot, live) in update.inserted.drain(..) {
            match self.slots.get_mut(slot) {
                Some(entry) => {
                    if let Some(displaced) = entry.replace(live) {
                        update.retired.push(displaced);
                    }
                }
                None => update.retired.push(live),
            }
        }

        if let Some(pool) = update.pool.take() {
            update.pool = Some(core::mem::replace(&mut self.pool, pool));
        }

        if let Some(schedule) = update.schedule.take() {
            let previous = self.schedule.replace(schedule);
            if previous.is_some() && self.crossfade_ms > 0.0 {
                self.swap_fade.set_immediate(0.0);
                self.swap_fade.set_target(1.0);
            }
            update.replaced_schedule = previous;
        }

        update
    }

    /// Processes one host block.
    ///
    /// Blocks longer than the prepared maximum are split into chunks; MIDI
    /// offsets are shifted accordingly. Without a schedule the input is
    /// copied to the output.
    pub fn process(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
        midi_in: &MidiBuffer,
        midi_out: &mut MidiBuffer,
    ) {
        let total = left_in
            .len()
            .min(right_in.len())
            .min(left_out.len())
            .min(right_out.len());
        midi_out.clear();

        let Some(schedule) = self.schedule.clone() else {
            left_out[..total].copy_from_slice(&left_in[..total]);
            right_out[..total].copy_from_slice(&right_in[..total]);
            for event in midi_in.events() {
                midi_out.push(*event);
            }
            return;
        };

        let chunk = self.max_block.min(self.pool.block_size()).max(1);
        let mut start = 0;
        while start < total {
            let len = chunk.min(total - start);
            let end = start + len;

            self.chunk_midi.clear();
            for event in midi_in.events() {
                let offset = event.offset as usize;
                if offset >= start && offset < end {
                    let mut shifted = *event;
                    shifted.offset = (offset - start) as u32;
                    self.chunk_midi.push(shifted);
                }
            }

            run_schedule(
                &schedule,
                &mut self.slots,
                &mut self.pool,
                &self.silence,
                &self.no_midi,
                &self.chunk_midi,
                Io {
                    left_in: &left_in[start..end],
                    right_in: &right_in[start..end],
                    left_out: &mut left_out[start..end],
                    right_out: &mut right_out[start..end],
                    midi_out: &mut *midi_out,
                    offset: start as u32,
                },
            );
            self.finish_chunk(&mut left_out[start..end], &mut right_out[start..end]);
            start = end;
        }
    }

    /// Clears node state and buffers.
    pub fn reset(&mut self) {
        for live in self.slots.iter_mut().flatten() {
            live.node.reset();
            live.midi_out.clear();
        }
        self.pool.clear_all();
        self.swap_fade.snap_to_target();
        self.crossfade_left.fill(0.0);
        self.crossfade_right.fill(0.0);
    }

    /// Number of live nodes, excluding input and output.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True once a schedule has been installed.
    pub fn has_schedule(&self) -> bool {
        self.schedule.is_some()
    }

    /// Latency of the installed schedule.
    pub fn latency_samples(&self) -> usize {
        self.schedule.as_ref().map_or(0, |s| s.total_latency)
    }

    /// Sample rate the runner was prepared at.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Largest block processed in one pass.
    pub fn max_block(&self) -> usize {
        self.max_block
    }

    /// True while a schedule-swap crossfade is running.
    pub fn is_crossfading(&self) -> bool {
        !self.swap_fade.is_settled()
    }

    fn finish_chunk(&mut self, left_out: &mut [f32], right_out: &mut [f32]) {
        let len = left_out.len().min(self.crossfade_left.len());
        if !self.swap_fade.is_settled() {
            for i in 0..len {
                let fade = self.swap_fade.advance();
                left_out[i] = self.crossfade_left[i] * (1.0 - fade) + left_out[i] * fade;
                right_out[i] = self.crossfade_right[i] * (1.0 - fade) + right_out[i] * fade;
            }
            // The one-pole stalls short of 1.0 in f32; finish the fade below -80 dB.
            if (self.swap_fade.target() - self.swap_fade.get()).abs() < 1e-4 {
                self.swap_fade.snap_to_target();
            }
        }
        self.crossfade_left[..len].copy_from_slice(&left_out[..len]);
        self.crossfade_right[..len].copy_from_slice(&right_out[..len]);
    }
}

impl core::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("nodes", &self.node_count())
            .field("buffers", &self.pool.count())
            .field("sample_rate", &self.sample_rate)
            .field("max_block", &self.max_block)
            .finish_non_exhaustive()
    }
}

/// External audio and MIDI for one chunk.
struct Io<'a> {
    left_in: &'a [f32],
    right_in: &'a [f32],
    left_out: &'a mut [f32],
    right_out: &'a mut [f32],
    midi_out: &'a mut MidiBuffer,
    offset: u32,
}

/// Walks a schedule over borrowed runner state.
///
/// Takes disjoint fields instead of `&mut self` so that node slots and the
/// buffer pool can be borrowed independently.
fn run_schedule(
    schedule: &CompiledSchedule,
    slots: &mut [Option<LiveNode>],
    pool: &mut BufferPool,
    silence: &StereoBuffer,
    no_midi: &MidiBuffer,
    ext_midi: &MidiBuffer,
    io: Io<'_>,
) {
    let len = io.left_in.len();
    for step in &schedule.steps {
        match *step {
            ProcessStep::WriteInput { buffer_idx } => {
                let buf = pool.get_mut(buffer_idx);
                buf.left[..len].copy_from_slice(io.left_in);
                buf.right[..len].copy_from_slice(io.right_in);
            }
            ProcessStep::ClearBuffer { buffer_idx } => {
                let buf = pool.get_mut(buffer_idx);
                buf.left[..len].fill(0.0);
                buf.right[..len].fill(0.0);
            }
            ProcessStep::AccumulateBuffer {
                source_buf,
                dest_buf,
            } => {
                let mut dest = pool.take(dest_buf);
                dest.accumulate_prefix(pool.get(source_buf), len);
                pool.restore(dest_buf, dest);
            }
            ProcessStep::ProcessNode {
                node_idx,
                main,
                aux,
                output_buf,
                midi,
            } => {
                let mut output = pool.take(output_buf);
                match slots.get_mut(node_idx).and_then(Option::take) {
                    Some(mut live) => {
                        let midi_in = match midi {
                            MidiSource::None => no_midi,
                            MidiSource::External => ext_midi,
                            MidiSource::Node(src) => slots
                                .get(src)
                                .and_then(Option::as_ref)
                                .map_or(no_midi, |n| &n.midi_out),
                        };
                        let inputs = NodeInputs {
                            main: main.map_or(silence, |i| pool.get(i)),
                            aux: aux.map(|i| pool.get(i)),
                            midi: midi_in,
                        };
                        live.midi_out.clear();
                        live.node
                            .process(&inputs, &mut output, &mut live.midi_out, len);
                        slots[node_idx] = Some(live);
                    }
                    None => {
                        output.left[..len].fill(0.0);
                        output.right[..len].fill(0.0);
                    }
                }
                pool.restore(output_buf, output);
            }
            ProcessStep::ReadOutput { buffer_idx, midi } => {
                match buffer_idx {
                    Some(idx) => {
                        let buf = pool.get(idx);
                        io.left_out.copy_from_slice(&buf.left[..len]);
                        io.right_out.copy_from_slice(&buf.right[..len]);
                    }
                    None => {
                        io.left_out.fill(0.0);
                        io.right_out.fill(0.0);
                    }
                }
                let source = match midi {
                    MidiSource::None => None,
                    MidiSource::External => Some(ext_midi),
                    MidiSource::Node(src) => {
                        slots.get(src).and_then(Option::as_ref).map(|n| &n.midi_out)
                    }
                };
                if let Some(source) = source {
                    for event in source.events() {
                        let mut shifted: MidiEvent = *event;
                        shifted.offset += io.offset;
                        io.midi_out.push(shifted);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_node::AudioNode;
    use crate::graph::{Port, ProcessingGraph};

    struct Scale(f32);

    impl AudioNode for Scale {
        fn prepare(&mut self, _: f32, _: usize) {}
        fn process(
            &mut self,
            inputs: &NodeInputs<'_>,
            output: &mut StereoBuffer,
            midi_out: &mut MidiBuffer,
            len: usize,
        ) {
            for i in 0..len {
                output.left[i] = inputs.main.left[i] * self.0;
                output.right[i] = inputs.main.right[i] * self.0;
            }
            midi_out.copy_from(inputs.midi);
        }
        fn name(&self) -> &str {
            "scale"
        }
    }

    fn run(runner: &mut GraphRunner, value: f32, len: usize) -> (Vec<f32>, Vec<f32>) {
        let input = vec![value; len];
        let mut left = vec![0.0; len];
        let mut right = vec![0.0; len];
        let mut midi_out = MidiBuffer::default();
        runner.process(
            &input,
            &input,
            &mut left,
            &mut right,
            &MidiBuffer::default(),
            &mut midi_out,
        );
        (left, right)
    }

    fn chain(graph: &mut ProcessingGraph, gains: &[f32]) {
        let mut prev = graph.input();
        for &g in gains {
            let n = graph.add_node(Box::new(Scale(g)));
            graph.connect_audio_midi(prev, n).unwrap();
            prev = n;
        }
        let output = graph.output();
        graph.connect_audio_midi(prev, output).unwrap();
    }

    #[test]
    fn passthrough_without_schedule() {
        let mut runner = GraphRunner::new(48000.0, 64);
        let (l, r) = run(&mut runner, 0.25, 64);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.25));
    }

    #[test]
    fn serial_chain_processes() {
        let mut graph = ProcessingGraph::new(48000.0, 64);
        chain(&mut graph, &[0.5, 0.5]);
        let mut runner = GraphRunner::new(48000.0, 64);
        let returned = runner.apply(graph.compile().unwrap());
        assert!(returned.replaced_schedule.is_none());
        assert_eq!(runner.node_count(), 2);
        let (l, _) = run(&mut runner, 1.0, 64);
        assert!(l.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn parallel_sources_sum() {
        let mut graph = ProcessingGraph::new(48000.0, 32);
        let (input, output) = (graph.input(), graph.output());
        let a = graph.add_node(Box::new(Scale(1.0)));
        let b = graph.add_node(Box::new(Scale(2.0)));
        graph.connect(input, a, Port::Main).unwrap();
        graph.connect(input, b, Port::Main).unwrap();
        graph.connect(a, output, Port::Main).unwrap();
        graph.connect(b, output, Port::Main).unwrap();
        let mut runner = GraphRunner::new(48000.0, 32);
        runner.apply(graph.compile().unwrap());
        let (l, _) = run(&mut runner, 0.5, 32);
        assert!(l.iter().all(|&s| (s - 1.5).abs() < 1e-6));
    }

    #[test]
    fn long_blocks_are_chunked() {
        let mut graph = ProcessingGraph::new(48000.0, 16);
        chain(&mut graph, &[2.0]);
        let mut runner = GraphRunner::new(48000.0, 16);
        runner.apply(graph.compile().unwrap());
        let (l, r) = run(&mut runner, 0.25, 100);
        assert!(l.iter().chain(r.iter()).all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn midi_offsets_survive_chunking() {
        let mut graph = ProcessingGraph::new(48000.0, 16);
        chain(&mut graph, &[1.0]);
        let mut runner = GraphRunner::new(48000.0, 16);
        runner.apply(graph.compile().unwrap());

        let mut midi_in = MidiBuffer::default();
        midi_in.push(MidiEvent::new(3, 0x90, 60, 100));
        midi_in.push(MidiEvent::new(40, 0x80, 60, 0));
        let input = vec![0.0; 64];
        let (mut l, mut r) = (vec![0.0; 64], vec![0.0; 64]);
        let mut midi_out = MidiBuffer::default();
        runner.process(&input, &input, &mut l, &mut r, &midi_in, &mut midi_out);

        let offsets: Vec<u32> = midi_out.events().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![3, 40]);
    }

    #[test]
    fn removed_nodes_come_back_as_garbage() {
        let mut graph = ProcessingGraph::new(48000.0, 64);
        let n = graph.add_node(Box::new(Scale(0.5)));
        let (input, output) = (graph.input(), graph.output());
        graph.connect(input, n, Port::Main).unwrap();
        graph.connect(n, output, Port::Main).unwrap();
        let mut runner = GraphRunner::new(48000.0, 64);
        runner.apply(graph.compile().unwrap());

        graph.remove_node(n).unwrap();
        graph.connect(input, output, Port::Main).unwrap();
        let mut returned = runner.apply(graph.compile().unwrap());
        assert_eq!(returned.take_retired().len(), 1);
        assert!(returned.replaced_schedule.is_some());
        assert_eq!(runner.node_count(), 0);
    }

    #[test]
    fn schedule_swap_crossfades() {
        let mut graph = ProcessingGraph::new(48000.0, 64);
        chain(&mut graph, &[1.0]);
        let mut runner = GraphRunner::new(48000.0, 64);
        runner.apply(graph.compile().unwrap());
        run(&mut runner, 1.0, 64);

        graph.disconnect_all();
        let mut runner_update = graph.compile().unwrap();
        runner_update = runner.apply(runner_update);
        drop(runner_update);
        assert!(runner.is_crossfading());
        let (l, _) = run(&mut runner, 1.0, 64);
        // Fading from the cached 1.0 block toward silence.
        assert!(l[0] > 0.9);
        assert!(l[63] < l[0]);

        for _ in 0..100 {
            run(&mut runner, 1.0, 64);
        }
        assert!(!runner.is_crossfading());
        let (l, _) = run(&mut runner, 1.0, 64);
        assert!(l.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn zero_crossfade_swaps_immediately() {
        let mut graph = ProcessingGraph::new(48000.0, 64);
        chain(&mut graph, &[1.0]);
        let mut runner = GraphRunner::new(48000.0, 64);
        runner.set_crossfade_ms(0.0);
        runner.apply(graph.compile().unwrap());
        run(&mut runner, 1.0, 64);
        graph.disconnect_all();
        runner.apply(graph.compile().unwrap());
        assert!(!runner.is_crossfading());
        let (l, _) = run(&mut runner, 1.0, 64);
        assert!(l.iter().all(|&s| s == 0.0));
    }
}
