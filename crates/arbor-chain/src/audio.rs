//! Real-time side of the chain.
//!
//! [`ChainAudio`] owns the graph runner and the oversampling stage. Once per
//! block it hands back the garbage of the previous swap, installs a pending
//! graph update if one is waiting, and runs the compiled schedule. It never
//! blocks or allocates in [`process`](ChainAudio::process); contended slots
//! are simply retried on the next block.

use arbor_core::{GraphRunner, GraphUpdate, MidiBuffer, Oversampler};

use crate::shared::{ChainShared, ProcessSetup};

/// Audio-thread half of a chain, created by [`ChainProcessor::new`](crate::ChainProcessor::new).
pub struct ChainAudio {
    shared: ChainShared,
    runner: GraphRunner,
    oversampler: Oversampler,
    setup: ProcessSetup,
    /// Applied update waiting to go back to the control side.
    garbage: Option<GraphUpdate>,
    /// Host MIDI of the current chunk, offsets at the graph's rate.
    chunk_midi: MidiBuffer,
    /// MIDI produced by the graph for the current chunk.
    graph_midi: MidiBuffer,
}

impl ChainAudio {
    pub(crate) fn new(shared: ChainShared, setup: ProcessSetup, crossfade_ms: f32) -> Self {
        let mut runner = GraphRunner::new(setup.inner_sample_rate(), setup.inner_block_size());
        runner.set_crossfade_ms(crossfade_ms);
        Self {
            shared,
            runner,
            oversampler: Oversampler::new(setup.oversampling, setup.max_block_size.max(1)),
            setup,
            garbage: None,
            chunk_midi: MidiBuffer::default(),
            graph_midi: MidiBuffer::default(),
        }
    }

    /// Prepares for a new host format. Not real-time safe.
    ///
    /// Installs any pending update first so every node is re-prepared at
    /// the new rate, then publishes the setup for the control side.
    pub fn prepare(&mut self, setup: ProcessSetup) {
        let setup = ProcessSetup {
            max_block_size: setup.max_block_size.max(1),
            ..setup
        };
        if let Some(update) = self.shared.take_update() {
            drop(self.runner.apply(update));
        }
        self.garbage = None;

        self.runner
            .prepare(setup.inner_sample_rate(), setup.inner_block_size());
        self.oversampler.set_factor(setup.oversampling);
        self.oversampler.prepare(setup.max_block_size);
        self.setup = setup;
        self.shared.publish_setup(setup);

        tracing::debug!(
            sample_rate = setup.sample_rate,
            max_block = setup.max_block_size,
            factor = setup.oversampling.factor(),
            "chain audio prepared"
        );
    }

    /// Processes one host block.
    ///
    /// Blocks longer than the prepared maximum are processed in chunks. MIDI
    /// offsets are scaled into and out of the oversampled rate.
    pub fn process(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
        midi_in: &MidiBuffer,
        midi_out: &mut MidiBuffer,
    ) {
        self.shared.set_busy(true);
        self.exchange();

        let total = left_in
            .len()
            .min(right_in.len())
            .min(left_out.len())
            .min(right_out.len());
        midi_out.clear();

        if self.shared.is_suspended() {
            left_out[..total].fill(0.0);
            right_out[..total].fill(0.0);
            self.shared.set_busy(false);
            return;
        }

        let factor = self.oversampler.factor().factor();
        let chunk = self.setup.max_block_size;
        let mut start = 0;
        while start < total {
            let end = (start + chunk).min(total);

            self.chunk_midi.clear();
            for event in midi_in.events() {
                let offset = event.offset as usize;
                if offset >= start && offset < end {
                    let mut scaled = *event;
                    scaled.offset = ((offset - start) * factor) as u32;
                    self.chunk_midi.push(scaled);
                }
            }

            let runner = &mut self.runner;
            let chunk_midi = &self.chunk_midi;
            let graph_midi = &mut self.graph_midi;
            self.oversampler.process(
                &left_in[start..end],
                &right_in[start..end],
                &mut left_out[start..end],
                &mut right_out[start..end],
                |li, ri, lo, ro| runner.process(li, ri, lo, ro, chunk_midi, graph_midi),
            );

            for event in self.graph_midi.events() {
                let mut scaled = *event;
                scaled.offset = start as u32 + event.offset / factor as u32;
                midi_out.push(scaled);
            }
            start = end;
        }

        self.shared.set_busy(false);
    }

    /// Returns garbage and picks up a pending update.
    fn exchange(&mut self) {
        self.return_garbage();
        if self.garbage.is_none()
            && let Some(update) = self
                .shared
                .try_take_update_for(self.runner.sample_rate(), self.runner.max_block())
        {
            self.garbage = Some(self.runner.apply(update));
            self.return_garbage();
        }
    }

    fn return_garbage(&mut self) {
        if let Some(garbage) = self.garbage.take()
            && let Err(garbage) = self.shared.try_return_garbage(garbage)
        {
            self.garbage = Some(garbage);
        }
    }

    /// Clears node and filter state.
    pub fn reset(&mut self) {
        self.runner.reset();
        self.oversampler.reset();
    }

    /// Latency to report to the host.
    pub fn latency_samples(&self) -> usize {
        self.shared.host_latency()
    }

    /// Setup passed to the last [`prepare`](Self::prepare).
    pub fn setup(&self) -> ProcessSetup {
        self.setup
    }

    /// Whether a compiled graph is installed.
    pub fn has_graph(&self) -> bool {
        self.runner.has_schedule()
    }

    /// Whether a graph swap crossfade is in progress.
    pub fn is_crossfading(&self) -> bool {
        self.runner.is_crossfading()
    }

    /// Shared state handle.
    pub fn shared(&self) -> &ChainShared {
        &self.shared
    }
}

impl std::fmt::Debug for ChainAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAudio")
            .field("setup", &self.setup)
            .field("nodes", &self.runner.node_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{MidiEvent, OversamplingFactor, ProcessingGraph};

    fn passthrough_update(setup: &ProcessSetup) -> GraphUpdate {
        let mut graph =
            ProcessingGraph::new(setup.inner_sample_rate(), setup.inner_block_size());
        let (input, output) = (graph.input(), graph.output());
        graph.connect_audio_midi(input, output).unwrap();
        graph.compile().unwrap()
    }

    fn audio(setup: ProcessSetup) -> ChainAudio {
        let shared = ChainShared::new(setup);
        let mut audio = ChainAudio::new(shared, setup, 0.0);
        audio.prepare(setup);
        audio
    }

    #[test]
    fn without_graph_passes_audio_through() {
        let mut audio = audio(ProcessSetup::default());
        let input = [0.1f32, 0.2, 0.3];
        let (mut l, mut r) = ([0.0f32; 3], [0.0f32; 3]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
        assert_eq!(l, input);
        assert_eq!(r, input);
    }

    #[test]
    fn suspended_outputs_silence() {
        let mut audio = audio(ProcessSetup::default());
        audio.shared().set_suspended(true);
        let input = [0.5f32; 8];
        let (mut l, mut r) = ([1.0f32; 8], [1.0f32; 8]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
        assert!(!audio.shared().is_busy());
    }

    #[test]
    fn pending_update_is_installed_and_garbage_returned() {
        let setup = ProcessSetup {
            max_block_size: 64,
            ..ProcessSetup::default()
        };
        let mut audio = audio(setup);
        audio.shared().publish_update(passthrough_update(&setup));

        let input = [0.25f32; 64];
        let (mut l, mut r) = ([0.0f32; 64], [0.0f32; 64]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);

        assert!(audio.has_graph());
        assert!(!audio.shared().has_pending_update());
        assert!(audio.shared().take_garbage().is_some());
        assert_eq!(l, input);
    }

    #[test]
    fn update_for_previous_format_is_not_installed() {
        let old = ProcessSetup {
            max_block_size: 64,
            ..ProcessSetup::default()
        };
        let mut audio = audio(old);
        let new = ProcessSetup {
            max_block_size: 256,
            ..old
        };
        audio.prepare(new);
        audio.shared().publish_update(passthrough_update(&old));

        let input = [0.5f32; 256];
        let (mut l, mut r) = ([0.0f32; 256], [0.0f32; 256]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);

        assert!(!audio.has_graph());
        assert!(audio.shared().has_pending_update());
        assert_eq!(l, input);

        audio.shared().publish_update(passthrough_update(&new));
        audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi_out);
        assert!(audio.has_graph());
        assert_eq!(l, input);
    }

    #[test]
    fn long_blocks_are_chunked_with_midi_offsets() {
        let setup = ProcessSetup {
            max_block_size: 16,
            ..ProcessSetup::default()
        };
        let mut audio = audio(setup);
        audio.shared().publish_update(passthrough_update(&setup));

        let mut midi_in = MidiBuffer::default();
        midi_in.push(MidiEvent::new(3, 0x90, 60, 100));
        midi_in.push(MidiEvent::new(40, 0x80, 60, 0));

        let input: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let (mut l, mut r) = (vec![0.0f32; 50], vec![0.0f32; 50]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &midi_in, &mut midi_out);

        assert_eq!(l, input);
        let offsets: Vec<u32> = midi_out.events().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![3, 40]);
    }

    #[test]
    fn oversampled_midi_returns_to_host_offsets() {
        let setup = ProcessSetup {
            max_block_size: 32,
            oversampling: OversamplingFactor::X2,
            ..ProcessSetup::default()
        };
        let mut audio = audio(setup);
        audio.shared().publish_update(passthrough_update(&setup));

        let mut midi_in = MidiBuffer::default();
        midi_in.push(MidiEvent::new(7, 0x90, 64, 90));
        let input = [0.0f32; 32];
        let (mut l, mut r) = ([0.0f32; 32], [0.0f32; 32]);
        let mut midi_out = MidiBuffer::default();
        audio.process(&input, &input, &mut l, &mut r, &midi_in, &mut midi_out);

        assert_eq!(midi_out.events()[0].offset, 7);
    }

    #[test]
    fn prepare_publishes_setup() {
        let setup = ProcessSetup::default();
        let shared = ChainShared::new(setup);
        let mut audio = ChainAudio::new(shared.clone(), setup, 0.0);
        let before = shared.setup_generation();
        audio.prepare(ProcessSetup {
            oversampling: OversamplingFactor::X4,
            ..setup
        });
        assert_eq!(shared.setup_generation(), before + 1);
        assert_eq!(shared.oversampling(), OversamplingFactor::X4);
    }
}
