//! Integer-sample latency compensation node.

use crate::audio_node::{AudioNode, NodeInputs};
use crate::graph::{CompensationDelay, StereoBuffer};
use crate::midi::MidiBuffer;

/// Delays its input by a fixed number of samples and reports that delay as
/// its latency. A zero delay copies the input bit for bit.
pub struct FixedDelay {
    line: CompensationDelay,
    label: &'static str,
}

impl FixedDelay {
    /// Creates a delay of `delay_samples`.
    pub fn new(delay_samples: usize) -> Self {
        Self::with_label(delay_samples, "compensation_delay")
    }

    /// Creates a delay reported under `label`.
    pub fn with_label(delay_samples: usize, label: &'static str) -> Self {
        Self {
            line: CompensationDelay::new(delay_samples),
            label,
        }
    }

    /// Delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.line.delay_samples()
    }
}

impl AudioNode for FixedDelay {
    fn prepare(&mut self, _sample_rate: f32, _max_block: usize) {
        self.line.clear();
    }

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        _midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        output.copy_prefix(inputs.main, len);
        self.line
            .process_block_inplace(&mut output.left[..len], &mut output.right[..len]);
    }

    fn reset(&mut self) {
        self.line.clear();
    }

    fn latency_samples(&self) -> usize {
        self.line.delay_samples()
    }

    fn name(&self) -> &str {
        self.label
    }
}
