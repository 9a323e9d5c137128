//! Ramped linear gain.
//!
//! Used for parallel branch gains (with solo and mute folded in), the
//! compensation gain after a parallel sum, and per-plugin input/output trims.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::{AudioNode, NodeInputs};
use crate::control::AtomicF32;
use crate::gain::GAIN_RAMP_MS;
use crate::graph::StereoBuffer;
use crate::midi::MidiBuffer;
use crate::param::LinearSmoothedParam;

/// Multiplies its input by a linear gain read from a shared cell.
///
/// Gain changes ramp linearly over 20 ms. Once settled, a gain of exactly
/// `1.0` copies the input bit for bit and `0.0` writes silence.
pub struct BranchGain {
    control: Arc<AtomicF32>,
    gain: LinearSmoothedParam,
    label: &'static str,
}

impl BranchGain {
    /// Creates a gain node starting at the control's current value.
    pub fn new(control: Arc<AtomicF32>) -> Self {
        Self::with_label(control, "branch_gain")
    }

    /// Creates a gain node reported under `label`.
    pub fn with_label(control: Arc<AtomicF32>, label: &'static str) -> Self {
        let initial = sanitize(control.load());
        Self {
            control,
            gain: LinearSmoothedParam::with_config(initial, 48000.0, GAIN_RAMP_MS),
            label,
        }
    }

    /// Gain currently applied.
    pub fn current_gain(&self) -> f32 {
        self.gain.get()
    }
}

fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() { gain.max(0.0) } else { 0.0 }
}

impl AudioNode for BranchGain {
    fn prepare(&mut self, sample_rate: f32, _max_block: usize) {
        self.gain.set_sample_rate(sample_rate);
        self.gain.set_immediate(sanitize(self.control.load()));
    }

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        _midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        self.gain.set_target(sanitize(self.control.load()));
        let input = inputs.main;

        if self.gain.is_settled() {
            let g = self.gain.get();
            if g == 1.0 {
                output.copy_prefix(input, len);
            } else if g == 0.0 {
                output.left[..len].fill(0.0);
                output.right[..len].fill(0.0);
            } else {
                for i in 0..len {
                    output.left[i] = input.left[i] * g;
                    output.right[i] = input.right[i] * g;
                }
            }
            return;
        }

        for i in 0..len {
            let g = self.gain.advance();
            output.left[i] = input.left[i] * g;
            output.right[i] = input.right[i] * g;
        }
    }

    fn reset(&mut self) {
        self.gain.snap_to_target();
    }

    fn name(&self) -> &str {
        self.label
    }
}
