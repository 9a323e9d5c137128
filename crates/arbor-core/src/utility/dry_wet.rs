//! Two-port dry/wet crossfade.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::{AudioNode, NodeInputs};
use crate::control::AtomicF32;
use crate::gain::GAIN_RAMP_MS;
use crate::graph::StereoBuffer;
use crate::math::wet_dry_mix;
use crate::midi::MidiBuffer;
use crate::param::LinearSmoothedParam;

/// Crossfades between a dry signal on the main port and a wet signal on the
/// aux port: `out = dry·(1−mix) + wet·mix`.
///
/// Both inputs must arrive with equal latency; the node declares this so the
/// compiler can flag wiring that forgot to delay the dry tap. A missing wet
/// input reads as silence.
pub struct DryWetMix {
    control: Arc<AtomicF32>,
    mix: LinearSmoothedParam,
    label: &'static str,
}

impl DryWetMix {
    /// Creates a crossfade starting at the control's current mix.
    pub fn new(control: Arc<AtomicF32>) -> Self {
        Self::with_label(control, "dry_wet")
    }

    /// Creates a crossfade reported under `label`.
    pub fn with_label(control: Arc<AtomicF32>, label: &'static str) -> Self {
        let initial = clamp_mix(control.load());
        Self {
            control,
            mix: LinearSmoothedParam::with_config(initial, 48000.0, GAIN_RAMP_MS),
            label,
        }
    }
}

fn clamp_mix(mix: f32) -> f32 {
    if mix.is_nan() { 1.0 } else { mix.clamp(0.0, 1.0) }
}

impl AudioNode for DryWetMix {
    fn prepare(&mut self, sample_rate: f32, _max_block: usize) {
        self.mix.set_sample_rate(sample_rate);
        self.mix.set_immediate(clamp_mix(self.control.load()));
    }

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        _midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        self.mix.set_target(clamp_mix(self.control.load()));
        let dry = inputs.main;

        let Some(wet) = inputs.aux else {
            for i in 0..len {
                let gain = 1.0 - self.mix.advance();
                output.left[i] = dry.left[i] * gain;
                output.right[i] = dry.right[i] * gain;
            }
            return;
        };

        if self.mix.is_settled() {
            let mix = self.mix.get();
            if mix == 0.0 {
                output.copy_prefix(dry, len);
                return;
            }
            if mix == 1.0 {
                output.copy_prefix(wet, len);
                return;
            }
        }

        for i in 0..len {
            let mix = self.mix.advance();
            output.left[i] = wet_dry_mix(dry.left[i], wet.left[i], mix);
            output.right[i] = wet_dry_mix(dry.right[i], wet.right[i], mix);
        }
    }

    fn reset(&mut self) {
        self.mix.snap_to_target();
    }

    fn input_ports(&self) -> usize {
        2
    }

    fn requires_aligned_inputs(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        self.label
    }
}
