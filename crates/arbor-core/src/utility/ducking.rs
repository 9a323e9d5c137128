//! Sidechain-driven ducking.
//!
//! A peak envelope on the sidechain (fixed 5 ms attack, 50–1000 ms release)
//! drives `gain = clamp(1 − env·amount, 0, 1)` on the main signal. The gain
//! is smoothed with a 5 ms one-pole so envelope steps do not click.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::{AudioNode, NodeInputs};
use crate::control::DuckControl;
use crate::envelope::EnvelopeFollower;
use crate::graph::StereoBuffer;
use crate::midi::MidiBuffer;
use crate::param::SmoothedParam;

const ATTACK_MS: f32 = 5.0;
const GAIN_SMOOTHING_MS: f32 = 5.0;

/// Attenuates the main port by the level of the aux (sidechain) port.
///
/// With an amount of zero and the gain at rest the main input is copied bit
/// for bit.
pub struct Ducker {
    control: Arc<DuckControl>,
    envelope: EnvelopeFollower,
    gain: SmoothedParam,
}

impl Ducker {
    /// Creates a ducker driven by `control`.
    pub fn new(control: Arc<DuckControl>) -> Self {
        let release = control.release_ms.load();
        Self {
            control,
            envelope: EnvelopeFollower::with_times(48000.0, ATTACK_MS, release),
            gain: SmoothedParam::with_config(1.0, 48000.0, GAIN_SMOOTHING_MS),
        }
    }

    /// Current sidechain envelope.
    pub fn envelope(&self) -> f32 {
        self.envelope.level()
    }

    /// Gain currently applied.
    pub fn current_gain(&self) -> f32 {
        self.gain.get()
    }
}

impl AudioNode for Ducker {
    fn prepare(&mut self, sample_rate: f32, _max_block: usize) {
        self.envelope.set_sample_rate(sample_rate);
        self.envelope.set_release_ms(self.control.release_ms.load());
        self.envelope.reset();
        self.gain.set_sample_rate(sample_rate);
        self.gain.set_immediate(1.0);
    }

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        _midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        let amount = self.control.amount.load();
        let release = self.control.release_ms.load();
        if release != self.envelope.release_ms() {
            self.envelope.set_release_ms(release);
        }

        let input = inputs.main;
        let bypassed = amount <= 0.0 && self.gain.get() == 1.0;

        for i in 0..len {
            let sidechain = inputs
                .aux
                .map_or(0.0, |sc| sc.left[i].abs().max(sc.right[i].abs()));
            let env = self.envelope.process(sidechain).clamp(0.0, 1.0);
            if bypassed {
                continue;
            }
            self.gain.set_target((1.0 - env * amount).clamp(0.0, 1.0));
            let g = self.gain.advance();
            output.left[i] = input.left[i] * g;
            output.right[i] = input.right[i] * g;
        }

        if bypassed {
            output.copy_prefix(input, len);
        } else if amount <= 0.0 && (1.0 - self.gain.get()).abs() < 1e-4 {
            // Land exactly on unity so the next block takes the copy path.
            self.gain.set_immediate(1.0);
        }
    }

    fn reset(&mut self) {
        self.envelope.reset();
        self.gain.set_immediate(1.0);
    }

    fn input_ports(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "ducker"
    }
}
