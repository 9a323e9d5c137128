//! Graph node wrapping a plugin processor.
//!
//! A [`PluginNode`] is added to the graph once, when its leaf gets an
//! instance, and survives every rebuild until the leaf is removed. It always
//! declares two input ports; the wiring only connects the aux port when the
//! leaf routes a sidechain.
//!
//! Bypass is a 5 ms linear crossfade between the plugin output and the input
//! delayed by the plugin's latency, so a bypassed plugin keeps its place in
//! the latency map and toggling bypass never shifts the signal in time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_core::{
    AudioNode, CompensationDelay, LinearSmoothedParam, MidiBuffer, NodeInputs, StereoBuffer,
    wet_dry_mix,
};

use crate::plugin::{PluginAudio, PluginController, PluginProcessor};

/// Bypass crossfade time.
pub const BYPASS_FADE_MS: f32 = 5.0;

pub(crate) struct PluginNode {
    processor: Box<dyn PluginProcessor>,
    controller: Arc<dyn PluginController>,
    bypass: Arc<AtomicBool>,
    // 1.0 = processed, 0.0 = bypassed
    fade: LinearSmoothedParam,
    dry: StereoBuffer,
    dry_delay: CompensationDelay,
    label: String,
}

impl PluginNode {
    pub(crate) fn new(
        processor: Box<dyn PluginProcessor>,
        controller: Arc<dyn PluginController>,
        bypass: Arc<AtomicBool>,
        label: String,
    ) -> Self {
        let active = if bypass.load(Ordering::Acquire) { 0.0 } else { 1.0 };
        Self {
            processor,
            controller,
            bypass,
            fade: LinearSmoothedParam::with_config(active, 48000.0, BYPASS_FADE_MS),
            dry: StereoBuffer::default(),
            dry_delay: CompensationDelay::new(0),
            label,
        }
    }
}

impl AudioNode for PluginNode {
    fn prepare(&mut self, sample_rate: f32, max_block: usize) {
        self.processor.prepare(sample_rate, max_block);
        self.dry.resize(max_block);

        let latency = self.controller.latency_samples();
        // Room for a second of drift before the dry path has to clamp.
        let capacity = latency.max(sample_rate as usize);
        self.dry_delay = CompensationDelay::with_capacity(latency, capacity);

        self.fade.set_sample_rate(sample_rate);
        let active = if self.bypass.load(Ordering::Acquire) { 0.0 } else { 1.0 };
        self.fade.set_immediate(active);
    }

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        let latency = self.controller.latency_samples();
        if latency != self.dry_delay.delay_samples() {
            self.dry_delay.set_delay(latency);
        }
        let bypassed = self.bypass.load(Ordering::Acquire);
        self.fade.set_target(if bypassed { 0.0 } else { 1.0 });

        // The dry line runs every block so it is primed when bypass engages.
        self.dry.copy_prefix(inputs.main, len);
        self.dry_delay
            .process_block_inplace(&mut self.dry.left[..len], &mut self.dry.right[..len]);

        if bypassed && self.fade.is_settled() {
            output.copy_prefix(&self.dry, len);
            midi_out.copy_from(inputs.midi);
            return;
        }

        output.copy_prefix(inputs.main, len);
        let (left, right) = (&mut output.left[..len], &mut output.right[..len]);
        let mut audio = PluginAudio {
            left,
            right,
            sidechain: inputs.aux.map(|sc| (&sc.left[..len], &sc.right[..len])),
        };
        self.processor.process(&mut audio, inputs.midi, midi_out);

        if !self.fade.is_settled() {
            for i in 0..len {
                let mix = self.fade.advance();
                output.left[i] = wet_dry_mix(self.dry.left[i], output.left[i], mix);
                output.right[i] = wet_dry_mix(self.dry.right[i], output.right[i], mix);
            }
        }
    }

    fn reset(&mut self) {
        self.processor.reset();
        self.dry_delay.clear();
        self.fade.snap_to_target();
    }

    fn latency_samples(&self) -> usize {
        self.controller.latency_samples()
    }

    fn input_ports(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        &self.label
    }
}
