//! Reference plugins bundled with arbor.
//!
//! These are deliberately small: enough to build real chains from the CLI
//! and to exercise latency, state and sidechain handling without a plugin
//! host.
//!
//! | uid | Parameters | Latency |
//! |-----|------------|---------|
//! | `gain` | gain dB (−60…24) | 0 |
//! | `delay` | samples (0…48000) | the delay |
//! | `saturator` | drive dB (0…36) | 0 |
//! | `key_listen` | none | 0 |
//!
//! `key_listen` outputs its sidechain input when one is routed and its main
//! input otherwise.

use std::sync::Arc;

use arbor_core::{AtomicF32, CompensationDelay, MidiBuffer, db_to_linear};

use crate::error::PluginError;
use crate::plugin::{
    ParameterInfo, PluginAudio, PluginController, PluginIdentity, PluginInstance,
    PluginProcessor, PluginProvider,
};

/// Format string of every bundled plugin.
pub const BUILTIN_FORMAT: &str = "builtin";

/// Parameter index of the `delay` plugin's length.
pub const DELAY_SAMPLES_PARAM: usize = 0;

/// Longest delay the `delay` plugin accepts.
pub const MAX_DELAY_SAMPLES: usize = 48000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gain,
    Delay,
    Saturator,
    KeyListen,
}

impl Kind {
    const ALL: [Kind; 4] = [Kind::Gain, Kind::Delay, Kind::Saturator, Kind::KeyListen];

    fn uid(self) -> &'static str {
        match self {
            Kind::Gain => "gain",
            Kind::Delay => "delay",
            Kind::Saturator => "saturator",
            Kind::KeyListen => "key_listen",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Kind::Gain => "Gain",
            Kind::Delay => "Delay",
            Kind::Saturator => "Saturator",
            Kind::KeyListen => "Key Listen",
        }
    }

    fn from_uid(uid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.uid() == uid)
    }

    fn parameters(self) -> Vec<ParameterInfo> {
        match self {
            Kind::Gain => vec![ParameterInfo::new("Gain", -60.0, 24.0, 0.0)],
            Kind::Delay => vec![ParameterInfo::new(
                "Samples",
                0.0,
                MAX_DELAY_SAMPLES as f32,
                0.0,
            )],
            Kind::Saturator => vec![ParameterInfo::new("Drive", 0.0, 36.0, 6.0)],
            Kind::KeyListen => Vec::new(),
        }
    }

    fn identity(self) -> PluginIdentity {
        PluginIdentity::new(BUILTIN_FORMAT, self.uid(), self.display_name())
            .with_vendor("arbor")
            .with_version(env!("CARGO_PKG_VERSION"))
    }
}

/// [`PluginProvider`] for the bundled reference plugins.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinProvider;

impl BuiltinProvider {
    /// Creates the provider.
    pub fn new() -> Self {
        Self
    }

    /// Identity of the bundled plugin with this uid.
    pub fn identity(uid: &str) -> Option<PluginIdentity> {
        Kind::from_uid(uid).map(Kind::identity)
    }

    /// Identities of every bundled plugin.
    pub fn available() -> Vec<PluginIdentity> {
        Kind::ALL.into_iter().map(Kind::identity).collect()
    }
}

impl PluginProvider for BuiltinProvider {
    fn instantiate(
        &self,
        identity: &PluginIdentity,
        sample_rate: f32,
        max_block: usize,
    ) -> Result<PluginInstance, PluginError> {
        if identity.format != BUILTIN_FORMAT {
            return Err(PluginError::NotFound(format!(
                "{} ({})",
                identity.uid, identity.format
            )));
        }
        let kind = Kind::from_uid(&identity.uid)
            .ok_or_else(|| PluginError::NotFound(identity.uid.clone()))?;

        let controller = Arc::new(BuiltinController::new(kind));
        let mut processor = BuiltinProcessor::new(Arc::clone(&controller));
        processor.prepare(sample_rate, max_block);
        Ok(PluginInstance::new(Box::new(processor), controller))
    }
}

/// Parameter storage shared by a bundled plugin's two halves.
struct BuiltinController {
    kind: Kind,
    info: Vec<ParameterInfo>,
    values: Vec<AtomicF32>,
}

impl BuiltinController {
    fn new(kind: Kind) -> Self {
        let info = kind.parameters();
        let values = info.iter().map(|p| AtomicF32::new(p.default)).collect();
        Self { kind, info, values }
    }

    fn value(&self, index: usize) -> f32 {
        self.values.get(index).map_or(0.0, AtomicF32::load)
    }

    fn delay_samples(&self) -> usize {
        if self.kind == Kind::Delay {
            self.value(DELAY_SAMPLES_PARAM).round().max(0.0) as usize
        } else {
            0
        }
    }
}

impl PluginController for BuiltinController {
    fn latency_samples(&self) -> usize {
        self.delay_samples()
    }

    fn save_state(&self) -> Vec<u8> {
        let values: Vec<f32> = self.values.iter().map(AtomicF32::load).collect();
        serde_json::to_vec(&values).unwrap_or_default()
    }

    fn load_state(&self, data: &[u8]) -> Result<(), PluginError> {
        let values: Vec<f32> =
            serde_json::from_slice(data).map_err(|e| PluginError::InvalidState(e.to_string()))?;
        if values.len() != self.values.len() {
            return Err(PluginError::InvalidState(format!(
                "expected {} values, got {}",
                self.values.len(),
                values.len()
            )));
        }
        for ((cell, info), value) in self.values.iter().zip(&self.info).zip(values) {
            cell.store(info.clamp(value));
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.info.len()
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        self.info.get(index).cloned()
    }

    fn parameter(&self, index: usize) -> Option<f32> {
        self.values.get(index).map(AtomicF32::load)
    }

    fn set_parameter(&self, index: usize, value: f32) -> bool {
        match (self.values.get(index), self.info.get(index)) {
            (Some(cell), Some(info)) => {
                cell.store(info.clamp(value));
                true
            }
            _ => false,
        }
    }
}

struct BuiltinProcessor {
    controller: Arc<BuiltinController>,
    delay: CompensationDelay,
}

impl BuiltinProcessor {
    fn new(controller: Arc<BuiltinController>) -> Self {
        Self {
            controller,
            delay: CompensationDelay::new(0),
        }
    }
}

impl PluginProcessor for BuiltinProcessor {
    fn prepare(&mut self, _sample_rate: f32, _max_block: usize) {
        if self.controller.kind == Kind::Delay {
            self.delay = CompensationDelay::with_capacity(
                self.controller.delay_samples(),
                MAX_DELAY_SAMPLES,
            );
        }
    }

    fn process(
        &mut self,
        audio: &mut PluginAudio<'_>,
        midi_in: &MidiBuffer,
        midi_out: &mut MidiBuffer,
    ) {
        midi_out.copy_from(midi_in);
        match self.controller.kind {
            Kind::Gain => {
                let gain = db_to_linear(self.controller.value(0));
                for sample in audio.left.iter_mut().chain(audio.right.iter_mut()) {
                    *sample *= gain;
                }
            }
            Kind::Delay => {
                self.delay.set_delay(self.controller.delay_samples());
                self.delay.process_block_inplace(audio.left, audio.right);
            }
            Kind::Saturator => {
                let drive = db_to_linear(self.controller.value(0));
                for sample in audio.left.iter_mut().chain(audio.right.iter_mut()) {
                    *sample = (*sample * drive).tanh();
                }
            }
            Kind::KeyListen => {
                if let Some((left, right)) = audio.sidechain {
                    audio.left.copy_from_slice(left);
                    audio.right.copy_from_slice(right);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.delay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(uid: &str) -> PluginInstance {
        BuiltinProvider::new()
            .instantiate(&BuiltinProvider::identity(uid).unwrap(), 48000.0, 64)
            .unwrap()
    }

    #[test]
    fn unknown_uid_is_not_found() {
        let id = PluginIdentity::new(BUILTIN_FORMAT, "wobble", "Wobble");
        let err = BuiltinProvider::new()
            .instantiate(&id, 48000.0, 64)
            .unwrap_err();
        assert_eq!(err, PluginError::NotFound("wobble".into()));
    }

    #[test]
    fn foreign_format_is_not_found() {
        let mut id = BuiltinProvider::identity("gain").unwrap();
        id.format = "vst3".into();
        assert!(BuiltinProvider::new().instantiate(&id, 48000.0, 64).is_err());
    }

    #[test]
    fn every_builtin_instantiates() {
        for id in BuiltinProvider::available() {
            assert!(BuiltinProvider::new().instantiate(&id, 44100.0, 128).is_ok());
        }
    }

    #[test]
    fn delay_latency_follows_parameter() {
        let inst = instance("delay");
        assert_eq!(inst.controller.latency_samples(), 0);
        assert!(inst.controller.set_parameter(DELAY_SAMPLES_PARAM, 128.0));
        assert_eq!(inst.controller.latency_samples(), 128);
        assert!(!inst.controller.set_parameter(5, 1.0));
    }

    #[test]
    fn state_roundtrip_restores_parameters() {
        let a = instance("saturator");
        a.controller.set_parameter(0, 18.0);
        let blob = a.controller.save_state();

        let b = instance("saturator");
        b.controller.load_state(&blob).unwrap();
        assert_eq!(b.controller.parameter(0), Some(18.0));
    }

    #[test]
    fn malformed_state_is_rejected() {
        let inst = instance("gain");
        let err = inst.controller.load_state(b"not json").unwrap_err();
        assert!(matches!(err, PluginError::InvalidState(_)));
        let err = inst.controller.load_state(b"[1.0, 2.0]").unwrap_err();
        assert!(matches!(err, PluginError::InvalidState(_)));
    }

    #[test]
    fn gain_at_zero_db_is_exact() {
        let mut inst = instance("gain");
        let mut left = [0.25f32, -0.5, 0.75];
        let mut right = left;
        let midi = MidiBuffer::default();
        let mut midi_out = MidiBuffer::default();
        inst.processor.process(
            &mut PluginAudio {
                left: &mut left,
                right: &mut right,
                sidechain: None,
            },
            &midi,
            &mut midi_out,
        );
        assert_eq!(left, [0.25, -0.5, 0.75]);
    }

    #[test]
    fn key_listen_outputs_sidechain() {
        let mut inst = instance("key_listen");
        let mut left = [1.0f32; 4];
        let mut right = [1.0f32; 4];
        let key = [0.5f32; 4];
        let midi = MidiBuffer::default();
        let mut midi_out = MidiBuffer::default();
        inst.processor.process(
            &mut PluginAudio {
                left: &mut left,
                right: &mut right,
                sidechain: Some((&key, &key)),
            },
            &midi,
            &mut midi_out,
        );
        assert_eq!(left, key);
        assert_eq!(right, key);
    }
}
