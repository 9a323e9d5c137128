//! The plugin hosting boundary.
//!
//! Arbor never loads plugin binaries itself. A [`PluginProvider`] turns a
//! [`PluginIdentity`] into a [`PluginInstance`], which is split the same way
//! the chain is split:
//!
//! - [`PluginProcessor`] moves to the audio thread inside the graph and is
//!   only ever called from there.
//! - [`PluginController`] stays on the control side (shared, `Sync`) and
//!   answers latency, state and parameter queries while the processor runs.
//!
//! ## Example
//!
//! ```rust
//! use arbor_chain::{BuiltinProvider, PluginController, PluginProvider};
//!
//! let provider = BuiltinProvider::new();
//! let instance = provider
//!     .instantiate(&BuiltinProvider::identity("gain").unwrap(), 48000.0, 256)
//!     .unwrap();
//! assert_eq!(instance.controller.latency_samples(), 0);
//! ```

use std::fmt;
use std::sync::Arc;

use arbor_core::MidiBuffer;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Describes which plugin a leaf hosts.
///
/// Opaque to the chain: it is compared, stored and handed back to the
/// provider, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginIdentity {
    /// Plugin format (e.g. `"clap"`, `"vst3"`, `"builtin"`).
    pub format: String,
    /// Format-specific unique id.
    pub uid: String,
    /// File or bundle the plugin lives in.
    pub file: String,
    /// Vendor name.
    pub vendor: String,
    /// Display name.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl PluginIdentity {
    /// Creates an identity with format, unique id and display name.
    pub fn new(
        format: impl Into<String>,
        uid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            format: format.into(),
            uid: uid.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the vendor.
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Sets the file or bundle reference.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vendor.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.vendor, self.name)
        }
    }
}

/// Range and default of one plugin parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    /// Display name.
    pub name: String,
    /// Minimum value.
    pub min: f32,
    /// Maximum value.
    pub max: f32,
    /// Default value.
    pub default: f32,
}

impl ParameterInfo {
    /// Creates a parameter description.
    pub fn new(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default,
        }
    }

    /// Clamps `value` into range.
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Stereo audio handed to a plugin for one block.
///
/// `left`/`right` hold the input on entry and must hold the output on
/// return. `sidechain` is present only when the leaf routes one.
pub struct PluginAudio<'a> {
    /// Left channel, processed in place.
    pub left: &'a mut [f32],
    /// Right channel, processed in place.
    pub right: &'a mut [f32],
    /// Auxiliary stereo input.
    pub sidechain: Option<(&'a [f32], &'a [f32])>,
}

impl PluginAudio<'_> {
    /// Samples in this block.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// True for an empty block.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// The real-time half of a plugin instance.
///
/// Lives inside the graph runner once the instance is wired; `process` must
/// not allocate, lock or block.
pub trait PluginProcessor: Send {
    /// Prepares for a sample rate and maximum block size. May allocate.
    fn prepare(&mut self, sample_rate: f32, max_block: usize);

    /// Processes one block in place.
    fn process(
        &mut self,
        audio: &mut PluginAudio<'_>,
        midi_in: &MidiBuffer,
        midi_out: &mut MidiBuffer,
    );

    /// Clears internal state (delay lines, envelopes).
    fn reset(&mut self) {}
}

/// The thread-safe control half of a plugin instance.
pub trait PluginController: Send + Sync {
    /// Latency the plugin currently reports, in samples.
    fn latency_samples(&self) -> usize;

    /// Serializes the plugin's state into an opaque blob.
    fn save_state(&self) -> Vec<u8>;

    /// Restores state from a blob produced by [`save_state`](Self::save_state).
    fn load_state(&self, data: &[u8]) -> Result<(), PluginError>;

    /// Number of automatable parameters.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Description of parameter `index`.
    fn parameter_info(&self, _index: usize) -> Option<ParameterInfo> {
        None
    }

    /// Current value of parameter `index`.
    fn parameter(&self, _index: usize) -> Option<f32> {
        None
    }

    /// Sets parameter `index`. Returns `false` if it does not exist.
    fn set_parameter(&self, _index: usize, _value: f32) -> bool {
        false
    }
}

/// A freshly created plugin: processor and controller of the same instance.
pub struct PluginInstance {
    /// Audio-thread half.
    pub processor: Box<dyn PluginProcessor>,
    /// Control-side half.
    pub controller: Arc<dyn PluginController>,
}

impl PluginInstance {
    /// Pairs a processor with its controller.
    pub fn new(
        processor: Box<dyn PluginProcessor>,
        controller: Arc<dyn PluginController>,
    ) -> Self {
        Self {
            processor,
            controller,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("latency", &self.controller.latency_samples())
            .finish_non_exhaustive()
    }
}

/// Creates plugin instances from identities.
///
/// Implemented by the host application (plugin scanner, format loaders) or
/// by [`BuiltinProvider`](crate::BuiltinProvider) for the bundled reference
/// plugins.
pub trait PluginProvider: Send + Sync {
    /// Instantiates `identity`, prepared for `sample_rate` and `max_block`.
    fn instantiate(
        &self,
        identity: &PluginIdentity,
        sample_rate: f32,
        max_block: usize,
    ) -> Result<PluginInstance, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_builder_sets_fields() {
        let id = PluginIdentity::new("clap", "com.acme.verb", "Verb")
            .with_vendor("Acme")
            .with_file("/plugins/verb.clap")
            .with_version("1.2.0");
        assert_eq!(id.vendor, "Acme");
        assert_eq!(id.file, "/plugins/verb.clap");
        assert_eq!(id.to_string(), "Acme Verb");
    }

    #[test]
    fn identity_serde_uses_camel_case_and_defaults() {
        let id: PluginIdentity =
            serde_json::from_str(r#"{"format":"vst3","uid":"abc","name":"Comp"}"#).unwrap();
        assert_eq!(id, PluginIdentity::new("vst3", "abc", "Comp"));
    }

    #[test]
    fn parameter_info_clamps() {
        let info = ParameterInfo::new("Gain", -24.0, 24.0, 0.0);
        assert_eq!(info.clamp(30.0), 24.0);
        assert_eq!(info.clamp(-30.0), -24.0);
    }
}
