//! The processing-node trait executed by the graph runner.
//!
//! Every vertex of a compiled graph that does work on the audio thread is an
//! [`AudioNode`]: user plugins (wrapped by the chain layer) and the utility
//! nodes in [`crate::utility`] alike.
//!
//! ## Contract
//!
//! - `process` must write all `len` samples of `output` and may not allocate.
//! - Input port 0 (main) is always present; when nothing is connected it reads
//!   silence. Port 1 (aux) is only offered to nodes that declare two ports.
//! - `latency_samples` is read on the control thread when the node is added
//!   to a graph and feeds the compile-time latency map.

use crate::graph::StereoBuffer;
use crate::midi::MidiBuffer;

/// The inputs a node sees for one block.
pub struct NodeInputs<'a> {
    /// Port 0. Silence when unconnected.
    pub main: &'a StereoBuffer,
    /// Port 1 (wet signal, sidechain). `None` when unconnected.
    pub aux: Option<&'a StereoBuffer>,
    /// Incoming MIDI events.
    pub midi: &'a MidiBuffer,
}

/// Object-safe block processor living in a graph.
pub trait AudioNode: Send {
    /// Prepares internal state for a sample rate and maximum block size.
    ///
    /// Called on the control thread before the node is handed to the audio
    /// thread. All allocation happens here.
    fn prepare(&mut self, sample_rate: f32, max_block: usize);

    /// Processes one block of `len` samples.
    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        midi_out: &mut MidiBuffer,
        len: usize,
    );

    /// Clears internal state without changing settings.
    fn reset(&mut self) {}

    /// Latency this node adds, in samples.
    fn latency_samples(&self) -> usize {
        0
    }

    /// Number of stereo input ports (1 or 2).
    fn input_ports(&self) -> usize {
        1
    }

    /// Whether the node's inputs must arrive time-aligned.
    ///
    /// The compiler counts violations so that misaligned wiring shows up in
    /// [`CompiledSchedule::misaligned_inputs`](crate::CompiledSchedule::misaligned_inputs).
    fn requires_aligned_inputs(&self) -> bool {
        false
    }

    /// Short label for logs and debugging.
    fn name(&self) -> &str;
}
