//! Compiled schedule types.
//!
//! A [`CompiledSchedule`] is the immutable result of
//! [`ProcessingGraph::compile()`](super::ProcessingGraph::compile): a flat list
//! of [`ProcessStep`]s the audio thread walks top to bottom, plus the facts
//! the control side reports (latency, buffer count, alignment check).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Where a node's MIDI input comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiSource {
    /// No MIDI.
    None,
    /// The external MIDI passed to the runner.
    External,
    /// The MIDI output of the node in this slot.
    Node(usize),
}

/// One instruction of a compiled schedule.
///
/// Every variant is plain data; executing a step never allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessStep {
    /// Copy the external audio input into a buffer.
    WriteInput {
        /// Destination slot.
        buffer_idx: usize,
    },

    /// Zero a buffer before several sources are summed into it.
    ClearBuffer {
        /// Slot to clear.
        buffer_idx: usize,
    },

    /// Add one buffer into another.
    AccumulateBuffer {
        /// Slot to read.
        source_buf: usize,
        /// Slot to add into.
        dest_buf: usize,
    },

    /// Run one node.
    ProcessNode {
        /// Slot of the node in the runner.
        node_idx: usize,
        /// Buffer feeding port 0, or `None` for silence.
        main: Option<usize>,
        /// Buffer feeding port 1, if connected.
        aux: Option<usize>,
        /// Buffer the node writes.
        output_buf: usize,
        /// MIDI input of the node.
        midi: MidiSource,
    },

    /// Copy the final mix to the external output.
    ReadOutput {
        /// Buffer to read, or `None` for silence.
        buffer_idx: Option<usize>,
        /// MIDI forwarded to the external output.
        midi: MidiSource,
    },
}

/// Immutable compiled form of a graph.
#[derive(Debug)]
pub struct CompiledSchedule {
    pub(crate) steps: Vec<ProcessStep>,
    pub(crate) buffer_count: usize,
    pub(crate) total_latency: usize,
    pub(crate) misaligned_inputs: usize,
    /// Slot count the runner must provide.
    pub(crate) slot_count: usize,
}

impl CompiledSchedule {
    /// Number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ProcessStep] {
        &self.steps
    }

    /// Physical buffers needed.
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Longest input-to-output latency in samples.
    pub fn total_latency(&self) -> usize {
        self.total_latency
    }

    /// Number of merge points whose sources arrive with different latencies.
    ///
    /// Counts ports summing sources of unequal latency, and two-port nodes that
    /// require alignment whose ports disagree. A correctly compensated graph
    /// reports zero.
    pub fn misaligned_inputs(&self) -> usize {
        self.misaligned_inputs
    }
}
