//! Graph node identity and mutation-side bookkeeping.
//!
//! Slots are reused after removal, so a [`NodeId`] carries a generation: an
//! id kept across a rebuild that removed its node stops resolving instead of
//! silently pointing at whatever was added into the slot later.

#[cfg(not(feature = "std"))]
use alloc::string::String;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use super::edge::EdgeId;

/// Generational handle to a node in a [`ProcessingGraph`](super::ProcessingGraph).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    /// Slot index inside the graph.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this id was issued.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

/// The role of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// External audio and MIDI input. Exactly one per graph.
    Input,
    /// Final audio and MIDI output. Exactly one per graph.
    Output,
    /// An [`AudioNode`](crate::AudioNode) owned by the runner.
    Process,
}

/// Topology and compile-time facts about one node.
///
/// The processing object itself lives on the audio side; only what the
/// compiler needs is mirrored here.
#[derive(Debug)]
pub(crate) struct NodeData {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub latency: usize,
    pub input_ports: usize,
    pub requires_aligned: bool,
    pub incoming: Vec<EdgeId>,
    pub outgoing: Vec<EdgeId>,
}

impl NodeData {
    pub fn new(id: NodeId, kind: NodeKind, label: String) -> Self {
        Self {
            id,
            kind,
            label,
            latency: 0,
            input_ports: 1,
            requires_aligned: false,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }
}
