//! Directed connections between graph nodes.
//!
//! An edge carries either stereo audio into one of the destination's ports or
//! the source's MIDI output into the destination's MIDI input. Several audio
//! edges may land on the same port; the compiler sums them.

use super::node::NodeId;

/// Identifier for an edge. Not reused within a graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    /// Raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

/// Destination port of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Audio port 0.
    Main,
    /// Audio port 1: wet input of a crossfade, sidechain of a ducker or plugin.
    Aux,
    /// MIDI input. At most one source per node.
    Midi,
}

impl Port {
    pub(crate) fn is_audio(self) -> bool {
        !matches!(self, Port::Midi)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub port: Port,
}
