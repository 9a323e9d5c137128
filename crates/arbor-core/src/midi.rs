//! Fixed-capacity MIDI event buffers.
//!
//! MIDI travels through the graph alongside audio: every node owns one
//! [`MidiBuffer`] for its output events, preallocated when the node is
//! created. Pushing past capacity drops the event instead of allocating.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Default number of events a buffer holds per block.
pub const DEFAULT_MIDI_CAPACITY: usize = 256;

/// A short MIDI message with its sample offset inside the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Sample offset from the start of the block.
    pub offset: u32,
    /// Raw message bytes; only the first `len` are meaningful.
    pub data: [u8; 3],
    /// Number of valid bytes in `data`.
    pub len: u8,
}

impl MidiEvent {
    /// Builds a three-byte channel message.
    pub fn new(offset: u32, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            offset,
            data: [status, data1, data2],
            len: 3,
        }
    }

    /// The valid message bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(3))]
    }
}

/// Preallocated list of [`MidiEvent`]s for one block.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
}

impl MidiBuffer {
    /// Creates an empty buffer with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event. Returns `false` and drops it when full.
    #[inline]
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push(event);
        true
    }

    /// Removes all events, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Replaces the contents with `other`'s, truncating at capacity.
    pub fn copy_from(&mut self, other: &MidiBuffer) {
        self.events.clear();
        let n = other.events.len().min(self.capacity);
        self.events.extend_from_slice(&other.events[..n]);
    }

    /// Events in insertion order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are stored.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MIDI_CAPACITY)
    }
}
