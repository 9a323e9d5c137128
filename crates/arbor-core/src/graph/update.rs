//! The unit of change handed from the control thread to the audio thread.
//!
//! A [`GraphUpdate`] carries everything the runner needs to move from one
//! topology to the next in a single step: the new schedule, nodes to insert,
//! slots to vacate, and replacement storage when the graph outgrew what the
//! runner holds. The runner applies it with moves only and hands the same
//! value back, now holding the retired nodes and replaced storage, so that
//! all freeing happens on the control thread.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, sync::Arc, vec::Vec};
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::AudioNode;
use crate::midi::MidiBuffer;

use super::buffer::BufferPool;
use super::schedule::CompiledSchedule;

/// A node as owned by the runner: the processor plus its MIDI output buffer.
pub struct LiveNode {
    pub(crate) node: Box<dyn AudioNode>,
    pub(crate) midi_out: MidiBuffer,
}

impl LiveNode {
    pub(crate) fn new(node: Box<dyn AudioNode>) -> Self {
        Self {
            node,
            midi_out: MidiBuffer::default(),
        }
    }

    /// The wrapped processor.
    pub fn node(&self) -> &dyn AudioNode {
        self.node.as_ref()
    }
}

impl core::fmt::Debug for LiveNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LiveNode")
            .field("name", &self.node.name())
            .finish_non_exhaustive()
    }
}

/// A topology change, or the garbage left over after applying one.
#[derive(Debug, Default)]
pub struct GraphUpdate {
    pub(crate) schedule: Option<Arc<CompiledSchedule>>,
    pub(crate) inserted: Vec<(usize, LiveNode)>,
    pub(crate) removed: Vec<usize>,
    pub(crate) retired: Vec<LiveNode>,
    pub(crate) pool: Option<BufferPool>,
    pub(crate) slots: Option<Vec<Option<LiveNode>>>,
    pub(crate) replaced_schedule: Option<Arc<CompiledSchedule>>,
    /// Format the inserted nodes and buffers were prepared for.
    pub(crate) sample_rate: f32,
    pub(crate) block_size: usize,
}

impl GraphUpdate {
    /// The schedule this update installs.
    pub fn schedule(&self) -> Option<&Arc<CompiledSchedule>> {
        self.schedule.as_ref()
    }

    /// Sample rate and block size the update was compiled for.
    pub fn format(&self) -> (f32, usize) {
        (self.sample_rate, self.block_size)
    }

    /// Whether the update can be installed into a runner prepared at
    /// `sample_rate` for blocks of `block_size`.
    pub fn matches_format(&self, sample_rate: f32, block_size: usize) -> bool {
        self.sample_rate == sample_rate && self.block_size == block_size
    }

    /// Number of nodes this update inserts.
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    /// Number of slots this update vacates.
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    /// Number of nodes the runner handed back after applying.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Takes the retired nodes out of a returned update.
    pub fn take_retired(&mut self) -> Vec<LiveNode> {
        core::mem::take(&mut self.retired)
    }

    /// Folds a newer update into one the runner has not consumed yet.
    ///
    /// Nodes inserted by `self` and removed by `newer` never reach the audio
    /// thread; they are dropped here, on the caller's thread.
    pub fn merge(&mut self, mut newer: GraphUpdate) {
        for slot in newer.removed.drain(..) {
            if let Some(pos) = self.inserted.iter().position(|(s, _)| *s == slot) {
                let (_, cancelled) = self.inserted.swap_remove(pos);
                drop(cancelled);
            } else if !self.removed.contains(&slot) {
                self.removed.push(slot);
            }
        }
        self.inserted.append(&mut newer.inserted);
        self.schedule = newer.schedule.take().or(self.schedule.take());
        self.pool = newer.pool.take().or(self.pool.take());
        self.slots = newer.slots.take().or(self.slots.take());
        self.sample_rate = newer.sample_rate;
        self.block_size = newer.block_size;
        self.reserve_retired();
    }

    /// Ensures the runner can retire every touched slot without allocating.
    pub(crate) fn reserve_retired(&mut self) {
        let needed = self.removed.len() + self.inserted.len();
        if self.retired.capacity() < needed {
            self.retired.reserve_exact(needed - self.retired.len());
        }
    }
}
