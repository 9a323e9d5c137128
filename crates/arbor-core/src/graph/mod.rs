//! Compiled routing graph for plugin chains.
//!
//! Edit the graph on a control thread (add, remove, connect), compile it to a
//! [`CompiledSchedule`], then hand the result to the audio thread, which walks
//! the schedule block by block with zero allocations.
//!
//! # Architecture
//!
//! The engine is split in two objects that never share mutable state:
//!
//! - [`ProcessingGraph`]: owned by the control thread. Holds topology and
//!   cached latencies, stages new nodes, runs [`compile()`](ProcessingGraph::compile).
//! - [`GraphRunner`]: owned by the audio thread. Holds the live
//!   [`AudioNode`](crate::AudioNode)s, the [`BufferPool`] and the current schedule.
//!
//! A [`GraphUpdate`] moves from one to the other and back. On the way in it
//! carries the new schedule and new nodes; on the way out it carries retired
//! nodes and replaced storage, which are dropped on the control thread.
//!
//! # Buffer Efficiency
//!
//! Buffer assignment uses liveness analysis: a buffer is live from the step
//! that writes it to the last step that reads it. A 20-node linear chain uses
//! exactly 2 buffers.
//!
//! # Latency
//!
//! Each node's latency is captured when it is added and can be updated with
//! [`set_node_latency()`](ProcessingGraph::set_node_latency). Compilation
//! computes arrival latency per node and flags merge points whose inputs
//! arrive unaligned. Compensation itself is inserted by the caller as
//! [`FixedDelay`](crate::FixedDelay) nodes.
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::graph::{GraphRunner, Port, ProcessingGraph};
//!
//! let mut graph = ProcessingGraph::new(48000.0, 256);
//! let gain = graph.add_node(Box::new(BranchGain::new(control)));
//! graph.connect(graph.input(), gain, Port::Main)?;
//! graph.connect(gain, graph.output(), Port::Main)?;
//!
//! let mut runner = GraphRunner::new(48000.0, 256);
//! let garbage = runner.apply(graph.compile()?);
//! runner.process(&left_in, &right_in, &mut left_out, &mut right_out, &midi_in, &mut midi_out);
//! ```

pub mod buffer;
pub mod edge;
pub mod node;
mod processing;
mod runner;
pub mod schedule;
mod update;

pub use buffer::{BufferPool, CompensationDelay, StereoBuffer};
pub use edge::{EdgeId, Port};
pub use node::{NodeId, NodeKind};
pub use processing::{GraphError, ProcessingGraph};
pub use runner::{DEFAULT_SWAP_CROSSFADE_MS, GraphRunner};
pub use schedule::{CompiledSchedule, MidiSource, ProcessStep};
pub use update::{GraphUpdate, LiveNode};
