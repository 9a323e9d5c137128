//! Arbor Core - compiled routing graph and utility DSP for plugin chains
//!
//! This crate holds the real-time half of the arbor routing engine: a graph of
//! [`AudioNode`]s that is edited and compiled on a control thread and executed
//! block by block on the audio thread, plus the small processing nodes the chain
//! layer inserts automatically around user plugins.
//!
//! # Core Abstractions
//!
//! ## Processing Graph
//!
//! - [`ProcessingGraph`] - Mutation side: topology, validation, compilation
//! - [`GraphRunner`] - Audio side: owns live nodes and runs the schedule
//! - [`GraphUpdate`] - The unit of change handed from one side to the other
//!
//! ## Utility Nodes
//!
//! - [`BranchGain`] - Ramped gain with a hard floor at -60 dB
//! - [`DryWetMix`] - Two-port crossfade between aligned dry and wet signals
//! - [`Ducker`] - Sidechain-driven attenuation
//! - [`MidSideNode`] - Self-inverse mid/side matrix stages
//! - [`FixedDelay`] - Integer-sample latency compensation
//! - [`MeterTap`] - Pass-through that publishes peak and RMS levels
//!
//! ## Parameter Smoothing
//!
//! - [`SmoothedParam`] - Exponential smoothing (RC-like response)
//! - [`LinearSmoothedParam`] - Linear ramps that land exactly on target
//!
//! ## Oversampling
//!
//! - [`Oversampler`] - Block-based stereo up/down sampler with a runtime factor
//!
//! # no_std Support
//!
//! The crate is `no_std` compatible with `alloc`. Disable the default `std`
//! feature to build for embedded targets:
//!
//! ```toml
//! [dependencies]
//! arbor-core = { version = "0.1", default-features = false }
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: Nothing in [`GraphRunner::process`] allocates, locks or frees
//! - **Atomic controls**: Non-structural parameters travel through [`AtomicF32`] cells
//! - **Whole-graph swaps**: The audio thread sees either the old schedule or the new one

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod audio_node;
pub mod control;
pub mod envelope;
pub mod gain;
pub mod graph;
pub mod math;
pub mod midi;
pub mod oversample;
pub mod param;
pub mod utility;

pub use audio_node::{AudioNode, NodeInputs};
pub use control::{AtomicF32, DuckControl};
pub use envelope::EnvelopeFollower;
pub use graph::{
    BufferPool, CompensationDelay, CompiledSchedule, DEFAULT_SWAP_CROSSFADE_MS, EdgeId, GraphError,
    GraphRunner, GraphUpdate, LiveNode, MidiSource, NodeId, NodeKind, Port, ProcessStep,
    ProcessingGraph, StereoBuffer,
};
pub use math::{db_to_linear, linear_to_db, wet_dry_mix};
pub use midi::{MidiBuffer, MidiEvent};
pub use oversample::{Oversampler, OversamplingFactor};
pub use param::{LinearSmoothedParam, SmoothedParam};
pub use utility::{
    BranchGain, DryWetMix, Ducker, FixedDelay, MeterReadings, MeterSnapshot, MeterTap,
    MidSideComponent, MidSideNode, MidSideStage,
};
