//! Arbor Chain - nested serial/parallel plugin chains on the arbor routing graph
//!
//! A chain is a tree: plugin leaves inside groups that run their children
//! either one after another or side by side. This crate keeps that tree,
//! compiles it onto an [`arbor_core::ProcessingGraph`] with latency
//! compensation, and hands finished graphs to the audio thread.
//!
//! # Core Abstractions
//!
//! ## Control Side
//!
//! - [`ChainProcessor`] - Owns the tree; every mutation rebuilds and publishes
//! - [`ChainListener`] - Observer for structure, latency and binding changes
//! - [`PluginProvider`] - Creates plugin instances from a [`PluginIdentity`]
//!
//! ## Audio Side
//!
//! - [`ChainAudio`] - Runs the compiled graph inside the oversampling stage
//! - [`ChainShared`] - Lock-free bridge between the two sides
//!
//! ## Persistence
//!
//! - [`ChainDocument`] - Versioned JSON form of a tree
//! - [`ChainSnapshot`] - Strict all-or-nothing capture/restore
//! - [`EngineConfig`] - TOML engine settings
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor_chain::{BuiltinProvider, ChainNodeId, ChainProcessor, EngineConfig, GroupMode};
//!
//! let (mut chain, _audio) =
//!     ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
//! let gain = BuiltinProvider::identity("gain").unwrap();
//! let delay = BuiltinProvider::identity("delay").unwrap();
//! let a = chain.add_plugin(gain, ChainNodeId::ROOT, 0).unwrap();
//! let b = chain.add_plugin(delay, ChainNodeId::ROOT, 1).unwrap();
//! chain.create_group(&[a, b], GroupMode::Parallel, None).unwrap();
//! assert_eq!(chain.plugin_count(), 2);
//! ```

pub mod audio;
pub mod builtin;
pub mod config;
pub mod error;
pub mod latency;
pub mod listener;
pub mod plugin;
mod plugin_node;
pub mod processor;
pub mod serialize;
pub mod shared;
pub mod snapshot;
pub mod tree;
pub mod wiring;

pub use audio::ChainAudio;
pub use builtin::{BUILTIN_FORMAT, BuiltinProvider};
pub use config::EngineConfig;
pub use error::{ChainError, ConfigError, PluginError};
pub use latency::{branch_compensation, compute_node_latency};
pub use listener::ChainListener;
pub use plugin::{
    ParameterInfo, PluginAudio, PluginController, PluginIdentity, PluginInstance, PluginProcessor,
    PluginProvider,
};
pub use processor::{BypassState, ChainProcessor, DEFAULT_GROUP_NAME, DRY_PATH_NAME, LeafMeters};
pub use serialize::{
    ChainDocument, DOCUMENT_VERSION, GroupDocument, NodeDocument, PluginDocument, SlotDocument,
    document_from_tree, tree_from_document,
};
pub use shared::{ChainShared, FlatPlugin, ProcessSetup};
pub use snapshot::{ChainSnapshot, RestoreReport};
pub use tree::{
    ChainNode, ChainNodeId, FULL_WET, GroupData, GroupMode, MidSideMode, NodeKind, PluginLeaf,
    PluginStatus, SidechainSource,
};
pub use wiring::WireResult;
