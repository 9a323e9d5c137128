//! Error types for chain mutation, plugin hosting and configuration.

use std::path::PathBuf;

use arbor_core::GraphError;
use thiserror::Error;

use crate::plugin::PluginIdentity;
use crate::tree::ChainNodeId;

/// Errors returned by [`ChainProcessor`](crate::ChainProcessor) operations.
///
/// Structural errors are detected before anything is changed: when one of
/// these is returned, the tree and the live graph are exactly as they were.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No node with this id exists in the tree.
    #[error("node {0} not found")]
    NodeNotFound(ChainNodeId),

    /// The operation needs a group, but the node is a plugin.
    #[error("node {0} is not a group")]
    NotAGroup(ChainNodeId),

    /// The operation needs a parallel group.
    #[error("node {0} is not a parallel group")]
    NotParallel(ChainNodeId),

    /// The operation needs a plugin leaf, but the node is a group.
    #[error("node {0} is not a plugin")]
    NotAPlugin(ChainNodeId),

    /// The root group cannot be removed, moved, grouped or dissolved.
    #[error("the root group cannot be changed this way")]
    RootImmutable,

    /// Moving a node into its own subtree.
    #[error("moving node {node} into {target} would create a cycle")]
    WouldCreateCycle {
        /// Node being moved.
        node: ChainNodeId,
        /// Requested new parent.
        target: ChainNodeId,
    },

    /// Nodes passed to a grouping operation do not share one parent.
    #[error("selected nodes do not share a parent")]
    ParentMismatch,

    /// A grouping operation received no nodes.
    #[error("no nodes selected")]
    EmptySelection,

    /// The provider could not create a plugin instance.
    #[error("failed to instantiate '{identity}': {source}")]
    Instantiation {
        /// Plugin that failed.
        identity: PluginIdentity,
        /// Provider error.
        #[source]
        source: PluginError,
    },

    /// A live instance rejected a state blob.
    #[error("node {node} rejected its state: {source}")]
    PluginState {
        /// Leaf whose instance rejected the state.
        node: ChainNodeId,
        /// Controller error.
        #[source]
        source: PluginError,
    },

    /// No plugin at this position of the flattened list.
    #[error("no plugin at flat index {0}")]
    FlatIndexOutOfRange(usize),

    /// The engine was shut down; structural changes are refused.
    #[error("chain has been shut down")]
    ShutDown,

    /// A restore referenced plugins that could not be instantiated.
    #[error("{} plugin(s) unavailable: {}", .0.len(), join_names(.0))]
    MissingPlugins(Vec<PluginIdentity>),

    /// A chain document could not be parsed or is malformed.
    #[error("invalid chain document: {0}")]
    Document(String),

    /// The routing graph rejected a wiring step.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Engine configuration failed to load or save.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Document(err.to_string())
    }
}

fn join_names(identities: &[PluginIdentity]) -> String {
    identities
        .iter()
        .map(|id| id.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reported by a [`PluginProvider`](crate::PluginProvider) or a
/// [`PluginController`](crate::PluginController).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The provider does not know this identity.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// The plugin exists but could not be created.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// A state blob was rejected.
    #[error("invalid plugin state: {0}")]
    InvalidState(String),
}

/// Errors that can occur while loading or saving [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    // --- ChainError ---

    #[test]
    fn missing_plugins_lists_names() {
        let err = ChainError::MissingPlugins(vec![
            PluginIdentity::new("test", "a", "Alpha"),
            PluginIdentity::new("test", "b", "Beta"),
        ]);
        assert_eq!(err.to_string(), "2 plugin(s) unavailable: Alpha, Beta");
    }

    #[test]
    fn cycle_display_names_both_nodes() {
        let err = ChainError::WouldCreateCycle {
            node: ChainNodeId(3),
            target: ChainNodeId(7),
        };
        assert_eq!(err.to_string(), "moving node 3 into 7 would create a cycle");
    }

    #[test]
    fn instantiation_exposes_plugin_error() {
        let err = ChainError::Instantiation {
            identity: PluginIdentity::new("test", "x", "X"),
            source: PluginError::NotFound("x".into()),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("'X'"), "got: {err}");
    }

    #[test]
    fn graph_error_converts() {
        let err: ChainError = GraphError::CycleDetected.into();
        assert!(matches!(err, ChainError::Graph(GraphError::CycleDetected)));
    }

    #[test]
    fn json_error_becomes_document_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ChainError = json_err.into();
        assert!(matches!(err, ChainError::Document(_)));
    }

    // --- ConfigError ---

    #[test]
    fn read_file_factory_produces_correct_variant() {
        let err = ConfigError::read_file("/some/path", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/some/path"))
        );
    }

    #[test]
    fn write_file_display() {
        let err = ConfigError::write_file("/a/engine.toml", mock_io_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to write file"), "got: {msg}");
        assert!(msg.contains("/a/engine.toml"), "got: {msg}");
    }

    #[test]
    fn create_dir_source_is_some() {
        let err = ConfigError::create_dir("/x", mock_io_err());
        assert!(err.source().is_some(), "CreateDir must expose I/O source");
    }

    #[test]
    fn config_error_is_transparent_in_chain_error() {
        let err: ChainError = ConfigError::read_file("/cfg.toml", mock_io_err()).into();
        assert!(err.to_string().starts_with("failed to read file"), "got: {err}");
    }
}
