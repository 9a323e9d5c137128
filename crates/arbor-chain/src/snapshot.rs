//! Capture and restore of whole chains.
//!
//! Two restore paths exist. The strict one ([`ChainProcessor::restore_snapshot`],
//! [`ChainProcessor::import_json`]) instantiates every plugin of the incoming
//! tree before touching the live one and gives up on the first missing
//! identity. The lenient one ([`ChainProcessor::load_state`]) is for host
//! session recall: whatever cannot be created stays in the tree as an
//! unavailable leaf with its state kept, so a later save writes it back.

use crate::error::ChainError;
use crate::plugin::PluginIdentity;
use crate::processor::{ChainProcessor, instantiate_tree, release_instances};
use crate::serialize::{ChainDocument, document_from_tree, from_json, to_json, tree_from_document};
use crate::tree::{ChainNode, ChainNodeId};

/// Chain description plus the latency it had when captured.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSnapshot {
    /// Tree and plugin state.
    pub document: ChainDocument,
    /// Host latency at capture time.
    pub latency_samples: usize,
}

/// Outcome of a lenient restore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Plugin leaves in the restored tree.
    pub plugin_count: usize,
    /// Leaves left without an instance.
    pub unavailable: Vec<(ChainNodeId, PluginIdentity)>,
}

impl RestoreReport {
    /// True when every plugin was instantiated.
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_empty()
    }
}

impl ChainProcessor {
    /// Captures the current tree with every plugin's state.
    pub fn capture_snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            document: document_from_tree(&self.root),
            latency_samples: self.host_latency_samples(),
        }
    }

    /// Replaces the chain with a snapshot, all or nothing.
    ///
    /// On [`ChainError::MissingPlugins`] nothing changed.
    pub fn restore_snapshot(&mut self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        self.restore_strict(&snapshot.document)
    }

    /// Host state blob: the chain document as JSON bytes.
    pub fn save_state(&self) -> Result<Vec<u8>, ChainError> {
        Ok(serde_json::to_vec(&document_from_tree(&self.root))?)
    }

    /// Restores a host state blob.
    ///
    /// Plugins that cannot be created become unavailable leaves, are
    /// reported to listeners and listed in the returned report.
    pub fn load_state(&mut self, data: &[u8]) -> Result<RestoreReport, ChainError> {
        self.begin_edit()?;
        let doc: ChainDocument = serde_json::from_slice(data)?;
        let mut tree = tree_from_document(&doc)?;
        let (_, failures) = instantiate_tree(&mut self.graph, &*self.provider, &mut tree);

        self.install_tree(tree)?;
        self.report_failures(&failures);

        let report = RestoreReport {
            plugin_count: self.plugin_count(),
            unavailable: failures
                .into_iter()
                .map(|(node, identity, _)| (node, identity))
                .collect(),
        };
        tracing::info!(
            "ChainProcessor: state loaded, {} plugin(s), {} unavailable",
            report.plugin_count,
            report.unavailable.len()
        );
        Ok(report)
    }

    /// Chain document as pretty JSON, for exchange between applications.
    pub fn export_json(&self) -> Result<String, ChainError> {
        to_json(&document_from_tree(&self.root))
    }

    /// Replaces the chain with a JSON document, all or nothing.
    pub fn import_json(&mut self, json: &str) -> Result<(), ChainError> {
        let doc = from_json(json)?;
        self.restore_strict(&doc)
    }

    fn restore_strict(&mut self, doc: &ChainDocument) -> Result<(), ChainError> {
        self.begin_edit()?;
        let mut tree = tree_from_document(doc)?;
        let (_, failures) = instantiate_tree(&mut self.graph, &*self.provider, &mut tree);
        if !failures.is_empty() {
            release_instances(&mut self.graph, &mut tree);
            let mut missing: Vec<PluginIdentity> = Vec::new();
            for (_, identity, _) in failures {
                if !missing.contains(&identity) {
                    missing.push(identity);
                }
            }
            tracing::warn!(
                "ChainProcessor: restore refused, {} plugin(s) unavailable",
                missing.len()
            );
            return Err(ChainError::MissingPlugins(missing));
        }
        self.install_tree(tree)
    }

    /// Swaps in a fully built tree and rebuilds once.
    fn install_tree(&mut self, tree: ChainNode) -> Result<(), ChainError> {
        let mut old = std::mem::replace(&mut self.root, tree);
        release_instances(&mut self.graph, &mut old);
        self.next_id = self.next_id.max(self.root.max_node_id().0 + 1);
        self.commit_structure()
    }
}
