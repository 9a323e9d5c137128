//! JSON document format for chain trees.
//!
//! A [`ChainDocument`] is the persistent form of the tree: groups and leaves
//! with their attributes and each plugin's opaque state (base64). Runtime
//! data (instances, utility node caches, control cells) is never written.
//!
//! ```json
//! {
//!   "version": 2,
//!   "nodes": [
//!     { "type": "plugin", "id": 1, "name": "Gain", "identity": { ... }, "state": "..." },
//!     { "type": "group", "id": 2, "mode": "parallel", "children": [ ... ] }
//!   ],
//!   "slots": [ { "identity": { ... }, "bypassed": false, "state": "..." } ]
//! }
//! ```
//!
//! `nodes` holds the children of the root group. `slots` repeats every
//! plugin in processing order for readers that only know version 1, which
//! had no groups. Version 1 documents load as a serial chain under the root.

use arbor_core::DuckControl;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::plugin::PluginIdentity;
use crate::processor::DEFAULT_GROUP_NAME;
use crate::tree::{ChainNode, ChainNodeId, GroupMode, MidSideMode, NodeKind, SidechainSource};

/// Version written by [`document_from_tree`].
pub const DOCUMENT_VERSION: u32 = 2;

fn default_mix() -> f32 {
    1.0
}

fn default_release_ms() -> f32 {
    DuckControl::DEFAULT_RELEASE_MS
}

/// Root object of a chain document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDocument {
    /// Format version.
    pub version: u32,
    /// Children of the root group.
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    /// Flat plugin list in processing order.
    #[serde(default)]
    pub slots: Vec<SlotDocument>,
}

/// One tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeDocument {
    /// Plugin leaf.
    Plugin(PluginDocument),
    /// Nested group.
    Group(GroupDocument),
}

/// Persistent attributes of a plugin leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDocument {
    /// Node id, unique within the document.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Hosted plugin.
    pub identity: PluginIdentity,
    /// Bypass flag.
    #[serde(default)]
    pub bypassed: bool,
    /// Input trim in dB.
    #[serde(default)]
    pub input_gain_db: f32,
    /// Output trim in dB.
    #[serde(default)]
    pub output_gain_db: f32,
    /// Dry/wet mix, 0 to 1.
    #[serde(default = "default_mix")]
    pub dry_wet: f32,
    /// Sidechain routing.
    #[serde(default)]
    pub sidechain: SidechainSource,
    /// Mid/side mode.
    #[serde(default)]
    pub mid_side: MidSideMode,
    /// Gain inside a parallel parent, in dB.
    #[serde(default)]
    pub branch_gain_db: f32,
    /// Branch solo.
    #[serde(default)]
    pub solo: bool,
    /// Branch mute.
    #[serde(default)]
    pub mute: bool,
    /// Base64 plugin state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Persistent attributes of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDocument {
    /// Node id, unique within the document.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Serial or parallel.
    #[serde(default)]
    pub mode: GroupMode,
    /// Dry/wet mix, 0 to 1.
    #[serde(default = "default_mix")]
    pub dry_wet: f32,
    /// Ducking depth, 0 disables.
    #[serde(default)]
    pub duck_amount: f32,
    /// Ducking release time.
    #[serde(default = "default_release_ms")]
    pub duck_release_ms: f32,
    /// Folded in the UI.
    #[serde(default)]
    pub collapsed: bool,
    /// Gain inside a parallel parent, in dB.
    #[serde(default)]
    pub branch_gain_db: f32,
    /// Branch solo.
    #[serde(default)]
    pub solo: bool,
    /// Branch mute.
    #[serde(default)]
    pub mute: bool,
    /// Ordered children.
    #[serde(default)]
    pub children: Vec<NodeDocument>,
}

/// Flat plugin entry, the whole chain format of version 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDocument {
    /// Hosted plugin.
    pub identity: PluginIdentity,
    /// Bypass flag.
    #[serde(default)]
    pub bypassed: bool,
    /// Base64 plugin state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

// ── Tree → document ─────────────────────────────────────────────────────────

/// Describes a tree. Plugin state is read from live instances where present,
/// otherwise from the state kept by unavailable leaves.
pub fn document_from_tree(root: &ChainNode) -> ChainDocument {
    let nodes = root.children().iter().map(node_document).collect();
    let slots = root
        .collect_plugins()
        .into_iter()
        .filter_map(ChainNode::as_plugin)
        .map(|leaf| SlotDocument {
            identity: leaf.identity.clone(),
            bypassed: leaf.is_bypassed(),
            state: leaf.current_state().map(|s| BASE64.encode(s)),
        })
        .collect();
    ChainDocument {
        version: DOCUMENT_VERSION,
        nodes,
        slots,
    }
}

fn node_document(node: &ChainNode) -> NodeDocument {
    match &node.kind {
        NodeKind::Plugin(leaf) => NodeDocument::Plugin(PluginDocument {
            id: node.id.0,
            name: node.name.clone(),
            identity: leaf.identity.clone(),
            bypassed: leaf.is_bypassed(),
            input_gain_db: leaf.input_gain_db(),
            output_gain_db: leaf.output_gain_db(),
            dry_wet: leaf.dry_wet(),
            sidechain: leaf.sidechain(),
            mid_side: leaf.mid_side(),
            branch_gain_db: node.branch_gain_db(),
            solo: node.is_solo(),
            mute: node.is_muted(),
            state: leaf.current_state().map(|s| BASE64.encode(s)),
        }),
        NodeKind::Group(group) => NodeDocument::Group(GroupDocument {
            id: node.id.0,
            name: node.name.clone(),
            mode: group.mode(),
            dry_wet: group.dry_wet(),
            duck_amount: group.duck_amount(),
            duck_release_ms: group.duck_release_ms(),
            collapsed: node.collapsed,
            branch_gain_db: node.branch_gain_db(),
            solo: node.is_solo(),
            mute: node.is_muted(),
            children: group.children.iter().map(node_document).collect(),
        }),
    }
}

// ── Document → tree ─────────────────────────────────────────────────────────

/// Builds a root group from a document. No plugin is instantiated; every
/// leaf carries its decoded state as pending state.
///
/// Version 2 ids are kept and must be unique and non-zero. Version 1 slots
/// get ids 1, 2, 3... in order.
pub fn tree_from_document(doc: &ChainDocument) -> Result<ChainNode, ChainError> {
    let mut root = ChainNode::root();
    let children = match doc.version {
        0 | 1 => slots_to_nodes(&doc.slots)?,
        DOCUMENT_VERSION => {
            let mut seen = Vec::new();
            doc.nodes
                .iter()
                .map(|n| node_from_document(n, &mut seen))
                .collect::<Result<Vec<_>, _>>()?
        }
        other => {
            return Err(ChainError::Document(format!(
                "unsupported document version {other}"
            )));
        }
    };
    if let Some(group) = root.as_group_mut() {
        group.children = children;
    }
    Ok(root)
}

fn slots_to_nodes(slots: &[SlotDocument]) -> Result<Vec<ChainNode>, ChainError> {
    slots
        .iter()
        .zip(1u64..)
        .map(|(slot, id)| {
            let mut node = ChainNode::plugin(ChainNodeId(id), slot.identity.clone());
            if let Some(leaf) = node.as_plugin_mut() {
                leaf.set_bypassed(slot.bypassed);
                leaf.pending_state = decode_state(slot.state.as_deref())?;
            }
            Ok(node)
        })
        .collect()
}

fn claim_id(id: u64, seen: &mut Vec<u64>) -> Result<ChainNodeId, ChainError> {
    if id == ChainNodeId::ROOT.0 {
        return Err(ChainError::Document("node id 0 is reserved for the root".into()));
    }
    if seen.contains(&id) {
        return Err(ChainError::Document(format!("duplicate node id {id}")));
    }
    seen.push(id);
    Ok(ChainNodeId(id))
}

fn node_from_document(doc: &NodeDocument, seen: &mut Vec<u64>) -> Result<ChainNode, ChainError> {
    let mut node = match doc {
        NodeDocument::Plugin(p) => {
            let mut node = ChainNode::plugin(claim_id(p.id, seen)?, p.identity.clone());
            if !p.name.is_empty() {
                node.name = p.name.clone();
            }
            if let Some(leaf) = node.as_plugin_mut() {
                leaf.set_bypassed(p.bypassed);
                leaf.set_gains(p.input_gain_db, p.output_gain_db);
                leaf.set_dry_wet(p.dry_wet);
                leaf.sidechain = p.sidechain;
                leaf.mid_side = p.mid_side;
                leaf.pending_state = decode_state(p.state.as_deref())?;
            }
            node.set_branch_gain_db(p.branch_gain_db);
            node.solo = p.solo;
            node.mute = p.mute;
            node
        }
        NodeDocument::Group(g) => {
            let mut node = ChainNode::group(claim_id(g.id, seen)?, g.name.clone(), g.mode);
            let children = g
                .children
                .iter()
                .map(|c| node_from_document(c, seen))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(group) = node.as_group_mut() {
                group.set_dry_wet(g.dry_wet);
                group.set_ducking(g.duck_amount, g.duck_release_ms);
                group.children = children;
            }
            node.set_branch_gain_db(g.branch_gain_db);
            node.solo = g.solo;
            node.mute = g.mute;
            node.collapsed = g.collapsed;
            node
        }
    };
    if node.name.is_empty() && node.is_group() {
        node.name = DEFAULT_GROUP_NAME.into();
    }
    Ok(node)
}

fn decode_state(state: Option<&str>) -> Result<Option<Vec<u8>>, ChainError> {
    state
        .map(|s| {
            BASE64
                .decode(s)
                .map_err(|e| ChainError::Document(format!("invalid plugin state: {e}")))
        })
        .transpose()
}

// ── JSON ────────────────────────────────────────────────────────────────────

/// Pretty-printed JSON of a document.
pub fn to_json(doc: &ChainDocument) -> Result<String, ChainError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parses a document.
pub fn from_json(json: &str) -> Result<ChainDocument, ChainError> {
    Ok(serde_json::from_str(json)?)
}
