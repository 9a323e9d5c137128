//! The chain tree: plugin leaves inside nested serial and parallel groups.
//!
//! A [`ChainNode`] is either a [`PluginLeaf`] or a [`GroupData`] holding an
//! ordered list of exclusively owned children. There are no parent pointers;
//! parents are found by searching from the root, which keeps the tree a
//! plain value that can be built, cloned into documents and swapped whole.
//!
//! ## Processing order
//!
//! [`ChainNode::collect_plugins`] walks the tree depth first, children in
//! order. That flattened order is how automation addresses plugins ("flat
//! index") and it only changes when the structure does.
//!
//! ## Runtime state
//!
//! Besides the persistent attributes, nodes carry the control cells their
//! utility nodes read ([`AtomicF32`], [`DuckControl`], meters) and, for
//! instantiated leaves, a [`PluginRuntime`] with the graph handle and the
//! controller. None of that is serialized.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_core::gain::{branch_gain_to_linear, clamp_branch_gain_db};
use arbor_core::{AtomicF32, DuckControl, MeterReadings, MidSideComponent, NodeId};
use serde::{Deserialize, Serialize};

use crate::plugin::{PluginController, PluginIdentity};

/// Mix values at or above this are treated as fully wet.
pub const FULL_WET: f32 = 0.999;

/// Stable identity of a node within a tree. The root is `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainNodeId(pub u64);

impl ChainNodeId {
    /// Id of the root group.
    pub const ROOT: ChainNodeId = ChainNodeId(0);

    /// True for the root group.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for ChainNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Children process one after another.
    #[default]
    Serial,
    /// Children process the same input and are summed.
    Parallel,
}

/// Mid/side processing around a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MidSideMode {
    /// Plain stereo.
    #[default]
    Off,
    /// The plugin processes only the mid component.
    MidOnly,
    /// The plugin processes only the side component.
    SideOnly,
    /// The plugin sees mid on the left channel and side on the right.
    MidSide,
}

impl MidSideMode {
    /// Matrix component the encode/decode pair works on, `None` when off.
    pub fn component(self) -> Option<MidSideComponent> {
        match self {
            MidSideMode::Off => None,
            MidSideMode::MidOnly => Some(MidSideComponent::Mid),
            MidSideMode::SideOnly => Some(MidSideComponent::Side),
            MidSideMode::MidSide => Some(MidSideComponent::Both),
        }
    }
}

/// Where a plugin's sidechain input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SidechainSource {
    /// No sidechain.
    #[default]
    None,
    /// The leaf's own unprocessed input.
    LeafInput,
}

impl SidechainSource {
    /// Maps the persisted selector (0 = none, 1 = leaf input).
    pub fn from_index(index: u8) -> Self {
        if index == 1 {
            SidechainSource::LeafInput
        } else {
            SidechainSource::None
        }
    }

    /// Persisted selector value.
    pub fn index(self) -> u8 {
        match self {
            SidechainSource::None => 0,
            SidechainSource::LeafInput => 1,
        }
    }
}

/// Whether a leaf has a live plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PluginStatus {
    /// Instantiated and wired.
    #[default]
    Ready,
    /// Instantiation failed; the leaf passes audio through untouched.
    Unavailable(String),
}

impl PluginStatus {
    /// True when the leaf has no instance.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PluginStatus::Unavailable(_))
    }
}

/// Live instance attached to a leaf.
pub(crate) struct PluginRuntime {
    /// Graph handle of the plugin node. Persists across rebuilds.
    pub(crate) graph_node: NodeId,
    pub(crate) controller: Arc<dyn PluginController>,
    /// Latency recorded at the last rebuild.
    pub(crate) latency: usize,
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("graph_node", &self.graph_node)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

/// Control cells shared between a leaf and the nodes wired around it.
#[derive(Debug)]
pub(crate) struct LeafControls {
    pub(crate) bypass: Arc<AtomicBool>,
    pub(crate) input_gain: Arc<AtomicF32>,
    pub(crate) output_gain: Arc<AtomicF32>,
    pub(crate) dry_wet: Arc<AtomicF32>,
    pub(crate) input_meter: Arc<MeterReadings>,
    pub(crate) output_meter: Arc<MeterReadings>,
}

impl Default for LeafControls {
    fn default() -> Self {
        Self {
            bypass: Arc::new(AtomicBool::new(false)),
            input_gain: Arc::new(AtomicF32::new(1.0)),
            output_gain: Arc::new(AtomicF32::new(1.0)),
            dry_wet: Arc::new(AtomicF32::new(1.0)),
            input_meter: Arc::new(MeterReadings::new()),
            output_meter: Arc::new(MeterReadings::new()),
        }
    }
}

/// A plugin slot in the tree.
#[derive(Debug)]
pub struct PluginLeaf {
    /// Which plugin this leaf hosts.
    pub identity: PluginIdentity,
    pub(crate) bypassed: bool,
    pub(crate) input_gain_db: f32,
    pub(crate) output_gain_db: f32,
    pub(crate) dry_wet: f32,
    pub(crate) sidechain: SidechainSource,
    pub(crate) mid_side: MidSideMode,
    pub(crate) status: PluginStatus,
    /// State applied once an instance exists; kept verbatim while unavailable.
    pub(crate) pending_state: Option<Vec<u8>>,
    pub(crate) runtime: Option<PluginRuntime>,
    pub(crate) controls: LeafControls,
}

impl PluginLeaf {
    /// Creates a leaf with default attributes and no instance.
    pub fn new(identity: PluginIdentity) -> Self {
        Self {
            identity,
            bypassed: false,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
            dry_wet: 1.0,
            sidechain: SidechainSource::None,
            mid_side: MidSideMode::Off,
            status: PluginStatus::Unavailable("not instantiated".into()),
            pending_state: None,
            runtime: None,
            controls: LeafControls::default(),
        }
    }

    /// Whether the plugin is bypassed.
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    /// Input trim in dB.
    pub fn input_gain_db(&self) -> f32 {
        self.input_gain_db
    }

    /// Output trim in dB.
    pub fn output_gain_db(&self) -> f32 {
        self.output_gain_db
    }

    /// Plugin dry/wet mix, 0..=1.
    pub fn dry_wet(&self) -> f32 {
        self.dry_wet
    }

    /// Sidechain routing.
    pub fn sidechain(&self) -> SidechainSource {
        self.sidechain
    }

    /// Mid/side mode.
    pub fn mid_side(&self) -> MidSideMode {
        self.mid_side
    }

    /// Instance status.
    pub fn status(&self) -> &PluginStatus {
        &self.status
    }

    /// State waiting to be applied to an instance.
    pub fn pending_state(&self) -> Option<&[u8]> {
        self.pending_state.as_deref()
    }

    /// Graph handle of the plugin node, valid until the leaf is removed.
    pub fn graph_node(&self) -> Option<NodeId> {
        self.runtime.as_ref().map(|rt| rt.graph_node)
    }

    /// The instance controller, when the leaf is ready.
    pub fn controller(&self) -> Option<&Arc<dyn PluginController>> {
        self.runtime.as_ref().map(|rt| &rt.controller)
    }

    /// Latency recorded at the last rebuild; 0 without an instance.
    pub fn recorded_latency(&self) -> usize {
        self.runtime.as_ref().map_or(0, |rt| rt.latency)
    }

    /// Latency the controller reports right now; 0 without an instance.
    pub fn reported_latency(&self) -> usize {
        self.runtime
            .as_ref()
            .map_or(0, |rt| rt.controller.latency_samples())
    }

    /// Current plugin state: live from the instance, otherwise the pending blob.
    pub fn current_state(&self) -> Option<Vec<u8>> {
        match &self.runtime {
            Some(rt) => Some(rt.controller.save_state()),
            None => self.pending_state.clone(),
        }
    }

    /// Whether the leaf is wired through a live instance.
    pub fn is_ready(&self) -> bool {
        self.runtime.is_some() && self.status == PluginStatus::Ready
    }

    pub(crate) fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
        self.controls.bypass.store(bypassed, Ordering::Release);
    }

    pub(crate) fn set_gains(&mut self, input_db: f32, output_db: f32) {
        self.input_gain_db = clamp_branch_gain_db(input_db);
        self.output_gain_db = clamp_branch_gain_db(output_db);
        self.controls
            .input_gain
            .store(branch_gain_to_linear(self.input_gain_db));
        self.controls
            .output_gain
            .store(branch_gain_to_linear(self.output_gain_db));
    }

    pub(crate) fn set_dry_wet(&mut self, mix: f32) {
        self.dry_wet = clamp_mix(mix);
        self.controls.dry_wet.store(self.dry_wet);
    }

    /// Attributes only; no instance, fresh controls.
    pub(crate) fn duplicate(&self) -> PluginLeaf {
        let mut copy = PluginLeaf::new(self.identity.clone());
        copy.set_bypassed(self.bypassed);
        copy.set_gains(self.input_gain_db, self.output_gain_db);
        copy.set_dry_wet(self.dry_wet);
        copy.sidechain = self.sidechain;
        copy.mid_side = self.mid_side;
        copy.pending_state = self.current_state();
        copy
    }
}

/// Control cells of a group's utility nodes.
#[derive(Debug)]
pub(crate) struct GroupControls {
    pub(crate) dry_wet: Arc<AtomicF32>,
    pub(crate) duck: Arc<DuckControl>,
    pub(crate) sum_gain: Arc<AtomicF32>,
}

impl Default for GroupControls {
    fn default() -> Self {
        Self {
            dry_wet: Arc::new(AtomicF32::new(1.0)),
            duck: Arc::new(DuckControl::default()),
            sum_gain: Arc::new(AtomicF32::new(1.0)),
        }
    }
}

/// Graph handles of the utility nodes inserted for one group.
///
/// Rewritten on every rebuild and only valid until the next one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GroupCache {
    /// Group dry/wet crossfade.
    pub dry_wet: Option<NodeId>,
    /// Group ducker.
    pub ducker: Option<NodeId>,
    /// Parallel sum gain.
    pub sum_gain: Option<NodeId>,
    /// Parallel branch gain, one per child.
    pub branch_gains: Vec<NodeId>,
    /// Parallel compensation delay, one per child (`None` when zero).
    pub compensation: Vec<Option<NodeId>>,
}

/// A serial or parallel group.
#[derive(Debug)]
pub struct GroupData {
    pub(crate) mode: GroupMode,
    pub(crate) dry_wet: f32,
    pub(crate) duck_amount: f32,
    pub(crate) duck_release_ms: f32,
    /// Ordered, exclusively owned children.
    pub children: Vec<ChainNode>,
    pub(crate) controls: GroupControls,
    pub(crate) cache: GroupCache,
}

impl GroupData {
    /// Creates an empty group.
    pub fn new(mode: GroupMode) -> Self {
        Self {
            mode,
            dry_wet: 1.0,
            duck_amount: 0.0,
            duck_release_ms: DuckControl::DEFAULT_RELEASE_MS,
            children: Vec::new(),
            controls: GroupControls::default(),
            cache: GroupCache::default(),
        }
    }

    /// Serial or parallel.
    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    /// Group dry/wet mix, 0..=1.
    pub fn dry_wet(&self) -> f32 {
        self.dry_wet
    }

    /// Ducking depth, 0..=1.
    pub fn duck_amount(&self) -> f32 {
        self.duck_amount
    }

    /// Ducking release in milliseconds.
    pub fn duck_release_ms(&self) -> f32 {
        self.duck_release_ms
    }

    /// Utility node handles from the last rebuild.
    pub fn cache(&self) -> &GroupCache {
        &self.cache
    }

    pub(crate) fn set_dry_wet(&mut self, mix: f32) {
        self.dry_wet = clamp_mix(mix);
        self.controls.dry_wet.store(self.dry_wet);
    }

    pub(crate) fn set_ducking(&mut self, amount: f32, release_ms: f32) {
        self.controls.duck.set(amount, release_ms);
        self.duck_amount = self.controls.duck.amount.load();
        self.duck_release_ms = self.controls.duck.release_ms.load();
    }

    /// Number of children that contribute to a parallel sum.
    pub fn active_branches(&self) -> usize {
        let any_solo = self.children.iter().any(|c| c.solo);
        self.children
            .iter()
            .filter(|c| c.is_audible(any_solo))
            .count()
    }

    /// Publishes branch gains and the sum gain for the current solo/mute state.
    pub(crate) fn update_branch_controls(&self) {
        let any_solo = self.children.iter().any(|c| c.solo);
        for child in &self.children {
            let gain = if child.is_audible(any_solo) {
                branch_gain_to_linear(child.branch_gain_db)
            } else {
                0.0
            };
            child.branch_control.store(gain);
        }
        self.controls
            .sum_gain
            .store(arbor_core::gain::sum_compensation(self.active_branches()));
    }
}

/// Leaf or group.
#[derive(Debug)]
pub enum NodeKind {
    /// A plugin slot.
    Plugin(PluginLeaf),
    /// A nested sub-chain.
    Group(GroupData),
}

/// One node of the chain tree.
#[derive(Debug)]
pub struct ChainNode {
    /// Stable id, unique within the tree.
    pub id: ChainNodeId,
    /// Display name.
    pub name: String,
    pub(crate) branch_gain_db: f32,
    pub(crate) solo: bool,
    pub(crate) mute: bool,
    /// UI hint: group shown folded.
    pub collapsed: bool,
    /// Leaf or group payload.
    pub kind: NodeKind,
    /// Effective linear branch gain, read by the parent's branch-gain node.
    pub(crate) branch_control: Arc<AtomicF32>,
}

impl ChainNode {
    /// Creates a group node.
    pub fn group(id: ChainNodeId, name: impl Into<String>, mode: GroupMode) -> Self {
        Self::with_kind(id, name.into(), NodeKind::Group(GroupData::new(mode)))
    }

    /// Creates a plugin node named after its identity.
    pub fn plugin(id: ChainNodeId, identity: PluginIdentity) -> Self {
        let name = identity.name.clone();
        Self::with_kind(id, name, NodeKind::Plugin(PluginLeaf::new(identity)))
    }

    /// The root group.
    pub fn root() -> Self {
        Self::group(ChainNodeId::ROOT, "Root", GroupMode::Serial)
    }

    pub(crate) fn with_kind(id: ChainNodeId, name: String, kind: NodeKind) -> Self {
        Self {
            id,
            name,
            branch_gain_db: 0.0,
            solo: false,
            mute: false,
            collapsed: false,
            kind,
            branch_control: Arc::new(AtomicF32::new(1.0)),
        }
    }

    // ── Attributes ──────────────────────────────────────────────────────────

    /// Branch gain in dB (applies inside a parallel parent).
    pub fn branch_gain_db(&self) -> f32 {
        self.branch_gain_db
    }

    /// Solo flag.
    pub fn is_solo(&self) -> bool {
        self.solo
    }

    /// Mute flag.
    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub(crate) fn set_branch_gain_db(&mut self, db: f32) {
        self.branch_gain_db = clamp_branch_gain_db(db);
    }

    fn is_audible(&self, any_solo: bool) -> bool {
        !self.mute && (!any_solo || self.solo)
    }

    // ── Kind accessors ──────────────────────────────────────────────────────

    /// True for groups.
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    /// The group payload.
    pub fn as_group(&self) -> Option<&GroupData> {
        match &self.kind {
            NodeKind::Group(g) => Some(g),
            NodeKind::Plugin(_) => None,
        }
    }

    /// The group payload, mutably.
    pub fn as_group_mut(&mut self) -> Option<&mut GroupData> {
        match &mut self.kind {
            NodeKind::Group(g) => Some(g),
            NodeKind::Plugin(_) => None,
        }
    }

    /// The leaf payload.
    pub fn as_plugin(&self) -> Option<&PluginLeaf> {
        match &self.kind {
            NodeKind::Plugin(p) => Some(p),
            NodeKind::Group(_) => None,
        }
    }

    /// The leaf payload, mutably.
    pub fn as_plugin_mut(&mut self) -> Option<&mut PluginLeaf> {
        match &mut self.kind {
            NodeKind::Plugin(p) => Some(p),
            NodeKind::Group(_) => None,
        }
    }

    /// Children of a group; empty for leaves.
    pub fn children(&self) -> &[ChainNode] {
        match &self.kind {
            NodeKind::Group(g) => &g.children,
            NodeKind::Plugin(_) => &[],
        }
    }

    // ── Traversal ───────────────────────────────────────────────────────────

    /// Finds a node in this subtree.
    pub fn find_by_id(&self, id: ChainNodeId) -> Option<&ChainNode> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find_by_id(id))
    }

    /// Finds a node in this subtree, mutably.
    pub fn find_by_id_mut(&mut self, id: ChainNodeId) -> Option<&mut ChainNode> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.kind {
            NodeKind::Group(g) => g.children.iter_mut().find_map(|c| c.find_by_id_mut(id)),
            NodeKind::Plugin(_) => None,
        }
    }

    /// Finds the group directly containing `id`.
    pub fn find_parent(&self, id: ChainNodeId) -> Option<&ChainNode> {
        let children = self.children();
        if children.iter().any(|c| c.id == id) {
            return Some(self);
        }
        children.iter().find_map(|c| c.find_parent(id))
    }

    /// Finds the group directly containing `id`, mutably.
    pub fn find_parent_mut(&mut self, id: ChainNodeId) -> Option<&mut ChainNode> {
        if self.children().iter().any(|c| c.id == id) {
            return Some(self);
        }
        match &mut self.kind {
            NodeKind::Group(g) => g.children.iter_mut().find_map(|c| c.find_parent_mut(id)),
            NodeKind::Plugin(_) => None,
        }
    }

    /// Plugin nodes of this subtree in processing order.
    pub fn collect_plugins(&self) -> Vec<&ChainNode> {
        let mut out = Vec::new();
        self.collect_plugins_into(&mut out);
        out
    }

    fn collect_plugins_into<'a>(&'a self, out: &mut Vec<&'a ChainNode>) {
        match &self.kind {
            NodeKind::Plugin(_) => out.push(self),
            NodeKind::Group(g) => {
                for child in &g.children {
                    child.collect_plugins_into(out);
                }
            }
        }
    }

    /// Visits every plugin leaf mutably, in processing order.
    pub(crate) fn for_each_plugin_mut(&mut self, f: &mut impl FnMut(ChainNodeId, &mut PluginLeaf)) {
        let id = self.id;
        match &mut self.kind {
            NodeKind::Plugin(leaf) => f(id, leaf),
            NodeKind::Group(g) => {
                for child in &mut g.children {
                    child.for_each_plugin_mut(f);
                }
            }
        }
    }

    /// Visits every group mutably, parents before children.
    pub(crate) fn for_each_group_mut(&mut self, f: &mut impl FnMut(&mut GroupData)) {
        if let NodeKind::Group(g) = &mut self.kind {
            f(g);
            for child in &mut g.children {
                child.for_each_group_mut(f);
            }
        }
    }

    /// Number of plugin leaves in this subtree.
    pub fn count_plugins(&self) -> usize {
        match &self.kind {
            NodeKind::Plugin(_) => 1,
            NodeKind::Group(g) => g.children.iter().map(ChainNode::count_plugins).sum(),
        }
    }

    /// Position of a direct child.
    pub fn find_child_index(&self, child: ChainNodeId) -> Option<usize> {
        self.children().iter().position(|c| c.id == child)
    }

    /// Whether `id` is this node or lies below it.
    pub fn is_descendant(&self, id: ChainNodeId) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Id of the plugin at a flat index.
    pub fn node_id_by_flat_index(&self, index: usize) -> Option<ChainNodeId> {
        self.collect_plugins().get(index).map(|n| n.id)
    }

    /// Flat index of a plugin node.
    pub fn flat_index_of(&self, id: ChainNodeId) -> Option<usize> {
        self.collect_plugins().iter().position(|n| n.id == id)
    }

    /// Every id in this subtree, preorder.
    pub fn all_node_ids(&self) -> Vec<ChainNodeId> {
        let mut out = Vec::new();
        self.all_node_ids_into(&mut out);
        out
    }

    fn all_node_ids_into(&self, out: &mut Vec<ChainNodeId>) {
        out.push(self.id);
        for child in self.children() {
            child.all_node_ids_into(out);
        }
    }

    /// Largest id in this subtree.
    pub fn max_node_id(&self) -> ChainNodeId {
        self.children()
            .iter()
            .map(ChainNode::max_node_id)
            .fold(self.id, Ord::max)
    }

    /// Same shape and attributes, ignoring ids and runtime state.
    pub fn structurally_equal(&self, other: &ChainNode) -> bool {
        if self.name != other.name
            || self.branch_gain_db != other.branch_gain_db
            || self.solo != other.solo
            || self.mute != other.mute
        {
            return false;
        }
        match (&self.kind, &other.kind) {
            (NodeKind::Plugin(a), NodeKind::Plugin(b)) => {
                a.identity == b.identity
                    && a.bypassed == b.bypassed
                    && a.input_gain_db == b.input_gain_db
                    && a.output_gain_db == b.output_gain_db
                    && a.dry_wet == b.dry_wet
                    && a.sidechain == b.sidechain
                    && a.mid_side == b.mid_side
            }
            (NodeKind::Group(a), NodeKind::Group(b)) => {
                a.mode == b.mode
                    && a.dry_wet == b.dry_wet
                    && a.duck_amount == b.duck_amount
                    && a.duck_release_ms == b.duck_release_ms
                    && a.children.len() == b.children.len()
                    && a
                        .children
                        .iter()
                        .zip(&b.children)
                        .all(|(x, y)| x.structurally_equal(y))
            }
            _ => false,
        }
    }
}

pub(crate) fn clamp_mix(mix: f32) -> f32 {
    if mix.is_nan() { 1.0 } else { mix.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: u64) -> ChainNode {
        ChainNode::plugin(
            ChainNodeId(id),
            PluginIdentity::new("test", format!("p{id}"), format!("P{id}")),
        )
    }

    fn group(id: u64, mode: GroupMode, children: Vec<ChainNode>) -> ChainNode {
        let mut node = ChainNode::group(ChainNodeId(id), format!("G{id}"), mode);
        node.as_group_mut().unwrap().children = children;
        node
    }

    /// root ─ 1
    ///      ─ 2 (parallel) ─ 3
    ///                     ─ 4 (serial) ─ 5
    ///      ─ 6
    fn sample_tree() -> ChainNode {
        let mut root = ChainNode::root();
        root.as_group_mut().unwrap().children = vec![
            leaf(1),
            group(
                2,
                GroupMode::Parallel,
                vec![leaf(3), group(4, GroupMode::Serial, vec![leaf(5)])],
            ),
            leaf(6),
        ];
        root
    }

    #[test]
    fn find_by_id_reaches_deep_nodes() {
        let tree = sample_tree();
        assert_eq!(tree.find_by_id(ChainNodeId(5)).unwrap().name, "P5");
        assert!(tree.find_by_id(ChainNodeId(99)).is_none());
    }

    #[test]
    fn find_parent_returns_direct_parent() {
        let tree = sample_tree();
        assert_eq!(tree.find_parent(ChainNodeId(5)).unwrap().id, ChainNodeId(4));
        assert_eq!(tree.find_parent(ChainNodeId(2)).unwrap().id, ChainNodeId::ROOT);
        assert!(tree.find_parent(ChainNodeId::ROOT).is_none());
    }

    #[test]
    fn collect_plugins_is_depth_first() {
        let tree = sample_tree();
        let ids: Vec<u64> = tree.collect_plugins().iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![1, 3, 5, 6]);
        assert_eq!(tree.count_plugins(), 4);
        assert_eq!(tree.node_id_by_flat_index(2), Some(ChainNodeId(5)));
        assert_eq!(tree.flat_index_of(ChainNodeId(6)), Some(3));
        assert_eq!(tree.node_id_by_flat_index(4), None);
    }

    #[test]
    fn descendant_includes_self() {
        let tree = sample_tree();
        let g2 = tree.find_by_id(ChainNodeId(2)).unwrap();
        assert!(g2.is_descendant(ChainNodeId(2)));
        assert!(g2.is_descendant(ChainNodeId(5)));
        assert!(!g2.is_descendant(ChainNodeId(6)));
    }

    #[test]
    fn ids_and_max() {
        let tree = sample_tree();
        assert_eq!(tree.all_node_ids().len(), 7);
        assert_eq!(tree.max_node_id(), ChainNodeId(6));
        assert_eq!(tree.find_child_index(ChainNodeId(6)), Some(2));
    }

    #[test]
    fn branch_controls_resolve_solo_and_mute() {
        let mut g = group(1, GroupMode::Parallel, vec![leaf(2), leaf(3), leaf(4)]);
        let data = g.as_group_mut().unwrap();
        data.children[0].solo = true;
        data.children[1].mute = true;
        data.update_branch_controls();

        assert_eq!(data.active_branches(), 1);
        assert_eq!(data.children[0].branch_control.load(), 1.0);
        assert_eq!(data.children[1].branch_control.load(), 0.0);
        assert_eq!(data.children[2].branch_control.load(), 0.0);
        assert_eq!(data.controls.sum_gain.load(), 1.0);
    }

    #[test]
    fn all_muted_sum_is_silent() {
        let mut g = group(1, GroupMode::Parallel, vec![leaf(2), leaf(3)]);
        let data = g.as_group_mut().unwrap();
        for child in &mut data.children {
            child.mute = true;
        }
        data.update_branch_controls();
        assert_eq!(data.controls.sum_gain.load(), 0.0);
    }

    #[test]
    fn two_active_branches_halve_the_sum() {
        let g = group(1, GroupMode::Parallel, vec![leaf(2), leaf(3)]);
        let data = g.as_group().unwrap();
        data.update_branch_controls();
        assert_eq!(data.controls.sum_gain.load(), 0.5);
    }

    #[test]
    fn ducking_values_are_clamped() {
        let mut data = GroupData::new(GroupMode::Serial);
        data.set_ducking(3.0, 5.0);
        assert_eq!(data.duck_amount(), 1.0);
        assert_eq!(data.duck_release_ms(), DuckControl::MIN_RELEASE_MS);
    }

    #[test]
    fn mid_side_component_mapping() {
        assert_eq!(MidSideMode::Off.component(), None);
        assert_eq!(MidSideMode::MidOnly.component(), Some(MidSideComponent::Mid));
        assert_eq!(MidSideMode::SideOnly.component(), Some(MidSideComponent::Side));
        assert_eq!(MidSideMode::MidSide.component(), Some(MidSideComponent::Both));
    }

    #[test]
    fn duplicate_leaf_copies_attributes_not_controls() {
        let mut original = PluginLeaf::new(PluginIdentity::new("test", "x", "X"));
        original.set_gains(-6.0, 3.0);
        original.set_dry_wet(0.4);
        original.pending_state = Some(vec![1, 2, 3]);

        let copy = original.duplicate();
        assert_eq!(copy.input_gain_db(), -6.0);
        assert_eq!(copy.dry_wet(), 0.4);
        assert_eq!(copy.pending_state(), Some(&[1u8, 2, 3][..]));
        assert!(!Arc::ptr_eq(&copy.controls.dry_wet, &original.controls.dry_wet));
    }

    #[test]
    fn structural_equality_ignores_ids() {
        let a = group(1, GroupMode::Serial, vec![leaf(2)]);
        let mut b = group(1, GroupMode::Serial, vec![leaf(2)]);
        b.as_group_mut().unwrap().children[0].id = ChainNodeId(9);
        assert!(a.structurally_equal(&b));

        b.as_group_mut().unwrap().mode = GroupMode::Parallel;
        assert!(!a.structurally_equal(&b));
    }
}
