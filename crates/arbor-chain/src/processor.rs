//! Chain orchestrator.
//!
//! [`ChainProcessor`] owns the chain tree and the mutation side of the
//! processing graph. Every structural change edits the tree, tears down all
//! utility nodes, re-wires the tree from scratch and publishes one graph
//! update to [`ChainAudio`]. Plugin nodes persist across rebuilds; only their
//! edges are redrawn.
//!
//! Attribute changes that do not add or remove a utility node (branch gain,
//! solo, mute, bypass, mix and gain values inside their current range) are
//! written straight into the control atomics and never rebuild.
//!
//! # Thread Model
//!
//! `ChainProcessor` lives on the UI / main thread. Nothing here runs on the
//! audio thread; the two halves only meet through [`ChainShared`].

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arbor_core::{MeterReadings, NodeId, Port, ProcessingGraph};

use crate::audio::ChainAudio;
use crate::config::EngineConfig;
use crate::error::{ChainError, PluginError};
use crate::listener::ChainListener;
use crate::plugin::{ParameterInfo, PluginIdentity, PluginProvider};
use crate::plugin_node::PluginNode;
use crate::shared::{ChainShared, FlatPlugin};
use crate::tree::{
    ChainNode, ChainNodeId, FULL_WET, GroupData, GroupMode, MidSideMode, NodeKind, PluginLeaf,
    PluginRuntime, PluginStatus, SidechainSource,
};
use crate::wiring::{WireResult, Wiring, wire_node};

/// Name given to groups created without one.
pub const DEFAULT_GROUP_NAME: &str = "Group";

/// Name of the empty branch added by [`ChainProcessor::add_dry_path`].
pub const DRY_PATH_NAME: &str = "Dry";

/// Aggregate bypass state of every plugin in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BypassState {
    /// Every plugin is bypassed (false for an empty chain).
    pub all_bypassed: bool,
    /// At least one plugin is bypassed.
    pub any_bypassed: bool,
}

/// Meter taps around one plugin leaf.
#[derive(Debug, Clone)]
pub struct LeafMeters {
    /// Signal entering the plugin.
    pub input: Arc<MeterReadings>,
    /// Signal leaving the plugin.
    pub output: Arc<MeterReadings>,
}

/// Plugins that failed to instantiate while building a subtree.
pub(crate) type Failures = Vec<(ChainNodeId, PluginIdentity, PluginError)>;

/// Owner of the chain tree and the graph topology.
///
/// Created together with its audio half by [`ChainProcessor::new`].
pub struct ChainProcessor {
    pub(crate) root: ChainNode,
    pub(crate) next_id: u64,
    pub(crate) graph: ProcessingGraph,
    /// Utility nodes added by the last rebuild.
    utilities: Vec<NodeId>,
    pub(crate) provider: Arc<dyn PluginProvider>,
    pub(crate) shared: ChainShared,
    listeners: Vec<Weak<dyn ChainListener>>,
    setup_generation: u64,
    shutdown_timeout: Duration,
    shut_down: bool,
}

impl ChainProcessor {
    /// Creates an empty chain and its real-time half.
    ///
    /// The audio half passes audio through until the first structural change
    /// is published.
    pub fn new(provider: Arc<dyn PluginProvider>, config: &EngineConfig) -> (Self, ChainAudio) {
        let setup = config.process_setup();
        let shared = ChainShared::new(setup);
        let audio = ChainAudio::new(shared.clone(), setup, config.swap_crossfade_ms);
        let processor = Self {
            root: ChainNode::root(),
            next_id: 1,
            graph: ProcessingGraph::new(setup.inner_sample_rate(), setup.inner_block_size()),
            utilities: Vec::new(),
            provider,
            setup_generation: shared.setup_generation(),
            shared,
            listeners: Vec::new(),
            shutdown_timeout: config.shutdown_timeout(),
            shut_down: false,
        };
        (processor, audio)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// The root group.
    pub fn root(&self) -> &ChainNode {
        &self.root
    }

    /// Looks up a node.
    pub fn node(&self, id: ChainNodeId) -> Option<&ChainNode> {
        self.root.find_by_id(id)
    }

    /// Number of plugin leaves.
    pub fn plugin_count(&self) -> usize {
        self.root.count_plugins()
    }

    /// Number of utility nodes in the current graph.
    pub fn utility_count(&self) -> usize {
        self.utilities.len()
    }

    /// Shared state handle.
    pub fn shared(&self) -> &ChainShared {
        &self.shared
    }

    /// Chain latency at the graph's rate, as last compiled.
    pub fn total_latency_samples(&self) -> usize {
        self.shared.chain_latency()
    }

    /// Latency to report to the host, oversampling included.
    pub fn host_latency_samples(&self) -> usize {
        self.shared.host_latency()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Meter taps of a plugin leaf.
    pub fn node_meters(&self, id: ChainNodeId) -> Option<LeafMeters> {
        let leaf = self.node(id)?.as_plugin()?;
        Some(LeafMeters {
            input: Arc::clone(&leaf.controls.input_meter),
            output: Arc::clone(&leaf.controls.output_meter),
        })
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    /// Registers a listener. Only a weak reference is kept.
    pub fn add_listener(&mut self, listener: &Arc<dyn ChainListener>) {
        self.listeners.push(Arc::downgrade(listener));
    }

    /// Number of listeners still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.strong_count() > 0).count()
    }

    fn notify(&mut self, f: impl Fn(&dyn ChainListener)) {
        self.listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                f(&*listener);
                true
            }
            None => false,
        });
    }

    fn notify_latency_if_changed(&mut self, before: usize) {
        let after = self.shared.host_latency();
        if after != before {
            self.notify(|l| l.latency_changed(after));
        }
    }

    pub(crate) fn report_failures(&mut self, failures: &Failures) {
        for (node, identity, err) in failures {
            tracing::warn!("ChainProcessor: '{identity}' unavailable for node {node}: {err}");
            let reason = err.to_string();
            self.notify(|l| l.plugin_failed(*node, &reason));
        }
    }

    // ── Structure ───────────────────────────────────────────────────────────

    /// Instantiates a plugin and inserts it into `parent` at `index`.
    ///
    /// Indices past the end append. If the provider fails, the error is
    /// returned and the tree is untouched.
    pub fn add_plugin(
        &mut self,
        identity: PluginIdentity,
        parent: ChainNodeId,
        index: usize,
    ) -> Result<ChainNodeId, ChainError> {
        self.begin_edit()?;
        self.group(parent)?;

        let mut node = ChainNode::plugin(ChainNodeId(self.next_id), identity);
        if let NodeKind::Plugin(leaf) = &mut node.kind
            && let Err(source) = attach_instance(&mut self.graph, &*self.provider, leaf)
        {
            tracing::warn!("ChainProcessor: failed to create '{}': {source}", leaf.identity);
            return Err(ChainError::Instantiation {
                identity: leaf.identity.clone(),
                source,
            });
        }
        node.id = self.alloc_id();
        let id = node.id;
        let at = self.insert_child(parent, index, node)?;
        tracing::debug!("ChainProcessor: added plugin {id} under {parent} at {at}");
        self.commit_structure()?;
        Ok(id)
    }

    /// Removes a node and its whole subtree.
    pub fn remove_node(&mut self, id: ChainNodeId) -> Result<(), ChainError> {
        self.begin_edit()?;
        let (_, _, mut removed) = self.take_child(id)?;
        release_instances(&mut self.graph, &mut removed);
        tracing::debug!("ChainProcessor: removed node {id}");
        self.commit_structure()
    }

    /// Moves a node under `new_parent` at `index`.
    ///
    /// The index refers to the target's children after the node was taken
    /// out; indices past the end append.
    pub fn move_node(
        &mut self,
        id: ChainNodeId,
        new_parent: ChainNodeId,
        index: usize,
    ) -> Result<(), ChainError> {
        self.begin_edit()?;
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let node = self.node(id).ok_or(ChainError::NodeNotFound(id))?;
        if node.is_descendant(new_parent) {
            return Err(ChainError::WouldCreateCycle {
                node: id,
                target: new_parent,
            });
        }
        self.group(new_parent)?;

        let (_, _, node) = self.take_child(id)?;
        let at = self.insert_child(new_parent, index, node)?;
        tracing::debug!("ChainProcessor: moved node {id} under {new_parent} at {at}");
        self.commit_structure()
    }

    /// Wraps sibling nodes in a new group.
    ///
    /// The group takes the earliest position of the selection; the selected
    /// nodes keep their relative order. An empty or missing name becomes
    /// [`DEFAULT_GROUP_NAME`].
    pub fn create_group(
        &mut self,
        ids: &[ChainNodeId],
        mode: GroupMode,
        name: Option<&str>,
    ) -> Result<ChainNodeId, ChainError> {
        self.begin_edit()?;
        let Some(&first) = ids.first() else {
            return Err(ChainError::EmptySelection);
        };
        if ids.iter().any(|id| id.is_root()) {
            return Err(ChainError::RootImmutable);
        }
        let parent_of = |id: ChainNodeId| self.root.find_parent(id).map(|p| p.id);
        let parent_id = parent_of(first).ok_or(ChainError::NodeNotFound(first))?;
        for &id in &ids[1..] {
            match parent_of(id) {
                None => return Err(ChainError::NodeNotFound(id)),
                Some(p) if p != parent_id => return Err(ChainError::ParentMismatch),
                Some(_) => {}
            }
        }

        let group_id = self.alloc_id();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_GROUP_NAME);
        let mut group = ChainNode::group(group_id, name, mode);

        let parent = self.group_mut(parent_id)?;
        let earliest = parent
            .children
            .iter()
            .position(|c| ids.contains(&c.id))
            .unwrap_or(parent.children.len());
        let (picked, kept): (Vec<ChainNode>, Vec<ChainNode>) = std::mem::take(&mut parent.children)
            .into_iter()
            .partition(|c| ids.contains(&c.id));
        parent.children = kept;
        if let Some(data) = group.as_group_mut() {
            data.children = picked;
        }
        let at = earliest.min(parent.children.len());
        parent.children.insert(at, group);

        tracing::debug!("ChainProcessor: grouped {} node(s) into {group_id}", ids.len());
        self.commit_structure()?;
        Ok(group_id)
    }

    /// Replaces a group by its children, spliced in at the group's position.
    pub fn dissolve_group(&mut self, id: ChainNodeId) -> Result<(), ChainError> {
        self.begin_edit()?;
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        self.group(id)?;
        let (parent_id, index, removed) = self.take_child(id)?;
        if let NodeKind::Group(data) = removed.kind {
            let parent = self.group_mut(parent_id)?;
            let tail = parent.children.split_off(index);
            parent.children.extend(data.children);
            parent.children.extend(tail);
        }
        tracing::debug!("ChainProcessor: dissolved group {id}");
        self.commit_structure()
    }

    /// Deep-copies a node right after the original.
    ///
    /// Copies get fresh ids and their own instances, loaded with the
    /// original's current state. Plugins that fail to instantiate stay in
    /// the copy as unavailable leaves.
    pub fn duplicate_node(&mut self, id: ChainNodeId) -> Result<ChainNodeId, ChainError> {
        self.begin_edit()?;
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let source = self.root.find_by_id(id).ok_or(ChainError::NodeNotFound(id))?;
        let mut copy = copy_subtree(source, &mut self.next_id);
        let copy_id = copy.id;
        let (_, failures) = instantiate_tree(&mut self.graph, &*self.provider, &mut copy);

        let parent_id = self
            .root
            .find_parent(id)
            .map(|p| p.id)
            .ok_or(ChainError::NodeNotFound(id))?;
        let index = self.group(parent_id)?.children.iter().position(|c| c.id == id);
        self.insert_child(parent_id, index.map_or(usize::MAX, |i| i + 1), copy)?;

        self.report_failures(&failures);
        tracing::debug!("ChainProcessor: duplicated {id} as {copy_id}");
        self.commit_structure()?;
        Ok(copy_id)
    }

    /// Adds an empty serial branch named [`DRY_PATH_NAME`] to a parallel group.
    pub fn add_dry_path(
        &mut self,
        group: ChainNodeId,
        index: usize,
    ) -> Result<ChainNodeId, ChainError> {
        self.begin_edit()?;
        if self.group(group)?.mode() != GroupMode::Parallel {
            return Err(ChainError::NotParallel(group));
        }
        let id = self.alloc_id();
        self.insert_child(group, index, ChainNode::group(id, DRY_PATH_NAME, GroupMode::Serial))?;
        tracing::debug!("ChainProcessor: added dry path {id} to {group}");
        self.commit_structure()?;
        Ok(id)
    }

    /// Renames a node.
    pub fn rename_node(&mut self, id: ChainNodeId, name: impl Into<String>) -> Result<(), ChainError> {
        self.ensure_running()?;
        self.node_mut(id)?.name = name.into();
        self.notify(|l| l.chain_changed());
        Ok(())
    }

    /// Sets the folded-in-UI flag of a node.
    pub fn set_collapsed(&mut self, id: ChainNodeId, collapsed: bool) -> Result<(), ChainError> {
        self.ensure_running()?;
        self.node_mut(id)?.collapsed = collapsed;
        self.notify(|l| l.chain_changed());
        Ok(())
    }

    // ── Group attributes ────────────────────────────────────────────────────

    /// Switches a group between serial and parallel.
    pub fn set_group_mode(&mut self, id: ChainNodeId, mode: GroupMode) -> Result<(), ChainError> {
        self.begin_edit()?;
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let group = self.group_mut(id)?;
        if group.mode == mode {
            return Ok(());
        }
        group.mode = mode;
        self.commit_structure()
    }

    /// Sets a group's dry/wet mix.
    pub fn set_group_dry_wet(&mut self, id: ChainNodeId, mix: f32) -> Result<(), ChainError> {
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let group = self.group_mut(id)?;
        let was_mixing = group.dry_wet < FULL_WET;
        group.set_dry_wet(mix);
        let mixing = group.dry_wet < FULL_WET;
        self.commit_if(was_mixing != mixing)
    }

    /// Sets a group's ducking amount and release time.
    pub fn set_group_ducking(
        &mut self,
        id: ChainNodeId,
        amount: f32,
        release_ms: f32,
    ) -> Result<(), ChainError> {
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let group = self.group_mut(id)?;
        let was_ducking = group.duck_amount > 0.0;
        group.set_ducking(amount, release_ms);
        let ducking = group.duck_amount > 0.0;
        self.commit_if(was_ducking != ducking)
    }

    // ── Branch attributes ───────────────────────────────────────────────────

    /// Sets a node's gain inside its parallel parent.
    pub fn set_branch_gain(&mut self, id: ChainNodeId, gain_db: f32) -> Result<(), ChainError> {
        self.branch_node_mut(id)?.set_branch_gain_db(gain_db);
        self.publish_branch_controls(id)
    }

    /// Solos a branch: non-soloed siblings go silent.
    pub fn set_branch_solo(&mut self, id: ChainNodeId, solo: bool) -> Result<(), ChainError> {
        self.branch_node_mut(id)?.solo = solo;
        self.publish_branch_controls(id)
    }

    /// Mutes a branch.
    pub fn set_branch_mute(&mut self, id: ChainNodeId, mute: bool) -> Result<(), ChainError> {
        self.branch_node_mut(id)?.mute = mute;
        self.publish_branch_controls(id)
    }

    fn branch_node_mut(&mut self, id: ChainNodeId) -> Result<&mut ChainNode, ChainError> {
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        self.node_mut(id)
    }

    fn publish_branch_controls(&mut self, id: ChainNodeId) -> Result<(), ChainError> {
        if let Some(group) = self.root.find_parent(id).and_then(ChainNode::as_group) {
            group.update_branch_controls();
        }
        self.notify(|l| l.chain_changed());
        Ok(())
    }

    // ── Plugin attributes ───────────────────────────────────────────────────

    /// Bypasses a plugin. Latency is kept; the dry signal is delayed to match.
    pub fn set_node_bypassed(&mut self, id: ChainNodeId, bypassed: bool) -> Result<(), ChainError> {
        self.leaf_mut(id)?.set_bypassed(bypassed);
        self.notify(|l| l.chain_changed());
        Ok(())
    }

    /// Sets a plugin's input and output trim in dB.
    pub fn set_plugin_gains(
        &mut self,
        id: ChainNodeId,
        input_db: f32,
        output_db: f32,
    ) -> Result<(), ChainError> {
        let leaf = self.leaf_mut(id)?;
        let before = (leaf.input_gain_db != 0.0, leaf.output_gain_db != 0.0);
        leaf.set_gains(input_db, output_db);
        let after = (leaf.input_gain_db != 0.0, leaf.output_gain_db != 0.0);
        self.commit_if(before != after)
    }

    /// Sets a plugin's dry/wet mix.
    pub fn set_plugin_dry_wet(&mut self, id: ChainNodeId, mix: f32) -> Result<(), ChainError> {
        let leaf = self.leaf_mut(id)?;
        let was_mixing = leaf.dry_wet < FULL_WET;
        leaf.set_dry_wet(mix);
        let mixing = leaf.dry_wet < FULL_WET;
        self.commit_if(was_mixing != mixing)
    }

    /// Sets a plugin's mid/side mode.
    pub fn set_plugin_mid_side(&mut self, id: ChainNodeId, mode: MidSideMode) -> Result<(), ChainError> {
        let leaf = self.leaf_mut(id)?;
        let changed = leaf.mid_side != mode;
        leaf.mid_side = mode;
        self.commit_if(changed)
    }

    /// Sets a plugin's sidechain routing.
    pub fn set_plugin_sidechain(
        &mut self,
        id: ChainNodeId,
        source: SidechainSource,
    ) -> Result<(), ChainError> {
        let leaf = self.leaf_mut(id)?;
        let changed = leaf.sidechain != source;
        leaf.sidechain = source;
        self.commit_if(changed)
    }

    // ── Bulk bypass ─────────────────────────────────────────────────────────

    /// Aggregate bypass state.
    pub fn bypass_state(&self) -> BypassState {
        let leaves: Vec<&PluginLeaf> = self
            .root
            .collect_plugins()
            .into_iter()
            .filter_map(ChainNode::as_plugin)
            .collect();
        if leaves.is_empty() {
            return BypassState::default();
        }
        BypassState {
            all_bypassed: leaves.iter().all(|l| l.bypassed),
            any_bypassed: leaves.iter().any(|l| l.bypassed),
        }
    }

    /// Bypasses or enables every plugin.
    pub fn set_all_bypass(&mut self, bypassed: bool) {
        self.root
            .for_each_plugin_mut(&mut |_, leaf: &mut PluginLeaf| leaf.set_bypassed(bypassed));
        self.notify(|l| l.chain_changed());
    }

    /// Bypasses everything if any plugin is active, otherwise enables everything.
    pub fn toggle_all_bypass(&mut self) {
        let state = self.bypass_state();
        self.set_all_bypass(!state.all_bypassed);
    }

    // ── Flat index ──────────────────────────────────────────────────────────

    /// Plugins in processing order.
    pub fn flat_plugins(&self) -> Vec<FlatPlugin> {
        self.root
            .collect_plugins()
            .into_iter()
            .enumerate()
            .filter_map(|(flat_index, node)| {
                node.as_plugin().map(|leaf| FlatPlugin {
                    flat_index,
                    node_id: node.id,
                    identity: leaf.identity.clone(),
                    available: leaf.is_ready(),
                })
            })
            .collect()
    }

    /// Node id of the plugin at a flat index.
    pub fn node_id_by_flat_index(&self, index: usize) -> Option<ChainNodeId> {
        self.root.node_id_by_flat_index(index)
    }

    fn flat_leaf(&self, index: usize) -> Option<&PluginLeaf> {
        let id = self.root.node_id_by_flat_index(index)?;
        self.node(id)?.as_plugin()
    }

    /// Current state blob of the plugin at a flat index.
    pub fn plugin_state_by_flat_index(&self, index: usize) -> Option<Vec<u8>> {
        self.flat_leaf(index)?.current_state()
    }

    /// Loads a state blob into the plugin at a flat index.
    ///
    /// Unavailable leaves keep the blob until they are instantiated.
    pub fn set_plugin_state_by_flat_index(
        &mut self,
        index: usize,
        data: &[u8],
    ) -> Result<(), ChainError> {
        let id = self
            .root
            .node_id_by_flat_index(index)
            .ok_or(ChainError::FlatIndexOutOfRange(index))?;
        let leaf = self.leaf_mut(id)?;
        match leaf.controller().cloned() {
            Some(controller) => controller
                .load_state(data)
                .map_err(|source| ChainError::PluginState { node: id, source })?,
            None => leaf.pending_state = Some(data.to_vec()),
        }
        self.refresh_latency()?;
        self.notify(|l| l.chain_changed());
        Ok(())
    }

    /// Number of parameters of the plugin at a flat index.
    pub fn plugin_parameter_count(&self, index: usize) -> usize {
        self.flat_leaf(index)
            .and_then(PluginLeaf::controller)
            .map_or(0, |c| c.parameter_count())
    }

    /// Descriptor of one parameter.
    pub fn plugin_parameter_info(&self, index: usize, param: usize) -> Option<ParameterInfo> {
        self.flat_leaf(index)?.controller()?.parameter_info(param)
    }

    /// Current value of one parameter.
    pub fn plugin_parameter(&self, index: usize, param: usize) -> Option<f32> {
        self.flat_leaf(index)?.controller()?.parameter(param)
    }

    /// Sets one parameter. Returns `false` if there is no such plugin or parameter.
    pub fn set_plugin_parameter(&self, index: usize, param: usize, value: f32) -> bool {
        self.flat_leaf(index)
            .and_then(PluginLeaf::controller)
            .is_some_and(|c| c.set_parameter(param, value))
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Tries to instantiate every unavailable leaf again.
    ///
    /// Returns how many leaves came back. Leaves that still fail keep their
    /// state and are reported to listeners.
    pub fn retry_unavailable_plugins(&mut self) -> Result<usize, ChainError> {
        self.begin_edit()?;
        let (attached, failures) =
            instantiate_tree(&mut self.graph, &*self.provider, &mut self.root);
        self.report_failures(&failures);
        if attached > 0 {
            tracing::info!("ChainProcessor: {attached} plugin(s) instantiated on retry");
            self.commit_structure()?;
        }
        Ok(attached)
    }

    /// Rebuilds if any plugin reports a latency different from the one
    /// recorded at the last rebuild. Returns whether it did.
    pub fn refresh_latency(&mut self) -> Result<bool, ChainError> {
        if self.shut_down {
            return Ok(false);
        }
        let drifted = self
            .root
            .collect_plugins()
            .into_iter()
            .filter_map(ChainNode::as_plugin)
            .any(|leaf| leaf.is_ready() && leaf.reported_latency() != leaf.recorded_latency());
        if !drifted {
            return Ok(false);
        }
        let before = self.shared.host_latency();
        self.rebuild()?;
        tracing::debug!("ChainProcessor: plugin latency changed, chain rebuilt");
        self.notify_latency_if_changed(before);
        Ok(true)
    }

    /// Periodic housekeeping for the UI timer.
    ///
    /// Drops nodes handed back by the audio thread, follows process setup
    /// changes and checks for latency drift.
    pub fn poll(&mut self) -> Result<(), ChainError> {
        self.collect_garbage();
        if self.shut_down {
            return Ok(());
        }

        self.follow_setup()?;
        self.refresh_latency()?;
        Ok(())
    }

    /// Stops the chain and releases every node on this thread.
    ///
    /// Suspends the audio side, waits up to the configured timeout for the
    /// block in flight, publishes an empty graph and collects what the audio
    /// side hands back. Leaves keep their state. Returns the number of
    /// released graph nodes.
    pub fn shutdown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        self.shared.set_suspended(true);
        let deadline = Instant::now() + self.shutdown_timeout;
        while self.shared.is_busy() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut released = self.collect_garbage().unwrap_or(0);
        for id in std::mem::take(&mut self.utilities) {
            if let Err(err) = self.graph.remove_node(id) {
                tracing::warn!("ChainProcessor: utility node {id} already gone: {err}");
            }
        }
        release_instances(&mut self.graph, &mut self.root);
        self.graph.disconnect_all();
        match self.graph.compile() {
            Ok(update) => self.shared.publish_update(update),
            Err(err) => tracing::warn!("ChainProcessor: final compile failed: {err}"),
        }
        self.shut_down = true;
        self.shared.set_chain_latency(0);
        self.shared.store_flat_plugins(self.flat_plugins());

        loop {
            if !self.shared.has_pending_update()
                && let Some(count) = self.collect_garbage()
            {
                released += count;
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("ChainProcessor: audio side did not return nodes before timeout");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        tracing::info!("ChainProcessor: shut down, released {released} node(s)");
        released
    }

    // ── Rebuild ─────────────────────────────────────────────────────────────

    fn commit_if(&mut self, structural: bool) -> Result<(), ChainError> {
        if structural {
            self.ensure_running()?;
            self.commit_structure()
        } else {
            self.notify(|l| l.chain_changed());
            Ok(())
        }
    }

    /// Rebuilds and tells every listener.
    pub(crate) fn commit_structure(&mut self) -> Result<(), ChainError> {
        let before = self.shared.host_latency();
        self.rebuild()?;
        self.notify(|l| l.chain_changed());
        let flat = self.flat_plugins();
        self.notify(|l| l.parameter_binding_changed(&flat));
        self.notify_latency_if_changed(before);
        Ok(())
    }

    /// Re-wires the whole tree and publishes the result.
    pub(crate) fn rebuild(&mut self) -> Result<(), ChainError> {
        self.ensure_running()?;
        self.sync_setup();
        for id in std::mem::take(&mut self.utilities) {
            self.graph.remove_node(id)?;
        }
        self.graph.disconnect_all();

        let graph = &mut self.graph;
        let mut synced = Ok(());
        self.root.for_each_plugin_mut(&mut |_, leaf: &mut PluginLeaf| {
            if let Some(rt) = leaf.runtime.as_mut() {
                rt.latency = rt.controller.latency_samples();
                if let Err(err) = graph.set_node_latency(rt.graph_node, rt.latency) {
                    synced = Err(err);
                }
            }
        });
        synced?;
        self.root
            .for_each_group_mut(&mut |group: &mut GroupData| group.update_branch_controls());

        let input = WireResult::from_node(self.graph.input());
        let output = self.graph.output();
        let out = {
            let mut wiring = Wiring::new(&mut self.graph, &mut self.utilities);
            wire_node(&mut wiring, &mut self.root, input, true)?
        };
        self.graph.connect(out.audio, output, Port::Main)?;
        self.graph.connect(out.midi, output, Port::Midi)?;

        let update = self.graph.compile()?;
        let (latency, misaligned, steps) = update.schedule().map_or((0, 0, 0), |s| {
            (s.total_latency(), s.misaligned_inputs(), s.step_count())
        });
        self.shared.publish_update(update);
        self.shared.set_chain_latency(latency);
        self.shared.store_flat_plugins(self.flat_plugins());
        self.collect_garbage();

        tracing::info!(
            "ChainProcessor: rebuilt {} plugin(s), {} utility node(s), {steps} steps, latency {latency}",
            self.root.count_plugins(),
            self.utilities.len()
        );
        if misaligned > 0 {
            tracing::warn!("ChainProcessor: {misaligned} merge point(s) receive misaligned inputs");
        }
        Ok(())
    }

    /// Drops an update handed back by the audio side.
    ///
    /// Returns the number of released nodes, or `None` if nothing was waiting.
    fn collect_garbage(&mut self) -> Option<usize> {
        let garbage = self.shared.take_garbage()?;
        let count = garbage.retired_count();
        drop(garbage);
        if count > 0 {
            tracing::debug!("ChainProcessor: released {count} retired node(s)");
        }
        Some(count)
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    pub(crate) fn ensure_running(&self) -> Result<(), ChainError> {
        if self.shut_down {
            Err(ChainError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Guard at the top of every edit: the chain is running and the graph
    /// follows the process setup the audio side was last prepared with.
    pub(crate) fn begin_edit(&mut self) -> Result<(), ChainError> {
        self.ensure_running()?;
        self.follow_setup()
    }

    /// Rebuilds at the new format if the audio side was re-prepared.
    fn follow_setup(&mut self) -> Result<(), ChainError> {
        let before = self.shared.host_latency();
        if self.sync_setup() {
            self.rebuild()?;
            self.notify_latency_if_changed(before);
        }
        Ok(())
    }

    /// Adopts a new process setup. Returns whether one was pending.
    ///
    /// Every plugin node is recreated at the new format with its current
    /// state, so no node prepared for the old format reaches the runner.
    /// Utility nodes are recreated by the rebuild that must follow.
    fn sync_setup(&mut self) -> bool {
        let generation = self.shared.setup_generation();
        if generation == self.setup_generation {
            return false;
        }
        self.setup_generation = generation;
        let setup = self.shared.setup();
        self.graph
            .set_format(setup.inner_sample_rate(), setup.inner_block_size());

        release_instances(&mut self.graph, &mut self.root);
        let (attached, failures) =
            instantiate_tree(&mut self.graph, &*self.provider, &mut self.root);
        self.report_failures(&failures);
        tracing::debug!(
            "ChainProcessor: process setup now {} Hz, {} samples, {}x; {attached} plugin(s) recreated",
            setup.sample_rate,
            setup.max_block_size,
            setup.oversampling.factor()
        );
        true
    }

    pub(crate) fn alloc_id(&mut self) -> ChainNodeId {
        let id = ChainNodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn node_mut(&mut self, id: ChainNodeId) -> Result<&mut ChainNode, ChainError> {
        self.root
            .find_by_id_mut(id)
            .ok_or(ChainError::NodeNotFound(id))
    }

    fn group(&self, id: ChainNodeId) -> Result<&GroupData, ChainError> {
        self.node(id)
            .ok_or(ChainError::NodeNotFound(id))?
            .as_group()
            .ok_or(ChainError::NotAGroup(id))
    }

    fn group_mut(&mut self, id: ChainNodeId) -> Result<&mut GroupData, ChainError> {
        self.node_mut(id)?
            .as_group_mut()
            .ok_or(ChainError::NotAGroup(id))
    }

    fn leaf_mut(&mut self, id: ChainNodeId) -> Result<&mut PluginLeaf, ChainError> {
        self.node_mut(id)?
            .as_plugin_mut()
            .ok_or(ChainError::NotAPlugin(id))
    }

    /// Takes a node out of its parent: `(parent, index, node)`.
    fn take_child(
        &mut self,
        id: ChainNodeId,
    ) -> Result<(ChainNodeId, usize, ChainNode), ChainError> {
        if id.is_root() {
            return Err(ChainError::RootImmutable);
        }
        let parent = self
            .root
            .find_parent_mut(id)
            .ok_or(ChainError::NodeNotFound(id))?;
        let parent_id = parent.id;
        let index = parent
            .find_child_index(id)
            .ok_or(ChainError::NodeNotFound(id))?;
        let group = parent
            .as_group_mut()
            .ok_or(ChainError::NotAGroup(parent_id))?;
        Ok((parent_id, index, group.children.remove(index)))
    }

    /// Inserts under `parent`, clamping the index. Returns the position used.
    fn insert_child(
        &mut self,
        parent: ChainNodeId,
        index: usize,
        node: ChainNode,
    ) -> Result<usize, ChainError> {
        let group = self.group_mut(parent)?;
        let at = index.min(group.children.len());
        group.children.insert(at, node);
        Ok(at)
    }
}

impl std::fmt::Debug for ChainProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainProcessor")
            .field("plugins", &self.root.count_plugins())
            .field("utilities", &self.utilities.len())
            .field("next_id", &self.next_id)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

/// Creates an instance for `leaf`, loads its pending state and adds the
/// plugin node to the graph.
pub(crate) fn attach_instance(
    graph: &mut ProcessingGraph,
    provider: &dyn PluginProvider,
    leaf: &mut PluginLeaf,
) -> Result<(), PluginError> {
    let instance = provider.instantiate(&leaf.identity, graph.sample_rate(), graph.block_size())?;
    if let Some(state) = leaf.pending_state.take()
        && let Err(err) = instance.controller.load_state(&state)
    {
        tracing::warn!("ChainProcessor: '{}' rejected its saved state: {err}", leaf.identity);
    }
    let latency = instance.controller.latency_samples();
    let node = PluginNode::new(
        instance.processor,
        Arc::clone(&instance.controller),
        Arc::clone(&leaf.controls.bypass),
        leaf.identity.name.clone(),
    );
    let graph_node = graph.add_node(Box::new(node));
    leaf.runtime = Some(PluginRuntime {
        graph_node,
        controller: instance.controller,
        latency,
    });
    leaf.status = PluginStatus::Ready;
    Ok(())
}

/// Instantiates every leaf of `tree` that has no instance yet.
///
/// Returns how many succeeded and which failed. Failed leaves are marked
/// unavailable and keep their pending state.
pub(crate) fn instantiate_tree(
    graph: &mut ProcessingGraph,
    provider: &dyn PluginProvider,
    tree: &mut ChainNode,
) -> (usize, Failures) {
    let mut attached = 0;
    let mut failures = Vec::new();
    tree.for_each_plugin_mut(&mut |id, leaf: &mut PluginLeaf| {
        if leaf.runtime.is_some() {
            return;
        }
        match attach_instance(graph, provider, leaf) {
            Ok(()) => attached += 1,
            Err(err) => {
                leaf.status = PluginStatus::Unavailable(err.to_string());
                failures.push((id, leaf.identity.clone(), err));
            }
        }
    });
    (attached, failures)
}

/// Removes the plugin nodes of `tree` from the graph.
///
/// Each leaf keeps its current state as pending state.
pub(crate) fn release_instances(graph: &mut ProcessingGraph, tree: &mut ChainNode) {
    tree.for_each_plugin_mut(&mut |id, leaf: &mut PluginLeaf| {
        if let Some(rt) = leaf.runtime.take() {
            leaf.pending_state = Some(rt.controller.save_state());
            if let Err(err) = graph.remove_node(rt.graph_node) {
                tracing::warn!("ChainProcessor: plugin node of {id} already gone: {err}");
            }
            leaf.status = PluginStatus::Unavailable("released".into());
        }
    });
}

/// Deep copy with fresh ids drawn from `next_id`. No instances.
fn copy_subtree(node: &ChainNode, next_id: &mut u64) -> ChainNode {
    let id = ChainNodeId(*next_id);
    *next_id += 1;
    let kind = match &node.kind {
        NodeKind::Plugin(leaf) => NodeKind::Plugin(leaf.duplicate()),
        NodeKind::Group(group) => {
            let mut copy = GroupData::new(group.mode);
            copy.set_dry_wet(group.dry_wet);
            copy.set_ducking(group.duck_amount, group.duck_release_ms);
            copy.children = group
                .children
                .iter()
                .map(|child| copy_subtree(child, next_id))
                .collect();
            NodeKind::Group(copy)
        }
    };
    let mut copy = ChainNode::with_kind(id, node.name.clone(), kind);
    copy.set_branch_gain_db(node.branch_gain_db);
    copy.solo = node.solo;
    copy.mute = node.mute;
    copy.collapsed = node.collapsed;
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{BuiltinProvider, DELAY_SAMPLES_PARAM};
    use crate::shared::ProcessSetup;
    use arbor_core::{MidiBuffer, OversamplingFactor};
    use parking_lot::Mutex;

    fn processor() -> ChainProcessor {
        ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default()).0
    }

    fn builtin(uid: &str) -> PluginIdentity {
        BuiltinProvider::identity(uid).unwrap()
    }

    fn add(chain: &mut ChainProcessor, uid: &str) -> ChainNodeId {
        chain
            .add_plugin(builtin(uid), ChainNodeId::ROOT, usize::MAX)
            .unwrap()
    }

    fn root_ids(chain: &ChainProcessor) -> Vec<ChainNodeId> {
        chain.root().children().iter().map(|c| c.id).collect()
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ChainListener for Recorder {
        fn chain_changed(&self) {
            self.events.lock().push("changed".into());
        }
        fn latency_changed(&self, samples: usize) {
            self.events.lock().push(format!("latency {samples}"));
        }
        fn parameter_binding_changed(&self, plugins: &[FlatPlugin]) {
            self.events.lock().push(format!("binding {}", plugins.len()));
        }
        fn plugin_failed(&self, node: ChainNodeId, _reason: &str) {
            self.events.lock().push(format!("failed {node}"));
        }
    }

    #[test]
    fn ids_are_monotonic_and_order_is_depth_first() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "saturator");
        assert_eq!((a, b), (ChainNodeId(1), ChainNodeId(2)));
        chain.remove_node(a).unwrap();
        let c = add(&mut chain, "gain");
        assert_eq!(c, ChainNodeId(3));

        let flat: Vec<_> = chain.flat_plugins().iter().map(|p| p.node_id).collect();
        assert_eq!(flat, vec![b, c]);
        assert_eq!(chain.utility_count(), 4);
    }

    #[test]
    fn add_validates_parent_before_instantiating() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        assert!(matches!(
            chain.add_plugin(builtin("gain"), ChainNodeId(99), 0),
            Err(ChainError::NodeNotFound(_))
        ));
        assert!(matches!(
            chain.add_plugin(builtin("gain"), a, 0),
            Err(ChainError::NotAGroup(_))
        ));
        assert_eq!(chain.plugin_count(), 1);
    }

    #[test]
    fn failed_instantiation_leaves_tree_untouched() {
        let mut chain = processor();
        let missing = PluginIdentity::new("vst3", "nope", "Nope");
        let err = chain
            .add_plugin(missing, ChainNodeId::ROOT, 0)
            .unwrap_err();
        assert!(matches!(err, ChainError::Instantiation { .. }));
        assert_eq!(chain.plugin_count(), 0);
        assert_eq!(chain.root().children().len(), 0);
    }

    #[test]
    fn root_cannot_be_removed_or_moved() {
        let mut chain = processor();
        assert!(matches!(
            chain.remove_node(ChainNodeId::ROOT),
            Err(ChainError::RootImmutable)
        ));
        assert!(matches!(
            chain.move_node(ChainNodeId::ROOT, ChainNodeId::ROOT, 0),
            Err(ChainError::RootImmutable)
        ));
    }

    #[test]
    fn remove_then_add_yields_equivalent_tree() {
        let mut chain = processor();
        add(&mut chain, "gain");
        let b = add(&mut chain, "saturator");
        add(&mut chain, "gain");

        let before = processor_snapshot_tree(&chain);
        chain.remove_node(b).unwrap();
        let b2 = chain
            .add_plugin(builtin("saturator"), ChainNodeId::ROOT, 1)
            .unwrap();
        assert_ne!(b, b2);
        assert!(chain.root().structurally_equal(&before));
    }

    fn processor_snapshot_tree(chain: &ChainProcessor) -> ChainNode {
        let mut copy = ChainNode::root();
        let mut next = 100;
        if let Some(g) = copy.as_group_mut() {
            g.children = chain
                .root()
                .children()
                .iter()
                .map(|c| copy_subtree(c, &mut next))
                .collect();
        }
        copy
    }

    #[test]
    fn move_reorders_and_refuses_cycles() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "gain");
        let c = add(&mut chain, "gain");
        chain.move_node(c, ChainNodeId::ROOT, 0).unwrap();
        assert_eq!(root_ids(&chain), vec![c, a, b]);

        let g = chain.create_group(&[a, b], GroupMode::Serial, None).unwrap();
        assert!(matches!(
            chain.move_node(g, g, 0),
            Err(ChainError::WouldCreateCycle { .. })
        ));
        chain.move_node(c, g, usize::MAX).unwrap();
        let inner: Vec<_> = chain.node(g).unwrap().children().iter().map(|n| n.id).collect();
        assert_eq!(inner, vec![a, b, c]);
    }

    #[test]
    fn create_group_keeps_order_at_earliest_position() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "saturator");
        let c = add(&mut chain, "gain");
        let g = chain
            .create_group(&[c, a], GroupMode::Parallel, Some(""))
            .unwrap();

        assert_eq!(root_ids(&chain), vec![g, b]);
        let group = chain.node(g).unwrap();
        assert_eq!(group.name, DEFAULT_GROUP_NAME);
        let inner: Vec<_> = group.children().iter().map(|n| n.id).collect();
        assert_eq!(inner, vec![a, c]);
    }

    #[test]
    fn create_group_validates_selection() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "gain");
        let g = chain.create_group(&[b], GroupMode::Serial, None).unwrap();
        let inner = chain.node(g).unwrap().children()[0].id;

        assert!(matches!(
            chain.create_group(&[], GroupMode::Serial, None),
            Err(ChainError::EmptySelection)
        ));
        assert!(matches!(
            chain.create_group(&[a, inner], GroupMode::Serial, None),
            Err(ChainError::ParentMismatch)
        ));
        assert!(matches!(
            chain.create_group(&[ChainNodeId::ROOT], GroupMode::Serial, None),
            Err(ChainError::RootImmutable)
        ));
    }

    #[test]
    fn dissolve_splices_children_in_place() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "gain");
        let c = add(&mut chain, "gain");
        let g = chain.create_group(&[b, c], GroupMode::Parallel, None).unwrap();
        assert_eq!(root_ids(&chain), vec![a, g]);
        chain.dissolve_group(g).unwrap();
        assert_eq!(root_ids(&chain), vec![a, b, c]);
        assert!(matches!(chain.dissolve_group(a), Err(ChainError::NotAGroup(_))));
    }

    #[test]
    fn duplicate_copies_state_with_new_ids() {
        let mut chain = processor();
        let d = add(&mut chain, "delay");
        assert!(chain.set_plugin_parameter(0, DELAY_SAMPLES_PARAM, 64.0));
        let copy = chain.duplicate_node(d).unwrap();

        assert_eq!(root_ids(&chain), vec![d, copy]);
        assert_eq!(chain.plugin_parameter(1, DELAY_SAMPLES_PARAM), Some(64.0));
        assert!(chain.node(copy).unwrap().as_plugin().unwrap().is_ready());
    }

    #[test]
    fn dry_path_only_in_parallel_groups() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let s = chain.create_group(&[a], GroupMode::Serial, None).unwrap();
        assert!(matches!(chain.add_dry_path(s, 0), Err(ChainError::NotParallel(_))));

        chain.set_group_mode(s, GroupMode::Parallel).unwrap();
        let dry = chain.add_dry_path(s, 0).unwrap();
        let node = chain.node(dry).unwrap();
        assert_eq!(node.name, DRY_PATH_NAME);
        assert!(node.children().is_empty());
    }

    #[test]
    fn parallel_latency_is_compensated() {
        let mut chain = processor();
        let fast = add(&mut chain, "gain");
        let slow = add(&mut chain, "delay");
        chain
            .create_group(&[fast, slow], GroupMode::Parallel, None)
            .unwrap();
        assert!(chain.set_plugin_parameter(1, DELAY_SAMPLES_PARAM, 128.0));
        assert!(chain.refresh_latency().unwrap());
        assert_eq!(chain.total_latency_samples(), 128);
        assert!(!chain.refresh_latency().unwrap());
    }

    #[test]
    fn solo_and_mute_do_not_rebuild() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let b = add(&mut chain, "gain");
        chain.create_group(&[a, b], GroupMode::Parallel, None).unwrap();
        let utilities = chain.utility_count();

        chain.set_branch_solo(a, true).unwrap();
        assert_eq!(chain.utility_count(), utilities);
        assert_eq!(chain.node(b).unwrap().branch_control.load(), 0.0);
        assert_eq!(chain.node(a).unwrap().branch_control.load(), 1.0);

        chain.set_branch_mute(a, true).unwrap();
        assert_eq!(chain.node(a).unwrap().branch_control.load(), 0.0);
    }

    #[test]
    fn presence_changes_rebuild_value_changes_do_not() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        let g = chain.create_group(&[a], GroupMode::Serial, None).unwrap();
        let base = chain.utility_count();

        chain.set_group_dry_wet(g, 0.5).unwrap();
        assert_eq!(chain.utility_count(), base + 1);
        chain.set_group_dry_wet(g, 0.25).unwrap();
        assert_eq!(chain.utility_count(), base + 1);
        chain.set_group_dry_wet(g, 1.0).unwrap();
        assert_eq!(chain.utility_count(), base);

        chain.set_plugin_gains(a, -6.0, 0.0).unwrap();
        assert_eq!(chain.utility_count(), base + 1);
        chain.set_plugin_gains(a, -3.0, 0.0).unwrap();
        assert_eq!(chain.utility_count(), base + 1);
    }

    #[test]
    fn root_group_attributes_are_fixed() {
        let mut chain = processor();
        assert!(matches!(
            chain.set_group_dry_wet(ChainNodeId::ROOT, 0.5),
            Err(ChainError::RootImmutable)
        ));
        assert!(matches!(
            chain.set_group_mode(ChainNodeId::ROOT, GroupMode::Parallel),
            Err(ChainError::RootImmutable)
        ));
    }

    #[test]
    fn bulk_bypass() {
        let mut chain = processor();
        let a = add(&mut chain, "gain");
        add(&mut chain, "gain");
        assert_eq!(chain.bypass_state(), BypassState::default());

        chain.set_node_bypassed(a, true).unwrap();
        let state = chain.bypass_state();
        assert!(state.any_bypassed && !state.all_bypassed);

        chain.toggle_all_bypass();
        assert!(chain.bypass_state().all_bypassed);
        chain.toggle_all_bypass();
        assert!(!chain.bypass_state().any_bypassed);
    }

    #[test]
    fn state_by_flat_index() {
        let mut chain = processor();
        add(&mut chain, "delay");
        add(&mut chain, "delay");
        chain.set_plugin_parameter(0, DELAY_SAMPLES_PARAM, 32.0);
        let state = chain.plugin_state_by_flat_index(0).unwrap();
        chain.set_plugin_state_by_flat_index(1, &state).unwrap();
        assert_eq!(chain.plugin_parameter(1, DELAY_SAMPLES_PARAM), Some(32.0));
        assert_eq!(chain.total_latency_samples(), 64);

        assert!(matches!(
            chain.set_plugin_state_by_flat_index(5, &state),
            Err(ChainError::FlatIndexOutOfRange(5))
        ));
        assert!(matches!(
            chain.set_plugin_state_by_flat_index(0, b"junk"),
            Err(ChainError::PluginState { .. })
        ));
    }

    #[test]
    fn listeners_are_notified_and_pruned() {
        let mut chain = processor();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn ChainListener> = recorder.clone();
        chain.add_listener(&listener);

        let d = add(&mut chain, "delay");
        assert_eq!(
            *recorder.events.lock(),
            vec!["changed".to_string(), "binding 1".to_string()]
        );

        recorder.events.lock().clear();
        chain.set_node_bypassed(d, true).unwrap();
        assert_eq!(*recorder.events.lock(), vec!["changed".to_string()]);

        drop(listener);
        drop(recorder);
        chain.set_node_bypassed(d, false).unwrap();
        assert_eq!(chain.listener_count(), 0);
    }

    #[test]
    fn poll_follows_setup_changes() {
        let (mut chain, mut audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        add(&mut chain, "delay");
        chain.set_plugin_parameter(0, DELAY_SAMPLES_PARAM, 100.0);
        chain.refresh_latency().unwrap();

        audio.prepare(ProcessSetup {
            oversampling: OversamplingFactor::X2,
            ..ProcessSetup::default()
        });
        chain.poll().unwrap();
        assert_eq!(chain.graph.sample_rate(), 96000.0);
        assert_eq!(
            chain.host_latency_samples(),
            50 + OversamplingFactor::X2.filter_latency()
        );
    }

    #[test]
    fn edits_after_prepare_recreate_plugins_at_new_format() {
        let (mut chain, mut audio) =
            ChainProcessor::new(Arc::new(BuiltinProvider::new()), &EngineConfig::default());
        let first = add(&mut chain, "delay");
        chain.set_plugin_parameter(0, DELAY_SAMPLES_PARAM, 12.0);
        chain.refresh_latency().unwrap();
        let old_node = chain.node(first).unwrap().as_plugin().unwrap().graph_node();

        audio.prepare(ProcessSetup {
            max_block_size: 1024,
            ..ProcessSetup::default()
        });
        add(&mut chain, "gain");

        assert_eq!(chain.graph.block_size(), 1024);
        let leaf = chain.node(first).unwrap().as_plugin().unwrap();
        assert!(leaf.is_ready());
        assert_ne!(leaf.graph_node(), old_node);
        assert_eq!(chain.plugin_parameter(0, DELAY_SAMPLES_PARAM), Some(12.0));
        assert_eq!(chain.total_latency_samples(), 12);

        let input = vec![0.25f32; 1024];
        let (mut l, mut r) = (vec![0.0f32; 1024], vec![0.0f32; 1024]);
        let mut midi = MidiBuffer::default();
        for _ in 0..3 {
            audio.process(&input, &input, &mut l, &mut r, &MidiBuffer::default(), &mut midi);
            chain.poll().unwrap();
        }
        assert!(audio.has_graph());
        assert!(l.iter().chain(&r).all(|s| s.is_finite()));
        assert_eq!(l[1023], 0.25);
    }

    #[test]
    fn shutdown_releases_and_keeps_state() {
        let config = EngineConfig {
            shutdown_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let (mut chain, mut audio) = ChainProcessor::new(Arc::new(BuiltinProvider::new()), &config);
        let d = add(&mut chain, "delay");
        chain.set_plugin_parameter(0, DELAY_SAMPLES_PARAM, 16.0);

        let silence = [0.0f32; 64];
        let (mut l, mut r) = ([0.0f32; 64], [0.0f32; 64]);
        let mut midi = MidiBuffer::default();
        audio.process(&silence, &silence, &mut l, &mut r, &MidiBuffer::default(), &mut midi);
        chain.poll().unwrap();

        chain.shutdown();
        assert!(chain.is_shut_down());
        assert!(chain.shared().is_suspended());
        assert_eq!(chain.host_latency_samples(), 0);
        let leaf = chain.node(d).unwrap().as_plugin().unwrap();
        assert!(!leaf.is_ready());
        assert!(leaf.pending_state().is_some());
        assert!(matches!(
            chain.add_plugin(builtin("gain"), ChainNodeId::ROOT, 0),
            Err(ChainError::ShutDown)
        ));
        assert!(matches!(chain.rename_node(d, "Late"), Err(ChainError::ShutDown)));
        assert!(matches!(chain.set_collapsed(d, true), Err(ChainError::ShutDown)));
        assert_eq!(chain.node(d).unwrap().name, "Delay");
    }
}
