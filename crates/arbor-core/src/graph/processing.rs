//! Processing graph: mutation API, validation and compilation.
//!
//! [`ProcessingGraph`] lives on the control thread. It owns the topology
//! (nodes, edges, cached latencies), stages newly added [`AudioNode`]s, and
//! turns the current state into a [`GraphUpdate`] with
//! [`compile()`](ProcessingGraph::compile). Processing objects are only
//! touched here between [`add_node`](ProcessingGraph::add_node) and the next
//! compile; after that they belong to the [`GraphRunner`](super::GraphRunner).

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, format, string::String, string::ToString, sync::Arc, vec, vec::Vec};
#[cfg(feature = "std")]
use std::sync::Arc;

use crate::audio_node::AudioNode;

use super::buffer::BufferPool;
use super::edge::{Edge, EdgeId, Port};
use super::node::{NodeData, NodeId, NodeKind};
use super::schedule::{CompiledSchedule, MidiSource, ProcessStep};
use super::update::{GraphUpdate, LiveNode};

#[cfg(feature = "tracing")]
fn format_step(step: &ProcessStep) -> String {
    match step {
        ProcessStep::WriteInput { buffer_idx } => format!("WriteInput → buf[{buffer_idx}]"),
        ProcessStep::ClearBuffer { buffer_idx } => format!("ClearBuffer buf[{buffer_idx}]"),
        ProcessStep::AccumulateBuffer {
            source_buf,
            dest_buf,
        } => format!("AccumulateBuffer buf[{source_buf}] → buf[{dest_buf}]"),
        ProcessStep::ProcessNode {
            node_idx,
            main,
            aux,
            output_buf,
            midi,
        } => format!(
            "ProcessNode node[{node_idx}] main={main:?} aux={aux:?} → buf[{output_buf}] midi={midi:?}"
        ),
        ProcessStep::ReadOutput { buffer_idx, midi } => {
            format!("ReadOutput ← buf{buffer_idx:?} midi={midi:?}")
        }
    }
}

/// Errors from graph mutation and compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// No node at this id.
    NodeNotFound(NodeId),
    /// The id refers to a slot that has since been reused.
    StaleNode(NodeId),
    /// No edge at this id.
    EdgeNotFound(EdgeId),
    /// The connection would close a cycle.
    CycleDetected,
    /// The same connection already exists.
    DuplicateEdge(NodeId, NodeId),
    /// The destination has no such port.
    InvalidPort(NodeId, Port),
    /// The connection breaks a structural rule.
    InvalidConnection(String),
    /// The input and output nodes cannot be removed.
    IoNode(NodeId),
}

#[cfg(feature = "std")]
impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node {id} not found"),
            Self::StaleNode(id) => write!(f, "node {id} was removed and its slot reused"),
            Self::EdgeNotFound(id) => write!(f, "edge {id} not found"),
            Self::CycleDetected => write!(f, "connection would create a cycle"),
            Self::DuplicateEdge(a, b) => write!(f, "edge from {a} to {b} already exists"),
            Self::InvalidPort(id, port) => write!(f, "node {id} has no {port:?} port"),
            Self::InvalidConnection(msg) => write!(f, "invalid connection: {msg}"),
            Self::IoNode(id) => write!(f, "node {id} is the graph input or output"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for GraphError {}

/// Directed acyclic audio graph, mutation side.
///
/// # Usage
///
/// 1. Create with [`new()`](Self::new); input and output nodes already exist.
/// 2. Add processors with [`add_node()`](Self::add_node).
/// 3. Wire them with [`connect()`](Self::connect).
/// 4. [`compile()`](Self::compile) and hand the [`GraphUpdate`] to the runner.
///
/// ```rust,ignore
/// let mut graph = ProcessingGraph::new(48000.0, 256);
/// let gain = graph.add_node(Box::new(BranchGain::new(control)));
/// graph.connect(graph.input(), gain, Port::Main)?;
/// graph.connect(gain, graph.output(), Port::Main)?;
/// runner.apply(graph.compile()?);
/// ```
pub struct ProcessingGraph {
    nodes: Vec<Option<NodeData>>,
    generations: Vec<u32>,
    free_slots: Vec<u32>,
    edges: Vec<Option<Edge>>,
    next_edge_slot: u32,
    input: NodeId,
    output: NodeId,
    sample_rate: f32,
    block_size: usize,
    /// Nodes added since the last compile, not yet owned by the runner.
    staged: Vec<(usize, LiveNode)>,
    /// Published slots vacated since the last compile.
    removed: Vec<usize>,
    /// Storage the runner holds once every issued update is applied.
    runner_slots: usize,
    runner_buffers: usize,
    runner_block: usize,
    compiled: Option<Arc<CompiledSchedule>>,
}

impl ProcessingGraph {
    /// Creates a graph containing only the input and output nodes.
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_slots: Vec::new(),
            edges: Vec::new(),
            next_edge_slot: 0,
            input: NodeId {
                index: 0,
                generation: 0,
            },
            output: NodeId {
                index: 1,
                generation: 0,
            },
            sample_rate,
            block_size,
            staged: Vec::new(),
            removed: Vec::new(),
            runner_slots: 0,
            runner_buffers: 0,
            runner_block: block_size,
            compiled: None,
        };
        graph.input = graph.alloc_slot(NodeKind::Input, "input".to_string());
        graph.output = graph.alloc_slot(NodeKind::Output, "output".to_string());
        graph
    }

    /// The external input node.
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// The external output node.
    pub fn output(&self) -> NodeId {
        self.output
    }

    // --- Node mutations ---

    /// Prepares `node` at the graph's format and stages it for the next compile.
    pub fn add_node(&mut self, mut node: Box<dyn AudioNode>) -> NodeId {
        node.prepare(self.sample_rate, self.block_size);
        let id = self.alloc_slot(NodeKind::Process, node.name().to_string());
        if let Some(Some(data)) = self.nodes.get_mut(id.index as usize) {
            data.latency = node.latency_samples();
            data.input_ports = node.input_ports().clamp(1, 2);
            data.requires_aligned = node.requires_aligned_inputs();
        }
        self.staged.push((id.index as usize, LiveNode::new(node)));
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: node {id}");
        id
    }

    /// Removes a node and every edge touching it.
    ///
    /// The processor is released on the audio side when the next update is
    /// applied, or dropped immediately if it was never published.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let data = self.get_node(id)?;
        if data.kind != NodeKind::Process {
            return Err(GraphError::IoNode(id));
        }
        let edge_ids: Vec<EdgeId> = data
            .incoming
            .iter()
            .chain(data.outgoing.iter())
            .copied()
            .collect();
        for edge_id in edge_ids {
            self.disconnect_internal(edge_id);
        }

        let idx = id.index as usize;
        self.nodes[idx] = None;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_slots.push(id.index);

        if let Some(pos) = self.staged.iter().position(|(slot, _)| *slot == idx) {
            let (_, never_published) = self.staged.swap_remove(pos);
            drop(never_published);
        } else {
            self.removed.push(idx);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_remove: node {id}");
        Ok(())
    }

    /// Records a new latency for a node. Takes effect at the next compile.
    pub fn set_node_latency(&mut self, id: NodeId, latency: usize) -> Result<(), GraphError> {
        self.get_node(id)?;
        if let Some(Some(data)) = self.nodes.get_mut(id.index as usize) {
            data.latency = latency;
        }
        Ok(())
    }

    /// Connects `from`'s output to `to`'s `port`.
    ///
    /// Fails if either node is unknown, the port does not exist, the edge is
    /// a duplicate, a MIDI input already has a source, or the edge would
    /// close a cycle.
    pub fn connect(&mut self, from: NodeId, to: NodeId, port: Port) -> Result<EdgeId, GraphError> {
        self.validate_connection(from, to, port)?;

        if self.find_edge(from, to, port).is_some() {
            return Err(GraphError::DuplicateEdge(from, to));
        }
        // from→to closes a cycle iff `to` already reaches `from`.
        if self.can_reach(to, from) {
            return Err(GraphError::CycleDetected);
        }

        let edge_id = EdgeId(self.next_edge_slot);
        self.next_edge_slot += 1;
        let edge_idx = edge_id.0 as usize;
        if edge_idx >= self.edges.len() {
            self.edges.resize_with(edge_idx + 1, || None);
        }
        self.edges[edge_idx] = Some(Edge { from, to, port });

        if let Some(Some(node)) = self.nodes.get_mut(from.index as usize) {
            node.outgoing.push(edge_id);
        }
        if let Some(Some(node)) = self.nodes.get_mut(to.index as usize) {
            node.incoming.push(edge_id);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_connect: {from} → {to} ({port:?})");
        Ok(edge_id)
    }

    /// Connects both audio (main port) and MIDI from `from` to `to`.
    pub fn connect_audio_midi(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.connect(from, to, Port::Main)?;
        self.connect(from, to, Port::Midi)?;
        Ok(())
    }

    /// Removes an edge.
    pub fn disconnect(&mut self, id: EdgeId) -> Result<(), GraphError> {
        if self
            .edges
            .get(id.0 as usize)
            .and_then(|e| e.as_ref())
            .is_none()
        {
            return Err(GraphError::EdgeNotFound(id));
        }
        self.disconnect_internal(id);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: edge {id}");
        Ok(())
    }

    /// Removes every edge in the graph. Nodes stay; edge ids start over.
    pub fn disconnect_all(&mut self) {
        self.edges.clear();
        self.next_edge_slot = 0;
        for node in self.nodes.iter_mut().flatten() {
            node.incoming.clear();
            node.outgoing.clear();
        }
    }

    /// Finds the edge from `from` to `to`'s `port`.
    pub fn find_edge(&self, from: NodeId, to: NodeId, port: Port) -> Option<EdgeId> {
        let node = self.nodes.get(from.index as usize)?.as_ref()?;
        node.outgoing.iter().copied().find(|edge_id| {
            self.edges[edge_id.0 as usize]
                .as_ref()
                .is_some_and(|e| e.to == to && e.port == port)
        })
    }

    // --- Queries ---

    /// True if `id` resolves to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get_node(id).is_ok()
    }

    /// Latency recorded for a node.
    pub fn node_latency(&self, id: NodeId) -> Option<usize> {
        self.get_node(id).ok().map(|n| n.latency)
    }

    /// Label of a node.
    pub fn node_label(&self, id: NodeId) -> Option<&str> {
        self.get_node(id).ok().map(|n| n.label.as_str())
    }

    /// Kind of a node.
    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get_node(id).ok().map(|n| n.kind)
    }

    /// Number of live nodes, including input and output.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    /// Sample rate new nodes are prepared at.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Block size new nodes are prepared for.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Changes the format for nodes added from now on and for buffers
    /// issued by the next compile. Nodes already published are re-prepared by
    /// the runner.
    pub fn set_format(&mut self, sample_rate: f32, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
    }

    /// The most recent schedule.
    pub fn compiled(&self) -> Option<&Arc<CompiledSchedule>> {
        self.compiled.as_ref()
    }

    /// Latency of the most recent schedule, 0 before the first compile.
    pub fn latency_samples(&self) -> usize {
        self.compiled.as_ref().map_or(0, |s| s.total_latency)
    }

    // --- Compilation ---

    /// Compiles the current topology and packages it for the runner.
    ///
    /// Performs a topological sort, computes per-node arrival latency, emits
    /// steps over virtual buffers, then assigns physical buffers by liveness.
    /// Merges whose sources arrive with different latency are counted in
    /// [`CompiledSchedule::misaligned_inputs`].
    pub fn compile(&mut self) -> Result<GraphUpdate, GraphError> {
        let sorted = self.kahn_sort()?;
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_sort: {} nodes in topo order", sorted.len());

        let out_latency = self.compute_output_latencies(&sorted);
        let misaligned_inputs = self.count_misaligned(&out_latency);
        let total_latency = self
            .port_sources(self.output.index as usize, Port::Main)
            .iter()
            .map(|&src| out_latency[src])
            .max()
            .unwrap_or(0);

        let emitter = self.emit_raw_schedule(&sorted);
        let (steps, buffer_count) = emitter.assign_buffers();

        #[cfg(feature = "tracing")]
        {
            tracing::debug!(
                "graph_buffers: {} steps, {} physical buffers",
                steps.len(),
                buffer_count
            );
            tracing::debug!("graph_latency: {total_latency} samples");
            for (i, step) in steps.iter().enumerate() {
                tracing::debug!("  step[{i}]: {}", format_step(step));
            }
            if misaligned_inputs > 0 {
                tracing::warn!("graph_align: {misaligned_inputs} merge point(s) receive misaligned inputs");
            }
        }

        let slot_count = self.nodes.len();
        let schedule = Arc::new(CompiledSchedule {
            steps,
            buffer_count,
            total_latency,
            misaligned_inputs,
            slot_count,
        });

        let mut update = GraphUpdate {
            schedule: Some(Arc::clone(&schedule)),
            inserted: core::mem::take(&mut self.staged),
            removed: core::mem::take(&mut self.removed),
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            ..GraphUpdate::default()
        };
        update.reserve_retired();

        if buffer_count > self.runner_buffers || self.block_size != self.runner_block {
            let count = buffer_count.max(self.runner_buffers);
            update.pool = Some(BufferPool::new(count, self.block_size));
            self.runner_buffers = count;
            self.runner_block = self.block_size;
        }
        if slot_count > self.runner_slots {
            // Headroom so that a few more nodes do not force a new vector.
            let capacity = slot_count + slot_count / 2 + 4;
            update.slots = Some((0..capacity).map(|_| None).collect());
            self.runner_slots = capacity;
        }

        self.compiled = Some(schedule);
        Ok(update)
    }

    // --- Internal helpers ---

    fn alloc_slot(&mut self, kind: NodeKind, label: String) -> NodeId {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.nodes.push(None);
                self.generations.push(0);
                (self.nodes.len() - 1) as u32
            }
        };
        let id = NodeId {
            index,
            generation: self.generations[index as usize],
        };
        self.nodes[index as usize] = Some(NodeData::new(id, kind, label));
        id
    }

    fn get_node(&self, id: NodeId) -> Result<&NodeData, GraphError> {
        let idx = id.index as usize;
        match self.nodes.get(idx) {
            Some(Some(node)) if node.id.generation == id.generation => Ok(node),
            Some(_) if self.generations[idx] != id.generation => Err(GraphError::StaleNode(id)),
            _ => Err(GraphError::NodeNotFound(id)),
        }
    }

    fn validate_connection(&self, from: NodeId, to: NodeId, port: Port) -> Result<(), GraphError> {
        let from_node = self.get_node(from)?;
        let to_node = self.get_node(to)?;

        if to_node.kind == NodeKind::Input {
            return Err(GraphError::InvalidConnection(format!(
                "cannot connect into input node {from}→{to}"
            )));
        }
        if from_node.kind == NodeKind::Output {
            return Err(GraphError::InvalidConnection(format!(
                "cannot connect from output node {from}→{to}"
            )));
        }
        match port {
            Port::Aux if to_node.kind == NodeKind::Output || to_node.input_ports < 2 => {
                return Err(GraphError::InvalidPort(to, port));
            }
            Port::Midi => {
                let has_midi = to_node.incoming.iter().any(|e| {
                    self.edges[e.0 as usize]
                        .as_ref()
                        .is_some_and(|edge| edge.port == Port::Midi)
                });
                if has_midi {
                    return Err(GraphError::InvalidConnection(format!(
                        "MIDI input of {to} already has a source"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// DFS reachability: can `from` reach `to` along existing edges?
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from.index as usize];
        while let Some(current) = stack.pop() {
            if current == to.index as usize {
                return true;
            }
            if visited[current] {
                continue;
            }
            visited[current] = true;
            if let Some(Some(node)) = self.nodes.get(current) {
                for edge_id in &node.outgoing {
                    if let Some(edge) = &self.edges[edge_id.0 as usize] {
                        stack.push(edge.to.index as usize);
                    }
                }
            }
        }
        false
    }

    fn disconnect_internal(&mut self, id: EdgeId) {
        let idx = id.0 as usize;
        if let Some(edge) = self.edges.get_mut(idx).and_then(Option::take) {
            if let Some(Some(node)) = self.nodes.get_mut(edge.from.index as usize) {
                node.outgoing.retain(|e| *e != id);
            }
            if let Some(Some(node)) = self.nodes.get_mut(edge.to.index as usize) {
                node.incoming.retain(|e| *e != id);
            }
        }
    }

    /// Source slots feeding `port` of the node in `slot`.
    fn port_sources(&self, slot: usize, port: Port) -> Vec<usize> {
        let Some(Some(node)) = self.nodes.get(slot) else {
            return Vec::new();
        };
        node.incoming
            .iter()
            .filter_map(|e| self.edges[e.0 as usize].as_ref())
            .filter(|e| e.port == port)
            .map(|e| e.from.index as usize)
            .collect()
    }

    fn midi_source(&self, slot: usize) -> MidiSource {
        match self.port_sources(slot, Port::Midi).first() {
            None => MidiSource::None,
            Some(&src) if src == self.input.index as usize => MidiSource::External,
            Some(&src) => MidiSource::Node(src),
        }
    }

    /// Kahn's algorithm over every live node.
    fn kahn_sort(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut active_count = 0usize;
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                active_count += 1;
                in_degree[i] = node
                    .incoming
                    .iter()
                    .filter(|e| self.edges[e.0 as usize].is_some())
                    .count() as u32;
            }
        }

        // Lowest slot first keeps the order deterministic.
        let mut queue: Vec<usize> = (0..n)
            .rev()
            .filter(|&i| self.nodes[i].is_some() && in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(active_count);

        while let Some(idx) = queue.pop() {
            sorted.push(idx);
            if let Some(Some(node)) = self.nodes.get(idx) {
                for edge_id in &node.outgoing {
                    if let Some(edge) = &self.edges[edge_id.0 as usize] {
                        let to = edge.to.index as usize;
                        in_degree[to] -= 1;
                        if in_degree[to] == 0 {
                            queue.push(to);
                        }
                    }
                }
            }
        }

        if sorted.len() != active_count {
            return Err(GraphError::CycleDetected);
        }
        Ok(sorted)
    }

    /// Latency at each node's output: max over audio inputs plus its own.
    fn compute_output_latencies(&self, sorted: &[usize]) -> Vec<usize> {
        let mut out_latency = vec![0usize; self.nodes.len()];
        for &idx in sorted {
            let Some(Some(node)) = self.nodes.get(idx) else {
                continue;
            };
            let arrival = node
                .incoming
                .iter()
                .filter_map(|e| self.edges[e.0 as usize].as_ref())
                .filter(|e| e.port.is_audio())
                .map(|e| out_latency[e.from.index as usize])
                .max()
                .unwrap_or(0);
            let own = if node.kind == NodeKind::Process {
                node.latency
            } else {
                0
            };
            out_latency[idx] = arrival + own;
        }
        out_latency
    }

    fn count_misaligned(&self, out_latency: &[usize]) -> usize {
        let mut count = 0;
        for (slot, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let mut port_latency = [None::<usize>; 2];
            for (i, port) in [Port::Main, Port::Aux].into_iter().enumerate() {
                let lats: Vec<usize> = self
                    .port_sources(slot, port)
                    .into_iter()
                    .map(|src| out_latency[src])
                    .collect();
                if let (Some(min), Some(max)) = (lats.iter().min(), lats.iter().max()) {
                    if min != max {
                        count += 1;
                    }
                    port_latency[i] = Some(*max);
                }
            }
            if let [Some(main), Some(aux)] = port_latency {
                if node.requires_aligned && main != aux {
                    count += 1;
                }
            }
        }
        count
    }

    fn emit_raw_schedule(&self, sorted: &[usize]) -> Emitter {
        let mut em = Emitter::default();
        let mut node_vbuf: Vec<Option<usize>> = vec![None; self.nodes.len()];

        for &slot in sorted {
            let Some(Some(node)) = self.nodes.get(slot) else {
                continue;
            };
            let resolve_sources = |port: Port| -> Vec<usize> {
                self.port_sources(slot, port)
                    .into_iter()
                    .filter_map(|src| node_vbuf[src])
                    .collect()
            };
            match node.kind {
                NodeKind::Input => {
                    let vbuf = em.new_vbuf();
                    let s = em.push(RawStep::WriteInput { vbuf });
                    em.write(vbuf, s);
                    node_vbuf[slot] = Some(vbuf);
                }
                NodeKind::Output => {
                    let sources = resolve_sources(Port::Main);
                    let vbuf = em.resolve(&sources);
                    let midi = self.midi_source(slot);
                    let s = em.push(RawStep::ReadOutput { vbuf, midi });
                    if let Some(v) = vbuf {
                        em.read(v, s);
                    }
                }
                NodeKind::Process => {
                    let main_sources = resolve_sources(Port::Main);
                    let aux_sources = resolve_sources(Port::Aux);
                    let main = em.resolve(&main_sources);
                    let aux = em.resolve(&aux_sources);
                    let output = em.new_vbuf();
                    let midi = self.midi_source(slot);
                    let s = em.push(RawStep::ProcessNode {
                        node_idx: slot,
                        main,
                        aux,
                        output,
                        midi,
                    });
                    for v in [main, aux].into_iter().flatten() {
                        em.read(v, s);
                    }
                    em.write(output, s);
                    node_vbuf[slot] = Some(output);
                }
            }
        }
        em
    }
}

/// Step over virtual buffers, before physical assignment.
#[derive(Debug)]
enum RawStep {
    WriteInput {
        vbuf: usize,
    },
    ClearBuffer {
        vbuf: usize,
    },
    AccumulateBuffer {
        source: usize,
        dest: usize,
    },
    ProcessNode {
        node_idx: usize,
        main: Option<usize>,
        aux: Option<usize>,
        output: usize,
        midi: MidiSource,
    },
    ReadOutput {
        vbuf: Option<usize>,
        midi: MidiSource,
    },
}

/// Accumulates raw steps and per-virtual-buffer liveness.
#[derive(Default)]
struct Emitter {
    steps: Vec<RawStep>,
    first_write: Vec<usize>,
    last_read: Vec<usize>,
}

impl Emitter {
    fn new_vbuf(&mut self) -> usize {
        self.first_write.push(usize::MAX);
        self.last_read.push(0);
        self.first_write.len() - 1
    }

    fn push(&mut self, step: RawStep) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    fn write(&mut self, vbuf: usize, step: usize) {
        if self.first_write[vbuf] == usize::MAX {
            self.first_write[vbuf] = step;
        }
        self.last_read[vbuf] = self.last_read[vbuf].max(step);
    }

    fn read(&mut self, vbuf: usize, step: usize) {
        self.last_read[vbuf] = self.last_read[vbuf].max(step);
    }

    /// Single source: read it directly. Several: sum into a fresh buffer.
    fn resolve(&mut self, sources: &[usize]) -> Option<usize> {
        match sources {
            [] => None,
            [single] => Some(*single),
            many => {
                let sum = self.new_vbuf();
                let s = self.push(RawStep::ClearBuffer { vbuf: sum });
                self.write(sum, s);
                for &src in many {
                    let s = self.push(RawStep::AccumulateBuffer {
                        source: src,
                        dest: sum,
                    });
                    self.read(src, s);
                    self.read(sum, s);
                }
                Some(sum)
            }
        }
    }

    /// Greedy interval allocation: a physical buffer is busy from a virtual
    /// buffer's first write to its last read, and reusable from the step
    /// after. A linear chain needs two buffers.
    fn assign_buffers(self) -> (Vec<ProcessStep>, usize) {
        let vbuf_count = self.first_write.len();
        let mut vbuf_to_phys = vec![0usize; vbuf_count];
        let mut phys_count = 0usize;
        let mut free_at: Vec<(usize, usize)> = Vec::new();

        let mut order: Vec<usize> = (0..vbuf_count).collect();
        order.sort_by_key(|&v| self.first_write[v]);

        for vbuf in order {
            let (fw, lr) = (self.first_write[vbuf], self.last_read[vbuf]);
            if fw == usize::MAX {
                continue;
            }
            let phys = match free_at.iter().position(|&(free_step, _)| free_step <= fw) {
                Some(i) => free_at.swap_remove(i).1,
                None => {
                    phys_count += 1;
                    phys_count - 1
                }
            };
            vbuf_to_phys[vbuf] = phys;
            free_at.push((lr + 1, phys));
        }

        let phys = |v: usize| vbuf_to_phys[v];
        let steps = self
            .steps
            .into_iter()
            .map(|raw| match raw {
                RawStep::WriteInput { vbuf } => ProcessStep::WriteInput {
                    buffer_idx: phys(vbuf),
                },
                RawStep::ClearBuffer { vbuf } => ProcessStep::ClearBuffer {
                    buffer_idx: phys(vbuf),
                },
                RawStep::AccumulateBuffer { source, dest } => ProcessStep::AccumulateBuffer {
                    source_buf: phys(source),
                    dest_buf: phys(dest),
                },
                RawStep::ProcessNode {
                    node_idx,
                    main,
                    aux,
                    output,
                    midi,
                } => ProcessStep::ProcessNode {
                    node_idx,
                    main: main.map(phys),
                    aux: aux.map(phys),
                    output_buf: phys(output),
                    midi,
                },
                RawStep::ReadOutput { vbuf, midi } => ProcessStep::ReadOutput {
                    buffer_idx: vbuf.map(phys),
                    midi,
                },
            })
            .collect();

        (steps, phys_count.max(1))
    }
}
