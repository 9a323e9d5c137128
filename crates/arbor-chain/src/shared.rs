//! Thread-safe state shared by the chain's control and audio sides.
//!
//! [`ChainShared`] is the bridge between [`ChainProcessor`](crate::ChainProcessor)
//! (UI / main thread) and [`ChainAudio`](crate::ChainAudio) (real-time
//! thread). Graph updates travel through a single pending slot, retired nodes
//! come back through a single garbage slot, and everything the host or UI
//! reads continuously (latency, flat plugin list, process setup) is published
//! through atomics and `ArcSwap`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use arbor_core::{GraphUpdate, OversamplingFactor};
use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::plugin::PluginIdentity;
use crate::tree::ChainNodeId;

/// Format the audio side runs at, as set by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSetup {
    /// Host sample rate in Hz.
    pub sample_rate: f32,
    /// Largest host block.
    pub max_block_size: usize,
    /// Oversampling around the whole chain.
    pub oversampling: OversamplingFactor,
}

impl ProcessSetup {
    /// Sample rate the graph runs at.
    pub fn inner_sample_rate(&self) -> f32 {
        self.sample_rate * self.oversampling.factor() as f32
    }

    /// Largest block the graph sees.
    pub fn inner_block_size(&self) -> usize {
        self.max_block_size.max(1) * self.oversampling.factor()
    }
}

impl Default for ProcessSetup {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 512,
            oversampling: OversamplingFactor::Off,
        }
    }
}

/// One entry of the flattened plugin list (processing order).
#[derive(Debug, Clone, PartialEq)]
pub struct FlatPlugin {
    /// Position in processing order.
    pub flat_index: usize,
    /// Tree id of the leaf.
    pub node_id: ChainNodeId,
    /// Hosted plugin.
    pub identity: PluginIdentity,
    /// Whether the leaf has a live instance.
    pub available: bool,
}

/// Inner storage behind `Arc` so `ChainShared` can be cheaply cloned.
struct ChainSharedData {
    /// Next graph update for the audio thread. UI locks, audio `try_lock`s.
    pending: Mutex<Option<GraphUpdate>>,

    /// Update handed back by the audio thread, holding retired nodes.
    garbage: Mutex<Option<GraphUpdate>>,

    /// While set, the audio thread outputs silence and processes nothing.
    suspended: AtomicBool,

    /// Set by the audio thread for the duration of each block.
    busy: AtomicBool,

    /// Chain latency at the graph's rate.
    chain_latency: AtomicUsize,

    /// Oversampling factor index currently in effect.
    oversampling: AtomicUsize,

    /// Flattened plugin list, republished after structural changes.
    flat_plugins: ArcSwap<Vec<FlatPlugin>>,

    /// Process setup last passed to `ChainAudio::prepare`.
    setup: ArcSwap<ProcessSetup>,

    /// Bumped on every `publish_setup`.
    setup_generation: AtomicU64,
}

/// Shared state accessible from the control and audio threads.
///
/// # Thread Safety
///
/// - **Pending update / garbage**: `Mutex`, control side locks, audio side
///   only ever `try_lock`s and retries next block on contention.
/// - **Latency, oversampling, flags**: atomics, lock-free.
/// - **Flat plugins, setup**: `ArcSwap::load()`, wait-free reads.
#[derive(Clone)]
pub struct ChainShared {
    inner: Arc<ChainSharedData>,
}

impl ChainShared {
    /// Creates shared state for the given initial setup.
    pub fn new(setup: ProcessSetup) -> Self {
        Self {
            inner: Arc::new(ChainSharedData {
                pending: Mutex::new(None),
                garbage: Mutex::new(None),
                suspended: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                chain_latency: AtomicUsize::new(0),
                oversampling: AtomicUsize::new(setup.oversampling.index() as usize),
                flat_plugins: ArcSwap::from_pointee(Vec::new()),
                setup: ArcSwap::from_pointee(setup),
                setup_generation: AtomicU64::new(0),
            }),
        }
    }

    // ── Graph updates ───────────────────────────────────────────────────────

    /// Publishes an update, merging it into one the audio thread has not
    /// picked up yet.
    pub fn publish_update(&self, update: GraphUpdate) {
        let mut pending = self.inner.pending.lock();
        match pending.as_mut() {
            Some(existing) => existing.merge(update),
            None => *pending = Some(update),
        }
    }

    /// Takes the pending update (audio thread, non-blocking).
    ///
    /// Returns `None` when nothing is pending or the slot is contended.
    pub fn try_take_update(&self) -> Option<GraphUpdate> {
        self.inner.pending.try_lock().and_then(|mut slot| slot.take())
    }

    /// Takes the pending update only if it was compiled for the given
    /// format (audio thread, non-blocking).
    ///
    /// An update built before the control side saw a format change stays
    /// pending; the next rebuild merges over it.
    pub fn try_take_update_for(&self, sample_rate: f32, block_size: usize) -> Option<GraphUpdate> {
        let mut slot = self.inner.pending.try_lock()?;
        if slot
            .as_ref()
            .is_some_and(|u| u.matches_format(sample_rate, block_size))
        {
            slot.take()
        } else {
            None
        }
    }

    /// Takes the pending update, blocking. For non-real-time callers.
    pub fn take_update(&self) -> Option<GraphUpdate> {
        self.inner.pending.lock().take()
    }

    /// Whether an update is waiting for the audio thread.
    pub fn has_pending_update(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Hands an applied update back (audio thread, non-blocking).
    ///
    /// Returns the update unchanged when the slot is contended or still
    /// occupied, so the caller can retry next block.
    pub fn try_return_garbage(&self, garbage: GraphUpdate) -> Result<(), GraphUpdate> {
        match self.inner.garbage.try_lock() {
            Some(mut slot) if slot.is_none() => {
                *slot = Some(garbage);
                Ok(())
            }
            _ => Err(garbage),
        }
    }

    /// Takes returned garbage so it can be dropped on the calling thread.
    pub fn take_garbage(&self) -> Option<GraphUpdate> {
        self.inner.garbage.lock().take()
    }

    // ── Suspend / busy ──────────────────────────────────────────────────────

    /// Suspends or resumes audio processing.
    pub fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Whether processing is suspended.
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.inner.busy.store(busy, Ordering::SeqCst);
    }

    /// Whether the audio thread is inside a block.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    // ── Latency ─────────────────────────────────────────────────────────────

    /// Chain latency at the graph's rate.
    pub fn chain_latency(&self) -> usize {
        self.inner.chain_latency.load(Ordering::Acquire)
    }

    /// Publishes the chain latency.
    pub fn set_chain_latency(&self, samples: usize) {
        self.inner.chain_latency.store(samples, Ordering::Release);
    }

    /// Oversampling factor currently in effect.
    pub fn oversampling(&self) -> OversamplingFactor {
        OversamplingFactor::from_index(self.inner.oversampling.load(Ordering::Acquire) as i32)
    }

    /// Latency reported to the host, at the host rate.
    ///
    /// Combines the published chain latency and oversampling factor.
    pub fn host_latency(&self) -> usize {
        self.oversampling().host_latency(self.chain_latency())
    }

    // ── Flat plugin list ────────────────────────────────────────────────────

    /// Load the flattened plugin list (wait-free read).
    pub fn load_flat_plugins(&self) -> arc_swap::Guard<Arc<Vec<FlatPlugin>>> {
        self.inner.flat_plugins.load()
    }

    /// Publish a new flattened plugin list.
    pub fn store_flat_plugins(&self, plugins: Vec<FlatPlugin>) {
        self.inner.flat_plugins.store(Arc::new(plugins));
    }

    // ── Process setup ───────────────────────────────────────────────────────

    /// Current process setup.
    pub fn setup(&self) -> ProcessSetup {
        **self.inner.setup.load()
    }

    /// Generation counter of the process setup.
    pub fn setup_generation(&self) -> u64 {
        self.inner.setup_generation.load(Ordering::Acquire)
    }

    pub(crate) fn publish_setup(&self, setup: ProcessSetup) {
        self.inner.setup.store(Arc::new(setup));
        self.inner
            .oversampling
            .store(setup.oversampling.index() as usize, Ordering::Release);
        self.inner.setup_generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ChainShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainShared")
            .field("chain_latency", &self.chain_latency())
            .field("oversampling", &self.oversampling())
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{GraphRunner, ProcessingGraph};

    fn update() -> GraphUpdate {
        let mut graph = ProcessingGraph::new(48000.0, 64);
        let (input, output) = (graph.input(), graph.output());
        graph.connect(input, output, arbor_core::Port::Main).unwrap();
        graph.compile().unwrap()
    }

    #[test]
    fn pending_update_is_taken_once() {
        let shared = ChainShared::new(ProcessSetup::default());
        shared.publish_update(update());
        assert!(shared.has_pending_update());
        assert!(shared.try_take_update().is_some());
        assert!(shared.try_take_update().is_none());
    }

    #[test]
    fn stale_format_update_stays_pending() {
        let shared = ChainShared::new(ProcessSetup::default());
        shared.publish_update(update());
        assert!(shared.try_take_update_for(48000.0, 1024).is_none());
        assert!(shared.has_pending_update());
        assert!(shared.try_take_update_for(48000.0, 64).is_some());
    }

    #[test]
    fn unconsumed_updates_merge() {
        let shared = ChainShared::new(ProcessSetup::default());
        shared.publish_update(update());
        shared.publish_update(update());
        assert!(shared.try_take_update().is_some());
        assert!(!shared.has_pending_update());
    }

    #[test]
    fn garbage_slot_holds_one_update() {
        let shared = ChainShared::new(ProcessSetup::default());
        let mut runner = GraphRunner::new(48000.0, 64);
        let returned = runner.apply(update());
        assert!(shared.try_return_garbage(returned).is_ok());

        let second = runner.apply(update());
        assert!(shared.try_return_garbage(second).is_err());
        assert!(shared.take_garbage().is_some());
        assert!(shared.take_garbage().is_none());
    }

    #[test]
    fn host_latency_combines_chain_and_oversampling() {
        let shared = ChainShared::new(ProcessSetup::default());
        shared.set_chain_latency(256);
        assert_eq!(shared.host_latency(), 256);

        shared.publish_setup(ProcessSetup {
            oversampling: OversamplingFactor::X2,
            ..ProcessSetup::default()
        });
        assert_eq!(shared.host_latency(), 128 + OversamplingFactor::X2.filter_latency());
        assert_eq!(shared.setup_generation(), 1);
    }

    #[test]
    fn inner_format_scales_with_factor() {
        let setup = ProcessSetup {
            sample_rate: 44100.0,
            max_block_size: 256,
            oversampling: OversamplingFactor::X4,
        };
        assert_eq!(setup.inner_sample_rate(), 176_400.0);
        assert_eq!(setup.inner_block_size(), 1024);
    }

    #[test]
    fn flat_plugins_publish() {
        let shared = ChainShared::new(ProcessSetup::default());
        shared.store_flat_plugins(vec![FlatPlugin {
            flat_index: 0,
            node_id: ChainNodeId(4),
            identity: PluginIdentity::new("t", "a", "A"),
            available: true,
        }]);
        assert_eq!(shared.load_flat_plugins()[0].node_id, ChainNodeId(4));
    }
}
