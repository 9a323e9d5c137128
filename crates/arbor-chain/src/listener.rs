//! Observer interface for chain changes.

use crate::shared::FlatPlugin;
use crate::tree::ChainNodeId;

/// Receives notifications from a [`ChainProcessor`](crate::ChainProcessor).
///
/// All methods run on the thread that mutates the chain. Listeners are held
/// weakly; dropping the last `Arc` unregisters them.
pub trait ChainListener: Send + Sync {
    /// Tree structure or an attribute changed.
    fn chain_changed(&self) {}

    /// Host latency changed.
    fn latency_changed(&self, _samples: usize) {}

    /// The flattened plugin list changed. Fires after structural changes only.
    fn parameter_binding_changed(&self, _plugins: &[FlatPlugin]) {}

    /// A leaf could not be instantiated and was wired as a pass-through.
    fn plugin_failed(&self, _node: ChainNodeId, _reason: &str) {}
}
