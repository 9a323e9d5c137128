//! Processing nodes the chain layer inserts around plugins.
//!
//! None of these nodes allocate in [`process`](crate::AudioNode::process).
//! Controls arrive through shared atomic cells and are read once per block,
//! so changing a gain or a mix never requires recompiling the graph.

mod branch_gain;
mod delay;
mod dry_wet;
mod ducking;
mod meter;
mod mid_side;

pub use branch_gain::BranchGain;
pub use delay::FixedDelay;
pub use dry_wet::DryWetMix;
pub use ducking::Ducker;
pub use meter::{MeterReadings, MeterSnapshot, MeterTap};
pub use mid_side::{MidSideComponent, MidSideNode, MidSideStage};
