//! Lock-free control cells shared between the control thread and nodes.
//!
//! The control side writes new targets; the node reads them once per block.
//! Values are `f32` bit-cast into an `AtomicU32`, the same encoding the plugin
//! parameter bridge uses.

use core::sync::atomic::{AtomicU32, Ordering};

/// An `f32` stored atomically.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Creates a cell holding `value`.
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Reads the current value.
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Publishes a new value.
    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Ducking amount and release time for one [`Ducker`](crate::Ducker).
#[derive(Debug)]
pub struct DuckControl {
    /// Depth, 0..=1. Zero passes audio untouched.
    pub amount: AtomicF32,
    /// Release time in milliseconds, 50..=1000.
    pub release_ms: AtomicF32,
}

impl DuckControl {
    /// Minimum release time.
    pub const MIN_RELEASE_MS: f32 = 50.0;
    /// Maximum release time.
    pub const MAX_RELEASE_MS: f32 = 1000.0;
    /// Release used when none is configured.
    pub const DEFAULT_RELEASE_MS: f32 = 200.0;

    /// Creates a control with clamped values.
    pub fn new(amount: f32, release_ms: f32) -> Self {
        Self {
            amount: AtomicF32::new(clamp_amount(amount)),
            release_ms: AtomicF32::new(clamp_release(release_ms)),
        }
    }

    /// Publishes new settings, clamped to range.
    pub fn set(&self, amount: f32, release_ms: f32) {
        self.amount.store(clamp_amount(amount));
        self.release_ms.store(clamp_release(release_ms));
    }
}

impl Default for DuckControl {
    fn default() -> Self {
        Self::new(0.0, Self::DEFAULT_RELEASE_MS)
    }
}

fn clamp_amount(amount: f32) -> f32 {
    if amount.is_nan() { 0.0 } else { amount.clamp(0.0, 1.0) }
}

fn clamp_release(ms: f32) -> f32 {
    if ms.is_nan() {
        DuckControl::DEFAULT_RELEASE_MS
    } else {
        ms.clamp(DuckControl::MIN_RELEASE_MS, DuckControl::MAX_RELEASE_MS)
    }
}
