//! Lock-free peak/RMS metering taps.
//!
//! A [`MeterTap`] passes audio through untouched and publishes one
//! [`MeterSnapshot`] per block into a shared [`MeterReadings`]. Readings are
//! double-buffered: the tap writes the inactive bank, then flips a sequence
//! counter, so readers on any thread see whole snapshots.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(feature = "std")]
use std::sync::Arc;

use libm::sqrtf;

use crate::audio_node::{AudioNode, NodeInputs};
use crate::control::AtomicF32;
use crate::graph::StereoBuffer;
use crate::midi::MidiBuffer;

/// Levels of one block, linear amplitude.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Left peak.
    pub peak_l: f32,
    /// Right peak.
    pub peak_r: f32,
    /// Left RMS.
    pub rms_l: f32,
    /// Right RMS.
    pub rms_r: f32,
}

#[derive(Debug, Default)]
struct Bank {
    peak_l: AtomicF32,
    peak_r: AtomicF32,
    rms_l: AtomicF32,
    rms_r: AtomicF32,
}

impl Bank {
    fn load(&self) -> MeterSnapshot {
        MeterSnapshot {
            peak_l: self.peak_l.load(),
            peak_r: self.peak_r.load(),
            rms_l: self.rms_l.load(),
            rms_r: self.rms_r.load(),
        }
    }

    fn store(&self, snap: &MeterSnapshot) {
        self.peak_l.store(snap.peak_l);
        self.peak_r.store(snap.peak_r);
        self.rms_l.store(snap.rms_l);
        self.rms_r.store(snap.rms_r);
    }
}

/// Shared, double-buffered meter values. One writer, any number of readers.
#[derive(Debug, Default)]
pub struct MeterReadings {
    banks: [Bank; 2],
    sequence: AtomicU32,
}

impl MeterReadings {
    /// Creates readings at silence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> MeterSnapshot {
        // A reader racing two flips retries; after a few attempts any bank
        // is an acceptable answer for a meter.
        let mut snap = MeterSnapshot::default();
        for _ in 0..4 {
            let before = self.sequence.load(Ordering::Acquire);
            snap = self.banks[(before & 1) as usize].load();
            if self.sequence.load(Ordering::Acquire) == before {
                break;
            }
        }
        snap
    }

    /// Number of blocks published so far (wrapping).
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    fn publish(&self, snap: &MeterSnapshot) {
        let next = self.sequence.load(Ordering::Relaxed).wrapping_add(1);
        self.banks[(next & 1) as usize].store(snap);
        self.sequence.store(next, Ordering::Release);
    }
}

/// Pass-through node that meters its input.
pub struct MeterTap {
    readings: Arc<MeterReadings>,
    label: &'static str,
}

impl MeterTap {
    /// Creates a tap publishing into `readings`.
    pub fn new(readings: Arc<MeterReadings>, label: &'static str) -> Self {
        Self { readings, label }
    }
}

fn measure(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut peak = 0.0_f32;
    let mut sum = 0.0_f32;
    for &s in samples {
        peak = peak.max(s.abs());
        sum += s * s;
    }
    (peak, sqrtf(sum / samples.len() as f32))
}

impl AudioNode for MeterTap {
    fn prepare(&mut self, _sample_rate: f32, _max_block: usize) {}

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        output.copy_prefix(inputs.main, len);
        midi_out.copy_from(inputs.midi);
        let (peak_l, rms_l) = measure(&inputs.main.left[..len]);
        let (peak_r, rms_r) = measure(&inputs.main.right[..len]);
        self.readings.publish(&MeterSnapshot {
            peak_l,
            peak_r,
            rms_l,
            rms_r,
        });
    }

    fn name(&self) -> &str {
        self.label
    }
}
