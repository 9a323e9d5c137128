//! Peak envelope follower for sidechain ducking.

use libm::expf;

/// Attack/release peak envelope follower.
///
/// Each sample the rectified input is compared with the current envelope: a
/// rising input uses the attack coefficient, a falling one the release
/// coefficient, with `coeff = exp(-1 / (ms * fs / 1000))`.
///
/// # Example
///
/// ```rust
/// use arbor_core::EnvelopeFollower;
///
/// let mut env = EnvelopeFollower::with_times(48000.0, 5.0, 200.0);
/// let level = env.process(0.5);
/// assert!(level > 0.0 && level < 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
    sample_rate: f32,
    attack_ms: f32,
    release_ms: f32,
}

impl EnvelopeFollower {
    /// Creates a follower with 10 ms attack and 100 ms release.
    pub fn new(sample_rate: f32) -> Self {
        Self::with_times(sample_rate, 10.0, 100.0)
    }

    /// Creates a follower with explicit attack and release times.
    pub fn with_times(sample_rate: f32, attack_ms: f32, release_ms: f32) -> Self {
        let mut follower = Self {
            envelope: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            sample_rate,
            attack_ms: attack_ms.max(0.1),
            release_ms: release_ms.max(1.0),
        };
        follower.recalculate_coefficients();
        follower
    }

    /// Sets the attack time (minimum 0.1 ms).
    pub fn set_attack_ms(&mut self, attack_ms: f32) {
        self.attack_ms = attack_ms.max(0.1);
        self.recalculate_coefficients();
    }

    /// Sets the release time (minimum 1 ms).
    pub fn set_release_ms(&mut self, release_ms: f32) {
        self.release_ms = release_ms.max(1.0);
        self.recalculate_coefficients();
    }

    /// Current release time in milliseconds.
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    /// Updates the sample rate and recomputes both coefficients.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_coefficients();
    }

    /// Feeds one sample and returns the new envelope level.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let rectified = input.abs();
        let coeff = if rectified > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * rectified;
        self.envelope
    }

    /// Current level without feeding a sample.
    pub fn level(&self) -> f32 {
        self.envelope
    }

    /// Drops the envelope to zero.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn recalculate_coefficients(&mut self) {
        self.attack_coeff = expf(-1.0 / (self.attack_ms * self.sample_rate / 1000.0));
        self.release_coeff = expf(-1.0 / (self.release_ms * self.sample_rate / 1000.0));
    }
}

impl Default for EnvelopeFollower {
    fn default() -> Self {
        Self::new(48000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rises_on_attack() {
        let mut env = EnvelopeFollower::with_times(48000.0, 5.0, 200.0);
        let mut level = 0.0;
        for _ in 0..2400 {
            level = env.process(1.0);
        }
        assert!(level > 0.99, "got {level}");
    }

    #[test]
    fn falls_on_release() {
        let mut env = EnvelopeFollower::with_times(48000.0, 1.0, 10.0);
        for _ in 0..500 {
            env.process(1.0);
        }
        let mut level = 1.0;
        for _ in 0..1000 {
            level = env.process(0.0);
        }
        // ~2 time constants
        assert!(level < 0.15, "got {level}");
    }

    #[test]
    fn rectifies_negative_input() {
        let mut env = EnvelopeFollower::new(48000.0);
        assert!(env.process(-0.5) > 0.0);
    }

    #[test]
    fn release_is_clamped() {
        let mut env = EnvelopeFollower::new(48000.0);
        env.set_release_ms(0.0);
        assert_eq!(env.release_ms(), 1.0);
    }

    #[test]
    fn reset_clears_level() {
        let mut env = EnvelopeFollower::new(48000.0);
        env.process(1.0);
        env.reset();
        assert_eq!(env.level(), 0.0);
    }
}
