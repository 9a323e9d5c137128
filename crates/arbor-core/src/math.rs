//! Level conversions and small mixing helpers.
//!
//! All functions are allocation-free and `no_std` friendly.

use libm::{expf, logf};

/// Convert decibels to linear gain.
///
/// 0 dB maps to exactly 1.0, so unity settings stay bit-transparent.
///
/// # Example
/// ```rust
/// use arbor_core::db_to_linear;
///
/// assert_eq!(db_to_linear(0.0), 1.0);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    // 10^(dB/20) = e^(dB * ln(10)/20)
    const FACTOR: f32 = core::f32::consts::LN_10 / 20.0;
    expf(db * FACTOR)
}

/// Convert linear gain to decibels.
///
/// Inputs at or below zero are clamped to -200 dB.
///
/// # Example
/// ```rust
/// use arbor_core::linear_to_db;
///
/// assert!(linear_to_db(1.0).abs() < 0.001);
/// assert!((linear_to_db(0.5) - (-6.02)).abs() < 0.01);
/// ```
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    const FACTOR: f32 = 20.0 / core::f32::consts::LN_10;
    logf(linear.max(1e-10)) * FACTOR
}

/// Linear crossfade between a dry and a wet sample.
///
/// `mix = 0.0` returns `dry`, `mix = 1.0` returns `wet`.
#[inline]
pub fn wet_dry_mix(dry: f32, wet: f32, mix: f32) -> f32 {
    dry * (1.0 - mix) + wet * mix
}

/// Number of whole samples in `ms` milliseconds at `sample_rate`.
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> usize {
    let samples = ms * 0.001 * sample_rate;
    if samples <= 0.0 { 0 } else { samples as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_is_exact() {
        assert_eq!(db_to_linear(0.0), 1.0);
    }

    #[test]
    fn db_round_trip() {
        for db in [-60.0, -12.0, -3.0, 0.0, 6.0, 24.0] {
            let back = linear_to_db(db_to_linear(db));
            assert!((back - db).abs() < 0.01, "{db} -> {back}");
        }
    }

    #[test]
    fn mix_endpoints() {
        assert_eq!(wet_dry_mix(0.3, 0.9, 0.0), 0.3);
        assert_eq!(wet_dry_mix(0.3, 0.9, 1.0), 0.9);
    }

    #[test]
    fn ms_conversion() {
        assert_eq!(ms_to_samples(20.0, 48000.0), 960);
        assert_eq!(ms_to_samples(-1.0, 48000.0), 0);
    }
}
