//! Block oversampling stage around a whole processing chain.
//!
//! The chain host can run its entire graph at 2× or 4× the host rate. The
//! [`Oversampler`] upsamples each incoming block, hands the enlarged block to
//! a callback, and filters and decimates the result back to the host rate.
//!
//! ## Signal Path
//!
//! ```text
//! Input → Linear Interpolation (upsample) → chain at N×fs → FIR Lowpass → Decimation → Output
//! ```
//!
//! Linear interpolation rolls off some high end; the decimation filter
//! removes that region anyway. The 16-tap windowed-sinc FIR has a constant
//! group delay of 7.5 samples at the oversampled rate, which
//! [`OversamplingFactor::filter_latency`] reports in base-rate samples.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

/// FIR filter order for anti-aliasing (taps = ORDER + 1).
const FILTER_ORDER: usize = 15;

/// Number of filter taps.
const FILTER_TAPS: usize = FILTER_ORDER + 1;

/// Largest supported factor.
pub const MAX_OVERSAMPLING: usize = 4;

/// Oversampling factor of the chain, selected by index 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversamplingFactor {
    /// Host rate.
    #[default]
    Off,
    /// 2× host rate.
    X2,
    /// 4× host rate.
    X4,
}

impl OversamplingFactor {
    /// Maps an index to a factor, clamping out-of-range values to 0…2.
    pub fn from_index(index: i32) -> Self {
        match index.clamp(0, 2) {
            0 => Self::Off,
            1 => Self::X2,
            _ => Self::X4,
        }
    }

    /// Index of this factor (0, 1 or 2).
    pub fn index(self) -> i32 {
        match self {
            Self::Off => 0,
            Self::X2 => 1,
            Self::X4 => 2,
        }
    }

    /// Rate multiplier (1, 2 or 4).
    pub fn factor(self) -> usize {
        match self {
            Self::Off => 1,
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }

    /// Decimation filter group delay in base-rate samples, rounded to nearest.
    ///
    /// 7.5 oversampled samples: 4 at 2×, 2 at 4×, 0 when off.
    pub fn filter_latency(self) -> usize {
        match self {
            Self::Off => 0,
            _ => {
                let f = self.factor();
                (FILTER_ORDER + f) / (2 * f)
            }
        }
    }

    /// Latency the host sees for a chain reporting `chain_latency` samples at
    /// the oversampled rate.
    ///
    /// Partial base-rate samples round up so compensation never undershoots.
    pub fn host_latency(self, chain_latency: usize) -> usize {
        chain_latency.div_ceil(self.factor()) + self.filter_latency()
    }
}

/// Per-channel up/down sampling state.
#[derive(Debug, Clone)]
struct ChannelState {
    prev_sample: f32,
    fir_state: [f32; FILTER_TAPS],
}

impl ChannelState {
    fn new() -> Self {
        Self {
            prev_sample: 0.0,
            fir_state: [0.0; FILTER_TAPS],
        }
    }

    fn upsample(&mut self, input: &[f32], output: &mut [f32], factor: usize) {
        let step = 1.0 / factor as f32;
        for (frame, &x) in output.chunks_exact_mut(factor).zip(input) {
            for (i, out) in frame.iter_mut().enumerate() {
                let t = (i as f32 + 1.0) * step;
                *out = self.prev_sample + t * (x - self.prev_sample);
            }
            self.prev_sample = x;
        }
    }

    fn downsample(&mut self, input: &[f32], output: &mut [f32], coeffs: &[f32; FILTER_TAPS]) {
        let factor = input.len() / output.len().max(1);
        for (frame, out) in input.chunks_exact(factor.max(1)).zip(output.iter_mut()) {
            for &x in frame {
                self.fir_state.copy_within(0..FILTER_TAPS - 1, 1);
                self.fir_state[0] = x;
            }
            *out = self
                .fir_state
                .iter()
                .zip(coeffs)
                .map(|(s, c)| s * c)
                .sum();
        }
    }

    fn reset(&mut self) {
        self.prev_sample = 0.0;
        self.fir_state = [0.0; FILTER_TAPS];
    }
}

/// Stereo block oversampler with a runtime factor.
///
/// Work buffers hold `max_block × 4` samples per channel, sized in
/// [`prepare()`](Self::prepare); changing the factor never allocates.
#[derive(Debug, Clone)]
pub struct Oversampler {
    factor: OversamplingFactor,
    max_block: usize,
    left: ChannelState,
    right: ChannelState,
    up_left: Vec<f32>,
    up_right: Vec<f32>,
    down_left: Vec<f32>,
    down_right: Vec<f32>,
}

impl Oversampler {
    /// Creates an oversampler for blocks of up to `max_block` host samples.
    pub fn new(factor: OversamplingFactor, max_block: usize) -> Self {
        let capacity = max_block * MAX_OVERSAMPLING;
        Self {
            factor,
            max_block,
            left: ChannelState::new(),
            right: ChannelState::new(),
            up_left: vec![0.0; capacity],
            up_right: vec![0.0; capacity],
            down_left: vec![0.0; capacity],
            down_right: vec![0.0; capacity],
        }
    }

    /// Resizes work buffers. Allocates.
    pub fn prepare(&mut self, max_block: usize) {
        let capacity = max_block * MAX_OVERSAMPLING;
        self.max_block = max_block;
        self.up_left.resize(capacity, 0.0);
        self.up_right.resize(capacity, 0.0);
        self.down_left.resize(capacity, 0.0);
        self.down_right.resize(capacity, 0.0);
        self.reset();
    }

    /// Current factor.
    pub fn factor(&self) -> OversamplingFactor {
        self.factor
    }

    /// Changes the factor and clears filter state.
    pub fn set_factor(&mut self, factor: OversamplingFactor) {
        if factor != self.factor {
            self.factor = factor;
            self.reset();
        }
    }

    /// Decimation filter latency in base-rate samples.
    pub fn latency_samples(&self) -> usize {
        self.factor.filter_latency()
    }

    /// Clears interpolation and filter state.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Runs `inner` at the oversampled rate.
    ///
    /// `inner` receives input and output slices `factor` times longer than
    /// the host block. With the factor off it is called on the host buffers
    /// directly. Host blocks longer than the prepared maximum are split.
    pub fn process<F>(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
        mut inner: F,
    ) where
        F: FnMut(&[f32], &[f32], &mut [f32], &mut [f32]),
    {
        let factor = self.factor.factor();
        if factor == 1 {
            inner(left_in, right_in, left_out, right_out);
            return;
        }

        let coeffs = match self.factor {
            OversamplingFactor::X2 => &COEFFS_2X,
            _ => &COEFFS_4X,
        };
        let total = left_in.len().min(left_out.len());
        let chunk = self.max_block.max(1);
        let mut start = 0;
        while start < total {
            let end = (start + chunk).min(total);
            let up_len = (end - start) * factor;

            self.left
                .upsample(&left_in[start..end], &mut self.up_left[..up_len], factor);
            self.right
                .upsample(&right_in[start..end], &mut self.up_right[..up_len], factor);

            inner(
                &self.up_left[..up_len],
                &self.up_right[..up_len],
                &mut self.down_left[..up_len],
                &mut self.down_right[..up_len],
            );

            self.left
                .downsample(&self.down_left[..up_len], &mut left_out[start..end], coeffs);
            self.right
                .downsample(&self.down_right[..up_len], &mut right_out[start..end], coeffs);
            start = end;
        }
    }
}

// Lowpass FIR coefficients for decimation. Windowed-sinc, Kaiser window,
// 16 taps, symmetric (linear phase). Cutoff at the base-rate Nyquist:
// 0.4 × oversampled Nyquist for 2×, 0.2 × for 4×. Sums normalized to 1.0.

/// 2× decimation filter (half-band).
#[allow(clippy::excessive_precision)]
#[rustfmt::skip]
static COEFFS_2X: [f32; FILTER_TAPS] = [
    -0.00152541,  0.00000000,  0.01309369,  0.00000000,
    -0.05738920,  0.00000000,  0.29581875,  0.50000434,
     0.29581875,  0.00000000, -0.05738920,  0.00000000,
     0.01309369,  0.00000000, -0.00152541,  0.00000000,
];

/// 4× decimation filter.
#[allow(clippy::excessive_precision)]
#[rustfmt::skip]
static COEFFS_4X: [f32; FILTER_TAPS] = [
    0.0018645282, 0.0068257641, 0.0172712655, 0.0342604001,
    0.0571166576, 0.0830896230, 0.1078345458, 0.1260221675,
    0.1332946246, 0.1260221675, 0.1078345458, 0.0830896230,
    0.0571166576, 0.0342604001, 0.0172712655, 0.0068257641,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_index_clamps() {
        assert_eq!(OversamplingFactor::from_index(-3), OversamplingFactor::Off);
        assert_eq!(OversamplingFactor::from_index(1), OversamplingFactor::X2);
        assert_eq!(OversamplingFactor::from_index(9), OversamplingFactor::X4);
        assert_eq!(OversamplingFactor::X4.index(), 2);
    }

    #[test]
    fn filter_latency_per_factor() {
        assert_eq!(OversamplingFactor::Off.filter_latency(), 0);
        assert_eq!(OversamplingFactor::X2.filter_latency(), 4);
        assert_eq!(OversamplingFactor::X4.filter_latency(), 2);
    }

    #[test]
    fn host_latency_combines_chain_and_filter() {
        assert_eq!(OversamplingFactor::Off.host_latency(128), 128);
        assert_eq!(OversamplingFactor::X2.host_latency(128), 64 + 4);
        assert_eq!(OversamplingFactor::X4.host_latency(128), 32 + 2);
        assert_eq!(OversamplingFactor::X4.host_latency(1), 1 + 2);
    }

    #[test]
    fn off_calls_inner_on_host_buffers() {
        let mut os = Oversampler::new(OversamplingFactor::Off, 32);
        let input = [0.25_f32; 32];
        let (mut l, mut r) = ([0.0_f32; 32], [0.0_f32; 32]);
        let mut seen = 0;
        os.process(&input, &input, &mut l, &mut r, |li, ri, lo, ro| {
            seen = li.len();
            lo.copy_from_slice(li);
            ro.copy_from_slice(ri);
        });
        assert_eq!(seen, 32);
        assert!(l.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn inner_runs_at_oversampled_length() {
        for factor in [OversamplingFactor::X2, OversamplingFactor::X4] {
            let mut os = Oversampler::new(factor, 64);
            let input = [0.5_f32; 64];
            let (mut l, mut r) = ([0.0_f32; 64], [0.0_f32; 64]);
            let mut seen = 0;
            os.process(&input, &input, &mut l, &mut r, |li, ri, lo, ro| {
                seen = li.len();
                lo.copy_from_slice(li);
                ro.copy_from_slice(ri);
            });
            assert_eq!(seen, 64 * factor.factor());
        }
    }

    #[test]
    fn dc_passes_at_unity() {
        for factor in [OversamplingFactor::X2, OversamplingFactor::X4] {
            let mut os = Oversampler::new(factor, 64);
            let input = [0.5_f32; 64];
            let (mut l, mut r) = ([0.0_f32; 64], [0.0_f32; 64]);
            for _ in 0..4 {
                os.process(&input, &input, &mut l, &mut r, |li, ri, lo, ro| {
                    lo.copy_from_slice(li);
                    ro.copy_from_slice(ri);
                });
            }
            assert!((l[63] - 0.5).abs() < 1e-3, "{factor:?}: {}", l[63]);
            assert!((r[63] - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn long_blocks_are_split() {
        let mut os = Oversampler::new(OversamplingFactor::X2, 16);
        let input = [0.5_f32; 100];
        let (mut l, mut r) = ([0.0_f32; 100], [0.0_f32; 100]);
        let mut calls = 0;
        os.process(&input, &input, &mut l, &mut r, |li, ri, lo, ro| {
            calls += 1;
            lo.copy_from_slice(li);
            ro.copy_from_slice(ri);
        });
        assert_eq!(calls, 7);
        assert!((l[99] - 0.5).abs() < 1e-3);
    }
}
