//! Mid/side matrix stages placed around a plugin.
//!
//! The transform `mid = (L+R)·k, side = (L−R)·k` with `k = 1/√2` is its own
//! inverse, so encode and decode use the same arithmetic and a round trip is
//! unity gain with no added latency.
//!
//! Processing a single component needs two stages: the encoder hands the
//! chosen component to the plugin on both channels, and the decoder takes the
//! processed component from its main port and re-derives the bypassed one
//! from the unprocessed leaf input on its aux port.

use core::f32::consts::FRAC_1_SQRT_2;

use crate::audio_node::{AudioNode, NodeInputs};
use crate::graph::StereoBuffer;
use crate::midi::MidiBuffer;

/// Which component the wrapped plugin processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidSideComponent {
    /// Mid on the left channel, side on the right.
    Both,
    /// Mid only; side bypasses the plugin.
    Mid,
    /// Side only; mid bypasses the plugin.
    Side,
}

/// Position of a [`MidSideNode`] relative to the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidSideStage {
    /// L/R in, plugin feed out.
    Encode(MidSideComponent),
    /// Plugin output (main) and, for a single component, the aligned
    /// unprocessed input (aux) in; L/R out.
    Decode(MidSideComponent),
}

#[inline]
fn matrix(a: f32, b: f32) -> (f32, f32) {
    ((a + b) * FRAC_1_SQRT_2, (a - b) * FRAC_1_SQRT_2)
}

/// One mid/side stage.
pub struct MidSideNode {
    stage: MidSideStage,
}

impl MidSideNode {
    /// Creates a stage.
    pub fn new(stage: MidSideStage) -> Self {
        Self { stage }
    }

    /// The stage this node performs.
    pub fn stage(&self) -> MidSideStage {
        self.stage
    }
}

impl AudioNode for MidSideNode {
    fn prepare(&mut self, _sample_rate: f32, _max_block: usize) {}

    fn process(
        &mut self,
        inputs: &NodeInputs<'_>,
        output: &mut StereoBuffer,
        _midi_out: &mut MidiBuffer,
        len: usize,
    ) {
        let input = inputs.main;
        match self.stage {
            MidSideStage::Encode(component) | MidSideStage::Decode(component)
                if component == MidSideComponent::Both =>
            {
                for i in 0..len {
                    let (a, b) = matrix(input.left[i], input.right[i]);
                    output.left[i] = a;
                    output.right[i] = b;
                }
            }
            MidSideStage::Encode(component) => {
                for i in 0..len {
                    let (mid, side) = matrix(input.left[i], input.right[i]);
                    let v = if component == MidSideComponent::Mid { mid } else { side };
                    output.left[i] = v;
                    output.right[i] = v;
                }
            }
            MidSideStage::Decode(component) => {
                for i in 0..len {
                    let processed = (input.left[i] + input.right[i]) * 0.5;
                    let (dry_mid, dry_side) = inputs
                        .aux
                        .map_or((0.0, 0.0), |dry| matrix(dry.left[i], dry.right[i]));
                    let (mid, side) = if component == MidSideComponent::Mid {
                        (processed, dry_side)
                    } else {
                        (dry_mid, processed)
                    };
                    let (l, r) = matrix(mid, side);
                    output.left[i] = l;
                    output.right[i] = r;
                }
            }
        }
    }

    fn input_ports(&self) -> usize {
        match self.stage {
            MidSideStage::Decode(MidSideComponent::Mid | MidSideComponent::Side) => 2,
            _ => 1,
        }
    }

    fn requires_aligned_inputs(&self) -> bool {
        self.input_ports() == 2
    }

    fn name(&self) -> &str {
        match self.stage {
            MidSideStage::Encode(_) => "ms_encode",
            MidSideStage::Decode(_) => "ms_decode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(len: usize) -> StereoBuffer {
        let mut buf = StereoBuffer::new(len);
        for i in 0..len {
            buf.left[i] = (i as f32 * 0.07).sin() * 0.8;
            buf.right[i] = (i as f32 * 0.19).cos() * 0.5;
        }
        buf
    }

    fn run(stage: MidSideStage, main: &StereoBuffer, aux: Option<&StereoBuffer>) -> StereoBuffer {
        let mut node = MidSideNode::new(stage);
        let mut out = StereoBuffer::new(main.len());
        let midi = MidiBuffer::default();
        let inputs = NodeInputs {
            main,
            aux,
            midi: &midi,
        };
        node.process(&inputs, &mut out, &mut MidiBuffer::default(), main.len());
        out
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn full_round_trip_is_identity() {
        let input = stereo(128);
        let encoded = run(MidSideStage::Encode(MidSideComponent::Both), &input, None);
        let decoded = run(MidSideStage::Decode(MidSideComponent::Both), &encoded, None);
        assert_close(&decoded.left, &input.left);
        assert_close(&decoded.right, &input.right);
    }

    #[test]
    fn mono_input_has_no_side() {
        let mut input = StereoBuffer::new(16);
        input.left.fill(0.5);
        input.right.fill(0.5);
        let encoded = run(MidSideStage::Encode(MidSideComponent::Both), &input, None);
        assert!(encoded.right.iter().all(|&s| s.abs() < 1e-7));
        assert!((encoded.left[0] - 0.5 * 2.0 * FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn single_component_round_trip_is_identity() {
        let input = stereo(128);
        for component in [MidSideComponent::Mid, MidSideComponent::Side] {
            let encoded = run(MidSideStage::Encode(component), &input, None);
            assert_eq!(encoded.left, encoded.right);
            let decoded = run(MidSideStage::Decode(component), &encoded, Some(&input));
            assert_close(&decoded.left, &input.left);
            assert_close(&decoded.right, &input.right);
        }
    }

    #[test]
    fn mid_only_leaves_side_untouched() {
        let input = stereo(64);
        let encoded = run(MidSideStage::Encode(MidSideComponent::Mid), &input, None);
        let mut silenced = encoded.clone();
        silenced.clear();
        let decoded = run(MidSideStage::Decode(MidSideComponent::Mid), &silenced, Some(&input));
        for i in 0..64 {
            let side = (input.left[i] - input.right[i]) * FRAC_1_SQRT_2;
            let (_, out_side) = matrix(decoded.left[i], decoded.right[i]);
            assert!((out_side - side).abs() < 1e-6);
        }
    }

    #[test]
    fn decode_port_counts() {
        assert_eq!(
            MidSideNode::new(MidSideStage::Decode(MidSideComponent::Both)).input_ports(),
            1
        );
        let side = MidSideNode::new(MidSideStage::Decode(MidSideComponent::Side));
        assert_eq!(side.input_ports(), 2);
        assert!(side.requires_aligned_inputs());
    }
}
