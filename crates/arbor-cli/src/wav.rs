//! Stereo WAV reading and writing.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Deinterleaved stereo audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoSamples {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoSamples {
    pub fn len(&self) -> usize {
        self.left.len()
    }
}

/// Reads a WAV file as stereo f32.
///
/// Mono files are duplicated to both channels; files with more than two
/// channels keep the first two.
pub fn read_wav_stereo(path: &Path) -> anyhow::Result<(StereoSamples, u32)> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mut samples = StereoSamples::default();
    for frame in interleaved.chunks(channels) {
        let left = frame[0];
        samples.left.push(left);
        samples.right.push(frame.get(1).copied().unwrap_or(left));
    }
    Ok((samples, spec.sample_rate))
}

/// Writes stereo audio as 16, 24 or 32-bit (float) PCM.
pub fn write_wav_stereo(
    path: &Path,
    samples: &StereoSamples,
    sample_rate: u32,
    bit_depth: u16,
) -> anyhow::Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };
    if !matches!(bit_depth, 16 | 24 | 32) {
        anyhow::bail!("unsupported bit depth {bit_depth} (expected 16, 24 or 32)");
    }
    let mut writer = WavWriter::create(path, spec)?;

    if bit_depth == 32 {
        for (&l, &r) in samples.left.iter().zip(&samples.right) {
            writer.write_sample(l)?;
            writer.write_sample(r)?;
        }
    } else {
        let max_val = (1i32 << (bit_depth - 1)) as f32;
        for (&l, &r) in samples.left.iter().zip(&samples.right) {
            writer.write_sample((l * max_val).clamp(-max_val, max_val - 1.0) as i32)?;
            writer.write_sample((r * max_val).clamp(-max_val, max_val - 1.0) as i32)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        let samples = StereoSamples {
            left: (0..100).map(|i| i as f32 / 100.0).collect(),
            right: vec![-0.25; 100],
        };
        write_wav_stereo(&path, &samples, 44100, 32).unwrap();
        let (read, rate) = read_wav_stereo(&path).unwrap();
        assert_eq!(rate, 44100);
        assert_eq!(read, samples);
    }

    #[test]
    fn mono_is_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for v in [0i16, 16384, -16384] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let (read, _) = read_wav_stereo(&path).unwrap();
        assert_eq!(read.left, vec![0.0, 0.5, -0.5]);
        assert_eq!(read.left, read.right);
    }

    #[test]
    fn odd_bit_depth_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.wav");
        assert!(write_wav_stereo(&path, &StereoSamples::default(), 48000, 12).is_err());
    }
}
