//! Offline rendering of a WAV file through a chain.

use std::path::PathBuf;
use std::sync::Arc;

use arbor_chain::{BuiltinProvider, ChainProcessor, EngineConfig};
use arbor_core::{MidiBuffer, OversamplingFactor};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::common::{ChainSource, load_chain};
use crate::wav::{StereoSamples, read_wav_stereo, write_wav_stereo};

#[derive(Args)]
pub struct RenderArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    source: ChainSource,

    /// Oversampling factor around the whole chain (1, 2 or 4)
    #[arg(long)]
    oversample: Option<usize>,

    /// Processing block size (overrides the config file)
    #[arg(long)]
    block_size: Option<usize>,

    /// Output bit depth (16, 24, or 32)
    #[arg(long, default_value = "32")]
    bit_depth: u16,

    /// Remove the chain latency from the start of the output
    #[arg(long)]
    trim_latency: bool,

    /// Save the chain as a JSON document
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

fn oversampling_index(factor: usize) -> anyhow::Result<i32> {
    match factor {
        1 => Ok(OversamplingFactor::Off.index()),
        2 => Ok(OversamplingFactor::X2.index()),
        4 => Ok(OversamplingFactor::X4.index()),
        other => anyhow::bail!("unsupported oversampling factor {other} (expected 1, 2 or 4)"),
    }
}

pub fn run(args: RenderArgs, config: EngineConfig) -> anyhow::Result<()> {
    println!("Reading {}...", args.input.display());
    let (input, sample_rate) = read_wav_stereo(&args.input)?;
    println!(
        "  {} samples, {} Hz, {:.2}s",
        input.len(),
        sample_rate,
        input.len() as f32 / sample_rate as f32
    );

    let mut config = EngineConfig {
        sample_rate: sample_rate as f32,
        ..config
    };
    if let Some(block) = args.block_size {
        config.max_block_size = block.max(1);
    }
    if let Some(factor) = args.oversample {
        config.oversampling = oversampling_index(factor)?;
    }

    let (mut chain, mut audio) = ChainProcessor::new(Arc::new(BuiltinProvider::new()), &config);
    load_chain(&mut chain, &args.source)?;
    let latency = chain.host_latency_samples();
    println!(
        "Processing through {} plugin(s), {}x oversampling, latency {} samples...",
        chain.plugin_count(),
        config.oversampling_factor().factor(),
        latency
    );

    if let Some(path) = &args.export {
        std::fs::write(path, chain.export_json()?)?;
        println!("Chain saved to {}", path.display());
    }

    // Zero tail so the trimmed output keeps the input length.
    let tail = if args.trim_latency { latency } else { 0 };
    let total = input.len() + tail;
    let padded = |channel: &[f32]| {
        let mut v = channel.to_vec();
        v.resize(total, 0.0);
        v
    };
    let (left_in, right_in) = (padded(&input.left), padded(&input.right));
    let mut output = StereoSamples {
        left: vec![0.0; total],
        right: vec![0.0; total],
    };

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let block = config.max_block_size;
    let midi_in = MidiBuffer::default();
    let mut midi_out = MidiBuffer::default();
    let mut start = 0;
    while start < total {
        let end = (start + block).min(total);
        audio.process(
            &left_in[start..end],
            &right_in[start..end],
            &mut output.left[start..end],
            &mut output.right[start..end],
            &midi_in,
            &mut midi_out,
        );
        chain.poll()?;
        pb.set_position(end as u64);
        start = end;
    }
    pb.finish_with_message("done");

    if tail > 0 {
        output.left.drain(..tail);
        output.right.drain(..tail);
    }

    let peak = output
        .left
        .iter()
        .chain(&output.right)
        .fold(0.0f32, |m, s| m.max(s.abs()));
    println!("Writing {} (peak {:.3})...", args.output.display(), peak);
    write_wav_stereo(&args.output, &output, sample_rate, args.bit_depth)?;
    println!("Done!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversampling_factors_map_to_indices() {
        assert_eq!(oversampling_index(1).unwrap(), 0);
        assert_eq!(oversampling_index(2).unwrap(), 1);
        assert_eq!(oversampling_index(4).unwrap(), 2);
        assert!(oversampling_index(3).is_err());
    }

    #[test]
    fn render_trims_latency() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        let mut samples = StereoSamples {
            left: vec![0.0; 300],
            right: vec![0.0; 300],
        };
        samples.left[5] = 0.5;
        write_wav_stereo(&input, &samples, 48000, 32).unwrap();

        let args = RenderArgs {
            input,
            output: output.clone(),
            source: ChainSource {
                chain: Some("delay:samples=40".into()),
                document: None,
            },
            oversample: None,
            block_size: Some(64),
            bit_depth: 32,
            trim_latency: true,
            export: None,
        };
        let config = EngineConfig {
            swap_crossfade_ms: 0.0,
            ..EngineConfig::default()
        };
        run(args, config).unwrap();

        let (rendered, _) = read_wav_stereo(&output).unwrap();
        assert_eq!(rendered.len(), 300);
        assert_eq!(rendered.left[5], 0.5);
    }
}
