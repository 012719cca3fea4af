//! Impulse response details and partition layout.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use partita_convolution::{ConvolutionEffect, EffectOptions, ImpulseProvider, StageLayout};
use partita_io::{WavFormat, load_shared_impulse, read_wav_info};

use super::common::load_settings;

/// Display an impulse response and the partitions it would be split into.
#[derive(Args)]
pub struct InfoArgs {
    /// Impulse response WAV file
    pub impulse: PathBuf,

    /// Host sample rate to partition for (defaults to the file's rate)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Host block size
    #[arg(long, default_value = "512")]
    pub block_size: usize,

    /// Settings file supplying engine options
    #[arg(short, long)]
    pub settings: Option<PathBuf>,
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let info = read_wav_info(&args.impulse)
        .with_context(|| format!("reading {}", args.impulse.display()))?;

    let format_str = match info.format {
        WavFormat::Pcm => "PCM",
        WavFormat::IeeeFloat => "IEEE Float",
    };

    println!("File:        {}", args.impulse.display());
    println!("Format:      {} {}-bit", format_str, info.bits_per_sample);
    println!("Channels:    {}", info.channels);
    println!("Sample Rate: {} Hz", info.sample_rate);
    println!(
        "Duration:    {:.3}s ({} frames)",
        info.duration_secs, info.num_frames
    );

    let (settings, _) = load_settings(args.settings.as_deref())?;
    let options = EffectOptions {
        async_reload: false,
        ..settings.effect_options()?
    };
    let sample_rate = args.sample_rate.unwrap_or(info.sample_rate);

    let impulse = load_shared_impulse(&args.impulse)?;
    let peak = impulse
        .read()
        .channels()
        .iter()
        .flatten()
        .fold(0.0_f32, |m, s| m.max(s.abs()));
    println!("Peak:        {}", super::common::format_db(peak));

    let mut effect = ConvolutionEffect::new(impulse, options)?;
    effect.prepare(f64::from(sample_rate), args.block_size.max(1))?;
    let report = effect.handle().reload()?;
    let layout = effect.handle().layout();

    println!();
    println!(
        "Partitions at {} Hz, block {} ({} samples after resampling x{:.4}):",
        sample_rate, args.block_size, report.impulse_len, report.resample_ratio
    );
    print_stage("head", &layout.head);
    for (index, stage) in layout.tail.iter().enumerate() {
        print_stage(&format!("tail {}", index + 1), stage);
    }
    if report.replaced_samples > 0 {
        println!("Warning: {} non-finite samples replaced", report.replaced_samples);
    }

    Ok(())
}

fn print_stage(name: &str, stage: &StageLayout) {
    println!(
        "  {:<8} block {:>6}  offset {:>8}  length {:>8}  {}",
        name,
        stage.block_size,
        stage.offset,
        stage.length,
        if stage.background { "pool" } else { "inline" }
    );
}
