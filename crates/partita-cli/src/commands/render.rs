//! Offline rendering of a WAV file through the convolution reverb.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use partita_config::ConvolutionSettings;
use partita_convolution::{ConvolutionEffect, ImpulseProvider};
use partita_core::{ProcessData, StereoSamples};
use partita_io::{WavSpec, load_shared_impulse, read_wav_stereo, write_wav, write_wav_stereo};

use super::common::{format_db, load_settings, peak, rms};

/// Offline renders wait this long for a background tail job so the result
/// never depends on scheduling.
const OFFLINE_LATE_JOB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args)]
pub struct RenderArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Impulse response WAV file (overrides the settings file)
    #[arg(short, long)]
    impulse: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Dry level in dB
    #[arg(long, allow_hyphen_values = true)]
    dry: Option<f32>,

    /// Wet level in dB
    #[arg(long, allow_hyphen_values = true)]
    wet: Option<f32>,

    /// Wet predelay in milliseconds
    #[arg(long)]
    predelay: Option<f32>,

    /// Level the impulse decays towards, in dB
    #[arg(long, allow_hyphen_values = true)]
    damping: Option<f32>,

    /// Damping cutoff in Hz
    #[arg(long)]
    hi_cut: Option<f32>,

    /// Background convolution workers (0 renders everything inline)
    #[arg(long)]
    threads: Option<usize>,

    /// Processing block size
    #[arg(long, default_value = "512")]
    block_size: usize,

    /// Output bit depth (16, 24, or 32)
    #[arg(long, default_value = "32")]
    bit_depth: u16,

    /// Stop at the end of the input instead of letting the tail ring out
    #[arg(long)]
    no_tail: bool,
}

impl RenderArgs {
    fn override_settings(&self, settings: &mut ConvolutionSettings) {
        if let Some(db) = self.dry {
            settings.dry_gain_db = db;
        }
        if let Some(db) = self.wet {
            settings.wet_gain_db = db;
        }
        if let Some(ms) = self.predelay {
            settings.predelay_ms = ms;
        }
        if let Some(db) = self.damping {
            settings.damping_db = db;
        }
        if let Some(hz) = self.hi_cut {
            settings.hi_cut_hz = hz;
        }
        if let Some(threads) = self.threads {
            settings.engine.worker_threads = threads;
        }
    }
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    if args.block_size == 0 {
        bail!("block size must be at least 1");
    }
    if !matches!(args.bit_depth, 16 | 24 | 32) {
        bail!("unsupported bit depth {} (expected 16, 24 or 32)", args.bit_depth);
    }

    let (mut settings, base) = load_settings(args.settings.as_deref())?;
    args.override_settings(&mut settings);
    settings.validate().context("invalid settings")?;

    let impulse_path = args
        .impulse
        .clone()
        .or_else(|| settings.impulse_path(&base))
        .context("no impulse response given; use --impulse or set `impulse` in the settings file")?;

    println!("Reading {}...", args.input.display());
    let (input, spec) = read_wav_stereo(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let sample_rate = f64::from(spec.sample_rate);
    let mono = spec.channels == 1;
    println!(
        "  {} frames, {} Hz, {}, {:.2}s",
        input.len(),
        spec.sample_rate,
        if mono { "mono" } else { "stereo" },
        input.len() as f64 / sample_rate
    );

    let impulse = load_shared_impulse(&impulse_path)
        .with_context(|| format!("loading impulse {}", impulse_path.display()))?;
    let impulse_seconds = impulse.read().duration_seconds();

    let mut options = settings.effect_options()?;
    options.late_job_timeout = OFFLINE_LATE_JOB_TIMEOUT;
    options.async_reload = false;

    let mut effect = ConvolutionEffect::new(impulse, options)?;
    let handle = effect.handle();
    settings.apply(&handle)?;
    effect.prepare(sample_rate, args.block_size)?;

    let tail_frames = if args.no_tail {
        0
    } else {
        let impulse_frames = (impulse_seconds * sample_rate).round() as usize;
        let predelay_frames = (f64::from(settings.predelay_ms) * sample_rate / 1000.0).ceil() as usize;
        impulse_frames + predelay_frames
    };
    let total = input.len() + tail_frames;
    let mut left = input.left.clone();
    let mut right = input.right.clone();
    left.resize(total, 0.0);
    right.resize(total, 0.0);

    println!(
        "Convolving with {} ({:.2}s, {} tail stages)...",
        impulse_path.display(),
        impulse_seconds,
        handle.layout().tail.len()
    );

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let block = args.block_size;
    for (index, (l, r)) in left.chunks_mut(block).zip(right.chunks_mut(block)).enumerate() {
        let mut data = if mono {
            ProcessData::mono(l)
        } else {
            ProcessData::stereo(l, r)
        };
        effect.process(&mut data);
        pb.set_position(((index + 1) * block).min(total) as u64);
    }
    pb.finish_and_clear();

    let output = if mono {
        StereoSamples::from_mono(left)
    } else {
        StereoSamples::new(left, right)
    };

    let stats = handle.stats();
    tracing::info!(
        late_tail_blocks = stats.late_tail_blocks,
        contended_blocks = stats.contended_blocks,
        "render finished"
    );

    let input_mono = input.to_mono();
    let output_mono = output.to_mono();
    println!("\nStats:");
    println!(
        "  Input:  RMS {}, Peak {}",
        format_db(rms(&input_mono)),
        format_db(peak(&input_mono))
    );
    println!(
        "  Output: RMS {}, Peak {}",
        format_db(rms(&output_mono)),
        format_db(peak(&output_mono))
    );

    let out_spec = WavSpec {
        channels: if mono { 1 } else { 2 },
        sample_rate: spec.sample_rate,
        bits_per_sample: args.bit_depth,
    };
    println!("\nWriting {}...", args.output.display());
    if mono {
        write_wav(&args.output, &output.left, out_spec)
    } else {
        write_wav_stereo(&args.output, &output, out_spec)
    }
    .with_context(|| format!("writing {}", args.output.display()))?;
    println!("Done!");

    Ok(())
}
