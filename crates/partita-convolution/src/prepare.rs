//! Impulse response preparation: resampling, decay shaping and damping.
//!
//! Everything here runs on the reload path, never on the audio thread. The
//! typical sequence is
//!
//! 1. [`prepare_impulse_response`] copies a range of the provider's buffer and
//!    resamples it to the host rate (cancellable),
//! 2. [`apply_exponential_fadeout`] shortens the decay,
//! 3. [`apply_high_frequency_damping`] darkens the tail progressively,
//! 4. [`sanitize_impulse`] scrubs NaN, Inf and denormals before the samples
//!    reach an engine.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use partita_core::{LagrangeResampler, OnePole, StereoSamples, resampled_length, sanitize_buffer};

use crate::error::ConvolutionError;
use crate::impulse::ImpulseBuffer;

/// Output samples resampled between two abort checks.
const RESAMPLE_CHUNK: usize = 4096;

/// Highest cutoff of the damping sweep; a cutoff at or above it disables
/// damping.
pub const MAX_DAMPING_FREQUENCY: f64 = 20000.0;

/// Lowest cutoff the damping sweep will reach.
pub const MIN_DAMPING_FREQUENCY: f64 = 20.0;

/// Samples per cutoff update in the damping sweep.
const DAMPING_CHUNK: usize = 64;

/// Sample rate assumed when the host rate is not known yet.
const FALLBACK_SAMPLE_RATE: f64 = 44100.0;

fn aborted(abort: Option<&AtomicBool>) -> bool {
    abort.is_some_and(|flag| flag.load(Ordering::Acquire))
}

/// Ratio between the host rate and the impulse rate.
///
/// Falls back to `1.0` while either rate is unknown (the result is negative,
/// zero, or not finite), so a later call with real rates can redo the work.
///
/// ```rust
/// use partita_convolution::resample_factor;
///
/// assert_eq!(resample_factor(48000.0, 24000.0), 2.0);
/// assert_eq!(resample_factor(-1.0, 44100.0), 1.0);
/// assert_eq!(resample_factor(48000.0, 0.0), 1.0);
/// ```
pub fn resample_factor(sample_rate: f64, impulse_sample_rate: f64) -> f64 {
    let factor = sample_rate / impulse_sample_rate;
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    }
}

/// Copy `range` of `source` into `destination` as stereo, resampled by
/// `ratio` (host rate / impulse rate).
///
/// - The left channel comes from source channel 0, the right from channel 1
///   if it exists, else channel 0 again.
/// - An empty `range` means the whole buffer; a range past the end is
///   clamped.
/// - An empty source succeeds without touching `destination`.
/// - `abort` is checked before copying and between resampling chunks. When it
///   is raised the function returns [`ConvolutionError::Aborted`] and
///   `destination` is left untouched.
pub fn prepare_impulse_response(
    source: &ImpulseBuffer,
    destination: &mut StereoSamples,
    abort: Option<&AtomicBool>,
    range: Range<usize>,
    ratio: f64,
) -> Result<(), ConvolutionError> {
    prepare_until(source, destination, &mut || aborted(abort), range, ratio)
}

/// [`prepare_impulse_response`] with the abort check as a callback.
fn prepare_until(
    source: &ImpulseBuffer,
    destination: &mut StereoSamples,
    stop: &mut dyn FnMut() -> bool,
    range: Range<usize>,
    ratio: f64,
) -> Result<(), ConvolutionError> {
    if source.is_empty() {
        return Ok(());
    }
    if stop() {
        return Err(ConvolutionError::Aborted);
    }

    let left = source.channel(0).unwrap_or_default();
    let right = source.channel(1).unwrap_or(left);
    let len = left.len().min(right.len());
    let range = if range.is_empty() {
        0..len
    } else {
        range.start.min(len)..range.end.min(len)
    };
    let left = &left[range.clone()];
    let right = &right[range];

    let prepared = if ratio == 1.0 || !ratio.is_finite() || ratio <= 0.0 {
        StereoSamples::new(left.to_vec(), right.to_vec())
    } else {
        let out_len = resampled_length(left.len(), ratio);
        let resampled_left = resample(left, out_len, ratio, stop)?;
        let resampled_right = resample(right, out_len, ratio, stop)?;
        StereoSamples::new(resampled_left, resampled_right)
    };

    if stop() {
        return Err(ConvolutionError::Aborted);
    }

    tracing::debug!(
        source_len = source.len(),
        prepared_len = prepared.len(),
        ratio,
        "impulse prepared"
    );
    *destination = prepared;
    Ok(())
}

fn resample(
    input: &[f32],
    out_len: usize,
    ratio: f64,
    stop: &mut dyn FnMut() -> bool,
) -> Result<Vec<f32>, ConvolutionError> {
    let mut output = vec![0.0; out_len];
    let mut resampler = LagrangeResampler::new(1.0 / ratio);
    for chunk in output.chunks_mut(RESAMPLE_CHUNK) {
        if stop() {
            return Err(ConvolutionError::Aborted);
        }
        resampler.render(input, chunk);
    }
    Ok(output)
}

/// Multiply `buffer` by a curve falling exponentially from 1.0 towards
/// `target_gain`:
///
/// ```text
/// m(i) = t + (1 - t) * exp(-4 i / n)
/// ```
///
/// A no-op when `target_gain == 1.0` or the buffer is empty.
pub fn apply_exponential_fadeout(buffer: &mut [f32], target_gain: f32) {
    if target_gain == 1.0 || buffer.is_empty() {
        return;
    }
    let n = buffer.len() as f32;
    let inverse = 1.0 - target_gain;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let curve = (-4.0 * i as f32 / n).exp();
        *sample *= target_gain + inverse * curve;
    }
}

/// Low-pass `buffer` with two cascaded one-pole filters whose cutoff sweeps
/// exponentially from 20 kHz down towards `cutoff`.
///
/// The cutoff is updated every 64 samples:
///
/// ```text
/// c     = cutoff / 20 kHz
/// f(i)  = 20 kHz * (c + (1 - c) * exp(-8 i / n))     clamped to [20 Hz, 20 kHz]
/// ```
///
/// A no-op when `cutoff >= 20 kHz` or the buffer is empty. A non-positive
/// `sample_rate` is treated as 44.1 kHz.
pub fn apply_high_frequency_damping(buffer: &mut [f32], cutoff: f64, sample_rate: f64) {
    if cutoff >= MAX_DAMPING_FREQUENCY || buffer.is_empty() {
        return;
    }
    let sample_rate = if sample_rate > 0.0 {
        sample_rate
    } else {
        FALLBACK_SAMPLE_RATE
    };

    let n = buffer.len() as f64;
    let base = cutoff.max(0.0) / MAX_DAMPING_FREQUENCY;
    let inverse = 1.0 - base;

    let mut first = OnePole::new(sample_rate as f32, MAX_DAMPING_FREQUENCY as f32);
    let mut second = OnePole::new(sample_rate as f32, MAX_DAMPING_FREQUENCY as f32);

    for (index, chunk) in buffer.chunks_mut(DAMPING_CHUNK).enumerate() {
        let i = (index * DAMPING_CHUNK) as f64;
        let multiplier = base + inverse * (-8.0 * i / n).exp();
        let frequency = (MAX_DAMPING_FREQUENCY * multiplier)
            .clamp(MIN_DAMPING_FREQUENCY, MAX_DAMPING_FREQUENCY) as f32;
        first.set_frequency(frequency);
        second.set_frequency(frequency);
        for sample in chunk.iter_mut() {
            *sample = second.process(first.process(*sample));
        }
    }
}

/// Apply [`apply_exponential_fadeout`] to both channels.
pub fn fade_out_stereo(samples: &mut StereoSamples, target_gain: f32) {
    for channel in samples.channels_mut() {
        apply_exponential_fadeout(channel, target_gain);
    }
}

/// Apply [`apply_high_frequency_damping`] to both channels with independent
/// filter state.
pub fn damp_stereo(samples: &mut StereoSamples, cutoff: f64, sample_rate: f64) {
    for channel in samples.channels_mut() {
        apply_high_frequency_damping(channel, cutoff, sample_rate);
    }
}

/// Replace NaN and Inf with zero and flush denormals in both channels.
/// Returns the number of non-finite samples that were replaced.
pub fn sanitize_impulse(samples: &mut StereoSamples) -> usize {
    let replaced = sanitize_buffer(&mut samples.left) + sanitize_buffer(&mut samples.right);
    if replaced > 0 {
        tracing::warn!(replaced, "impulse contained non-finite samples");
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse::{ImpulseProvider, SharedImpulse};

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32).collect()
    }

    #[test]
    fn empty_source_leaves_destination_alone() {
        let mut dest = StereoSamples::from_mono(vec![9.0; 3]);
        prepare_impulse_response(&ImpulseBuffer::default(), &mut dest, None, 0..0, 2.0).unwrap();
        assert_eq!(dest.left, vec![9.0; 3]);
    }

    #[test]
    fn mono_source_is_duplicated() {
        let source = ImpulseBuffer::mono(ramp(10), 44100.0);
        let mut dest = StereoSamples::default();
        prepare_impulse_response(&source, &mut dest, None, 0..0, 1.0).unwrap();
        assert_eq!(dest.len(), 10);
        assert_eq!(dest.left, dest.right);
    }

    #[test]
    fn stereo_source_keeps_channels() {
        let source = ImpulseBuffer::stereo(vec![1.0; 4], vec![-1.0; 4], 44100.0);
        let mut dest = StereoSamples::default();
        prepare_impulse_response(&source, &mut dest, None, 0..0, 1.0).unwrap();
        assert_eq!(dest.left, vec![1.0; 4]);
        assert_eq!(dest.right, vec![-1.0; 4]);
    }

    #[test]
    fn range_selects_samples() {
        let source = ImpulseBuffer::mono(ramp(100), 44100.0);
        let mut dest = StereoSamples::default();
        prepare_impulse_response(&source, &mut dest, None, 10..20, 1.0).unwrap();
        assert_eq!(dest.len(), 10);
        assert_eq!(dest.left[0], 0.1);

        prepare_impulse_response(&source, &mut dest, None, 90..500, 1.0).unwrap();
        assert_eq!(dest.len(), 10);
    }

    #[test]
    fn resampled_length_follows_ratio() {
        let source = ImpulseBuffer::mono(ramp(44100), 44100.0);
        let mut dest = StereoSamples::default();
        let ratio = resample_factor(48000.0, 44100.0);
        prepare_impulse_response(&source, &mut dest, None, 0..0, ratio).unwrap();
        assert_eq!(dest.len(), 48000);
    }

    #[test]
    fn raised_abort_flag_fails_without_writing() {
        let source = ImpulseBuffer::mono(ramp(1000), 44100.0);
        let mut dest = StereoSamples::from_mono(vec![7.0; 2]);
        let abort = AtomicBool::new(true);
        let err = prepare_impulse_response(&source, &mut dest, Some(&abort), 0..0, 2.0)
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(dest.left, vec![7.0; 2]);
    }

    #[test]
    fn abort_raised_during_resampling_leaves_destination_alone() {
        let source = ImpulseBuffer::stereo(ramp(441_000), ramp(441_000), 44100.0);
        let mut dest = StereoSamples::from_mono(vec![7.0; 2]);
        let ratio = resample_factor(48000.0, 44100.0);
        let abort = AtomicBool::new(false);
        let mut checks = 0;
        // Raise the flag once the first chunk has been rendered.
        let mut stop = || {
            checks += 1;
            if checks == 3 {
                abort.store(true, Ordering::Release);
            }
            aborted(Some(&abort))
        };

        let err = prepare_until(&source, &mut dest, &mut stop, 0..0, ratio).unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(checks, 3);
        assert_eq!(dest.left, vec![7.0; 2]);
        assert_eq!(dest.right, vec![7.0; 2]);
    }

    #[test]
    fn abort_from_another_thread_stops_a_long_resample() {
        let source = ImpulseBuffer::mono(ramp(441_000), 44100.0);
        let mut dest = StereoSamples::from_mono(vec![7.0; 2]);
        let abort = AtomicBool::new(false);
        let started = AtomicBool::new(false);
        let mut checks = 0;
        let mut stop = || {
            checks += 1;
            if checks == 2 {
                started.store(true, Ordering::Release);
            }
            // Hold the second chunk until the other thread has raised the flag.
            while checks >= 3 && !aborted(Some(&abort)) {
                std::thread::yield_now();
            }
            aborted(Some(&abort))
        };

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !started.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                abort.store(true, Ordering::Release);
            });
            let err = prepare_until(&source, &mut dest, &mut stop, 0..0, 48000.0 / 44100.0)
                .unwrap_err();
            assert!(err.is_aborted());
        });
        assert_eq!(dest.left, vec![7.0; 2]);
    }

    #[test]
    fn uneven_channels_are_cut_to_the_shortest() {
        let shared = SharedImpulse::new(ImpulseBuffer::mono(vec![0.25; 100], 44100.0));
        shared.write().push_channel(vec![0.5; 10]);
        let mut dest = StereoSamples::default();
        prepare_impulse_response(&shared.read(), &mut dest, None, 0..0, 1.0).unwrap();
        assert_eq!(dest.left, vec![0.25; 10]);
        assert_eq!(dest.right, vec![0.5; 10]);
    }

    #[test]
    fn fadeout_curve() {
        let mut buffer = vec![1.0_f32; 1000];
        apply_exponential_fadeout(&mut buffer, 0.0);
        assert_eq!(buffer[0], 1.0);
        let expected_end = (-4.0_f32 * 999.0 / 1000.0).exp();
        assert!((buffer[999] - expected_end).abs() < 1e-5);
        assert!(buffer.windows(2).all(|w| w[1] <= w[0]));

        let mut untouched = vec![0.5_f32; 10];
        apply_exponential_fadeout(&mut untouched, 1.0);
        assert_eq!(untouched, vec![0.5; 10]);
        apply_exponential_fadeout(&mut [], 0.3);
    }

    #[test]
    fn damping_is_noop_at_twenty_khz() {
        let mut buffer = ramp(256);
        let original = buffer.clone();
        apply_high_frequency_damping(&mut buffer, 20000.0, 48000.0);
        assert_eq!(buffer, original);
        apply_high_frequency_damping(&mut [], 1000.0, 48000.0);
    }

    #[test]
    fn damping_removes_high_frequencies_late_in_the_tail() {
        let len = 48000;
        let mut buffer: Vec<f32> = (0..len).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        apply_high_frequency_damping(&mut buffer, 500.0, 48000.0);

        let early: f32 = buffer[64..1024].iter().map(|s| s.abs()).sum::<f32>() / 960.0;
        let late: f32 = buffer[len - 1024..].iter().map(|s| s.abs()).sum::<f32>() / 1024.0;
        assert!(late < early * 0.5, "early {early} late {late}");
        assert!(buffer.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn damping_tolerates_unknown_sample_rate() {
        let mut buffer = ramp(512);
        apply_high_frequency_damping(&mut buffer, 1000.0, 0.0);
        assert!(buffer.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn sanitize_counts_both_channels() {
        let mut samples = StereoSamples::new(vec![f32::NAN, 0.5], vec![1e-30, f32::INFINITY]);
        assert_eq!(sanitize_impulse(&mut samples), 2);
        assert_eq!(samples.left, vec![0.0, 0.5]);
        assert_eq!(samples.right, vec![0.0, 0.0]);
    }
}
