//! WAV file reading and writing.

use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavWriter};
use partita_core::StereoSamples;

use crate::{Error, Result};

/// WAV audio encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// Linear PCM (integer samples).
    Pcm,
    /// IEEE 754 floating-point samples.
    IeeeFloat,
}

/// WAV file metadata extracted without loading sample data.
#[derive(Debug, Clone)]
pub struct WavInfo {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Total number of sample frames (samples per channel).
    pub num_frames: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Audio encoding format.
    pub format: WavFormat,
}

/// Read WAV metadata without loading sample data.
pub fn read_wav_info<P: AsRef<Path>>(path: P) -> Result<WavInfo> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let num_frames = u64::from(reader.duration());
    let duration_secs = num_frames as f64 / f64::from(spec.sample_rate);

    let format = match spec.sample_format {
        SampleFormat::Float => WavFormat::IeeeFloat,
        SampleFormat::Int => WavFormat::Pcm,
    };

    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        num_frames,
        duration_secs,
        format,
    })
}

/// WAV file specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of audio channels.
    pub channels: u16,
    /// Sample rate in Hz (e.g., 44100, 48000).
    pub sample_rate: u32,
    /// Bit depth per sample. 32 writes float, anything else integer PCM.
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
        }
    }
}

impl From<hound::WavSpec> for WavSpec {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

/// Decode all samples of an open reader, interleaved, scaled to `[-1, 1)`.
pub(crate) fn read_interleaved(
    reader: WavReader<BufReader<std::fs::File>>,
) -> Result<Vec<f32>> {
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(Error::UnsupportedFormat(format!(
                    "{}-bit float",
                    spec.bits_per_sample
                )));
            }
            Ok(reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?)
        }
        SampleFormat::Int => {
            if !(8..=32).contains(&spec.bits_per_sample) {
                return Err(Error::UnsupportedFormat(format!(
                    "{}-bit PCM",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            Ok(reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?)
        }
    }
}

/// Read a WAV file as stereo.
///
/// Mono files are duplicated to both channels. Files with more than two
/// channels use only the first two.
pub fn read_wav_stereo<P: AsRef<Path>>(path: P) -> Result<(StereoSamples, WavSpec)> {
    let reader = WavReader::open(path)?;
    let spec = WavSpec::from(reader.spec());
    let channels = usize::from(spec.channels.max(1));
    let all_samples = read_interleaved(reader)?;

    let stereo = match channels {
        1 => StereoSamples::from_mono(all_samples),
        2 => StereoSamples::from_interleaved(&all_samples),
        _ => {
            let frames = all_samples.len() / channels;
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);
            for frame in all_samples.chunks_exact(channels) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            StereoSamples::new(left, right)
        }
    };

    Ok((stereo, spec))
}

fn to_int(sample: f32, max_val: f32) -> i32 {
    (sample * max_val).clamp(-max_val, max_val - 1.0) as i32
}

/// Write interleaved samples with the channel count in `spec`.
pub fn write_wav<P: AsRef<Path>>(path: P, interleaved: &[f32], spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec))?;

    if spec.bits_per_sample == 32 {
        for &sample in interleaved {
            writer.write_sample(sample)?;
        }
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        for &sample in interleaved {
            writer.write_sample(to_int(sample, max_val))?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Write stereo samples. The channel count in `spec` is forced to two.
pub fn write_wav_stereo<P: AsRef<Path>>(
    path: P,
    samples: &StereoSamples,
    spec: WavSpec,
) -> Result<()> {
    let stereo_spec = WavSpec {
        channels: 2,
        ..spec
    };
    write_wav(path, &samples.to_interleaved(), stereo_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn stereo_roundtrip_f32() {
        let left: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect();
        let right: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).cos()).collect();
        let samples = StereoSamples::new(left, right);

        let file = NamedTempFile::new().unwrap();
        write_wav_stereo(file.path(), &samples, WavSpec::default()).unwrap();

        let (loaded, spec) = read_wav_stereo(file.path()).unwrap();
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.channels, 2);
        assert_eq!(loaded, samples);
    }

    #[test]
    fn pcm16_is_within_one_step() {
        let mono: Vec<f32> = (0..500).map(|i| (i as f32 / 80.0).sin() * 0.9).collect();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
        };

        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &mono, spec).unwrap();

        let (loaded, _) = read_wav_stereo(file.path()).unwrap();
        assert_eq!(loaded.left, loaded.right);
        for (a, b) in mono.iter().zip(&loaded.left) {
            assert!((a - b).abs() < 1.0 / 32768.0 + 1e-6);
        }
    }

    #[test]
    fn full_scale_clamps_instead_of_wrapping() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 16,
        };
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &[1.5, -1.5], spec).unwrap();

        let (loaded, _) = read_wav_stereo(file.path()).unwrap();
        assert!(loaded.left[0] > 0.99);
        assert!((loaded.left[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn info_reports_frames_not_samples() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 24000,
            bits_per_sample: 24,
        };
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &vec![0.0; 2 * 12000], spec).unwrap();

        let info = read_wav_info(file.path()).unwrap();
        assert_eq!(info.num_frames, 12000);
        assert_eq!(info.format, WavFormat::Pcm);
        assert!((info.duration_secs - 0.5).abs() < 1e-9);
    }
}
