//! Impulse responses from WAV files.

use std::path::Path;
use std::sync::Arc;

use hound::WavReader;
use partita_convolution::{ImpulseBuffer, SharedImpulse};

use crate::wav::read_interleaved;
use crate::{Error, Result};

/// Read every channel of a WAV file into an [`ImpulseBuffer`] at the file's
/// own sample rate. Resampling to the host rate happens when the effect
/// reloads.
pub fn load_impulse<P: AsRef<Path>>(path: P) -> Result<ImpulseBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels);
    if channels == 0 {
        return Err(Error::UnsupportedFormat("zero channels".to_string()));
    }

    let interleaved = read_interleaved(reader)?;
    let frames = interleaved.len() / channels;
    if frames == 0 {
        return Err(Error::EmptyFile(path.to_path_buf()));
    }

    let mut split = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in split.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    tracing::debug!(
        path = %path.display(),
        channels,
        frames,
        sample_rate = spec.sample_rate,
        "loaded impulse"
    );
    Ok(ImpulseBuffer::new(split, f64::from(spec.sample_rate)))
}

/// [`load_impulse`] wrapped as a provider, ready for
/// [`ConvolutionEffect::new`](partita_convolution::ConvolutionEffect::new).
pub fn load_shared_impulse<P: AsRef<Path>>(path: P) -> Result<Arc<SharedImpulse>> {
    Ok(Arc::new(SharedImpulse::new(load_impulse(path)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WavSpec, write_wav};
    use tempfile::NamedTempFile;

    #[test]
    fn channels_are_deinterleaved() {
        let spec = WavSpec {
            channels: 3,
            sample_rate: 96000,
            bits_per_sample: 32,
        };
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], spec).unwrap();

        let impulse = load_impulse(file.path()).unwrap();
        assert_eq!(impulse.num_channels(), 3);
        assert_eq!(impulse.channel(0).unwrap(), &[0.1, 0.4]);
        assert_eq!(impulse.channel(2).unwrap(), &[0.3, 0.6]);
        assert_eq!(impulse.sample_rate, 96000.0);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        write_wav(file.path(), &[], WavSpec::default()).unwrap();
        assert!(matches!(load_impulse(file.path()), Err(Error::EmptyFile(_))));
    }

    #[test]
    fn not_a_wav_is_a_wav_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"definitely not RIFF").unwrap();
        assert!(matches!(load_impulse(file.path()), Err(Error::Wav(_))));
    }
}
