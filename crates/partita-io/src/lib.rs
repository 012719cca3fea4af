//! File I/O for the partita convolution reverb.
//!
//! - **WAV file I/O**: [`read_wav_stereo`] and [`write_wav_stereo`] for the
//!   material being processed, [`read_wav_info`] for headers only
//! - **Impulse loading**: [`load_impulse`] reads every channel of a WAV file
//!   into an [`ImpulseBuffer`](partita_convolution::ImpulseBuffer) at its
//!   native rate; [`load_shared_impulse`] wraps it for a
//!   [`ConvolutionEffect`](partita_convolution::ConvolutionEffect)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use partita_convolution::{ConvolutionEffect, EffectOptions};
//! use partita_io::{load_shared_impulse, read_wav_stereo};
//!
//! let impulse = load_shared_impulse("hall.wav")?;
//! let (input, spec) = read_wav_stereo("dry.wav")?;
//!
//! let mut effect = ConvolutionEffect::new(impulse, EffectOptions::default())?;
//! effect.prepare(f64::from(spec.sample_rate), 512)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::PathBuf;

mod impulse;
mod wav;

pub use impulse::{load_impulse, load_shared_impulse};
pub use wav::{
    WavFormat, WavInfo, WavSpec, read_wav_info, read_wav_stereo, write_wav, write_wav_stereo,
};

/// Error types for file I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// The file holds no sample frames.
    #[error("no audio in '{}'", .0.display())]
    EmptyFile(PathBuf),

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for file I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
