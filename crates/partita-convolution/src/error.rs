//! Error types for convolution operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while preparing, loading or running convolution.
///
/// Programming-contract violations (a non-power-of-two FFT or partition size)
/// are not represented here; they panic.
#[derive(Debug, Error)]
pub enum ConvolutionError {
    /// Impulse preparation was cancelled through its abort flag.
    #[error("impulse preparation aborted")]
    Aborted,

    /// A buffer handed to an FFT backend had the wrong length.
    #[error("FFT buffer length mismatch: expected {expected}, got {actual}")]
    FftLength {
        /// Length the backend was planned for.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// The effect was asked to reload before `prepare` gave it a sample rate
    /// and block size.
    #[error("effect has not been prepared")]
    NotPrepared,

    /// The audio thread held the engine slots for longer than the swap
    /// timeout, so the prepared engines were discarded.
    #[error("engine swap lock still held after {waited:?}")]
    ReloadTimedOut {
        /// How long the reload waited.
        waited: Duration,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn convolution worker '{name}': {source}")]
    WorkerSpawn {
        /// Thread name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConvolutionError {
    /// Create an FFT length error.
    pub fn fft_length(expected: usize, actual: usize) -> Self {
        ConvolutionError::FftLength { expected, actual }
    }

    /// Create a worker spawn error.
    pub fn worker_spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        ConvolutionError::WorkerSpawn {
            name: name.into(),
            source,
        }
    }

    /// `true` when the error is a cooperative cancellation rather than a
    /// failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ConvolutionError::Aborted)
    }
}
