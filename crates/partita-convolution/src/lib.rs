//! Partita Convolution - partitioned convolution reverb with glitch-free
//! impulse hot-swap
//!
//! Long impulse responses are split into a zero-latency head, convolved on
//! the audio thread, and a chain of doubling tail partitions whose largest
//! blocks can run on a background pool. Impulse changes build a new engine
//! pair off the audio thread and crossfade to it.
//!
//! # Layers
//!
//! - [`FftBackend`] / [`create_fft`] - real FFTs behind a strategy chosen at
//!   construction ([`FftImplementation`])
//! - [`UniformConvolver`] - uniformly partitioned overlap-add convolution
//! - [`ConvolutionEngine`] - head plus doubling tail stages, one channel
//! - [`ConvolutionThreadPool`] - tail jobs and deferred engine deletion
//! - [`prepare_impulse_response`] and friends - resampling and decay shaping
//! - [`ConvolutionEffect`] / [`ConvolutionHandle`] - the full effect
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use partita_convolution::{ConvolutionEffect, EffectOptions, ImpulseBuffer, SharedImpulse};
//! use partita_core::ProcessData;
//!
//! let ir: Vec<f32> = (0..4800).map(|i| (-(i as f32) / 800.0).exp() * 0.1).collect();
//! let impulse = Arc::new(SharedImpulse::new(ImpulseBuffer::mono(ir, 48000.0)));
//!
//! let mut effect = ConvolutionEffect::new(impulse, EffectOptions::default()).unwrap();
//! effect.prepare(48000.0, 256).unwrap();
//!
//! let handle = effect.handle();
//! handle.set_dry_gain_db(0.0);
//! handle.set_predelay(10.0);
//!
//! let mut left = vec![0.0_f32; 256];
//! let mut right = vec![0.0_f32; 256];
//! left[0] = 1.0;
//! right[0] = 1.0;
//! effect.process(&mut ProcessData::stereo(&mut left, &mut right));
//! ```

pub mod effect;
pub mod engine;
pub mod error;
pub mod fft;
pub mod impulse;
pub mod params;
pub mod pool;
pub mod prepare;
mod reloader;
pub mod uniform;

pub use effect::{
    CROSSFADE_TIME_SECONDS, ConvolutionEffect, ConvolutionHandle, DEFAULT_MAX_TAIL_SIZE,
    DEFAULT_SWAP_TIMEOUT, EffectOptions, EffectStats, Notification, RAMPING_TIME_MS,
    ReloadListener, ReloadReport, partition_sizes,
};
pub use engine::{
    ConvolutionEngine, DEFAULT_LATE_JOB_TIMEOUT, EngineOptions, PartitionLayout, StageLayout,
    partition_layout,
};
pub use error::ConvolutionError;
pub use fft::{FftBackend, FftImplementation, PortableFft, RealFft, complex_size, create_fft};
pub use impulse::{ImpulseBuffer, ImpulseProvider, SharedImpulse};
pub use params::{
    AtomicParam, MAX_GAIN_DB, MAX_HI_CUT_HZ, MAX_PREDELAY_MS, MIN_GAIN_DB, MIN_HI_CUT_HZ,
};
pub use pool::{ConvolutionThreadPool, DEFAULT_QUEUE_CAPACITY, PoolHandle, PoolStats};
pub use prepare::{
    MAX_DAMPING_FREQUENCY, MIN_DAMPING_FREQUENCY, apply_exponential_fadeout,
    apply_high_frequency_damping, damp_stereo, fade_out_stereo, prepare_impulse_response,
    resample_factor, sanitize_impulse,
};
pub use uniform::{UniformConvolver, complex_multiply_accumulate, convolve_direct};
