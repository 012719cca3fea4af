//! Partita Core - DSP leaf utilities for the convolution engine
//!
//! Everything in this crate runs on the audio thread: nothing allocates after
//! `prepare`, nothing locks, nothing logs (unless the `tracing` feature is on,
//! and then only from `prepare`-style calls).
//!
//! # Level and Float Hygiene
//!
//! - [`db_to_linear`] / [`linear_to_db`] - decibel conversions
//! - [`sanitize`] / [`sanitize_buffer`] - NaN, Inf and denormal scrubbing
//!
//! # Parameter Smoothing
//!
//! - [`SmoothedParam`] - exponential smoothing (one-pole)
//! - [`LinearSmoothedParam`] - linear ramps with an exact length
//! - [`GainSmoother`] - block gain with [`SmoothingMode::Fast`] or time-constant smoothing
//!
//! # Building Blocks
//!
//! - [`Predelay`] - integer delay line
//! - [`OnePole`] - 6 dB/oct lowpass
//! - [`LagrangeResampler`] - 4-point fractional reader
//!
//! # Buffers
//!
//! - [`StereoBuffer`] - fixed-size scratch block
//! - [`StereoSamples`] - owned stereo audio
//! - [`ProcessData`] - borrowed mono/stereo block
//!
//! # no_std Support
//!
//! Disable the default `std` feature to build for embedded targets. `alloc`
//! is still required for buffers.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod buffer;
pub mod delay;
pub mod gain;
pub mod interpolator;
pub mod math;
pub mod one_pole;
pub mod param;

pub use buffer::{ProcessData, StereoBuffer, StereoSamples};
pub use delay::Predelay;
pub use gain::{FAST_SMOOTHING_POLE, GainSmoother, SILENCE_DB, SmoothingMode};
pub use interpolator::{LagrangeResampler, resampled_length};
pub use math::{
    db_to_linear, flush_denormal, is_finite_buffer, linear_to_db, ms_to_samples, samples_to_ms,
    sanitize, sanitize_buffer,
};
pub use one_pole::OnePole;
pub use param::{LinearSmoothedParam, SmoothedParam};
