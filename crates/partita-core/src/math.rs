//! Mathematical utility functions for DSP.
//!
//! Provides the level conversions and float hygiene helpers used across the
//! convolution pipeline. All functions are allocation-free and suitable for
//! `no_std`.
//!
//! # Level Conversions
//!
//! - [`db_to_linear`] / [`linear_to_db`] - Convert between dB and linear gain
//!
//! # Float Hygiene
//!
//! Long impulse responses decay towards zero for seconds. Without care the
//! tail of a reverb ends up in the subnormal range, where most CPUs slow down
//! by an order of magnitude, and a single NaN in an impulse response poisons
//! every partition it is convolved with.
//!
//! - [`flush_denormal`] - Flush a near-zero value to exactly zero
//! - [`sanitize`] - Replace NaN/Inf with zero and flush denormals
//! - [`sanitize_buffer`] - [`sanitize`] applied to a whole block
//!
//! # Time Conversions
//!
//! - [`ms_to_samples`] / [`samples_to_ms`]

use libm::{expf, logf};

/// Convert decibels to linear gain.
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear gain value (e.g., 0 dB → 1.0, -6 dB → 0.5, +6 dB → 2.0)
///
/// # Example
/// ```rust
/// use partita_core::db_to_linear;
///
/// assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    // 10^(dB/20) = e^(dB * ln(10)/20)
    const FACTOR: f32 = core::f32::consts::LN_10 / 20.0;
    expf(db * FACTOR)
}

/// Convert linear gain to decibels.
///
/// Values at or below zero are clamped to -200 dB.
///
/// # Example
/// ```rust
/// use partita_core::linear_to_db;
///
/// assert!((linear_to_db(1.0) - 0.0).abs() < 0.001);
/// assert!((linear_to_db(0.5) - (-6.02)).abs() < 0.01);
/// ```
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    // 20 * log10(linear) = 20 * ln(linear) / ln(10)
    const FACTOR: f32 = 20.0 / core::f32::consts::LN_10;
    logf(linear.max(1e-10)) * FACTOR
}

/// Convert milliseconds to samples.
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> f32 {
    ms * sample_rate / 1000.0
}

/// Convert samples to milliseconds.
#[inline]
pub fn samples_to_ms(samples: f32, sample_rate: f32) -> f32 {
    samples * 1000.0 / sample_rate
}

/// Flush subnormal (denormalized) floats to zero.
///
/// Replaces values below 1e-20 with zero, providing margin before the
/// IEEE 754 subnormal range begins.
///
/// Reference: IEEE 754-2008, Section 3.4 (Subnormal numbers)
#[allow(clippy::inline_always)]
#[inline(always)]
pub fn flush_denormal(x: f32) -> f32 {
    if x.abs() < 1e-20 { 0.0 } else { x }
}

/// Make a sample safe to feed into a recursive or FFT-domain process.
///
/// NaN and ±Inf become 0.0, near-denormal values are flushed to 0.0, and
/// every other value passes through unchanged.
///
/// # Example
/// ```rust
/// use partita_core::sanitize;
///
/// assert_eq!(sanitize(f32::NAN), 0.0);
/// assert_eq!(sanitize(f32::INFINITY), 0.0);
/// assert_eq!(sanitize(1e-30), 0.0);
/// assert_eq!(sanitize(0.25), 0.25);
/// ```
#[inline]
pub fn sanitize(x: f32) -> f32 {
    if x.is_finite() { flush_denormal(x) } else { 0.0 }
}

/// Apply [`sanitize`] to every sample of a buffer in place.
///
/// Returns the number of samples that had to be replaced by zero because they
/// were NaN or infinite (flushed denormals are not counted).
pub fn sanitize_buffer(buffer: &mut [f32]) -> usize {
    let mut replaced = 0;
    for sample in buffer.iter_mut() {
        if !sample.is_finite() {
            replaced += 1;
        }
        *sample = sanitize(*sample);
    }
    replaced
}

/// Returns `true` when every sample in the buffer is finite.
#[inline]
pub fn is_finite_buffer(buffer: &[f32]) -> bool {
    buffer.iter().all(|s| s.is_finite())
}
