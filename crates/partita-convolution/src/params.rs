//! Lock-free parameter cells shared between control threads and the audio
//! thread.
//!
//! Control threads write through a [`ConvolutionHandle`](crate::ConvolutionHandle);
//! the audio thread reads once per block. No locks, no allocations.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Maximum predelay in milliseconds. The delay lines are sized for it at
/// `prepare`.
pub const MAX_PREDELAY_MS: f32 = 1000.0;

/// Lowest accepted hi-cut frequency in Hz.
pub const MIN_HI_CUT_HZ: f32 = 20.0;

/// Hi-cut frequency that disables damping, in Hz.
pub const MAX_HI_CUT_HZ: f32 = 20000.0;

/// Lowest level in dB; at or below it a gain is silent.
pub const MIN_GAIN_DB: f32 = -100.0;

/// Highest dry or wet gain in dB.
pub const MAX_GAIN_DB: f32 = 12.0;

/// A thread-safe `f32` stored as bits, clamped to a range on write.
#[derive(Debug)]
pub struct AtomicParam {
    value: AtomicU32,
    min: f32,
    max: f32,
    default: f32,
}

impl AtomicParam {
    /// A parameter at `default` accepting `[min, max]`.
    pub fn new(default: f32, min: f32, max: f32) -> Self {
        Self {
            value: AtomicU32::new(default.clamp(min, max).to_bits()),
            min,
            max,
            default,
        }
    }

    /// Store a value, clamped to the range. NaN is ignored.
    #[inline]
    pub fn set(&self, v: f32) {
        if v.is_nan() {
            return;
        }
        let clamped = v.clamp(self.min, self.max);
        self.value.store(clamped.to_bits(), Ordering::Release);
    }

    /// Store a value and report whether it changed.
    pub fn replace(&self, v: f32) -> bool {
        let previous = self.get();
        self.set(v);
        self.get() != previous
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Acquire))
    }

    /// Lower bound.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Value at construction.
    pub fn default(&self) -> f32 {
        self.default
    }
}

/// Every user-facing parameter of a
/// [`ConvolutionEffect`](crate::ConvolutionEffect).
#[derive(Debug)]
pub(crate) struct EffectParams {
    pub dry_gain_db: AtomicParam,
    pub wet_gain_db: AtomicParam,
    pub damping_db: AtomicParam,
    pub hi_cut_hz: AtomicParam,
    pub predelay_ms: AtomicParam,
    pub gate: AtomicBool,
    pub multithread: AtomicBool,
}

impl EffectParams {
    pub(crate) fn new(multithread: bool) -> Self {
        Self {
            dry_gain_db: AtomicParam::new(MIN_GAIN_DB, MIN_GAIN_DB, MAX_GAIN_DB),
            wet_gain_db: AtomicParam::new(0.0, MIN_GAIN_DB, MAX_GAIN_DB),
            damping_db: AtomicParam::new(0.0, MIN_GAIN_DB, 0.0),
            hi_cut_hz: AtomicParam::new(MAX_HI_CUT_HZ, MIN_HI_CUT_HZ, MAX_HI_CUT_HZ),
            predelay_ms: AtomicParam::new(0.0, 0.0, MAX_PREDELAY_MS),
            gate: AtomicBool::new(true),
            multithread: AtomicBool::new(multithread),
        }
    }
}
