//! Block gain staging for dry and wet paths.
//!
//! A [`GainSmoother`] holds a linear gain target and applies it to a block of
//! audio, gliding from the previous gain so that level changes made from
//! another thread never click.
//!
//! Two response shapes are available through [`SmoothingMode`]:
//!
//! | Mode | Response | Use |
//! |------|----------|-----|
//! | `Fast` | fixed pole 0.99 per sample | dry/wet mix, follows quickly |
//! | `Smoothed(ms)` | one-pole with a time constant | slow level rides |
//!
//! # Usage
//!
//! ```rust
//! use partita_core::{GainSmoother, ProcessData, SmoothingMode};
//!
//! let mut wet = GainSmoother::new(SmoothingMode::Fast, 1.0);
//! wet.prepare(48000.0);
//! wet.set_gain_db(-6.0);
//!
//! let mut block = [1.0_f32; 256];
//! wet.process_block(&mut ProcessData::mono(&mut block));
//! assert!(block[255] < 1.0);
//! ```

use crate::buffer::ProcessData;
use crate::{SmoothedParam, db_to_linear, linear_to_db};

/// Response shape of a [`GainSmoother`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingMode {
    /// `y = 0.99 * y + 0.01 * gain` every sample, independent of sample rate.
    Fast,
    /// One-pole smoothing with the given time constant in milliseconds.
    Smoothed(f32),
}

/// Pole of [`SmoothingMode::Fast`].
pub const FAST_SMOOTHING_POLE: f32 = 0.99;

/// Gain targets below this are treated as silence.
pub const SILENCE_DB: f32 = -100.0;

/// A linear gain applied to whole blocks with per-sample smoothing.
#[derive(Debug, Clone)]
pub struct GainSmoother {
    mode: SmoothingMode,
    gain: SmoothedParam,
}

impl GainSmoother {
    /// Create a smoother starting at (and targeting) `initial_gain`.
    pub fn new(mode: SmoothingMode, initial_gain: f32) -> Self {
        let gain = match mode {
            SmoothingMode::Fast => SmoothedParam::with_pole(initial_gain, FAST_SMOOTHING_POLE),
            SmoothingMode::Smoothed(ms) => SmoothedParam::with_config(initial_gain, 44100.0, ms),
        };
        Self { mode, gain }
    }

    /// Update the sample rate. Has no effect in [`SmoothingMode::Fast`].
    pub fn prepare(&mut self, sample_rate: f32) {
        if let SmoothingMode::Smoothed(_) = self.mode {
            self.gain.set_sample_rate(sample_rate);
        }
    }

    /// The response shape.
    pub fn mode(&self) -> SmoothingMode {
        self.mode
    }

    /// Set the linear target gain.
    #[inline]
    pub fn set_gain(&mut self, gain: f32) {
        self.gain.set_target(gain);
    }

    /// Set the target gain in decibels. At or below [`SILENCE_DB`] the target
    /// is exactly zero.
    pub fn set_gain_db(&mut self, db: f32) {
        let gain = if db <= SILENCE_DB {
            0.0
        } else {
            db_to_linear(db)
        };
        self.set_gain(gain);
    }

    /// Linear target gain.
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain.target()
    }

    /// Target gain in decibels.
    pub fn gain_db(&self) -> f32 {
        linear_to_db(self.gain.target())
    }

    /// The gain applied to the most recent sample.
    #[inline]
    pub fn current(&self) -> f32 {
        self.gain.get()
    }

    /// Advance one sample and return the gain to apply.
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        self.gain.advance()
    }

    /// Multiply a block in place. Every channel receives the same gain curve.
    pub fn process_block(&mut self, data: &mut ProcessData<'_>) {
        let (left, right) = data.channels_mut();

        if self.gain.is_settled() {
            let g = self.gain.target();
            self.gain.snap_to_target();
            left.iter_mut().for_each(|s| *s *= g);
            if let Some(right) = right {
                right.iter_mut().for_each(|s| *s *= g);
            }
            return;
        }

        match right {
            Some(right) => {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    let g = self.gain.advance();
                    *l *= g;
                    *r *= g;
                }
            }
            None => {
                for l in left.iter_mut() {
                    *l *= self.gain.advance();
                }
            }
        }
    }

    /// Jump to the target gain, discarding any glide in progress.
    pub fn reset(&mut self) {
        self.gain.snap_to_target();
    }
}
