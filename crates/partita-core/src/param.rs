//! Parameter smoothing for zipper-free changes.
//!
//! Gains and mix levels are changed from a UI or automation thread while the
//! audio thread renders. Jumping straight to a new value produces an audible
//! step ("zipper noise"), so every such value is routed through a
//! [`SmoothedParam`] that approaches its target one sample at a time.
//!
//! ## Usage
//!
//! ```rust
//! use partita_core::SmoothedParam;
//!
//! let mut gain = SmoothedParam::with_config(1.0, 48000.0, 10.0);
//! gain.set_target(0.5);
//!
//! for _ in 0..480 {
//!     let g = gain.advance();
//!     assert!(g <= 1.0 && g >= 0.5);
//! }
//! ```

use libm::expf;

/// A value that approaches its target through a one-pole lowpass.
///
/// The difference equation is `y[n] = y[n-1] + coeff * (target - y[n-1])`.
/// With a smoothing time of zero the coefficient is 1.0 and the value jumps
/// to the target on the next [`advance`](Self::advance).
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    coeff: f32,
    sample_rate: f32,
    smoothing_time_ms: f32,
}

impl SmoothedParam {
    /// Create a parameter with no smoothing (instant changes).
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: 1.0,
            sample_rate: 44100.0,
            smoothing_time_ms: 0.0,
        }
    }

    /// Create a parameter with a sample rate and smoothing time constant.
    pub fn with_config(initial: f32, sample_rate: f32, smoothing_time_ms: f32) -> Self {
        let mut param = Self::new(initial);
        param.sample_rate = sample_rate;
        param.smoothing_time_ms = smoothing_time_ms;
        param.recalculate_coeff();
        param
    }

    /// Create a parameter from a fixed per-sample pole.
    ///
    /// `pole` is the weight of the previous value, so `0.99` keeps 99% of the
    /// last value each sample. The sample rate is ignored by this mode.
    pub fn with_pole(initial: f32, pole: f32) -> Self {
        let mut param = Self::new(initial);
        param.coeff = (1.0 - pole).clamp(0.0, 1.0);
        param.smoothing_time_ms = -1.0;
        param
    }

    /// Set the value the parameter moves towards.
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Set target and current value at once (no smoothing).
    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.target = value;
        self.current = value;
    }

    /// Update the sample rate and recalculate the coefficient.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_coeff();
    }

    /// Set the time constant in milliseconds (0.0 = instant).
    pub fn set_smoothing_time_ms(&mut self, time_ms: f32) {
        self.smoothing_time_ms = time_ms;
        self.recalculate_coeff();
    }

    /// Advance by one sample and return the new value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        self.current += self.coeff * (self.target - self.current);
        self.current
    }

    /// Current value without advancing.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Target value.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// `true` once the value is within 1e-6 of its target.
    #[inline]
    pub fn is_settled(&self) -> bool {
        (self.current - self.target).abs() < 1e-6
    }

    /// Jump to the target value.
    #[inline]
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
    }

    /// `coeff = 1 - exp(-1 / (tau * sample_rate))` with `tau` in seconds.
    ///
    /// A negative smoothing time marks a fixed-pole parameter whose
    /// coefficient is left alone.
    fn recalculate_coeff(&mut self) {
        if self.smoothing_time_ms < 0.0 {
            return;
        }
        if self.smoothing_time_ms == 0.0 || self.sample_rate <= 0.0 {
            self.coeff = 1.0;
        } else {
            let samples = self.smoothing_time_ms / 1000.0 * self.sample_rate;
            self.coeff = 1.0 - expf(-1.0 / samples);
        }
    }
}

impl Default for SmoothedParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// A value that moves towards its target at a constant rate.
///
/// Used where the transition length must be exact, such as fading the first
/// block of input into a freshly cleaned convolution pipeline.
#[derive(Debug, Clone)]
pub struct LinearSmoothedParam {
    current: f32,
    target: f32,
    increment: f32,
    samples_remaining: u32,
    sample_rate: f32,
    transition_time_ms: f32,
}

impl LinearSmoothedParam {
    /// Create a parameter at `initial` with a 10 ms transition at 44.1 kHz.
    pub fn new(initial: f32) -> Self {
        Self::with_config(initial, 44100.0, 10.0)
    }

    /// Create a parameter with a sample rate and transition time.
    pub fn with_config(initial: f32, sample_rate: f32, transition_time_ms: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            increment: 0.0,
            samples_remaining: 0,
            sample_rate,
            transition_time_ms,
        }
    }

    /// Move to `target` over the configured transition time.
    pub fn set_target(&mut self, target: f32) {
        let samples = (self.transition_time_ms / 1000.0 * self.sample_rate) as u32;
        self.ramp_to(target, samples);
    }

    /// Move from the current value to `target` over exactly `samples` steps.
    ///
    /// After `samples` calls to [`advance`](Self::advance) the value equals
    /// `target`. Zero samples jumps immediately.
    pub fn ramp_to(&mut self, target: f32, samples: u32) {
        self.target = target;
        if samples == 0 {
            self.current = target;
            self.increment = 0.0;
            self.samples_remaining = 0;
        } else {
            self.increment = (target - self.current) / samples as f32;
            self.samples_remaining = samples;
        }
    }

    /// Set target and current value at once.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.increment = 0.0;
        self.samples_remaining = 0;
    }

    /// Update the sample rate used by [`set_target`](Self::set_target).
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Set the transition time in milliseconds.
    pub fn set_transition_time_ms(&mut self, time_ms: f32) {
        self.transition_time_ms = time_ms;
    }

    /// Return the current value, then step towards the target.
    ///
    /// Returning the pre-step value means a ramp from 0 to 1 over `n` samples
    /// yields `0, 1/n, 2/n, ...` which starts from true silence.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        let value = self.current;
        if self.samples_remaining > 0 {
            self.samples_remaining -= 1;
            self.current = if self.samples_remaining == 0 {
                self.target
            } else {
                self.current + self.increment
            };
        }
        value
    }

    /// Current value without advancing.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Target value.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// `true` once the ramp has finished.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.samples_remaining == 0
    }
}

impl Default for LinearSmoothedParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}
