//! One-pole lowpass used for high-frequency damping of impulse responses.
//!
//! ```text
//! y[n] = a0 * x[n] - b1 * y[n-1]
//! a0   = 1 - x
//! b1   = -x
//! x    = exp(-2π * freq / sample_rate)
//! ```
//!
//! 6 dB/octave, zero latency. Cascading two gives 12 dB/octave, which is how
//! the damping stage uses it.
//!
//! ```rust
//! use partita_core::OnePole;
//!
//! let mut lp = OnePole::new(48000.0, 4000.0);
//! assert!(lp.process(1.0) < 1.0);
//! ```

use crate::flush_denormal;
use libm::expf;

/// One-pole (6 dB/oct) lowpass filter.
///
/// # Invariants
///
/// - `x` stays in `[0, 1)` for positive frequencies
/// - `state` is flushed to zero below 1e-20
#[derive(Debug, Clone)]
pub struct OnePole {
    state: f32,
    a0: f32,
    b1: f32,
    sample_rate: f32,
    freq: f32,
}

impl OnePole {
    /// Create a lowpass at `freq_hz`.
    pub fn new(sample_rate: f32, freq_hz: f32) -> Self {
        let mut filter = Self {
            state: 0.0,
            a0: 1.0,
            b1: 0.0,
            sample_rate,
            freq: freq_hz,
        };
        filter.recalculate_coeffs();
        filter
    }

    /// Change the cutoff. The filter state is kept, so sweeping the cutoff
    /// mid-signal is click-free.
    pub fn set_frequency(&mut self, freq_hz: f32) {
        if freq_hz != self.freq {
            self.freq = freq_hz;
            self.recalculate_coeffs();
        }
    }

    /// Cutoff in Hz.
    pub fn frequency(&self) -> f32 {
        self.freq
    }

    /// Filter one sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.state = flush_denormal(self.a0 * input - self.b1 * self.state);
        self.state
    }

    /// Filter a block in place.
    pub fn process_block(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    /// Reset the state to zero.
    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    /// Update the sample rate and recalculate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_coeffs();
    }

    fn recalculate_coeffs(&mut self) {
        let x = expf(-core::f32::consts::TAU * self.freq / self.sample_rate);
        self.a0 = 1.0 - x;
        self.b1 = -x;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_dc() {
        let mut lp = OnePole::new(48000.0, 1000.0);
        let mut out = 0.0;
        for _ in 0..48000 {
            out = lp.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-3, "DC gain should be unity, got {out}");
    }

    #[test]
    fn attenuates_nyquist() {
        let mut lp = OnePole::new(48000.0, 500.0);
        let mut peak = 0.0_f32;
        for i in 0..4800 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = lp.process(x);
            if i > 2400 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05, "Nyquist should be heavily attenuated, got {peak}");
    }

    #[test]
    fn sweep_keeps_state() {
        let mut lp = OnePole::new(48000.0, 20000.0);
        let before = lp.process(1.0);
        lp.set_frequency(200.0);
        let after = lp.process(1.0);
        assert!(after > 0.0 && after >= before * 0.9);
    }
}
