//! Fixed integer delay line for pre-delay.
//!
//! [`Predelay`] shifts a signal by a whole number of samples. The ring buffer
//! is allocated once in [`Predelay::prepare`] for the largest delay that will
//! ever be requested; changing the delay time afterwards never allocates.

#[cfg(not(feature = "std"))]
use alloc::vec;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::flush_denormal;
use libm::{ceilf, roundf};

/// A single-channel delay line with a runtime-adjustable integer delay.
///
/// # Example
///
/// ```rust
/// use partita_core::Predelay;
///
/// let mut delay = Predelay::new();
/// delay.prepare(1000.0, 10.0);
/// delay.set_delay_ms(3.0);
///
/// let out: Vec<f32> = [1.0, 0.0, 0.0, 0.0].iter().map(|&x| delay.process(x)).collect();
/// assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Predelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    delay_ms: f32,
    sample_rate: f32,
}

impl Predelay {
    /// An unprepared delay line. It passes audio through until prepared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate for up to `max_delay_ms` at `sample_rate` and clear.
    pub fn prepare(&mut self, sample_rate: f32, max_delay_ms: f32) {
        let capacity = ceilf(max_delay_ms.max(0.0) * sample_rate / 1000.0) as usize + 1;
        self.buffer = vec![0.0; capacity];
        self.write_pos = 0;
        self.sample_rate = sample_rate;
        self.set_delay_ms(self.delay_ms);

        #[cfg(feature = "tracing")]
        tracing::debug!(capacity, sample_rate, "predelay prepared");
    }

    /// Set the delay time, clamped to the prepared capacity.
    pub fn set_delay_ms(&mut self, delay_ms: f32) {
        self.delay_ms = delay_ms.max(0.0);
        let samples = roundf(self.delay_ms * self.sample_rate / 1000.0) as usize;
        self.delay_samples = samples.min(self.buffer.len().saturating_sub(1));
    }

    /// Set the delay time in seconds.
    pub fn set_delay_seconds(&mut self, seconds: f32) {
        self.set_delay_ms(seconds * 1000.0);
    }

    /// Requested delay in milliseconds.
    pub fn delay_ms(&self) -> f32 {
        self.delay_ms
    }

    /// Effective delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// `true` when the line adds no delay.
    pub fn is_bypassed(&self) -> bool {
        self.delay_samples == 0
    }

    /// Push one sample and return the sample from `delay_samples` ago.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        if self.buffer.is_empty() {
            return input;
        }
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        let output = self.buffer[read_pos];
        self.write_pos = (self.write_pos + 1) % len;
        flush_denormal(output)
    }

    /// Delay a block in place.
    pub fn process_block(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    /// Delay `input` into `output`.
    pub fn process_into(&mut self, input: &[f32], output: &mut [f32]) {
        for (o, &i) in output.iter_mut().zip(input.iter()) {
            *o = self.process(i);
        }
    }

    /// Zero the history without changing the delay time.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
