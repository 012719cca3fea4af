//! Four-point Lagrange resampling.
//!
//! Impulse responses are recorded at whatever rate the author used; before
//! they can be convolved they must be brought to the host rate. The
//! [`LagrangeResampler`] reads a source buffer at a fractional position that
//! advances by `speed` per output sample (`speed = source_rate / target_rate`)
//! and evaluates the third-order Lagrange polynomial through the four
//! surrounding samples. Samples outside the source are zero.
//!
//! Output can be rendered in chunks. The read position carries over between
//! calls, which lets long renders check for cancellation between chunks.

/// Stateful fractional-position reader over a source buffer.
///
/// # Example
///
/// ```rust
/// use partita_core::LagrangeResampler;
///
/// let source: Vec<f32> = (0..8).map(|i| i as f32).collect();
/// let mut resampler = LagrangeResampler::new(0.5);
/// let mut out = [0.0_f32; 4];
/// resampler.render(&source, &mut out);
///
/// // Whole positions are exact, fractional ones follow the cubic through
/// // the neighbouring samples.
/// assert_eq!(out[2], 1.0);
/// assert!((out[3] - 1.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct LagrangeResampler {
    speed: f64,
    position: f64,
}

impl LagrangeResampler {
    /// Create a resampler that advances `speed` source samples per output
    /// sample.
    ///
    /// # Panics
    ///
    /// Panics if `speed` is not a positive finite number.
    pub fn new(speed: f64) -> Self {
        assert!(
            speed.is_finite() && speed > 0.0,
            "resampling speed must be positive, got {speed}"
        );
        Self {
            speed,
            position: 0.0,
        }
    }

    /// Source samples consumed per output sample.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Current read position in the source.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Rewind to the start of the source.
    pub fn reset(&mut self) {
        self.position = 0.0;
    }

    /// Fill `output` from `source`, continuing from the previous call.
    pub fn render(&mut self, source: &[f32], output: &mut [f32]) {
        for out in output.iter_mut() {
            *out = interpolate(source, self.position);
            self.position += self.speed;
        }
    }
}

/// Number of output samples needed to hold `len` source samples resampled by
/// `ratio` (target rate / source rate), rounded to the nearest sample.
pub fn resampled_length(len: usize, ratio: f64) -> usize {
    libm::round(len as f64 * ratio).max(0.0) as usize
}

#[inline]
fn sample_at(source: &[f32], index: i64) -> f32 {
    if index < 0 {
        return 0.0;
    }
    source.get(index as usize).copied().unwrap_or(0.0)
}

#[inline]
fn interpolate(source: &[f32], position: f64) -> f32 {
    let base = libm::floor(position);
    let t = (position - base) as f32;
    let i = base as i64;

    let y0 = sample_at(source, i - 1);
    let y1 = sample_at(source, i);
    if t == 0.0 {
        return y1;
    }
    let y2 = sample_at(source, i + 1);
    let y3 = sample_at(source, i + 2);

    let tp1 = t + 1.0;
    let tm1 = t - 1.0;
    let tm2 = t - 2.0;

    let c0 = -t * tm1 * tm2 / 6.0;
    let c1 = tp1 * tm1 * tm2 / 2.0;
    let c2 = -tp1 * t * tm2 / 2.0;
    let c3 = tp1 * t * tm1 / 6.0;

    c0 * y0 + c1 * y1 + c2 * y2 + c3 * y3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_speed_is_identity() {
        let source = [0.3, -0.2, 0.9, 0.0, 0.5];
        let mut resampler = LagrangeResampler::new(1.0);
        let mut out = [0.0_f32; 5];
        resampler.render(&source, &mut out);
        assert_eq!(out, source);
    }

    #[test]
    fn chunked_render_matches_single_render() {
        let source: Vec<f32> = (0..100).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut whole = vec![0.0_f32; 150];
        LagrangeResampler::new(0.66).render(&source, &mut whole);

        let mut chunked = vec![0.0_f32; 150];
        let mut resampler = LagrangeResampler::new(0.66);
        for chunk in chunked.chunks_mut(16) {
            resampler.render(&source, chunk);
        }
        assert_eq!(whole, chunked);
    }

    #[test]
    fn reads_past_end_as_silence() {
        let source = [1.0_f32; 4];
        let mut resampler = LagrangeResampler::new(2.0);
        let mut out = [1.0_f32; 6];
        resampler.render(&source, &mut out);
        assert_eq!(&out[3..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn resampled_length_rounds() {
        assert_eq!(resampled_length(44100, 48000.0 / 44100.0), 48000);
        assert_eq!(resampled_length(3, 0.5), 2);
        assert_eq!(resampled_length(0, 2.0), 0);
    }

    #[test]
    #[should_panic]
    fn rejects_zero_speed() {
        let _ = LagrangeResampler::new(0.0);
    }
}
