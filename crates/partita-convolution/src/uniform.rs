//! Uniformly partitioned overlap-add convolution.
//!
//! The impulse response is cut into segments of `B` samples; each segment is
//! zero-padded to `2B` and transformed once at [`UniformConvolver::init`].
//! Input is collected into a `B`-sample buffer whose spectrum is kept in a
//! ring of past input spectra. Each output sample is
//!
//! ```text
//! y = IFFT( X[0]·H[0] + Σ_{i≥1} X[-i]·H[i] ) + overlap
//! ```
//!
//! The sum over older spectra only changes when a block completes, so it is
//! cached in `pre_multiplied` and only the newest product is recomputed for
//! partial blocks. That is what makes the convolver latency-free: any number
//! of samples can be pushed and the same number comes back, already convolved.

use rustfft::num_complex::Complex;

use crate::fft::{FftBackend, FftImplementation, complex_size, create_fft};

/// `result += a * b` for complex spectra, unrolled by four.
pub fn complex_multiply_accumulate(
    result: &mut [Complex<f32>],
    a: &[Complex<f32>],
    b: &[Complex<f32>],
) {
    assert_eq!(result.len(), a.len());
    assert_eq!(result.len(), b.len());
    let len = result.len();
    let end4 = 4 * (len / 4);
    for i in (0..end4).step_by(4) {
        for j in i..i + 4 {
            let (x, y) = (a[j], b[j]);
            result[j].re += x.re * y.re - x.im * y.im;
            result[j].im += x.re * y.im + x.im * y.re;
        }
    }
    for j in end4..len {
        let (x, y) = (a[j], b[j]);
        result[j].re += x.re * y.re - x.im * y.im;
        result[j].im += x.re * y.im + x.im * y.re;
    }
}

/// A zero-latency uniformly partitioned convolver.
///
/// Used directly for the head of an impulse response and, fed with whole
/// blocks, for every tail stage of a
/// [`ConvolutionEngine`](crate::ConvolutionEngine).
pub struct UniformConvolver {
    implementation: FftImplementation,
    fft: Option<Box<dyn FftBackend>>,
    ir_len: usize,
    block_size: usize,
    segments: Vec<Vec<Complex<f32>>>,
    segments_ir: Vec<Vec<Complex<f32>>>,
    fft_buffer: Vec<f32>,
    pre_multiplied: Vec<Complex<f32>>,
    conv: Vec<Complex<f32>>,
    overlap: Vec<f32>,
    current: usize,
    input_buffer: Vec<f32>,
    input_fill: usize,
}

impl std::fmt::Debug for UniformConvolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformConvolver")
            .field("implementation", &self.implementation)
            .field("ir_len", &self.ir_len)
            .field("block_size", &self.block_size)
            .field("segments", &self.segments_ir.len())
            .finish_non_exhaustive()
    }
}

impl UniformConvolver {
    /// An empty convolver that outputs silence until initialised.
    pub fn new(implementation: FftImplementation) -> Self {
        Self {
            implementation,
            fft: None,
            ir_len: 0,
            block_size: 0,
            segments: Vec::new(),
            segments_ir: Vec::new(),
            fft_buffer: Vec::new(),
            pre_multiplied: Vec::new(),
            conv: Vec::new(),
            overlap: Vec::new(),
            current: 0,
            input_buffer: Vec::new(),
            input_fill: 0,
        }
    }

    /// Load an impulse response split into `block_size` partitions.
    ///
    /// An empty impulse leaves the convolver empty (silent).
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is not a power of two.
    pub fn init(&mut self, block_size: usize, impulse: &[f32]) {
        assert!(
            block_size.is_power_of_two(),
            "partition size must be a power of two, got {block_size}"
        );
        *self = Self::new(self.implementation);

        self.ir_len = impulse.len();
        if impulse.is_empty() {
            return;
        }

        self.block_size = block_size;
        let seg_size = 2 * block_size;
        let bins = complex_size(seg_size);
        let seg_count = impulse.len().div_ceil(block_size);

        let mut fft = create_fft(self.implementation, seg_size);
        self.fft_buffer = vec![0.0; seg_size];
        self.segments = vec![vec![Complex::new(0.0, 0.0); bins]; seg_count];

        self.segments_ir = Vec::with_capacity(seg_count);
        for chunk in impulse.chunks(block_size) {
            let mut segment = vec![Complex::new(0.0, 0.0); bins];
            self.fft_buffer.fill(0.0);
            self.fft_buffer[..chunk.len()].copy_from_slice(chunk);
            // Lengths are planned above; a failure would leave this segment
            // silent rather than misaligned.
            if fft.forward(&mut self.fft_buffer, &mut segment).is_err() {
                segment.fill(Complex::new(0.0, 0.0));
            }
            self.segments_ir.push(segment);
        }

        self.pre_multiplied = vec![Complex::new(0.0, 0.0); bins];
        self.conv = vec![Complex::new(0.0, 0.0); bins];
        self.overlap = vec![0.0; block_size];
        self.input_buffer = vec![0.0; block_size];
        self.fft_buffer.fill(0.0);
        self.fft = Some(fft);
    }

    /// Clear all input history and overlap, keeping the impulse response.
    pub fn reset(&mut self) {
        for segment in &mut self.segments {
            segment.fill(Complex::new(0.0, 0.0));
        }
        self.pre_multiplied.fill(Complex::new(0.0, 0.0));
        self.conv.fill(Complex::new(0.0, 0.0));
        self.overlap.fill(0.0);
        self.input_buffer.fill(0.0);
        self.fft_buffer.fill(0.0);
        self.input_fill = 0;
        self.current = 0;
    }

    /// Partition size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Length of the loaded impulse response.
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// `true` when no impulse response is loaded.
    pub fn is_empty(&self) -> bool {
        self.segments_ir.is_empty()
    }

    /// Convolve `input` into `output` (overwritten). Both must have the same
    /// length; any length is accepted.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        let Some(fft) = self.fft.as_mut() else {
            output.fill(0.0);
            return;
        };
        let seg_count = self.segments_ir.len();
        let block = self.block_size;

        let mut processed = 0;
        while processed < output.len() {
            let was_empty = self.input_fill == 0;
            let n = (output.len() - processed).min(block - self.input_fill);
            let pos = self.input_fill;

            self.input_buffer[pos..pos + n].copy_from_slice(&input[processed..processed + n]);

            self.fft_buffer[..block].copy_from_slice(&self.input_buffer);
            self.fft_buffer[block..].fill(0.0);
            if fft
                .forward(&mut self.fft_buffer, &mut self.segments[self.current])
                .is_err()
            {
                output.fill(0.0);
                return;
            }

            if was_empty {
                self.pre_multiplied.fill(Complex::new(0.0, 0.0));
                for i in 1..seg_count {
                    let audio = (self.current + i) % seg_count;
                    complex_multiply_accumulate(
                        &mut self.pre_multiplied,
                        &self.segments_ir[i],
                        &self.segments[audio],
                    );
                }
            }
            self.conv.copy_from_slice(&self.pre_multiplied);
            complex_multiply_accumulate(
                &mut self.conv,
                &self.segments[self.current],
                &self.segments_ir[0],
            );

            if fft.inverse(&mut self.conv, &mut self.fft_buffer).is_err() {
                output.fill(0.0);
                return;
            }

            for i in 0..n {
                output[processed + i] = self.fft_buffer[pos + i] + self.overlap[pos + i];
            }

            self.input_fill += n;
            if self.input_fill == block {
                self.input_buffer.fill(0.0);
                self.input_fill = 0;
                self.overlap.copy_from_slice(&self.fft_buffer[block..]);
                self.current = if self.current > 0 {
                    self.current - 1
                } else {
                    seg_count - 1
                };
            }
            processed += n;
        }
    }
}

/// Direct-form linear convolution, truncated to `input.len()` samples.
/// Reference implementation for tests and diagnostics.
pub fn convolve_direct(input: &[f32], impulse: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0_f32; input.len()];
    for (n, y) in out.iter_mut().enumerate() {
        let mut acc = 0.0_f64;
        for (k, &h) in impulse.iter().enumerate().take(n + 1) {
            acc += f64::from(h) * f64::from(input[n - k]);
        }
        *y = acc as f32;
    }
    out
}
