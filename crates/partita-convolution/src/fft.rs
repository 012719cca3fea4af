//! Real-signal FFT backends.
//!
//! Convolution only ever transforms real signals, so every backend speaks the
//! same packed half spectrum: `N / 2 + 1` complex bins from DC to Nyquist.
//! The inverse transform is normalised by `1 / N`, so `inverse(forward(x))`
//! reproduces `x`.
//!
//! | Backend | Crate | Notes |
//! |---------|-------|-------|
//! | [`PortableFft`] | `rustfft` | full complex transform, mirrors the spectrum |
//! | [`RealFft`] | `realfft` | real-to-complex, about twice as fast |
//!
//! The backend is picked once through [`FftImplementation`] and handed to every
//! engine that is built; there is no process-wide default.

use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::ConvolutionError;

/// Backend selection, fixed at engine construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FftImplementation {
    /// Complex FFT from `rustfft` fed with real input.
    Portable,
    /// Dedicated real-input FFT from `realfft`.
    RealValued,
    /// The fastest backend available on this build.
    #[default]
    BestAvailable,
}

impl FftImplementation {
    /// Resolve [`BestAvailable`](Self::BestAvailable) to a concrete backend.
    pub fn resolve(self) -> Self {
        match self {
            FftImplementation::BestAvailable => FftImplementation::RealValued,
            other => other,
        }
    }

    /// Stable lowercase name, used in settings files and logs.
    pub fn name(self) -> &'static str {
        match self {
            FftImplementation::Portable => "portable",
            FftImplementation::RealValued => "real",
            FftImplementation::BestAvailable => "best",
        }
    }

    /// Parse a name produced by [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "portable" => Some(FftImplementation::Portable),
            "real" => Some(FftImplementation::RealValued),
            "best" => Some(FftImplementation::BestAvailable),
            _ => None,
        }
    }
}

/// A planned forward/inverse real FFT of a fixed power-of-two size.
pub trait FftBackend: Send {
    /// Transform length `N`.
    fn size(&self) -> usize;

    /// Real `input` of length `N` to `N / 2 + 1` bins. `input` may be used as
    /// scratch and is left unspecified.
    fn forward(
        &mut self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
    ) -> Result<(), ConvolutionError>;

    /// `N / 2 + 1` bins to real `output` of length `N`, scaled by `1 / N`.
    /// `input` may be used as scratch and is left unspecified.
    fn inverse(
        &mut self,
        input: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), ConvolutionError>;
}

/// Number of complex bins for a real transform of `size` samples.
#[inline]
pub fn complex_size(size: usize) -> usize {
    size / 2 + 1
}

/// Plan a backend.
///
/// # Panics
///
/// Panics if `size` is not a power of two (zero included).
pub fn create_fft(implementation: FftImplementation, size: usize) -> Box<dyn FftBackend> {
    assert!(
        size.is_power_of_two(),
        "FFT size must be a power of two, got {size}"
    );
    match implementation.resolve() {
        FftImplementation::Portable => Box::new(PortableFft::new(size)),
        _ => Box::new(RealFft::new(size)),
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), ConvolutionError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConvolutionError::fft_length(expected, actual))
    }
}

/// `rustfft` complex transform over a real signal.
pub struct PortableFft {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    size: usize,
}

impl PortableFft {
    /// Plan both directions for `size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two.
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two(),
            "FFT size must be a power of two, got {size}"
        );
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            forward,
            inverse,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            size,
        }
    }
}

impl FftBackend for PortableFft {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(
        &mut self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
    ) -> Result<(), ConvolutionError> {
        check_len(self.size, input.len())?;
        check_len(complex_size(self.size), output.len())?;

        for (c, &x) in self.buffer.iter_mut().zip(input.iter()) {
            *c = Complex::new(x, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        output.copy_from_slice(&self.buffer[..output.len()]);
        Ok(())
    }

    fn inverse(
        &mut self,
        input: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), ConvolutionError> {
        let bins = complex_size(self.size);
        check_len(bins, input.len())?;
        check_len(self.size, output.len())?;

        // Hermitian mirror: X[N - k] = conj(X[k])
        self.buffer[..bins].copy_from_slice(input);
        self.buffer[0].im = 0.0;
        self.buffer[bins - 1].im = 0.0;
        for k in 1..bins - 1 {
            self.buffer[self.size - k] = input[k].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / self.size as f32;
        for (o, c) in output.iter_mut().zip(self.buffer.iter()) {
            *o = c.re * scale;
        }
        Ok(())
    }
}

/// `realfft` real-to-complex transform.
pub struct RealFft {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    scratch: Vec<Complex<f32>>,
    size: usize,
}

impl RealFft {
    /// Plan both directions for `size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two.
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two(),
            "FFT size must be a power of two, got {size}"
        );
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward.get_scratch_len().max(inverse.get_scratch_len());

        Self {
            forward,
            inverse,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            size,
        }
    }
}

impl FftBackend for RealFft {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(
        &mut self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
    ) -> Result<(), ConvolutionError> {
        check_len(self.size, input.len())?;
        check_len(complex_size(self.size), output.len())?;
        let (expected, actual) = (self.size, input.len());
        self.forward
            .process_with_scratch(input, output, &mut self.scratch)
            .map_err(|_| ConvolutionError::fft_length(expected, actual))
    }

    fn inverse(
        &mut self,
        input: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), ConvolutionError> {
        let bins = complex_size(self.size);
        check_len(bins, input.len())?;
        check_len(self.size, output.len())?;

        // A real signal has no imaginary DC or Nyquist component; rounding in
        // the spectral products can leave a residue that realfft rejects.
        input[0].im = 0.0;
        input[bins - 1].im = 0.0;

        self.inverse
            .process_with_scratch(input, output, &mut self.scratch)
            .map_err(|_| ConvolutionError::fft_length(bins, bins))?;

        let scale = 1.0 / self.size as f32;
        output.iter_mut().for_each(|o| *o *= scale);
        Ok(())
    }
}
