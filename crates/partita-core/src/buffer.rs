//! Audio buffers and the per-block processing view.
//!
//! - [`StereoBuffer`] - fixed-size scratch block reused every callback
//! - [`StereoSamples`] - owned stereo audio of arbitrary length (impulses, files)
//! - [`ProcessData`] - borrowed one- or two-channel block handed to `process`

#[cfg(not(feature = "std"))]
use alloc::vec;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// A stereo scratch buffer sized to the largest expected block.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    /// Left channel samples.
    pub left: Vec<f32>,
    /// Right channel samples.
    pub right: Vec<f32>,
}

impl StereoBuffer {
    /// Creates a new zeroed stereo buffer with the given block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
        }
    }

    /// Fills both channels with zeros.
    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    /// Resizes both channels, zeroing new samples.
    pub fn resize(&mut self, block_size: usize) {
        self.left.resize(block_size, 0.0);
        self.right.resize(block_size, 0.0);
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Returns true if the buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Copies the first `num_samples` of each channel of a block view into
    /// this buffer. A mono view is copied into the left channel only.
    pub fn copy_from_block(&mut self, data: &ProcessData<'_>) {
        let n = data.num_samples();
        self.left[..n].copy_from_slice(data.left());
        if let Some(right) = data.right() {
            self.right[..n].copy_from_slice(right);
        }
    }

    /// Both channels truncated to `num_samples`.
    pub fn split_mut(&mut self, num_samples: usize) -> (&mut [f32], &mut [f32]) {
        (&mut self.left[..num_samples], &mut self.right[..num_samples])
    }
}

/// Owned stereo audio of equal-length channels.
///
/// This is the interchange type between impulse loading, impulse
/// preparation and engine initialisation.
///
/// # Example
///
/// ```rust
/// use partita_core::StereoSamples;
///
/// let samples = StereoSamples::new(vec![1.0; 1024], vec![0.5; 1024]);
/// assert_eq!(samples.len(), 1024);
/// assert_eq!(samples.to_mono()[0], 0.75);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoSamples {
    /// Left channel samples.
    pub left: Vec<f32>,
    /// Right channel samples.
    pub right: Vec<f32>,
}

impl StereoSamples {
    /// Create stereo samples from left and right channels.
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> Self {
        debug_assert_eq!(left.len(), right.len(), "Channels must have same length");
        Self { left, right }
    }

    /// Create stereo samples from mono by duplicating to both channels.
    pub fn from_mono(mono: Vec<f32>) -> Self {
        Self {
            left: mono.clone(),
            right: mono,
        }
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Check if the buffers are empty.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Release both channels, leaving an empty buffer.
    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    /// Mix down to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        self.left
            .iter()
            .zip(self.right.iter())
            .map(|(l, r)| (l + r) * 0.5)
            .collect()
    }

    /// Convert to interleaved format (L, R, L, R, ...).
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.left.len() * 2);
        for (l, r) in self.left.iter().zip(self.right.iter()) {
            interleaved.push(*l);
            interleaved.push(*r);
        }
        interleaved
    }

    /// Create from interleaved format (L, R, L, R, ...). A trailing odd sample
    /// is dropped.
    pub fn from_interleaved(interleaved: &[f32]) -> Self {
        let (left, right) = interleaved
            .chunks_exact(2)
            .map(|frame| (frame[0], frame[1]))
            .unzip();
        Self { left, right }
    }

    /// Mutable access to both channels.
    pub fn channels_mut(&mut self) -> [&mut Vec<f32>; 2] {
        [&mut self.left, &mut self.right]
    }
}

/// One block of audio handed to a processor: one or two channels of equal
/// length, processed in place.
///
/// ```rust
/// use partita_core::ProcessData;
///
/// let mut l = [1.0_f32; 64];
/// let mut r = [0.0_f32; 64];
/// let data = ProcessData::stereo(&mut l, &mut r);
/// assert_eq!(data.num_channels(), 2);
/// assert_eq!(data.num_samples(), 64);
/// ```
#[derive(Debug)]
pub struct ProcessData<'a> {
    left: &'a mut [f32],
    right: Option<&'a mut [f32]>,
}

impl<'a> ProcessData<'a> {
    /// A single-channel block.
    pub fn mono(samples: &'a mut [f32]) -> Self {
        Self {
            left: samples,
            right: None,
        }
    }

    /// A two-channel block.
    ///
    /// # Panics
    ///
    /// Panics if the channels differ in length.
    pub fn stereo(left: &'a mut [f32], right: &'a mut [f32]) -> Self {
        assert_eq!(left.len(), right.len(), "channels must have equal length");
        Self {
            left,
            right: Some(right),
        }
    }

    /// 1 or 2.
    #[inline]
    pub fn num_channels(&self) -> usize {
        if self.right.is_some() { 2 } else { 1 }
    }

    /// Samples per channel.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.left.len()
    }

    /// The first channel.
    #[inline]
    pub fn left(&self) -> &[f32] {
        self.left
    }

    /// The second channel, if present.
    #[inline]
    pub fn right(&self) -> Option<&[f32]> {
        self.right.as_deref()
    }

    /// Mutable access to both channels at once.
    #[inline]
    pub fn channels_mut(&mut self) -> (&mut [f32], Option<&mut [f32]>) {
        (&mut *self.left, self.right.as_deref_mut())
    }

    /// Multiply every channel by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        let (left, right) = self.channels_mut();
        left.iter_mut().for_each(|s| *s *= gain);
        if let Some(right) = right {
            right.iter_mut().for_each(|s| *s *= gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_roundtrip() {
        let samples = StereoSamples::new(vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]);
        let interleaved = samples.to_interleaved();
        assert_eq!(interleaved, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(StereoSamples::from_interleaved(&interleaved), samples);
    }

    #[test]
    fn from_interleaved_drops_odd_tail() {
        let samples = StereoSamples::from_interleaved(&[0.1, 0.2, 0.3]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn process_data_mono_has_no_right() {
        let mut buf = [0.5_f32; 8];
        let mut data = ProcessData::mono(&mut buf);
        assert_eq!(data.num_channels(), 1);
        assert!(data.right().is_none());
        data.apply_gain(2.0);
        assert!(buf.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn copy_block_into_scratch() {
        let mut l = [1.0_f32; 4];
        let mut r = [2.0_f32; 4];
        let data = ProcessData::stereo(&mut l, &mut r);
        let mut scratch = StereoBuffer::new(16);
        scratch.copy_from_block(&data);
        assert_eq!(&scratch.left[..4], &[1.0; 4]);
        assert_eq!(&scratch.right[..4], &[2.0; 4]);
        assert_eq!(scratch.left[4], 0.0);
    }

    #[test]
    #[should_panic]
    fn stereo_rejects_mismatched_channels() {
        let mut l = [0.0_f32; 4];
        let mut r = [0.0_f32; 5];
        let _ = ProcessData::stereo(&mut l, &mut r);
    }
}
