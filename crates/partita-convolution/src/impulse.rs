//! The impulse response seam between a loader and the convolution effect.
//!
//! Whoever owns the impulse (a file loader, a sample map, a test) implements
//! [`ImpulseProvider`]. The effect only ever takes the read lock, copies the
//! samples out, and releases it before doing any heavy work.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Multi-channel impulse audio at its native sample rate.
///
/// Only the first two channels are used; a single channel is used for both
/// sides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpulseBuffer {
    channels: Vec<Vec<f32>>,
    /// Sample rate the impulse was recorded at, in Hz.
    pub sample_rate: f64,
}

impl ImpulseBuffer {
    /// Build from channels.
    ///
    /// # Panics
    ///
    /// Panics if the channels differ in length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f64) -> Self {
        if let Some(first) = channels.first() {
            assert!(
                channels.iter().all(|c| c.len() == first.len()),
                "impulse channels must have equal length"
            );
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// A single-channel impulse.
    pub fn mono(samples: Vec<f32>, sample_rate: f64) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// A two-channel impulse.
    pub fn stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: f64) -> Self {
        Self::new(vec![left, right], sample_rate)
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Mutable samples of channel `index`. The length cannot change.
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(index).map(Vec::as_mut_slice)
    }

    /// All channels, each the same length.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Append a channel. A channel whose length differs from the others is
    /// kept, and preparation uses the shortest of the channels it reads.
    pub fn push_channel(&mut self, samples: Vec<f32>) {
        self.channels.push(samples);
    }

    /// Number of channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// `true` with no channels or zero-length channels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length in seconds at the native sample rate.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Source of the impulse response an effect convolves with.
pub trait ImpulseProvider: Send + Sync {
    /// Take the read lock on the current impulse.
    ///
    /// Callers hold the guard only long enough to copy the samples.
    fn read(&self) -> RwLockReadGuard<'_, ImpulseBuffer>;
}

/// An [`ImpulseProvider`] that owns its buffer behind a read/write lock.
///
/// ```rust
/// use partita_convolution::{ImpulseBuffer, ImpulseProvider, SharedImpulse};
///
/// let impulse = SharedImpulse::default();
/// assert!(impulse.read().is_empty());
///
/// impulse.replace(ImpulseBuffer::mono(vec![1.0, 0.5], 48000.0));
/// assert_eq!(impulse.read().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SharedImpulse {
    buffer: RwLock<ImpulseBuffer>,
}

impl SharedImpulse {
    /// Wrap a buffer.
    pub fn new(buffer: ImpulseBuffer) -> Self {
        Self {
            buffer: RwLock::new(buffer),
        }
    }

    /// Take the write lock to edit the buffer in place.
    pub fn write(&self) -> RwLockWriteGuard<'_, ImpulseBuffer> {
        self.buffer.write()
    }

    /// Swap in a new buffer, returning the old one.
    pub fn replace(&self, buffer: ImpulseBuffer) -> ImpulseBuffer {
        std::mem::replace(&mut *self.buffer.write(), buffer)
    }

    /// Remove the impulse, leaving an empty buffer.
    pub fn clear(&self) -> ImpulseBuffer {
        std::mem::take(&mut *self.buffer.write())
    }
}

impl ImpulseProvider for SharedImpulse {
    fn read(&self) -> RwLockReadGuard<'_, ImpulseBuffer> {
        self.buffer.read()
    }
}
