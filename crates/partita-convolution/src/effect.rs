//! The convolution effect: one stable "apply this impulse to this stream"
//! interface over a pair of [`ConvolutionEngine`]s.
//!
//! # Threads
//!
//! - The **audio thread** owns the [`ConvolutionEffect`] and calls
//!   [`process`](ConvolutionEffect::process) once per block. It never blocks:
//!   the engine slots are taken with `try_lock` and a contended block gets the
//!   dry signal only.
//! - **Control threads** hold [`ConvolutionHandle`]s. Setters write atomics
//!   that the audio thread picks up at the start of the next block.
//! - **Reloads** run on the caller (`Notification::Sync`) or on the effect's
//!   reload worker (`Notification::Async`). A reload copies the impulse under
//!   the provider's read lock, prepares it, builds a new engine pair and swaps
//!   it in under a bounded lock.
//! - The **convolution pool** runs large tail partitions and frees retired
//!   engines.
//!
//! # Swaps
//!
//! After a swap the previous pair keeps running as the fade-out pair while
//! the new pair fades in over 20 ms. The new pair is fed input weighted by
//! `g²` so its history builds up without a transient; the old pair's output is
//! weighted by `1 - g²`. When `g` reaches 1 the old pair is handed to the pool
//! for deletion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use partita_core::{
    GainSmoother, LinearSmoothedParam, Predelay, ProcessData, SILENCE_DB, SmoothingMode,
    StereoBuffer, StereoSamples, db_to_linear, sanitize_buffer,
};

use crate::engine::{ConvolutionEngine, DEFAULT_LATE_JOB_TIMEOUT, EngineOptions, PartitionLayout};
use crate::error::ConvolutionError;
use crate::fft::FftImplementation;
use crate::impulse::ImpulseProvider;
use crate::params::{EffectParams, MAX_PREDELAY_MS};
use crate::pool::{ConvolutionThreadPool, PoolHandle, PoolStats};
use crate::prepare::{
    damp_stereo, fade_out_stereo, prepare_impulse_response, resample_factor, sanitize_impulse,
};
use crate::reloader::Reloader;

/// Default cap on the largest tail partition.
pub const DEFAULT_MAX_TAIL_SIZE: usize = 8192;

/// Default bound on how long a reload waits for the pool and the swap lock.
pub const DEFAULT_SWAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Length of the enable/disable ramp.
pub const RAMPING_TIME_MS: usize = 30;

/// Length of the crossfade between an outgoing and an incoming engine pair.
pub const CROSSFADE_TIME_SECONDS: f32 = 0.02;

/// Scale applied to the wet signal before it is added to the dry signal.
const WET_MIX: f32 = 0.5;

/// Room kept in the retired-engine backlog so the audio thread never grows it.
const BACKLOG_CAPACITY: usize = 8;

/// Construction options for a [`ConvolutionEffect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectOptions {
    /// FFT backend for every engine the effect builds.
    pub fft: FftImplementation,
    /// Largest tail partition size. Rounded up to a power of two.
    pub max_tail_size: usize,
    /// Convolution pool workers. Zero disables background processing.
    pub worker_threads: usize,
    /// How long the audio thread may spin for a background tail job.
    pub late_job_timeout: Duration,
    /// Bound on the reload path's waits for the pool and the swap lock.
    pub swap_timeout: Duration,
    /// Start a reload worker so `Notification::Async` does not block the
    /// caller.
    pub async_reload: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            fft: FftImplementation::BestAvailable,
            max_tail_size: DEFAULT_MAX_TAIL_SIZE,
            worker_threads: 1,
            late_job_timeout: DEFAULT_LATE_JOB_TIMEOUT,
            swap_timeout: DEFAULT_SWAP_TIMEOUT,
            async_reload: true,
        }
    }
}

impl EffectOptions {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            fft: self.fft,
            late_job_timeout: self.late_job_timeout,
        }
    }
}

/// How a reload request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notification {
    /// Record the change only; the next reload picks it up.
    DontSend,
    /// Queue the reload on the effect's reload worker. Falls back to
    /// [`Sync`](Self::Sync) when there is no worker.
    #[default]
    Async,
    /// Reload on the calling thread before returning.
    Sync,
}

/// What a finished reload did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReloadReport {
    /// Prepared impulse length in samples. Zero when the impulse was empty.
    pub impulse_len: usize,
    /// Host rate divided by impulse rate.
    pub resample_ratio: f64,
    /// Head partition size.
    pub head_size: usize,
    /// Largest tail partition size.
    pub tail_size: usize,
    /// Number of tail stages per channel.
    pub tail_stages: usize,
    /// Non-finite impulse samples replaced with zero.
    pub replaced_samples: usize,
    /// `true` when the previous engines are being crossfaded out.
    pub crossfade: bool,
    /// Wall time spent.
    pub elapsed: Duration,
}

/// Called after every reload with its outcome.
pub type ReloadListener = Box<dyn Fn(&Result<ReloadReport, ConvolutionError>) + Send + Sync>;

/// Counters for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectStats {
    /// Blocks that got the dry signal only because a swap held the engines.
    pub contended_blocks: u64,
    /// Stale-tail fallbacks across all engines.
    pub late_tail_blocks: u64,
    /// Reloads that completed.
    pub reloads: u64,
    /// Reloads cancelled by a newer request.
    pub aborted_reloads: u64,
    /// Convolution pool counters, if the effect has a pool.
    pub pool: Option<PoolStats>,
}

/// Head and largest tail partition sizes for an impulse.
///
/// The head is the block size rounded up to a power of two. The tail is the
/// power of two covering the rest of the impulse, capped at `max_tail_size`
/// and never smaller than the head.
///
/// ```rust
/// use partita_convolution::partition_sizes;
///
/// assert_eq!(partition_sizes(480, 96000, 8192), (512, 8192));
/// assert_eq!(partition_sizes(512, 1500, 8192), (512, 1024));
/// assert_eq!(partition_sizes(256, 100, 8192), (256, 256));
/// ```
pub fn partition_sizes(block_size: usize, impulse_len: usize, max_tail_size: usize) -> (usize, usize) {
    let head = block_size.max(1).next_power_of_two();
    let full_tail = head.max(impulse_len.saturating_sub(head).next_power_of_two());
    let cap = max_tail_size.max(1).next_power_of_two();
    (head, full_tail.min(cap).max(head))
}

struct EnginePair {
    left: Box<ConvolutionEngine>,
    right: Box<ConvolutionEngine>,
}

impl EnginePair {
    fn new(options: EngineOptions, pool: Option<PoolHandle>) -> Self {
        let mut left = Box::new(ConvolutionEngine::new(options));
        let mut right = Box::new(ConvolutionEngine::new(options));
        left.set_background_pool(pool.clone());
        right.set_background_pool(pool);
        Self { left, right }
    }

    fn set_background_pool(&mut self, pool: Option<PoolHandle>) {
        self.left.set_background_pool(pool.clone());
        self.right.set_background_pool(pool);
    }

    fn take_late_tail_blocks(&mut self) -> u64 {
        self.left.take_late_tail_blocks() + self.right.take_late_tail_blocks()
    }

    fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    fn into_engines(self) -> [Box<ConvolutionEngine>; 2] {
        [self.left, self.right]
    }
}

struct EngineSlots {
    current: EnginePair,
    fading_out: Option<EnginePair>,
    fade_value: f32,
    /// Engines the audio thread could not hand to the pool.
    backlog: Vec<Box<ConvolutionEngine>>,
}

impl EngineSlots {
    /// Hand the fade-out pair to the pool, or keep it in the backlog when the
    /// pool refuses it.
    fn retire_fading(&mut self, pool: Option<&ConvolutionThreadPool>) {
        let Some(done) = self.fading_out.take() else {
            return;
        };
        self.fade_value = 1.0;
        for engine in done.into_engines() {
            let refused = match pool {
                Some(pool) => pool.retire(engine).err(),
                None => Some(engine),
            };
            if let Some(engine) = refused {
                self.backlog.push(engine);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AudioConfig {
    sample_rate: f64,
    block_size: usize,
}

#[derive(Default)]
struct EffectCounters {
    contended_blocks: AtomicU64,
    late_tail_blocks: AtomicU64,
    reloads: AtomicU64,
    aborted_reloads: AtomicU64,
}

/// State shared by the audio thread, handles and the reload worker.
pub(crate) struct EffectShared {
    reloader: OnceLock<Reloader>,
    options: EffectOptions,
    params: EffectParams,
    provider: Arc<dyn ImpulseProvider>,
    engines: Mutex<EngineSlots>,
    config: Mutex<AudioConfig>,
    prepared: AtomicBool,
    abort: Mutex<Option<Arc<AtomicBool>>>,
    listener: Mutex<Option<ReloadListener>>,
    counters: EffectCounters,
    pool: Option<ConvolutionThreadPool>,
}

impl EffectShared {
    fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    fn background_pool(&self) -> Option<PoolHandle> {
        if self.params.multithread.load(Ordering::Acquire) {
            self.pool.as_ref().map(ConvolutionThreadPool::handle)
        } else {
            None
        }
    }

    /// Cancel any preparation in flight and register a fresh abort flag.
    fn begin_reload(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut slot = self.abort.lock();
        if let Some(previous) = slot.replace(Arc::clone(&flag)) {
            previous.store(true, Ordering::Release);
        }
        flag
    }

    fn end_reload(&self, flag: &Arc<AtomicBool>) {
        let mut slot = self.abort.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, flag)) {
            slot.take();
        }
    }

    /// Rebuild the engines from the provider's current impulse.
    pub(crate) fn reload(&self) -> Result<ReloadReport, ConvolutionError> {
        if !self.is_prepared() {
            return Err(ConvolutionError::NotPrepared);
        }
        let config = *self.config.lock();
        let abort = self.begin_reload();
        let outcome = self.rebuild(config, &abort);
        self.end_reload(&abort);

        match &outcome {
            Ok(report) => {
                self.counters.reloads.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    impulse_len = report.impulse_len,
                    head = report.head_size,
                    tail = report.tail_size,
                    stages = report.tail_stages,
                    crossfade = report.crossfade,
                    elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
                    "impulse reloaded"
                );
            }
            Err(e) if e.is_aborted() => {
                self.counters.aborted_reloads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("reload superseded by a newer request");
            }
            Err(e) => tracing::warn!(error = %e, "reload failed"),
        }
        outcome
    }

    fn rebuild(
        &self,
        config: AudioConfig,
        abort: &AtomicBool,
    ) -> Result<ReloadReport, ConvolutionError> {
        let start = Instant::now();

        let source = {
            let guard = self.provider.read();
            if guard.is_empty() {
                None
            } else {
                Some(guard.clone())
            }
        };
        let Some(source) = source else {
            return self.clear_engines(start);
        };

        let ratio = resample_factor(config.sample_rate, source.sample_rate);
        let mut samples = StereoSamples::default();
        prepare_impulse_response(&source, &mut samples, Some(abort), 0..0, ratio)?;
        drop(source);

        let damping_db = self.params.damping_db.get();
        let damping = if damping_db <= SILENCE_DB {
            0.0
        } else {
            db_to_linear(damping_db)
        };
        fade_out_stereo(&mut samples, damping);
        damp_stereo(
            &mut samples,
            f64::from(self.params.hi_cut_hz.get()),
            config.sample_rate,
        );
        let replaced_samples = sanitize_impulse(&mut samples);

        let (head_size, tail_size) =
            partition_sizes(config.block_size, samples.len(), self.options.max_tail_size);

        if abort.load(Ordering::Acquire) {
            return Err(ConvolutionError::Aborted);
        }

        let mut pair = EnginePair::new(self.options.engine_options(), self.background_pool());
        pair.left.init(head_size, tail_size, &samples.left);
        pair.right.init(head_size, tail_size, &samples.right);
        pair.left.clean_pipeline();
        pair.right.clean_pipeline();
        let tail_stages = pair.left.layout().tail.len();

        if abort.load(Ordering::Acquire) {
            return Err(ConvolutionError::Aborted);
        }

        self.wait_for_pool();
        let crossfade = self.swap_in(pair)?;

        Ok(ReloadReport {
            impulse_len: samples.len(),
            resample_ratio: ratio,
            head_size,
            tail_size,
            tail_stages,
            replaced_samples,
            crossfade,
            elapsed: start.elapsed(),
        })
    }

    fn wait_for_pool(&self) {
        if let Some(pool) = &self.pool
            && !pool.wait_until_idle(self.options.swap_timeout)
        {
            tracing::warn!(
                timeout_ms = self.options.swap_timeout.as_millis(),
                "convolution pool still busy, swapping anyway"
            );
        }
    }

    fn lock_engines(&self) -> Result<parking_lot::MutexGuard<'_, EngineSlots>, ConvolutionError> {
        self.engines
            .try_lock_for(self.options.swap_timeout)
            .ok_or(ConvolutionError::ReloadTimedOut {
                waited: self.options.swap_timeout,
            })
    }

    /// Install `pair` as the current engines. Returns `true` when the
    /// previous engines fade out.
    fn swap_in(&self, pair: EnginePair) -> Result<bool, ConvolutionError> {
        let mut slots = self.lock_engines()?;
        let mut retired = std::mem::replace(&mut slots.backlog, Vec::with_capacity(BACKLOG_CAPACITY));
        if let Some(previous) = slots.fading_out.take() {
            retired.extend(previous.into_engines());
        }

        let outgoing = std::mem::replace(&mut slots.current, pair);
        let crossfade = !outgoing.is_empty();
        if crossfade {
            slots.fading_out = Some(outgoing);
        } else {
            retired.extend(outgoing.into_engines());
        }
        slots.fade_value = 0.0;
        drop(slots);

        self.dispose(retired);
        Ok(crossfade)
    }

    fn clear_engines(&self, start: Instant) -> Result<ReloadReport, ConvolutionError> {
        self.wait_for_pool();
        let mut slots = self.lock_engines()?;
        slots.current.left.reset();
        slots.current.right.reset();
        let mut retired = std::mem::replace(&mut slots.backlog, Vec::with_capacity(BACKLOG_CAPACITY));
        if let Some(previous) = slots.fading_out.take() {
            retired.extend(previous.into_engines());
        }
        drop(slots);

        self.dispose(retired);
        Ok(ReloadReport {
            resample_ratio: 1.0,
            elapsed: start.elapsed(),
            ..ReloadReport::default()
        })
    }

    /// Free engines off the audio thread, through the pool when there is one.
    fn dispose(&self, engines: Vec<Box<ConvolutionEngine>>) {
        for engine in engines {
            match &self.pool {
                Some(pool) => {
                    if let Err(engine) = pool.retire(engine) {
                        drop(engine);
                    }
                }
                None => drop(engine),
            }
        }
    }

    fn set_multithread(&self, enabled: bool) {
        self.params.multithread.store(enabled, Ordering::Release);
        let pool = self.background_pool();
        match self.engines.try_lock_for(self.options.swap_timeout) {
            Some(mut slots) => {
                slots.current.set_background_pool(pool.clone());
                if let Some(fading) = slots.fading_out.as_mut() {
                    fading.set_background_pool(pool);
                }
            }
            None => tracing::warn!("engines busy, multithread change applies at next reload"),
        }
    }

    pub(crate) fn notify(&self, outcome: &Result<ReloadReport, ConvolutionError>) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(outcome);
        }
    }

    fn stats(&self) -> EffectStats {
        EffectStats {
            contended_blocks: self.counters.contended_blocks.load(Ordering::Relaxed),
            late_tail_blocks: self.counters.late_tail_blocks.load(Ordering::Relaxed),
            reloads: self.counters.reloads.load(Ordering::Relaxed),
            aborted_reloads: self.counters.aborted_reloads.load(Ordering::Relaxed),
            pool: self.pool.as_ref().map(ConvolutionThreadPool::stats),
        }
    }
}

impl Drop for EffectShared {
    fn drop(&mut self) {
        if let Some(flag) = self.abort.get_mut().take() {
            flag.store(true, Ordering::Release);
        }
        if let Some(pool) = &self.pool
            && !pool.wait_until_idle(self.options.swap_timeout)
        {
            tracing::warn!("convolution pool still busy while dropping effect");
        }
    }
}

/// Cloneable control surface of a [`ConvolutionEffect`], usable from any
/// thread.
#[derive(Clone)]
pub struct ConvolutionHandle {
    shared: Arc<EffectShared>,
}

impl std::fmt::Debug for ConvolutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionHandle")
            .field("prepared", &self.shared.is_prepared())
            .field("stats", &self.shared.stats())
            .finish_non_exhaustive()
    }
}

impl ConvolutionHandle {
    /// Rebuild the engines from the provider's impulse.
    ///
    /// Before the effect has been prepared every mode behaves like
    /// [`Notification::DontSend`]: `prepare` reloads anyway.
    pub fn set_impulse(&self, notification: Notification) -> Result<(), ConvolutionError> {
        if !self.shared.is_prepared() {
            return Ok(());
        }
        match notification {
            Notification::DontSend => Ok(()),
            Notification::Async => {
                if self.shared.reloader.get().is_some_and(Reloader::request) {
                    Ok(())
                } else {
                    self.reload().map(|_| ())
                }
            }
            Notification::Sync => self.reload().map(|_| ()),
        }
    }

    /// Reload on the calling thread and return the report. The listener is
    /// notified as well.
    pub fn reload(&self) -> Result<ReloadReport, ConvolutionError> {
        let outcome = self.shared.reload();
        self.shared.notify(&outcome);
        outcome
    }

    /// Dry level in dB. At -100 dB or below the dry signal is muted.
    pub fn set_dry_gain_db(&self, db: f32) {
        self.shared.params.dry_gain_db.set(db);
    }

    /// Dry level in dB.
    pub fn dry_gain_db(&self) -> f32 {
        self.shared.params.dry_gain_db.get()
    }

    /// Wet level in dB.
    pub fn set_wet_gain_db(&self, db: f32) {
        self.shared.params.wet_gain_db.set(db);
    }

    /// Wet level in dB.
    pub fn wet_gain_db(&self) -> f32 {
        self.shared.params.wet_gain_db.get()
    }

    /// Level the impulse decays towards, in dB (0 dB leaves it untouched).
    /// Triggers an async reload when the value changes.
    pub fn set_damping(&self, db: f32) -> Result<(), ConvolutionError> {
        if self.shared.params.damping_db.replace(db) {
            self.set_impulse(Notification::Async)
        } else {
            Ok(())
        }
    }

    /// Damping level in dB.
    pub fn damping(&self) -> f32 {
        self.shared.params.damping_db.get()
    }

    /// Cutoff the impulse tail is darkened towards, in Hz (20 kHz disables
    /// damping). Triggers an async reload when the value changes.
    pub fn set_hi_cut(&self, hz: f32) -> Result<(), ConvolutionError> {
        if self.shared.params.hi_cut_hz.replace(hz) {
            self.set_impulse(Notification::Async)
        } else {
            Ok(())
        }
    }

    /// Hi-cut frequency in Hz.
    pub fn hi_cut(&self) -> f32 {
        self.shared.params.hi_cut_hz.get()
    }

    /// Delay of the wet signal in milliseconds. Zero bypasses the delay line.
    pub fn set_predelay(&self, ms: f32) {
        self.shared.params.predelay_ms.set(ms);
    }

    /// Predelay in milliseconds.
    pub fn predelay(&self) -> f32 {
        self.shared.params.predelay_ms.get()
    }

    /// Enable or disable the wet path with a 30 ms ramp.
    pub fn set_gate(&self, enabled: bool) {
        self.shared.params.gate.store(enabled, Ordering::Release);
    }

    /// Alias of [`set_gate`](Self::set_gate).
    pub fn enable_processing(&self, enabled: bool) {
        self.set_gate(enabled);
    }

    /// `true` when the wet path is enabled.
    pub fn gate(&self) -> bool {
        self.shared.params.gate.load(Ordering::Acquire)
    }

    /// Run large tail partitions on the convolution pool. Ignored when the
    /// effect was built without workers.
    pub fn set_multithread(&self, enabled: bool) {
        self.shared.set_multithread(enabled && self.shared.pool.is_some());
    }

    /// `true` when tail partitions run on the pool.
    pub fn multithread(&self) -> bool {
        self.shared.params.multithread.load(Ordering::Acquire)
    }

    /// Install or remove the reload listener.
    pub fn set_reload_listener(&self, listener: Option<ReloadListener>) {
        *self.shared.listener.lock() = listener;
    }

    /// `true` once `prepare` has supplied a sample rate.
    pub fn is_prepared(&self) -> bool {
        self.shared.is_prepared()
    }

    /// `true` while an outgoing engine pair is being faded out.
    pub fn is_crossfading(&self) -> bool {
        self.shared.engines.lock().fading_out.is_some()
    }

    /// Partition layout of the current left engine.
    pub fn layout(&self) -> PartitionLayout {
        self.shared.engines.lock().current.left.layout()
    }

    /// Options the effect was built with.
    pub fn options(&self) -> EffectOptions {
        self.shared.options
    }

    /// Current counters.
    pub fn stats(&self) -> EffectStats {
        self.shared.stats()
    }
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    up: bool,
    index: usize,
    length: usize,
}

/// Audio-thread scratch for the wet path.
struct WetPath {
    wet: StereoBuffer,
    fade: StereoBuffer,
    input: StereoBuffer,
    input_ramp: LinearSmoothedParam,
    fade_delta: f32,
    smooth_input: bool,
    clean_pending: bool,
}

impl WetPath {
    fn new() -> Self {
        Self {
            wet: StereoBuffer::default(),
            fade: StereoBuffer::default(),
            input: StereoBuffer::default(),
            input_ramp: LinearSmoothedParam::new(0.0),
            fade_delta: 0.0,
            smooth_input: false,
            clean_pending: false,
        }
    }

    fn resize(&mut self, block_size: usize) {
        if self.wet.len() < block_size {
            self.wet.resize(block_size);
            self.fade.resize(block_size);
            self.input.resize(block_size);
        }
    }

    fn clear(&mut self) {
        self.wet.clear();
        self.fade.clear();
        self.input.clear();
    }

    /// Convolve the block into `self.wet`. Returns the late tail blocks
    /// reported by the engines.
    fn render(
        &mut self,
        slots: &mut EngineSlots,
        pool: Option<&ConvolutionThreadPool>,
        data: &ProcessData<'_>,
    ) -> u64 {
        let n = data.num_samples();
        let left_in = data.left();
        let right_in = data.right();
        let (wet_l, wet_r) = self.wet.split_mut(n);

        // A fade-out pair holds history from before the reset or bypass.
        if self.clean_pending || self.smooth_input {
            slots.retire_fading(pool);
        }
        if self.clean_pending {
            slots.current.left.clean_pipeline();
            slots.current.right.clean_pipeline();
            self.clean_pending = false;
        }

        let mut late = 0;
        if self.smooth_input {
            let (in_l, in_r) = self.input.split_mut(n);
            self.input_ramp.set_immediate(0.0);
            self.input_ramp.ramp_to(1.0, n as u32);
            match right_in {
                Some(right_in) => {
                    for i in 0..n {
                        let g = self.input_ramp.advance();
                        in_l[i] = left_in[i] * g;
                        in_r[i] = right_in[i] * g;
                    }
                }
                None => {
                    for (o, &x) in in_l.iter_mut().zip(left_in) {
                        *o = x * self.input_ramp.advance();
                    }
                }
            }

            slots.current.left.clean_pipeline();
            slots.current.left.process(in_l, wet_l);
            if right_in.is_some() {
                slots.current.right.clean_pipeline();
                slots.current.right.process(in_r, wet_r);
            }
            self.smooth_input = false;
        } else if let Some(fading) = slots.fading_out.as_mut() {
            let (in_l, in_r) = self.input.split_mut(n);
            let (fade_l, fade_r) = self.fade.split_mut(n);
            let start = slots.fade_value;
            let delta = self.fade_delta;
            let gain_at = |i: usize| (start + delta * i as f32).clamp(0.0, 1.0);

            for (i, (o, &x)) in in_l.iter_mut().zip(left_in).enumerate() {
                let g = gain_at(i);
                *o = x * g * g;
            }
            slots.current.left.process(in_l, wet_l);
            fading.left.process(left_in, fade_l);
            for (i, (w, &f)) in wet_l.iter_mut().zip(fade_l.iter()).enumerate() {
                let g = gain_at(i);
                *w += f * (1.0 - g * g);
            }

            if let Some(right_in) = right_in {
                for (i, (o, &x)) in in_r.iter_mut().zip(right_in).enumerate() {
                    let g = gain_at(i);
                    *o = x * g * g;
                }
                slots.current.right.process(in_r, wet_r);
                fading.right.process(right_in, fade_r);
                for (i, (w, &f)) in wet_r.iter_mut().zip(fade_r.iter()).enumerate() {
                    let g = gain_at(i);
                    *w += f * (1.0 - g * g);
                }
            }

            late += fading.take_late_tail_blocks();
            slots.fade_value = start + delta * n as f32;
            if slots.fade_value >= 1.0 {
                slots.retire_fading(pool);
            }
        } else {
            slots.current.left.process(left_in, wet_l);
            if let Some(right_in) = right_in {
                slots.current.right.process(right_in, wet_r);
            }
        }

        late + slots.current.take_late_tail_blocks()
    }
}

/// Audio-thread side of the convolution effect.
///
/// ```rust
/// use std::sync::Arc;
/// use partita_convolution::{ConvolutionEffect, EffectOptions, ImpulseBuffer, SharedImpulse};
/// use partita_core::ProcessData;
///
/// let impulse = Arc::new(SharedImpulse::new(ImpulseBuffer::mono(vec![1.0], 48000.0)));
/// let options = EffectOptions { worker_threads: 0, async_reload: false, ..Default::default() };
/// let mut effect = ConvolutionEffect::new(impulse, options).unwrap();
/// effect.prepare(48000.0, 64).unwrap();
///
/// let mut block = [1.0_f32; 64];
/// effect.process(&mut ProcessData::mono(&mut block));
/// // Dry is muted by default and the wet signal is mixed at half level.
/// assert!((block[0] - 0.5).abs() < 1e-4);
/// ```
pub struct ConvolutionEffect {
    shared: Arc<EffectShared>,
    dry: GainSmoother,
    wet_gain: GainSmoother,
    predelay: [Predelay; 2],
    predelay_ms: f32,
    wet: WetPath,
    sample_rate: f64,
    block_size: usize,
    processing: bool,
    ramp: Option<Ramp>,
}

impl std::fmt::Debug for ConvolutionEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionEffect")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("processing", &self.processing)
            .finish_non_exhaustive()
    }
}

impl ConvolutionEffect {
    /// Create an effect reading its impulse from `provider`.
    ///
    /// Starts the convolution pool and reload worker the options ask for.
    /// Nothing is convolved until [`prepare`](Self::prepare).
    pub fn new(
        provider: Arc<dyn ImpulseProvider>,
        options: EffectOptions,
    ) -> Result<Self, ConvolutionError> {
        let pool = if options.worker_threads > 0 {
            Some(ConvolutionThreadPool::new(options.worker_threads)?)
        } else {
            None
        };
        let params = EffectParams::new(pool.is_some());
        let gate = params.gate.load(Ordering::Acquire);
        let initial_pool = pool.as_ref().map(ConvolutionThreadPool::handle);

        let shared = Arc::new(EffectShared {
            reloader: OnceLock::new(),
            options,
            params,
            provider,
            engines: Mutex::new(EngineSlots {
                current: EnginePair::new(options.engine_options(), initial_pool),
                fading_out: None,
                fade_value: 0.0,
                backlog: Vec::with_capacity(BACKLOG_CAPACITY),
            }),
            config: Mutex::new(AudioConfig::default()),
            prepared: AtomicBool::new(false),
            abort: Mutex::new(None),
            listener: Mutex::new(None),
            counters: EffectCounters::default(),
            pool,
        });

        if options.async_reload {
            let reloader = Reloader::spawn(Arc::downgrade(&shared))?;
            shared.reloader.get_or_init(|| reloader);
        }

        Ok(Self {
            shared,
            dry: GainSmoother::new(SmoothingMode::Fast, 0.0),
            wet_gain: GainSmoother::new(SmoothingMode::Fast, 1.0),
            predelay: [Predelay::new(), Predelay::new()],
            predelay_ms: 0.0,
            wet: WetPath::new(),
            sample_rate: 0.0,
            block_size: 0,
            processing: gate,
            ramp: None,
        })
    }

    /// A control handle for other threads.
    pub fn handle(&self) -> ConvolutionHandle {
        ConvolutionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Set the audio configuration and reload synchronously.
    ///
    /// Call from outside the audio callback. Blocks may be shorter than
    /// `block_size` but never longer.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) -> Result<(), ConvolutionError> {
        let block_size = block_size.max(1);
        self.wet.resize(block_size);
        self.block_size = block_size;

        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            if sample_rate > 0.0 {
                let rate = sample_rate as f32;
                self.wet.fade_delta = 1.0 / (CROSSFADE_TIME_SECONDS * rate);
                self.dry.prepare(rate);
                self.wet_gain.prepare(rate);
                for line in &mut self.predelay {
                    line.prepare(rate, MAX_PREDELAY_MS);
                    line.set_delay_ms(self.predelay_ms);
                }
            }
        }

        self.adopt_parameters();

        *self.shared.config.lock() = AudioConfig {
            sample_rate,
            block_size,
        };
        self.shared.prepared.store(sample_rate > 0.0, Ordering::Release);
        tracing::info!(sample_rate, block_size, "convolution effect prepared");

        self.handle().set_impulse(Notification::Sync)
    }

    /// Clear all audio history. The engines are cleaned at the next block.
    pub fn reset(&mut self) {
        self.dry.reset();
        self.wet_gain.reset();
        self.wet.clear();
        self.wet.smooth_input = false;
        self.wet.clean_pending = true;
        self.ramp = None;
        for line in &mut self.predelay {
            line.clear();
        }
    }

    /// Sample rate from the last `prepare`.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Block size from the last `prepare`.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Jump to the current parameter values with no glide or gate ramp.
    fn adopt_parameters(&mut self) {
        self.sync_parameters();
        self.dry.reset();
        self.wet_gain.reset();
        self.ramp = None;
        self.wet.smooth_input = false;
    }

    fn sync_parameters(&mut self) {
        let params = &self.shared.params;
        self.dry.set_gain_db(params.dry_gain_db.get());
        self.wet_gain.set_gain_db(params.wet_gain_db.get());

        let predelay = params.predelay_ms.get();
        if predelay != self.predelay_ms {
            self.predelay_ms = predelay;
            for line in &mut self.predelay {
                line.set_delay_ms(predelay);
            }
        }

        let gate = params.gate.load(Ordering::Acquire);
        if gate != self.processing {
            self.processing = gate;
            if gate {
                self.wet.smooth_input = true;
            }
            self.ramp = Some(Ramp {
                up: gate,
                index: 0,
                length: (RAMPING_TIME_MS * self.sample_rate.max(0.0) as usize) / 1000,
            });
        }
    }

    /// Process one block in place. Mono and stereo blocks are accepted.
    ///
    /// # Panics
    ///
    /// Panics if the block is longer than the prepared block size.
    pub fn process(&mut self, data: &mut ProcessData<'_>) {
        let n = data.num_samples();
        if n == 0 {
            return;
        }
        {
            let (left, right) = data.channels_mut();
            sanitize_buffer(left);
            if let Some(right) = right {
                sanitize_buffer(right);
            }
        }
        self.sync_parameters();

        let Some(mut slots) = self.shared.engines.try_lock() else {
            self.shared
                .counters
                .contended_blocks
                .fetch_add(1, Ordering::Relaxed);
            self.dry.process_block(data);
            return;
        };

        if !self.shared.is_prepared() || (!self.processing && self.ramp.is_none()) {
            drop(slots);
            self.dry.process_block(data);
            return;
        }

        assert!(
            n <= self.block_size,
            "block of {n} samples exceeds prepared size {}",
            self.block_size
        );

        let late = self.wet.render(&mut slots, self.shared.pool.as_ref(), data);
        drop(slots);
        if late > 0 {
            self.shared
                .counters
                .late_tail_blocks
                .fetch_add(late, Ordering::Relaxed);
        }

        self.dry.process_block(data);
        self.mix_wet(data);
    }

    fn mix_wet(&mut self, data: &mut ProcessData<'_>) {
        let n = data.num_samples();
        let stereo = data.num_channels() > 1;
        let (wet_l, wet_r) = self.wet.wet.split_mut(n);
        let (left, mut right) = data.channels_mut();

        if let Some(ramp) = self.ramp.as_mut() {
            let wet_gain = self.wet_gain.gain();
            let length = ramp.length.max(1) as f32;
            for i in 0..n {
                let r = (ramp.index as f32 / length).clamp(0.0, 1.0);
                let r = r * r;
                let gain = WET_MIX * wet_gain * if ramp.up { r } else { 1.0 - r };
                left[i] += gain * wet_l[i];
                if let Some(right) = right.as_deref_mut() {
                    right[i] += gain * wet_r[i];
                }
                ramp.index += 1;
            }
            if ramp.index >= ramp.length {
                self.ramp = None;
            }
            return;
        }

        let [line_l, line_r] = &mut self.predelay;
        if !line_l.is_bypassed() {
            line_l.process_block(wet_l);
            if stereo {
                line_r.process_block(wet_r);
            }
        }

        let mut wet_view = if stereo {
            ProcessData::stereo(wet_l, wet_r)
        } else {
            ProcessData::mono(wet_l)
        };
        self.wet_gain.process_block(&mut wet_view);

        let (wet_l, wet_r) = wet_view.channels_mut();
        for (o, &w) in left.iter_mut().zip(wet_l.iter()) {
            *o += WET_MIX * w;
        }
        if let (Some(right), Some(wet_r)) = (right, wet_r) {
            for (o, &w) in right.iter_mut().zip(wet_r.iter()) {
                *o += WET_MIX * w;
            }
        }
    }
}
