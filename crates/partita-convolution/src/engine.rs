//! Non-uniform partitioned convolution with a background-computed tail.
//!
//! A [`ConvolutionEngine`] convolves one channel with an impulse response of
//! any length while keeping the work done on the audio thread per sample
//! roughly constant.
//!
//! # Partition layout
//!
//! With head block `H` and maximum tail block `T` (both powers of two,
//! `H <= T`) the impulse is covered as
//!
//! ```text
//! head           [0, 2H)        uniform H, zero latency, audio thread
//! stage B = H    [2H, 4H)       whole blocks of H
//! stage B = 2H   [4H, 8H)       whole blocks of 2H
//! ...            (B doubles while B < T)
//! stage B = T    [2T, len)      whole blocks of T, as many partitions as needed
//! ```
//!
//! A tail stage with block `B` starts `2B` samples into the impulse. When its
//! `B`-sample input block completes at time `t`, the job convolving that block
//! only has to be ready at `t + B`, when its output starts being played. That
//! full block of slack is what lets the job run on a
//! [`ConvolutionThreadPool`](crate::ConvolutionThreadPool) worker.
//!
//! # Late jobs
//!
//! At every stage boundary the audio thread needs the previous job's result.
//! It spins for at most [`EngineOptions::late_job_timeout`]. If the worker is
//! still busy the stage keeps playing its previous output block, skips
//! submitting the new block, and [`ConvolutionEngine::late_tail_blocks`] is
//! incremented. The audio thread never sleeps and never blocks on the worker.
//!
//! # Ordering
//!
//! Each stage has at most one job in flight, so a stage's blocks are always
//! computed in order no matter how many workers share the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::fft::FftImplementation;
use crate::pool::PoolHandle;
use crate::uniform::UniformConvolver;

/// Default bound on how long the audio thread waits for a tail job.
pub const DEFAULT_LATE_JOB_TIMEOUT: Duration = Duration::from_millis(2);

/// Construction options for a [`ConvolutionEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// FFT backend for every partition of this engine.
    pub fft: FftImplementation,
    /// How long the audio thread may spin for a background tail job.
    pub late_job_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fft: FftImplementation::BestAvailable,
            late_job_timeout: DEFAULT_LATE_JOB_TIMEOUT,
        }
    }
}

/// One partition level of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageLayout {
    /// Partition (block) size in samples.
    pub block_size: usize,
    /// First impulse sample covered by this stage.
    pub offset: usize,
    /// Number of impulse samples covered.
    pub length: usize,
    /// `true` when the stage's jobs run on a background pool.
    pub background: bool,
}

impl StageLayout {
    /// One past the last impulse sample covered.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// How an impulse response is split between the head and the tail stages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionLayout {
    /// Head partition, processed inline.
    pub head: StageLayout,
    /// Tail stages in order of increasing offset.
    pub tail: Vec<StageLayout>,
}

impl PartitionLayout {
    /// Total number of impulse samples covered.
    pub fn total_length(&self) -> usize {
        self.tail.last().map_or(self.head.end(), StageLayout::end)
    }
}

/// Compute the partition layout for an impulse of `ir_len` samples.
///
/// # Panics
///
/// Panics if `head_size` or `tail_size` is not a power of two, or if
/// `tail_size < head_size`.
///
/// ```rust
/// use partita_convolution::partition_layout;
///
/// let layout = partition_layout(64, 256, 2000);
/// let blocks: Vec<usize> = layout.tail.iter().map(|s| s.block_size).collect();
/// assert_eq!(blocks, vec![64, 128, 256]);
/// assert_eq!(layout.tail[2].offset, 512);
/// assert_eq!(layout.total_length(), 2000);
/// ```
pub fn partition_layout(head_size: usize, tail_size: usize, ir_len: usize) -> PartitionLayout {
    assert!(
        head_size.is_power_of_two(),
        "head size must be a power of two, got {head_size}"
    );
    assert!(
        tail_size.is_power_of_two(),
        "tail size must be a power of two, got {tail_size}"
    );
    assert!(
        tail_size >= head_size,
        "tail size {tail_size} must not be smaller than head size {head_size}"
    );

    let head = StageLayout {
        block_size: head_size,
        offset: 0,
        length: ir_len.min(2 * head_size),
        background: false,
    };

    let mut tail = Vec::new();
    let mut block = head_size;
    while block < tail_size {
        let offset = 2 * block;
        if ir_len <= offset {
            break;
        }
        tail.push(StageLayout {
            block_size: block,
            offset,
            length: (ir_len - offset).min(2 * block),
            background: false,
        });
        block *= 2;
    }
    let offset = 2 * tail_size;
    if ir_len > offset && block == tail_size {
        tail.push(StageLayout {
            block_size: tail_size,
            offset,
            length: ir_len - offset,
            background: false,
        });
    }

    PartitionLayout { head, tail }
}

struct StageState {
    convolver: UniformConvolver,
    input: Vec<f32>,
    output: Vec<f32>,
}

/// The unit of background work: convolve one completed block of one tail
/// stage.
///
/// `pending` is raised by the audio thread when it hands the block over and
/// lowered by whoever ran the job, after the state lock has been released.
pub(crate) struct StageJob {
    pending: AtomicBool,
    clear_requested: AtomicBool,
    state: Mutex<StageState>,
}

impl StageJob {
    fn new(convolver: UniformConvolver, block_size: usize) -> Self {
        Self {
            pending: AtomicBool::new(false),
            clear_requested: AtomicBool::new(false),
            state: Mutex::new(StageState {
                convolver,
                input: vec![0.0; block_size],
                output: vec![0.0; block_size],
            }),
        }
    }

    /// Convolve the handed-over block.
    pub(crate) fn run(&self) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.convolver.process(&state.input, &mut state.output);
        }
        self.pending.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

struct TailStage {
    layout: StageLayout,
    /// Input collected for the current block.
    accum: Vec<f32>,
    /// Output being played during the current block.
    precalc: Vec<f32>,
    job: Arc<StageJob>,
}

impl TailStage {
    fn new(layout: StageLayout, impulse: &[f32], fft: FftImplementation) -> Self {
        let mut convolver = UniformConvolver::new(fft);
        convolver.init(layout.block_size, impulse);
        Self {
            layout,
            accum: vec![0.0; layout.block_size],
            precalc: vec![0.0; layout.block_size],
            job: Arc::new(StageJob::new(convolver, layout.block_size)),
        }
    }

    fn clean(&mut self) {
        self.accum.fill(0.0);
        self.precalc.fill(0.0);
        if !self.job.is_pending() {
            if let Some(mut state) = self.job.state.try_lock() {
                state.convolver.reset();
                state.input.fill(0.0);
                state.output.fill(0.0);
                return;
            }
        }
        self.job.clear_requested.store(true, Ordering::Release);
    }

    /// Called when `accum` holds a complete block. Returns `false` when the
    /// previous job was late and the stage fell back to its stale output.
    fn end_of_block(&mut self, pool: Option<&PoolHandle>, timeout: Duration) -> bool {
        if self.job.is_pending() && !wait_for(&self.job, timeout) {
            return false;
        }
        let Some(mut guard) = self.job.state.try_lock() else {
            return false;
        };
        let state = &mut *guard;

        if self.job.clear_requested.swap(false, Ordering::AcqRel) {
            state.convolver.reset();
            state.output.fill(0.0);
        }

        std::mem::swap(&mut self.precalc, &mut state.output);
        state.input.copy_from_slice(&self.accum);

        match pool {
            Some(pool) if self.layout.background => {
                self.job.pending.store(true, Ordering::Release);
                drop(guard);
                if !pool.submit(Arc::clone(&self.job)) {
                    self.job.run();
                }
            }
            _ => state.convolver.process(&state.input, &mut state.output),
        }
        true
    }
}

fn wait_for(job: &StageJob, timeout: Duration) -> bool {
    if timeout.is_zero() {
        return !job.is_pending();
    }
    let start = Instant::now();
    while job.is_pending() {
        if start.elapsed() >= timeout {
            return false;
        }
        std::hint::spin_loop();
    }
    true
}

/// One channel of partitioned convolution.
///
/// Input must already be free of NaN, Inf and denormals; the engine does not
/// sanitise it.
///
/// ```rust
/// use partita_convolution::{ConvolutionEngine, EngineOptions};
///
/// let mut engine = ConvolutionEngine::new(EngineOptions::default());
/// engine.init(64, 256, &[0.0, 0.5]);
///
/// let mut out = [0.0_f32; 4];
/// engine.process(&[1.0, 0.0, 0.0, 0.0], &mut out);
/// assert!((out[1] - 0.5).abs() < 1e-5);
/// ```
pub struct ConvolutionEngine {
    options: EngineOptions,
    head: UniformConvolver,
    stages: Vec<TailStage>,
    head_size: usize,
    tail_size: usize,
    ir_len: usize,
    position: usize,
    period: usize,
    pool: Option<PoolHandle>,
    late_total: u64,
    late_unreported: u64,
}

impl std::fmt::Debug for ConvolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionEngine")
            .field("head_size", &self.head_size)
            .field("tail_size", &self.tail_size)
            .field("ir_len", &self.ir_len)
            .field("stages", &self.stages.len())
            .field("background", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl ConvolutionEngine {
    /// An empty engine that outputs silence.
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            head: UniformConvolver::new(options.fft),
            stages: Vec::new(),
            head_size: 0,
            tail_size: 0,
            ir_len: 0,
            position: 0,
            period: 1,
            pool: None,
            late_total: 0,
            late_unreported: 0,
        }
    }

    /// Transform `impulse` into head and tail partitions and clear all state.
    ///
    /// # Panics
    ///
    /// Panics if the sizes are not powers of two or `tail_size < head_size`.
    pub fn init(&mut self, head_size: usize, tail_size: usize, impulse: &[f32]) {
        let mut layout = partition_layout(head_size, tail_size, impulse.len());
        let background = self.pool.is_some();
        for stage in &mut layout.tail {
            stage.background = background;
        }

        self.head = UniformConvolver::new(self.options.fft);
        self.head.init(head_size, &impulse[..layout.head.length]);
        self.stages = layout
            .tail
            .iter()
            .map(|l| TailStage::new(*l, &impulse[l.offset..l.end()], self.options.fft))
            .collect();

        self.head_size = head_size;
        self.tail_size = tail_size;
        self.ir_len = impulse.len();
        self.period = self
            .stages
            .last()
            .map_or(head_size, |s| s.layout.block_size)
            .max(head_size);
        self.position = 0;
    }

    /// Discard the impulse response. The engine outputs silence afterwards.
    pub fn reset(&mut self) {
        self.head = UniformConvolver::new(self.options.fft);
        self.stages.clear();
        self.ir_len = 0;
        self.position = 0;
        self.period = self.head_size.max(1);
    }

    /// Zero all input history and pending output without reallocating.
    ///
    /// A stage whose job is still running is cleared at its next block
    /// boundary instead.
    pub fn clean_pipeline(&mut self) {
        self.head.reset();
        for stage in &mut self.stages {
            stage.clean();
        }
        self.position = 0;
    }

    /// Route tail jobs through `pool`, or compute them inline with `None`.
    pub fn set_background_pool(&mut self, pool: Option<PoolHandle>) {
        let background = pool.is_some();
        for stage in &mut self.stages {
            stage.layout.background = background;
        }
        self.pool = pool;
    }

    /// `true` when tail jobs run on a pool.
    pub fn uses_background_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// `true` while any tail job handed to a worker has not finished.
    pub fn has_pending_jobs(&self) -> bool {
        self.stages.iter().any(|s| s.job.is_pending())
    }

    /// Current partition layout.
    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout {
            head: StageLayout {
                block_size: self.head_size,
                offset: 0,
                length: self.head.ir_len(),
                background: false,
            },
            tail: self.stages.iter().map(|s| s.layout).collect(),
        }
    }

    /// Head partition size.
    pub fn head_size(&self) -> usize {
        self.head_size
    }

    /// Largest tail partition size.
    pub fn tail_size(&self) -> usize {
        self.tail_size
    }

    /// Length of the loaded impulse response.
    pub fn impulse_len(&self) -> usize {
        self.ir_len
    }

    /// `true` when no impulse response is loaded.
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Stale-tail fallbacks since the engine was created.
    pub fn late_tail_blocks(&self) -> u64 {
        self.late_total
    }

    /// Stale-tail fallbacks since the previous call.
    pub fn take_late_tail_blocks(&mut self) -> u64 {
        std::mem::take(&mut self.late_unreported)
    }

    /// Convolve `input` into `output` (overwritten). Both must be the same
    /// length.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        assert_eq!(
            input.len(),
            output.len(),
            "input and output must have equal length"
        );
        if self.head.is_empty() {
            output.fill(0.0);
            return;
        }

        let head = self.head_size;
        let timeout = self.options.late_job_timeout;
        let mut done = 0;
        while done < input.len() {
            let n = (input.len() - done).min(head - self.position % head);
            let chunk_in = &input[done..done + n];
            let chunk_out = &mut output[done..done + n];

            self.head.process(chunk_in, chunk_out);

            for stage in &mut self.stages {
                let block = stage.layout.block_size;
                let offset = self.position % block;
                stage.accum[offset..offset + n].copy_from_slice(chunk_in);
                for (o, p) in chunk_out.iter_mut().zip(&stage.precalc[offset..offset + n]) {
                    *o += *p;
                }
                if offset + n == block && !stage.end_of_block(self.pool.as_ref(), timeout) {
                    self.late_total += 1;
                    self.late_unreported += 1;
                }
            }

            self.position = (self.position + n) % self.period;
            done += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniform::convolve_direct;

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    fn decaying(len: usize) -> Vec<f32> {
        noise(len, 42)
            .into_iter()
            .enumerate()
            .map(|(i, x)| x * (-(i as f32) / len as f32 * 3.0).exp())
            .collect()
    }

    #[test]
    fn layout_is_contiguous() {
        for (head, tail, len) in [(64, 256, 5000), (32, 32, 1000), (128, 8192, 100), (16, 64, 97)] {
            let layout = partition_layout(head, tail, len);
            let mut end = layout.head.end();
            for stage in &layout.tail {
                assert_eq!(stage.offset, end, "gap before stage {stage:?}");
                assert_eq!(stage.offset, 2 * stage.block_size);
                end = stage.end();
            }
            assert_eq!(layout.total_length(), len);
        }
    }

    #[test]
    fn short_impulse_is_head_only() {
        let layout = partition_layout(256, 8192, 300);
        assert!(layout.tail.is_empty());
        assert_eq!(layout.head.length, 300);
    }

    #[test]
    fn final_stage_only_when_doubling_reaches_tail() {
        let layout = partition_layout(64, 1024, 64 * 5);
        let blocks: Vec<usize> = layout.tail.iter().map(|s| s.block_size).collect();
        assert_eq!(blocks, vec![64, 128]);
        assert_eq!(layout.tail[1].length, 64);
        assert_eq!(layout.total_length(), 320);
    }

    #[test]
    fn empty_engine_is_silent() {
        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        let mut out = [1.0_f32; 16];
        engine.process(&[1.0; 16], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        engine.init(16, 64, &[]);
        assert!(engine.is_empty());
        engine.process(&[1.0; 16], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn inline_matches_direct_convolution() {
        let ir = decaying(3000);
        let input = noise(6000, 99);
        let expected = convolve_direct(&input, &ir);

        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        engine.init(64, 512, &ir);
        assert!(engine.layout().tail.len() >= 3);

        let mut out = vec![0.0; input.len()];
        for (i, o) in input.chunks(64).zip(out.chunks_mut(64)) {
            engine.process(i, o);
        }
        for (i, (a, b)) in expected.iter().zip(out.iter()).enumerate() {
            assert!((a - b).abs() < 2e-3, "sample {i}: {a} vs {b}");
        }
        assert_eq!(engine.late_tail_blocks(), 0);
    }

    #[test]
    fn short_blocks_are_accepted() {
        let ir = decaying(700);
        let input = noise(1500, 5);
        let expected = convolve_direct(&input, &ir);

        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        engine.init(32, 128, &ir);
        let mut out = vec![0.0; input.len()];
        let mut pos = 0;
        for n in [32, 17, 15, 1, 31, 32, 8].iter().cycle() {
            if pos >= input.len() {
                break;
            }
            let end = (pos + n).min(input.len());
            engine.process(&input[pos..end], &mut out[pos..end]);
            pos = end;
        }
        for (a, b) in expected.iter().zip(out.iter()) {
            assert!((a - b).abs() < 2e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn clean_pipeline_silences_tail() {
        let ir = decaying(2000);
        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        engine.init(32, 256, &ir);

        let input = noise(1024, 3);
        let mut out = vec![0.0; 32];
        for chunk in input.chunks(32) {
            engine.process(chunk, &mut out);
        }
        engine.clean_pipeline();

        let silence = [0.0_f32; 32];
        for _ in 0..200 {
            engine.process(&silence, &mut out);
            assert!(out.iter().all(|s| s.abs() < 1e-6));
        }
    }

    #[test]
    fn reset_discards_impulse() {
        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        engine.init(16, 16, &decaying(100));
        assert_eq!(engine.impulse_len(), 100);
        engine.reset();
        assert!(engine.is_empty());
        let mut out = [1.0_f32; 16];
        engine.process(&[1.0; 16], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    #[should_panic(expected = "must not be smaller")]
    fn tail_smaller_than_head_panics() {
        let _ = partition_layout(256, 128, 1000);
    }
}
