//! Background workers for tail convolution and deferred engine deletion.
//!
//! The audio thread talks to the pool through a bounded `crossbeam-channel`
//! using `try_send` only, so handing work over never blocks. Two kinds of
//! work arrive:
//!
//! - **tail jobs** from engines whose partitions are too large to convolve
//!   inline, and
//! - **retired engines** that have been swapped out and must be freed off the
//!   audio thread. An engine whose tail jobs are still in flight is parked in
//!   a per-worker graveyard and freed once they have finished.
//!
//! When the queue is full a tail job is run inline by the caller and a
//! retired engine is handed back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::engine::{ConvolutionEngine, StageJob};
use crate::error::ConvolutionError;

/// Default queue depth shared by all workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How often a worker rechecks parked engines while its queue is idle.
const GRAVEYARD_POLL: Duration = Duration::from_millis(5);

/// Sleep between polls in [`PoolHandle::wait_until_idle`].
const IDLE_POLL: Duration = Duration::from_millis(1);

pub(crate) enum Message {
    Run(Arc<StageJob>),
    Retire(Box<ConvolutionEngine>),
    Shutdown,
}

#[derive(Default)]
struct PoolCounters {
    queued: AtomicUsize,
    parked: AtomicUsize,
    jobs_run: AtomicU64,
    engines_deleted: AtomicU64,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Messages sent but not yet handled.
    pub queued: usize,
    /// Retired engines waiting for their jobs to finish.
    pub parked: usize,
    /// Tail jobs completed by workers.
    pub jobs_run: u64,
    /// Retired engines freed by workers.
    pub engines_deleted: u64,
}

/// Cloneable, non-owning access to a [`ConvolutionThreadPool`].
///
/// Engines hold one to submit tail jobs; the effect holds one to retire
/// engines. Once the pool itself is dropped every submission fails and the
/// caller falls back to doing the work inline.
#[derive(Clone)]
pub struct PoolHandle {
    sender: Sender<Message>,
    counters: Arc<PoolCounters>,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolHandle {
    /// Queue a tail job. Returns `false` if the queue is full or closed, in
    /// which case the caller must run the job itself.
    pub(crate) fn submit(&self, job: Arc<StageJob>) -> bool {
        self.counters.queued.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(Message::Run(job)) {
            Ok(()) => true,
            Err(_) => {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }

    /// Transfer ownership of a swapped-out engine to the pool, which frees it
    /// once no tail job of it is in flight.
    ///
    /// Never blocks. If the queue is full the engine is handed back.
    pub fn retire(&self, engine: Box<ConvolutionEngine>) -> Result<(), Box<ConvolutionEngine>> {
        self.counters.queued.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(Message::Retire(engine)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg) | TrySendError::Disconnected(msg)) => {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
                match msg {
                    Message::Retire(engine) => Err(engine),
                    _ => unreachable!("retire only sends Retire messages"),
                }
            }
        }
    }

    /// `true` while any job or retired engine is still queued or parked.
    pub fn is_busy(&self) -> bool {
        self.counters.queued.load(Ordering::Acquire) > 0
            || self.counters.parked.load(Ordering::Acquire) > 0
    }

    /// Poll [`is_busy`](Self::is_busy) with short sleeps for up to `timeout`.
    /// Returns `true` if the pool became idle. Never call this from the audio
    /// thread.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.is_busy() {
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(IDLE_POLL);
        }
        true
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.counters.queued.load(Ordering::Acquire),
            parked: self.counters.parked.load(Ordering::Acquire),
            jobs_run: self.counters.jobs_run.load(Ordering::Relaxed),
            engines_deleted: self.counters.engines_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Worker threads that run tail jobs and free retired engines.
///
/// Dropping the pool lets the workers finish everything already queued, then
/// joins them.
///
/// ```rust
/// use partita_convolution::{ConvolutionEngine, ConvolutionThreadPool, EngineOptions};
/// use std::time::Duration;
///
/// let pool = ConvolutionThreadPool::new(1).unwrap();
/// let mut engine = ConvolutionEngine::new(EngineOptions::default());
/// engine.set_background_pool(Some(pool.handle()));
/// engine.init(64, 256, &vec![0.1; 4000]);
///
/// let mut out = [0.0_f32; 64];
/// for _ in 0..32 {
///     engine.process(&[0.5; 64], &mut out);
/// }
///
/// pool.handle().retire(Box::new(engine)).unwrap();
/// assert!(pool.wait_until_idle(Duration::from_secs(5)));
/// assert_eq!(pool.stats().engines_deleted, 1);
/// ```
pub struct ConvolutionThreadPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ConvolutionThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionThreadPool")
            .field("workers", &self.workers.len())
            .field("stats", &self.handle.stats())
            .finish()
    }
}

impl ConvolutionThreadPool {
    /// Start `worker_threads` workers (at least one) with the default queue
    /// depth.
    pub fn new(worker_threads: usize) -> Result<Self, ConvolutionError> {
        Self::with_capacity(worker_threads, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start workers with an explicit queue depth.
    pub fn with_capacity(worker_threads: usize, capacity: usize) -> Result<Self, ConvolutionError> {
        let (sender, receiver) = bounded(capacity.max(1));
        let counters = Arc::new(PoolCounters::default());
        let count = worker_threads.max(1);

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let name = format!("partita-conv-{index}");
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let worker = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&receiver, &counters))
                .map_err(|e| ConvolutionError::worker_spawn(name, e))?;
            workers.push(worker);
        }

        tracing::info!(workers = count, capacity, "convolution pool started");

        Ok(Self {
            handle: PoolHandle { sender, counters },
            workers,
        })
    }

    /// A handle for engines and effects.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// See [`PoolHandle::retire`].
    pub fn retire(&self, engine: Box<ConvolutionEngine>) -> Result<(), Box<ConvolutionEngine>> {
        self.handle.retire(engine)
    }

    /// See [`PoolHandle::is_busy`].
    pub fn is_busy(&self) -> bool {
        self.handle.is_busy()
    }

    /// See [`PoolHandle::wait_until_idle`].
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.handle.wait_until_idle(timeout)
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.handle.stats()
    }
}

impl Drop for ConvolutionThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            if self.handle.sender.send(Message::Shutdown).is_err() {
                break;
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("convolution worker panicked");
            }
        }
        let stats = self.handle.stats();
        tracing::info!(
            jobs_run = stats.jobs_run,
            engines_deleted = stats.engines_deleted,
            "convolution pool stopped"
        );
    }
}

fn worker_loop(receiver: &Receiver<Message>, counters: &PoolCounters) {
    let mut graveyard: Vec<Box<ConvolutionEngine>> = Vec::new();

    loop {
        let message = if graveyard.is_empty() {
            match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        } else {
            match receiver.recv_timeout(GRAVEYARD_POLL) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    sweep(&mut graveyard, counters);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match message {
            Message::Run(job) => {
                job.run();
                counters.jobs_run.fetch_add(1, Ordering::Relaxed);
            }
            Message::Retire(engine) => {
                if engine.has_pending_jobs() {
                    counters.parked.fetch_add(1, Ordering::AcqRel);
                    graveyard.push(engine);
                } else {
                    free(engine, counters);
                }
            }
            Message::Shutdown => break,
        }
        counters.queued.fetch_sub(1, Ordering::AcqRel);
        sweep(&mut graveyard, counters);
    }

    // Tail jobs hold their own state, so anything still parked is safe to free.
    for engine in graveyard.drain(..) {
        counters.parked.fetch_sub(1, Ordering::AcqRel);
        free(engine, counters);
    }
}

fn sweep(graveyard: &mut Vec<Box<ConvolutionEngine>>, counters: &PoolCounters) {
    let mut i = 0;
    while i < graveyard.len() {
        if graveyard[i].has_pending_jobs() {
            i += 1;
        } else {
            let engine = graveyard.swap_remove(i);
            counters.parked.fetch_sub(1, Ordering::AcqRel);
            free(engine, counters);
        }
    }
}

fn free(engine: Box<ConvolutionEngine>, counters: &PoolCounters) {
    tracing::debug!(
        impulse_len = engine.impulse_len(),
        "freeing retired convolution engine"
    );
    drop(engine);
    counters.engines_deleted.fetch_add(1, Ordering::Relaxed);
}
