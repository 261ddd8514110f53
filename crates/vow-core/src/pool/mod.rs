//! WorkerPool - worker 群とそのライフサイクル
//!
//! The pool owns a dedicated tokio runtime. Submitted work runs on the
//! runtime's blocking threads (placed there by the configured [`Dispatcher`]);
//! coordination such as chain gates and notifications runs as async tasks on
//! the same runtime.
//!
//! # Lifecycle
//! - `Active`: submissions accepted
//! - `Closing`: `stop` in progress, accepted work still drains
//! - `Inactive`: terminal; the runtime has been shut down
//!
//! Transitions use `compare_exchange` on an `AtomicU8`, so exactly one caller
//! ever performs the drain.

pub(crate) mod job;
pub(crate) mod settlement;
mod signal;

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};

use self::job::Tracker;
use self::settlement::lock;
use crate::config::{MAX_CAPACITY, PoolConfig, PoolStrategy, TerminationHook};
use crate::domain::{CancelReason, LifecycleState, Outcome, VowError};
use crate::impls::{FixedWorkers, PerTaskUnits, PermitGated};
use crate::observability::PoolCounts;
use crate::ports::Dispatcher;

pub use self::job::Job;
pub use self::settlement::WorkHandle;

/// `stop` rejects timeouts below this floor.
pub const MIN_STOP_TIMEOUT: Duration = Duration::from_millis(10);

/// Timeout used by `signal_terminate`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy used by `signal_terminate`: force-cancel after one timeout.
pub const DEFAULT_STOP_RETRY: bool = false;

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The pool was already closing or inactive; nothing was done.
    AlreadyStopped,

    /// Every accepted job settled on its own.
    Drained,

    /// The timeout elapsed without retry; `cancelled` jobs were rejected.
    Forced { cancelled: usize },
}

/// A managed pool of workers. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: AtomicU8,
    capacity: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    dispatcher: Box<dyn Dispatcher>,
    tracker: Arc<Tracker>,
}

impl WorkerPool {
    /// Build a pool (and its runtime) from configuration.
    ///
    /// With `TerminationHook::Auto` the pool also listens for SIGINT/SIGTERM,
    /// stops itself via [`WorkerPool::signal_terminate`] and then exits the
    /// process with `128 + signo`.
    pub fn new(config: &PoolConfig) -> Result<Self, VowError> {
        config.validate()?;
        let capacity = config.resolved_capacity().min(MAX_CAPACITY);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("vow-pool")
            .max_blocking_threads((capacity + 1).max(512))
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let dispatcher: Box<dyn Dispatcher> = match config.strategy {
            PoolStrategy::Fixed => Box::new(FixedWorkers::spawn(capacity, &handle)),
            PoolStrategy::PerTask => Box::new(PerTaskUnits::new(handle.clone())),
            PoolStrategy::VirtualCeiling => Box::new(PermitGated::new(capacity, handle.clone())),
        };

        let pool = Self {
            inner: Arc::new(PoolInner {
                state: AtomicU8::new(LifecycleState::Active as u8),
                capacity,
                handle,
                runtime: Mutex::new(Some(runtime)),
                dispatcher,
                tracker: Tracker::new(),
            }),
        };

        if config.hook == TerminationHook::Auto {
            signal::install(&pool);
        }
        tracing::info!(
            strategy = ?config.strategy,
            capacity,
            hook = ?config.hook,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn strategy(&self) -> PoolStrategy {
        self.inner.dispatcher.strategy()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn counts(&self) -> PoolCounts {
        let tracked = self.inner.tracker.counts();
        PoolCounts {
            queued: self.inner.dispatcher.queued(),
            running: tracked.running,
            outstanding: tracked.outstanding,
            background: tracked.background,
        }
    }

    /// Submit one unit of work. Never blocks.
    ///
    /// A panic inside `work` rejects the handle instead of unwinding.
    pub fn submit<T, F>(&self, work: F) -> Result<WorkHandle<T>, VowError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_outcome(move || Ok(work()))
    }

    pub(crate) fn submit_outcome<T, F>(&self, work: F) -> Result<WorkHandle<T>, VowError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        self.inner.ensure_active()?;
        let (id, settlement) = self.inner.tracker.register::<T>();
        let job = Job::new(
            id,
            Arc::clone(&settlement),
            Arc::clone(&self.inner.tracker),
            work,
        );
        self.inner.dispatch(job);
        Ok(WorkHandle::new(id, settlement))
    }

    /// Accept work now, dispatch it once `gate` resolves.
    ///
    /// The job counts as outstanding from this call on, so a graceful `stop`
    /// waits for it and a forced `stop` cancels it even while it is gated.
    pub(crate) fn submit_when<I, T, G, W>(&self, gate: G, work: W) -> Result<WorkHandle<T>, VowError>
    where
        I: Send + 'static,
        T: Clone + Send + Sync + 'static,
        G: Future<Output = Outcome<I>> + Send + 'static,
        W: FnOnce(Outcome<I>) -> Outcome<T> + Send + 'static,
    {
        self.inner.ensure_active()?;
        let (id, settlement) = self.inner.tracker.register::<T>();
        let job_settlement = Arc::clone(&settlement);
        let tracker = Arc::clone(&self.inner.tracker);
        // task は pool 自身の runtime 上にあるので、強参照を持つと循環する
        let pool = self.downgrade();

        self.inner.handle.spawn(async move {
            let input = gate.await;
            let job = Job::new(id, job_settlement, tracker, move || work(input));
            match pool.upgrade() {
                Some(pool) => pool.inner.dispatch(job),
                None => job.cancel(CancelReason::Dropped),
            }
        });
        Ok(WorkHandle::new(id, settlement))
    }

    pub(crate) fn ensure_active(&self) -> Result<(), VowError> {
        self.inner.ensure_active()
    }

    pub(crate) fn downgrade(&self) -> WeakPool {
        WeakPool {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Accept work that is resolved by `gate` itself, on the runtime's async
    /// threads. Used by combinators: waiting takes no worker slot.
    pub(crate) fn resolve_when<T, G>(&self, gate: G) -> Result<WorkHandle<T>, VowError>
    where
        T: Clone + Send + Sync + 'static,
        G: Future<Output = Outcome<T>> + Send + 'static,
    {
        self.inner.ensure_active()?;
        let (id, settlement) = self.inner.tracker.register::<T>();
        let cell = Arc::clone(&settlement);
        let tracker = Arc::clone(&self.inner.tracker);

        self.inner.handle.spawn(async move {
            let outcome = gate.await;
            tracker.complete(id, &cell, outcome);
        });
        Ok(WorkHandle::new(id, settlement))
    }

    /// Run a fire-and-forget async task on the pool runtime.
    ///
    /// Graceful `stop` waits for it; forced `stop` abandons it. Returns
    /// `false` (and drops `task`) once the pool is inactive.
    pub(crate) fn spawn_background<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state() == LifecycleState::Inactive {
            return false;
        }
        let guard = self.inner.tracker.begin_background();
        self.inner.handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
        true
    }

    /// Gracefully stop the pool. Blocks the calling thread.
    ///
    /// - non-`Active` pool: returns `AlreadyStopped` immediately
    /// - otherwise `Active -> Closing`, then wait up to `timeout` for all
    ///   accepted work to settle
    /// - timeout with `retry`: log progress and wait another `timeout`, forever
    /// - timeout without `retry`: cancel everything outstanding
    /// - finally `Closing -> Inactive` and shut the runtime down
    ///
    /// Do not call this from a job running on this pool: the job counts as
    /// outstanding and the drain would wait for itself.
    pub fn stop(&self, timeout: Duration, retry: bool) -> Result<StopOutcome, VowError> {
        if timeout < MIN_STOP_TIMEOUT {
            return Err(VowError::InvalidArgument(format!(
                "stop timeout {timeout:?} is below the minimum of {MIN_STOP_TIMEOUT:?}"
            )));
        }
        if !self
            .inner
            .transition(LifecycleState::Active, LifecycleState::Closing)
        {
            return Ok(StopOutcome::AlreadyStopped);
        }

        let counts = self.counts();
        tracing::info!(
            outstanding = counts.outstanding,
            queued = counts.queued,
            ?timeout,
            retry,
            "stopping worker pool"
        );

        let mut round: u32 = 0;
        let result = loop {
            match self.inner.tracker.wait_drained(timeout) {
                Ok(true) => break Ok(StopOutcome::Drained),
                Ok(false) if retry => {
                    round += 1;
                    let counts = self.counts();
                    tracing::info!(
                        round,
                        outstanding = counts.outstanding,
                        running = counts.running,
                        queued = counts.queued,
                        "worker pool still draining; waiting again"
                    );
                }
                Ok(false) => {
                    let cancelled = self.inner.tracker.cancel_all(CancelReason::ForcedShutdown);
                    tracing::warn!(cancelled, "stop timed out; outstanding work cancelled");
                    break Ok(StopOutcome::Forced { cancelled });
                }
                Err(()) => {
                    let cancelled = self
                        .inner
                        .tracker
                        .cancel_all(CancelReason::ShutdownInterrupted);
                    tracing::warn!(cancelled, "stop interrupted; outstanding work cancelled");
                    break Err(VowError::ShutdownInterrupted);
                }
            }
        };

        self.inner.deactivate();
        tracing::info!(outcome = ?result, "worker pool stopped");
        result
    }

    /// Idempotent stop for process-termination paths.
    ///
    /// `on_transition` sees the state before and after `stop` (with
    /// [`DEFAULT_STOP_TIMEOUT`] / [`DEFAULT_STOP_RETRY`]). On a pool that is
    /// already closing or inactive it is called once and nothing else happens.
    pub fn signal_terminate(&self, on_transition: Option<&dyn Fn(LifecycleState)>) {
        let before = self.state();
        if let Some(callback) = on_transition {
            callback(before);
        }
        if !before.is_active() {
            return;
        }

        if let Err(err) = self.stop(DEFAULT_STOP_TIMEOUT, DEFAULT_STOP_RETRY) {
            tracing::warn!(error = %err, "terminate: stop failed");
        }
        if let Some(callback) = on_transition {
            callback(self.state());
        }
    }
}

/// Non-owning reference to a `WorkerPool`, for tasks that live on the pool's
/// own runtime.
#[derive(Clone)]
pub(crate) struct WeakPool {
    inner: Weak<PoolInner>,
}

impl WeakPool {
    pub(crate) fn upgrade(&self) -> Option<WorkerPool> {
        self.inner.upgrade().map(|inner| WorkerPool { inner })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("strategy", &self.strategy())
            .field("capacity", &self.capacity())
            .field("state", &self.state())
            .finish()
    }
}

impl PoolInner {
    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn ensure_active(&self) -> Result<(), VowError> {
        match self.state() {
            LifecycleState::Active => Ok(()),
            state => Err(VowError::PoolClosed { state }),
        }
    }

    /// Dispatch already-accepted work. Allowed while `Closing`.
    fn dispatch(&self, job: Job) {
        if self.state() == LifecycleState::Inactive {
            job.cancel(CancelReason::PoolClosed);
            return;
        }
        self.dispatcher.dispatch(job);
    }

    /// `Closing -> Inactive`, release workers, shut the runtime down.
    fn deactivate(&self) {
        self.transition(LifecycleState::Closing, LifecycleState::Inactive);
        self.dispatcher.shutdown();
        if let Some(runtime) = lock(&self.runtime).take() {
            // async context からも呼べるよう background で止める
            runtime.shutdown_background();
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let previous = LifecycleState::from_u8(
            self.state
                .swap(LifecycleState::Inactive as u8, Ordering::AcqRel),
        );
        if previous != LifecycleState::Inactive {
            let cancelled = self.tracker.cancel_all(CancelReason::Dropped);
            if cancelled > 0 {
                tracing::warn!(cancelled, "worker pool dropped without stop; work cancelled");
            }
        }
        self.dispatcher.shutdown();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}
