//! Job - pool に受理された仕事と、その追跡
//!
//! Every unit of work is registered with the [`Tracker`] at the moment the
//! pool accepts it, before it is queued or dispatched. `stop` drains by
//! waiting for the tracker to empty, and force-cancels through it.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::settlement::{Cancellable, Settlement, lock};
use crate::domain::{CancelReason, JobId, Outcome, TaskFailure};

#[derive(Default)]
struct TrackerState {
    /// Accepted and not yet settled.
    jobs: HashMap<JobId, Arc<dyn Cancellable>>,

    /// Executing on a worker and still outstanding. Force-cancelled jobs
    /// leave this set even while their thread is still blocked.
    running: HashSet<JobId>,

    /// Fire-and-forget tasks that a graceful stop still waits for.
    background: usize,
}

impl TrackerState {
    fn is_drained(&self) -> bool {
        self.jobs.is_empty() && self.background == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrackerCounts {
    pub outstanding: usize,
    pub running: usize,
    pub background: usize,
}

#[derive(Default)]
pub(crate) struct Tracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl Tracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh settlement for work that has just been accepted.
    pub(crate) fn register<T>(&self) -> (JobId, Arc<Settlement<T>>)
    where
        T: Clone + Send + 'static,
    {
        let id = JobId::generate();
        let settlement = Settlement::new();
        let cancel: Arc<dyn Cancellable> = settlement.clone();
        lock(&self.state).jobs.insert(id, cancel);
        (id, settlement)
    }

    fn finish(&self, id: JobId) {
        let mut state = lock(&self.state);
        state.jobs.remove(&id);
        state.running.remove(&id);
        let drained = state.is_drained();
        drop(state);
        if drained {
            self.changed.notify_all();
        }
    }

    /// Settle accepted work directly, without a worker.
    pub(crate) fn complete<T>(&self, id: JobId, settlement: &Settlement<T>, outcome: Outcome<T>)
    where
        T: Clone + Send + 'static,
    {
        settlement.settle(outcome);
        self.finish(id);
    }

    /// `false` if the job was already settled without running.
    fn mark_running(&self, id: JobId) -> bool {
        let mut state = lock(&self.state);
        if !state.jobs.contains_key(&id) {
            return false;
        }
        state.running.insert(id);
        true
    }

    pub(crate) fn begin_background(self: &Arc<Self>) -> BackgroundGuard {
        lock(&self.state).background += 1;
        BackgroundGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Wait until every accepted job settled and every background task ended.
    ///
    /// Returns `Ok(false)` on timeout, `Err(())` if the lock was poisoned.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> Result<bool, ()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|_| ())?;
        while !state.is_drained() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .map_err(|_| ())?
                .0;
        }
        Ok(true)
    }

    /// Cancel everything still outstanding. Returns how many settlements
    /// were actually rejected by this call.
    pub(crate) fn cancel_all(&self, reason: CancelReason) -> usize {
        let jobs: Vec<_> = {
            let mut state = lock(&self.state);
            state.running.clear();
            state.jobs.drain().collect()
        };
        let cancelled = jobs
            .into_iter()
            .filter(|(_, job)| job.cancel(reason))
            .count();
        self.changed.notify_all();
        cancelled
    }

    pub(crate) fn counts(&self) -> TrackerCounts {
        let state = lock(&self.state);
        TrackerCounts {
            outstanding: state.jobs.len(),
            running: state.running.len(),
            background: state.background,
        }
    }
}

pub(crate) struct BackgroundGuard {
    tracker: Arc<Tracker>,
}

impl Drop for BackgroundGuard {
    fn drop(&mut self) {
        let mut state = self
            .tracker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.background = state.background.saturating_sub(1);
        let drained = state.is_drained();
        drop(state);
        if drained {
            self.tracker.changed.notify_all();
        }
    }
}

/// One accepted unit of work, ready for a worker.
///
/// Dropping a job that never ran settles it as cancelled, so no strategy can
/// lose a result by discarding a job.
pub struct Job {
    id: JobId,
    run: Option<Box<dyn FnOnce() + Send>>,
    cancel: Arc<dyn Cancellable>,
    tracker: Arc<Tracker>,
}

impl Job {
    pub(crate) fn new<T, W>(
        id: JobId,
        settlement: Arc<Settlement<T>>,
        tracker: Arc<Tracker>,
        work: W,
    ) -> Self
    where
        T: Clone + Send + 'static,
        W: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let cell = Arc::clone(&settlement);
        let run_tracker = Arc::clone(&tracker);
        let run = Box::new(move || {
            if !run_tracker.mark_running(id) {
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(TaskFailure::from_panic(payload)));
            cell.settle(outcome);
            run_tracker.finish(id);
        });
        Self {
            id,
            run: Some(run),
            cancel: settlement,
            tracker,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Execute on the current thread. Blocking; call from a worker.
    pub fn run(mut self) {
        if let Some(run) = self.run.take() {
            run();
        }
    }

    /// Settle as cancelled without running.
    pub fn cancel(mut self, reason: CancelReason) {
        self.run = None;
        self.cancel.cancel(reason);
        self.tracker.finish(self.id);
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.run.take().is_some() {
            self.cancel.cancel(CancelReason::Dropped);
            self.tracker.finish(self.id);
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pending", &self.run.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PromiseState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn accepted(tracker: &Arc<Tracker>, value: i32) -> (Job, Arc<Settlement<i32>>) {
        let (id, settlement) = tracker.register::<i32>();
        let job = Job::new(id, Arc::clone(&settlement), Arc::clone(tracker), move || {
            Ok(value)
        });
        (job, settlement)
    }

    #[test]
    fn running_a_job_settles_and_drains() {
        let tracker = Tracker::new();
        let (job, settlement) = accepted(&tracker, 5);
        assert_eq!(tracker.counts().outstanding, 1);

        job.run();

        assert_eq!(settlement.wait().unwrap(), 5);
        assert_eq!(tracker.counts(), TrackerCounts::default());
        assert_eq!(tracker.wait_drained(Duration::from_millis(10)), Ok(true));
    }

    #[test]
    fn dropped_job_is_cancelled_not_lost() {
        let tracker = Tracker::new();
        let (job, settlement) = accepted(&tracker, 5);

        drop(job);

        assert_eq!(settlement.state(), PromiseState::Rejected);
        assert!(matches!(
            settlement.wait(),
            Err(TaskFailure::Cancelled(CancelReason::Dropped))
        ));
        assert_eq!(tracker.counts().outstanding, 0);
    }

    #[test]
    fn cancel_all_rejects_outstanding() {
        let tracker = Tracker::new();
        let (_job_a, a) = accepted(&tracker, 1);
        let (job_b, b) = accepted(&tracker, 2);
        job_b.run();

        assert_eq!(tracker.cancel_all(CancelReason::ForcedShutdown), 1);
        assert!(a.wait().unwrap_err().is_cancelled());
        assert_eq!(b.wait().unwrap(), 2);
    }

    #[test]
    fn cancel_all_stops_counting_blocked_jobs() {
        let tracker = Tracker::new();
        let (id, settlement) = tracker.register::<i32>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let job = Job::new(id, Arc::clone(&settlement), Arc::clone(&tracker), move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(1)
        });
        let worker = thread::spawn(move || job.run());
        started_rx.recv().unwrap();
        assert_eq!(tracker.counts().running, 1);

        assert_eq!(tracker.cancel_all(CancelReason::ForcedShutdown), 1);
        assert_eq!(tracker.counts(), TrackerCounts::default());

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        assert!(settlement.wait().unwrap_err().is_cancelled());
        assert_eq!(tracker.counts(), TrackerCounts::default());
    }

    #[test]
    fn job_cancelled_before_running_never_runs() {
        let tracker = Tracker::new();
        let (id, settlement) = tracker.register::<i32>();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let job = Job::new(id, Arc::clone(&settlement), Arc::clone(&tracker), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        });

        tracker.cancel_all(CancelReason::ForcedShutdown);
        job.run();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(settlement.wait().unwrap_err().is_cancelled());
        assert_eq!(tracker.counts(), TrackerCounts::default());
    }

    #[test]
    fn completing_directly_skips_running() {
        let tracker = Tracker::new();
        let (id, settlement) = tracker.register::<&str>();
        assert_eq!(tracker.counts().outstanding, 1);

        tracker.complete(id, &settlement, Ok("inline"));

        assert_eq!(settlement.wait().unwrap(), "inline");
        assert_eq!(tracker.counts(), TrackerCounts::default());
    }

    #[test]
    fn background_work_blocks_drain() {
        let tracker = Tracker::new();
        let guard = tracker.begin_background();
        assert_eq!(tracker.wait_drained(Duration::from_millis(20)), Ok(false));

        drop(guard);
        assert_eq!(tracker.wait_drained(Duration::from_millis(20)), Ok(true));
    }
}
