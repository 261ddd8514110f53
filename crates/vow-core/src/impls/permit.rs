//! PermitGated - 使い捨ての実行単位 + counting semaphore
//!
//! Like `PerTaskUnits`, but a job only starts once it holds one of
//! `capacity` permits. `capacity` is a concurrency ceiling, not a thread count.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::config::PoolStrategy;
use crate::domain::CancelReason;
use crate::pool::Job;
use crate::ports::Dispatcher;

pub struct PermitGated {
    runtime: Handle,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl PermitGated {
    pub fn new(capacity: usize, runtime: Handle) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Dispatcher for PermitGated {
    fn strategy(&self) -> PoolStrategy {
        PoolStrategy::VirtualCeiling
    }

    fn dispatch(&self, job: Job) {
        let permits = Arc::clone(&self.permits);
        let waiting = Arc::clone(&self.waiting);
        waiting.fetch_add(1, Ordering::AcqRel);

        self.runtime.spawn(async move {
            let acquired = permits.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::AcqRel);

            let Ok(permit) = acquired else {
                // semaphore closed: the pool is gone
                job.cancel(CancelReason::PoolClosed);
                return;
            };
            let job_id = job.id();
            let run = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job.run();
            });
            if let Err(err) = run.await {
                tracing::warn!(%job_id, error = %err, "permit-gated unit lost a job");
            }
        });
    }

    fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::job::Tracker;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn running_jobs_never_exceed_ceiling() {
        let gated = PermitGated::new(2, Handle::current());
        let tracker = Tracker::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut cells = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let (id, cell) = tracker.register::<()>();
            gated.dispatch(Job::new(id, Arc::clone(&cell), Arc::clone(&tracker), move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
            cells.push(cell);
        }
        for cell in cells {
            cell.wait_async().await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gated.queued(), 0);
    }

    #[tokio::test]
    async fn closed_semaphore_cancels_waiting_jobs() {
        let gated = PermitGated::new(1, Handle::current());
        let tracker = Tracker::new();
        gated.shutdown();

        let (id, cell) = tracker.register::<u8>();
        gated.dispatch(Job::new(id, Arc::clone(&cell), Arc::clone(&tracker), || Ok(1)));

        assert!(cell.wait_async().await.unwrap_err().is_cancelled());
    }
}
