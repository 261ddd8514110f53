//! PerTaskUnits - submission ごとに使い捨ての実行単位
//!
//! Nothing is pre-allocated: every job gets its own blocking unit from the
//! runtime's blocking pool, which grows and shrinks on demand.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;

use crate::config::PoolStrategy;
use crate::domain::CancelReason;
use crate::pool::Job;
use crate::ports::Dispatcher;

pub struct PerTaskUnits {
    runtime: Handle,
    closed: AtomicBool,
}

impl PerTaskUnits {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            closed: AtomicBool::new(false),
        }
    }
}

impl Dispatcher for PerTaskUnits {
    fn strategy(&self) -> PoolStrategy {
        PoolStrategy::PerTask
    }

    fn dispatch(&self, job: Job) {
        if self.closed.load(Ordering::Acquire) {
            job.cancel(CancelReason::PoolClosed);
            return;
        }
        // JoinHandle は捨てる。結果は job 自身が settlement に書く
        drop(self.runtime.spawn_blocking(move || job.run()));
    }

    fn queued(&self) -> usize {
        0
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::job::Tracker;
    use std::sync::{Arc, Barrier};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_job_gets_its_own_unit() {
        let units = PerTaskUnits::new(Handle::current());
        let tracker = Tracker::new();
        // 4 本すべてが同時に走らないと barrier を抜けられない
        let barrier = Arc::new(Barrier::new(4));

        let mut cells = Vec::new();
        for i in 0..4 {
            let barrier = Arc::clone(&barrier);
            let (id, cell) = tracker.register::<usize>();
            units.dispatch(Job::new(id, Arc::clone(&cell), Arc::clone(&tracker), move || {
                barrier.wait();
                Ok(i)
            }));
            cells.push(cell);
        }

        let mut values = Vec::new();
        for cell in cells {
            values.push(cell.wait_async().await.unwrap());
        }
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert_eq!(units.queued(), 0);
    }

    #[tokio::test]
    async fn closed_units_cancel_new_jobs() {
        let units = PerTaskUnits::new(Handle::current());
        let tracker = Tracker::new();
        units.shutdown();

        let (id, cell) = tracker.register::<u8>();
        units.dispatch(Job::new(id, Arc::clone(&cell), Arc::clone(&tracker), || Ok(1)));

        assert!(cell.wait_async().await.unwrap_err().is_cancelled());
    }
}
