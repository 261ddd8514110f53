//! FixedWorkers - 固定数の worker loop と FIFO キュー
//!
//! `capacity` worker loops are spawned once and live until the pool shuts
//! down. Each loop leases one job at a time from an unbounded FIFO queue and
//! runs it on a blocking thread, so at most `capacity` jobs run concurrently
//! and the rest wait in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::PoolStrategy;
use crate::domain::CancelReason;
use crate::pool::Job;
use crate::pool::settlement::lock;
use crate::ports::Dispatcher;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Job>,
    closed: bool,
}

/// Unbounded FIFO of jobs waiting for a worker.
#[derive(Default)]
struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    /// Returns the job back if the queue is already closed.
    fn push(&self, job: Job) -> Result<(), Job> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(job);
            }
            state.ready.push_back(job);
        }
        // Notify waiting workers
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next job; `None` once closed.
    async fn lease(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.closed {
                    return None;
                }
                if let Some(job) = state.ready.pop_front() {
                    return Some(job);
                }
            }

            notified.await;
        }
    }

    fn close(&self) -> Vec<Job> {
        let drained = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.ready.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }
}

pub struct FixedWorkers {
    queue: Arc<JobQueue>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl FixedWorkers {
    /// Spawn `capacity` worker loops on `runtime`.
    pub fn spawn(capacity: usize, runtime: &Handle) -> Self {
        let queue = Arc::new(JobQueue::default());

        let mut joins = Vec::with_capacity(capacity);
        for worker_id in 0..capacity {
            let q = Arc::clone(&queue);
            joins.push(runtime.spawn(async move {
                worker_loop(worker_id, q).await;
            }));
        }

        Self {
            queue,
            joins: Mutex::new(joins),
        }
    }
}

impl Dispatcher for FixedWorkers {
    fn strategy(&self) -> PoolStrategy {
        PoolStrategy::Fixed
    }

    fn dispatch(&self, job: Job) {
        if let Err(job) = self.queue.push(job) {
            job.cancel(CancelReason::PoolClosed);
        }
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn shutdown(&self) {
        for job in self.queue.close() {
            job.cancel(CancelReason::PoolClosed);
        }
        // busy な worker は blocking 仕事が終わるまで戻らないので abort だけしておく
        for join in lock(&self.joins).drain(..) {
            join.abort();
        }
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<JobQueue>) {
    while let Some(job) = queue.lease().await {
        let job_id = job.id();
        // blocking な仕事は spawn_blocking へ。async worker スレッドは塞がない
        if let Err(err) = tokio::task::spawn_blocking(move || job.run()).await {
            tracing::warn!(worker_id, %job_id, error = %err, "worker lost a job");
        }
    }
    tracing::debug!(worker_id, "worker loop exited");
}
