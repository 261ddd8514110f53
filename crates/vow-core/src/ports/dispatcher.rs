//! Dispatcher port - worker 戦略の抽象化
//!
//! A `WorkerPool` owns exactly one dispatcher. The pool decides *whether* work
//! is accepted (lifecycle, tracking); the dispatcher decides *where and when*
//! an accepted job runs.
//!
//! # 実装
//! - `FixedWorkers`: fixed worker loops + FIFO queue
//! - `PerTaskUnits`: one blocking unit per job
//! - `PermitGated`: one blocking unit per job, bounded by a semaphore

use crate::config::PoolStrategy;
use crate::pool::Job;

pub trait Dispatcher: Send + Sync {
    fn strategy(&self) -> PoolStrategy;

    /// Hand an accepted job to a worker. Never blocks.
    ///
    /// A job the dispatcher cannot run must be dropped (or cancelled), never
    /// leaked: dropping settles it as cancelled.
    fn dispatch(&self, job: Job);

    /// Jobs accepted but still waiting for a free worker.
    fn queued(&self) -> usize;

    /// The pool went inactive: release workers and drop anything still waiting.
    fn shutdown(&self);
}
