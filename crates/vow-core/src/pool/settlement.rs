//! Settlement - 1 回だけ書き込まれる結果セル
//!
//! A settlement is the "async handle" behind every promise. It is written at
//! most once (first writer wins) and can be awaited both ways:
//! - blocking: `Mutex` + `Condvar` (for `get_result`, `handle`)
//! - async: `tokio::sync::Notify` (for chain gates and combinators)

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::domain::{CancelReason, JobId, Outcome, PromiseState, TaskFailure};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased view used by the job tracker to cancel outstanding work.
pub(crate) trait Cancellable: Send + Sync {
    /// Settle as cancelled. Returns `false` if it had already settled.
    fn cancel(&self, reason: CancelReason) -> bool;
}

pub(crate) struct Settlement<T> {
    slot: Mutex<Option<Outcome<T>>>,
    settled: Condvar,
    notify: Notify,
}

impl<T: Clone> Settlement<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            settled: Condvar::new(),
            notify: Notify::new(),
        })
    }

    /// Store the outcome if nothing has been stored yet.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        {
            let mut slot = lock(&self.slot);
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.settled.notify_all();
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn peek(&self) -> Option<Outcome<T>> {
        lock(&self.slot).clone()
    }

    pub(crate) fn state(&self) -> PromiseState {
        match &*lock(&self.slot) {
            None => PromiseState::Pending,
            Some(Ok(_)) => PromiseState::Fulfilled,
            Some(Err(_)) => PromiseState::Rejected,
        }
    }

    /// Block the calling thread until settled.
    pub(crate) fn wait(&self) -> Outcome<T> {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(outcome) = &*slot {
                return outcome.clone();
            }
            slot = self
                .settled
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.slot);
        loop {
            if let Some(outcome) = &*slot {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = self
                .settled
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait without blocking a runtime thread.
    pub(crate) async fn wait_async(&self) -> Outcome<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // check より先に登録しておく（settle との lost wakeup を防ぐ）
            notified.as_mut().enable();

            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T: Clone + Send> Cancellable for Settlement<T> {
    fn cancel(&self, reason: CancelReason) -> bool {
        self.settle(Err(TaskFailure::Cancelled(reason)))
    }
}

/// Handle to one unit of work submitted to a `WorkerPool`.
///
/// Owned exclusively by whoever submitted the work; clones observe the same
/// settlement and never write to it.
pub struct WorkHandle<T> {
    id: JobId,
    settlement: Arc<Settlement<T>>,
}

impl<T> Clone for WorkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            settlement: Arc::clone(&self.settlement),
        }
    }
}

impl<T: Clone> WorkHandle<T> {
    pub(crate) fn new(id: JobId, settlement: Arc<Settlement<T>>) -> Self {
        Self { id, settlement }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> PromiseState {
        self.settlement.state()
    }

    /// The outcome, if already settled. Never blocks.
    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        self.settlement.peek()
    }

    /// Block until the work settles.
    pub fn wait(&self) -> Outcome<T> {
        self.settlement.wait()
    }

    /// Block for at most `timeout`; `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        self.settlement.wait_timeout(timeout)
    }

    pub async fn settled(&self) -> Outcome<T> {
        self.settlement.wait_async().await
    }
}

impl<T> std::fmt::Debug for WorkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_settle_wins() {
        let cell = Settlement::<i32>::new();
        assert_eq!(cell.state(), PromiseState::Pending);

        assert!(cell.settle(Ok(1)));
        assert!(!cell.settle(Ok(2)));
        assert!(!cell.cancel(CancelReason::ForcedShutdown));

        assert_eq!(cell.wait().unwrap(), 1);
        assert_eq!(cell.state(), PromiseState::Fulfilled);
    }

    #[test]
    fn cancel_rejects_pending_cell() {
        let cell = Settlement::<i32>::new();
        assert!(cell.cancel(CancelReason::ForcedShutdown));
        assert_eq!(cell.state(), PromiseState::Rejected);
        assert!(matches!(
            cell.wait(),
            Err(TaskFailure::Cancelled(CancelReason::ForcedShutdown))
        ));
    }

    #[test]
    fn wait_blocks_until_another_thread_settles() {
        let cell = Settlement::<String>::new();
        let writer = Arc::clone(&cell);
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.settle(Ok("done".to_string()));
        });

        assert_eq!(cell.wait().unwrap(), "done");
        join.join().unwrap();
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let cell = Settlement::<()>::new();
        let start = Instant::now();
        assert!(cell.wait_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn async_waiters_are_woken() {
        let cell = Settlement::<u8>::new();
        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.wait_async().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cell.settle(Ok(9));

        assert_eq!(waiter.await.unwrap().unwrap(), 9);
    }
}
