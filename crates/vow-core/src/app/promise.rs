//! Promise - action の非同期結果と連鎖
//!
//! A promise is a read-only view of one settlement plus what is needed to
//! extend the chain: the pool (to accept the next link) and, optionally, the
//! notifier that hears about fulfilled links.

use std::fmt;
use std::time::Duration;

use crate::app::notifier::CompletionNotifier;
use crate::domain::{
    ActionKind, CompletionEvent, EventKind, Outcome, PromiseId, PromiseState, Step, TaskFailure,
    VowError,
};
use crate::pool::{WorkHandle, WorkerPool};

/// The eventual result of an action.
pub struct Promise<T> {
    id: PromiseId,
    kind: ActionKind,
    handle: WorkHandle<T>,
    pool: WorkerPool,
    notifier: Option<CompletionNotifier>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: PromiseId,
        kind: ActionKind,
        handle: WorkHandle<T>,
        pool: WorkerPool,
        notifier: Option<CompletionNotifier>,
    ) -> Self {
        Self {
            id,
            kind,
            handle,
            pool,
            notifier,
        }
    }

    pub fn identity(&self) -> PromiseId {
        self.id
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Non-blocking.
    pub fn state(&self) -> PromiseState {
        self.handle.state()
    }

    /// Chain `step` after this promise. Never blocks.
    ///
    /// The new link is accepted by the pool right away and runs once this
    /// promise settles. If this promise rejects, `step`'s work is skipped and
    /// the failure is carried forward.
    pub fn then<S>(&self, step: S) -> Result<Promise<S::Out>, VowError>
    where
        S: Step<T>,
    {
        let id = PromiseId::generate();
        let kind = step.kind();
        let parent = self.handle.clone();
        let notifier = self.notifier.clone();

        let handle = self.pool.submit_when(
            async move { parent.settled().await },
            move |input| {
                let outcome = step.execute(input);
                announce(notifier.as_ref(), kind, id, &outcome);
                outcome
            },
        )?;

        tracing::debug!(parent = %self.id, promise = %id, ?kind, "link chained");
        Ok(Promise::new(
            id,
            kind,
            handle,
            self.pool.clone(),
            self.notifier.clone(),
        ))
    }

    /// Block until settled. `None` if the promise rejected.
    pub fn get_result(&self) -> Option<T> {
        self.handle.wait().ok()
    }

    /// Like [`Promise::get_result`], giving up after `timeout`.
    pub fn get_result_timeout(&self, timeout: Duration) -> Option<T> {
        self.handle.wait_timeout(timeout).and_then(Result::ok)
    }

    /// Block until settled. The failure, if the promise rejected.
    pub fn failure(&self) -> Option<TaskFailure> {
        self.handle.wait().err()
    }

    /// Block until settled; on failure run `handler` on the calling thread.
    pub fn handle<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&TaskFailure),
    {
        if let Err(failure) = self.handle.wait() {
            handler(&failure);
        }
        self
    }

    /// Wait for the outcome from async code.
    pub async fn settled(&self) -> Outcome<T> {
        self.handle.settled().await
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            handle: self.handle.clone(),
            pool: self.pool.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Publish the completion event of a fulfilled link.
pub(crate) fn announce<T>(
    notifier: Option<&CompletionNotifier>,
    kind: ActionKind,
    promise: PromiseId,
    outcome: &Outcome<T>,
) where
    T: Clone + Send + Sync + 'static,
{
    let (Some(notifier), Ok(value), Some(event_kind)) =
        (notifier, outcome, EventKind::for_action(kind))
    else {
        return;
    };
    notifier.publish(CompletionEvent::new(event_kind, promise, value.clone()));
}
