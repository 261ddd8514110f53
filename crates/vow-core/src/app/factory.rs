//! PromiseFactory - chain の起点を作る

use crate::app::notifier::CompletionNotifier;
use crate::app::promise::{Promise, announce};
use crate::domain::{ActionKind, Primary, PromiseId, VowError};
use crate::pool::WorkerPool;

/// Starts chains on an injected `WorkerPool`.
#[derive(Debug, Clone)]
pub struct PromiseFactory {
    pool: WorkerPool,
    notifier: Option<CompletionNotifier>,
}

impl PromiseFactory {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            notifier: None,
        }
    }

    /// Every promise created from here on, and every link chained to one,
    /// announces its fulfillment through `notifier`.
    pub fn with_notifier(mut self, notifier: CompletionNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn notifier(&self) -> Option<&CompletionNotifier> {
        self.notifier.as_ref()
    }

    /// Submit `primary` and return its promise. Never blocks.
    pub fn create<T>(&self, primary: Primary<T>) -> Result<Promise<T>, VowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = PromiseId::generate();
        let notifier = self.notifier.clone();
        let handle = self.pool.submit_outcome(move || {
            let outcome = primary.execute();
            announce(notifier.as_ref(), ActionKind::Primary, id, &outcome);
            outcome
        })?;

        tracing::debug!(promise = %id, "primary submitted");
        Ok(Promise::new(
            id,
            ActionKind::Primary,
            handle,
            self.pool.clone(),
            self.notifier.clone(),
        ))
    }

    /// Submit every action independently; the returned promise settles once
    /// all of them have, holding their promises in submission order.
    ///
    /// The combinator fulfills even when some constituents reject; inspect
    /// each sub-promise for its own outcome.
    ///
    /// A closed pool is reported before anything is submitted. If the pool
    /// closes while the batch is being submitted, the call fails and the
    /// primaries already accepted still run (or are cancelled by `stop`)
    /// without a handle.
    pub fn create_all<T>(
        &self,
        primaries: Vec<Primary<T>>,
    ) -> Result<Promise<Vec<Promise<T>>>, VowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.pool.ensure_active()?;
        let promises = primaries
            .into_iter()
            .map(|primary| self.create(primary))
            .collect::<Result<Vec<_>, _>>()?;

        let id = PromiseId::generate();
        let handle = self.pool.resolve_when(async move {
            for promise in &promises {
                let _ = promise.settled().await;
            }
            Ok(promises)
        })?;

        Ok(Promise::new(
            id,
            ActionKind::Combinator,
            handle,
            self.pool.clone(),
            self.notifier.clone(),
        ))
    }
}
