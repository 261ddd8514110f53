//! Action - 非同期に実行する 1 単位の仕事の記述
//!
//! Three variants, all immutable and cheap to clone:
//! - [`Primary`]: produces the first value of a chain from nothing.
//! - [`Task`]: consumes the previous value; the *same* value flows on unchanged.
//! - [`Transmute`]: turns the previous value into a new value (possibly a new type).
//!
//! Each action may carry an `on_complete` callback. It runs exactly once on the
//! worker, after the work function and before the result becomes visible to
//! anyone waiting on the promise.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::{BoxError, Outcome, TaskFailure};

type OnComplete<T> = Arc<dyn Fn(&Outcome<T>) + Send + Sync>;

/// Which variant produced a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Primary,
    Task,
    Transmute,
    /// Waits on a batch of other promises (`PromiseFactory::create_all`).
    Combinator,
}

/// A chainable step: anything that can follow a `Promise<In>`.
///
/// Implemented by [`Task`] and [`Transmute`]. `execute` receives the parent's
/// settled outcome; a failed parent short-circuits the step without running its
/// work function.
pub trait Step<In>: Send + Sync + 'static {
    type Out: Clone + Send + Sync + 'static;

    fn kind(&self) -> ActionKind;

    fn execute(&self, input: Outcome<In>) -> Outcome<Self::Out>;
}

// ========================================
// Primary
// ========================================

/// Produces a value from nothing.
pub struct Primary<T> {
    produce: Arc<dyn Fn() -> Result<T, BoxError> + Send + Sync>,
    on_complete: Option<OnComplete<T>>,
}

impl<T: Send + 'static> Primary<T> {
    /// Infallible producer.
    pub fn of<F>(produce: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::try_of(move || Ok::<T, BoxError>(produce()))
    }

    /// Fallible producer. An `Err` rejects the promise.
    pub fn try_of<F, E>(produce: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            produce: Arc::new(move || produce().map_err(Into::into)),
            on_complete: None,
        }
    }

    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&Outcome<T>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub(crate) fn execute(&self) -> Outcome<T> {
        let outcome = guarded(|| (self.produce)());
        complete(outcome, self.on_complete.as_ref())
    }
}

impl<T> Clone for Primary<T> {
    fn clone(&self) -> Self {
        Self {
            produce: Arc::clone(&self.produce),
            on_complete: self.on_complete.clone(),
        }
    }
}

impl<T> fmt::Debug for Primary<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primary")
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

// ========================================
// Task
// ========================================

/// Consumes a value for its side effect. The input is threaded forward
/// unchanged, so `p.then(task)` is a `Promise<T>` holding `p`'s value.
pub struct Task<T> {
    consume: Arc<dyn Fn(&T) -> Result<(), BoxError> + Send + Sync>,
    on_complete: Option<OnComplete<T>>,
}

impl<T: Send + 'static> Task<T> {
    pub fn of<F>(consume: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::try_of(move |value: &T| {
            consume(value);
            Ok::<(), BoxError>(())
        })
    }

    pub fn try_of<F, E>(consume: F) -> Self
    where
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            consume: Arc::new(move |value: &T| consume(value).map_err(Into::into)),
            on_complete: None,
        }
    }

    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&Outcome<T>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }
}

impl<T> Step<T> for Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Out = T;

    fn kind(&self) -> ActionKind {
        ActionKind::Task
    }

    fn execute(&self, input: Outcome<T>) -> Outcome<T> {
        let outcome = input.and_then(|value| guarded(|| (self.consume)(&value)).map(|()| value));
        complete(outcome, self.on_complete.as_ref())
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            consume: Arc::clone(&self.consume),
            on_complete: self.on_complete.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

// ========================================
// Transmute
// ========================================

/// Maps a value of type `T` to a new value of type `R`.
pub struct Transmute<T, R> {
    transform: Arc<dyn Fn(T) -> Result<R, BoxError> + Send + Sync>,
    on_complete: Option<OnComplete<R>>,
}

impl<T: Send + 'static, R: Send + 'static> Transmute<T, R> {
    pub fn of<F>(transform: F) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Self::try_of(move |value: T| Ok::<R, BoxError>(transform(value)))
    }

    pub fn try_of<F, E>(transform: F) -> Self
    where
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            transform: Arc::new(move |value: T| transform(value).map_err(Into::into)),
            on_complete: None,
        }
    }

    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&Outcome<R>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }
}

impl<T, R> Step<T> for Transmute<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    type Out = R;

    fn kind(&self) -> ActionKind {
        ActionKind::Transmute
    }

    fn execute(&self, input: Outcome<T>) -> Outcome<R> {
        let outcome = input.and_then(|value| guarded(|| (self.transform)(value)));
        complete(outcome, self.on_complete.as_ref())
    }
}

impl<T, R> Clone for Transmute<T, R> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            on_complete: self.on_complete.clone(),
        }
    }
}

impl<T, R> fmt::Debug for Transmute<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmute")
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

// ========================================
// 実行ヘルパー
// ========================================

/// Run a work function, converting both `Err` and panics into `TaskFailure`.
fn guarded<T>(work: impl FnOnce() -> Result<T, BoxError>) -> Outcome<T> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::raised(err)),
        Err(payload) => Err(TaskFailure::from_panic(payload)),
    }
}

/// Hand the outcome to the callback (if any) and pass it through.
///
/// A panicking callback is logged and otherwise ignored; it must not change
/// the outcome the chain observes.
fn complete<T>(outcome: Outcome<T>, on_complete: Option<&OnComplete<T>>) -> Outcome<T> {
    if let Some(callback) = on_complete
        && let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&outcome)))
    {
        let failure = TaskFailure::from_panic(payload);
        tracing::warn!(error = %failure, "on_complete callback panicked");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn primary_produces_value() {
        let action = Primary::of(|| 42);
        assert_eq!(action.execute().unwrap(), 42);
    }

    #[test]
    fn primary_error_is_captured() {
        let action = Primary::<i32>::try_of(|| Err("no value"));
        let failure = action.execute().unwrap_err();
        assert!(matches!(failure, TaskFailure::Raised(_)));
    }

    #[test]
    fn primary_panic_is_captured() {
        let action = Primary::<i32>::of(|| panic!("exploded"));
        let failure = action.execute().unwrap_err();
        assert!(matches!(failure, TaskFailure::Panicked(ref m) if m == "exploded"));
    }

    #[test]
    fn on_complete_runs_exactly_once_with_outcome() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let action = Primary::of(|| 7).on_complete(move |outcome| {
            sink.lock().unwrap().push(outcome.as_ref().ok().copied());
        });

        action.execute().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(7)]);
    }

    #[test]
    fn on_complete_receives_failure() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let action = Primary::<i32>::try_of(|| Err("bad")).on_complete(move |outcome| {
            if outcome.is_err() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(action.execute().is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_on_complete_does_not_change_outcome() {
        let action = Primary::of(|| 1).on_complete(|_| panic!("callback bug"));
        assert_eq!(action.execute().unwrap(), 1);
    }

    #[test]
    fn task_threads_input_forward() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let task = Task::of(move |v: &usize| {
            sink.store(*v, Ordering::SeqCst);
        });

        assert_eq!(task.execute(Ok(5)).unwrap(), 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(task.kind(), ActionKind::Task);
    }

    #[test]
    fn task_error_rejects() {
        let task = Task::<i32>::try_of(|_| Err("refused"));
        assert!(task.execute(Ok(1)).is_err());
    }

    #[test]
    fn transmute_changes_type() {
        let step = Transmute::of(|v: i32| format!("#{v}"));
        assert_eq!(step.execute(Ok(3)).unwrap(), "#3");
        assert_eq!(step.kind(), ActionKind::Transmute);
    }

    #[test]
    fn failed_input_short_circuits_work_but_not_callback() {
        let ran = Arc::new(AtomicUsize::new(0));
        let callbacks = Arc::new(AtomicUsize::new(0));
        let ran_in_work = Arc::clone(&ran);
        let callbacks_in_cb = Arc::clone(&callbacks);

        let step = Transmute::of(move |v: i32| {
            ran_in_work.fetch_add(1, Ordering::SeqCst);
            v * 2
        })
        .on_complete(move |outcome| {
            assert!(outcome.is_err());
            callbacks_in_cb.fetch_add(1, Ordering::SeqCst);
        });

        let upstream = TaskFailure::raised("upstream");
        let failure = step.execute(Err(upstream)).unwrap_err();

        assert!(failure.to_string().contains("upstream"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn actions_are_cloneable_and_shareable() {
        let action = Primary::of(|| "shared");
        let copy = action.clone();
        let handle = std::thread::spawn(move || copy.execute().unwrap());
        assert_eq!(handle.join().unwrap(), action.execute().unwrap());
    }
}
