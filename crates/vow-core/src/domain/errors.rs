//! Errors - エラー型と分類
//!
//! 二種類に分かれます:
//! - `VowError`: 同期 API の呼び出し側に即座に返るエラー（引数、pool 閉鎖など）
//! - `TaskFailure`: worker 上で捕捉された失敗。スレッドを越えて throw されず、
//!   settlement（REJECTED）と `on_complete` にだけ現れる

use std::sync::Arc;

use thiserror::Error;

use super::ids::SubscriptionId;
use super::state::LifecycleState;

/// Error type user work functions return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Synchronous errors, returned straight to the caller.
#[derive(Debug, Error)]
pub enum VowError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("subscriber is already registered as {0}")]
    DuplicateSubscription(SubscriptionId),

    #[error("worker pool is not accepting work (state={state})")]
    PoolClosed { state: LifecycleState },

    #[error("shutdown was interrupted; outstanding work was force-cancelled")]
    ShutdownInterrupted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to start pool runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Why a job was cancelled instead of running to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `stop` timed out without retry and cancelled outstanding work.
    ForcedShutdown,

    /// The stopping thread could not keep waiting.
    ShutdownInterrupted,

    /// The pool went inactive before the job could be dispatched.
    PoolClosed,

    /// The job was dropped without ever running.
    Dropped,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelReason::ForcedShutdown => "forced shutdown",
            CancelReason::ShutdownInterrupted => "shutdown interrupted",
            CancelReason::PoolClosed => "pool closed",
            CancelReason::Dropped => "job dropped",
        };
        f.write_str(s)
    }
}

/// A failure captured while executing an action on a worker.
///
/// Cheap to clone: every downstream link of a failed chain carries the same
/// failure.
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    #[error("work function failed: {0}")]
    Raised(Arc<BoxError>),

    #[error("work function panicked: {0}")]
    Panicked(String),

    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
}

impl TaskFailure {
    pub fn raised(err: impl Into<BoxError>) -> Self {
        TaskFailure::Raised(Arc::new(err.into()))
    }

    /// Convert a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskFailure::Panicked(message)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskFailure::Cancelled(_))
    }
}

/// Settled value of one unit of work.
pub type Outcome<T> = Result<T, TaskFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let failure = TaskFailure::from_panic(Box::new("boom"));
        assert!(matches!(failure, TaskFailure::Panicked(ref m) if m == "boom"));

        let failure = TaskFailure::from_panic(Box::new(String::from("owned boom")));
        assert!(matches!(failure, TaskFailure::Panicked(ref m) if m == "owned boom"));

        let failure = TaskFailure::from_panic(Box::new(7_u32));
        assert!(matches!(failure, TaskFailure::Panicked(_)));
    }

    #[test]
    fn raised_failure_keeps_source_message() {
        let failure = TaskFailure::raised("disk full");
        assert_eq!(failure.to_string(), "work function failed: disk full");
        assert!(!failure.is_cancelled());
    }

    #[test]
    fn pool_closed_mentions_state() {
        let err = VowError::PoolClosed {
            state: LifecycleState::Closing,
        };
        assert!(err.to_string().contains("CLOSING"));
    }
}
