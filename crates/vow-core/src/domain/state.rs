//! State - promise と worker pool の状態

use serde::{Deserialize, Serialize};

/// Observable state of one promise.
///
/// Derived from the settlement cell, never stored:
/// - Pending -> Fulfilled
/// - Pending -> Rejected
///
/// Terminal states do not transition further; `then` creates a new promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn is_settled(self) -> bool {
        !matches!(self, PromiseState::Pending)
    }
}

/// Lifecycle of a `WorkerPool`.
///
/// Transitions are one-directional: Active -> Closing -> Inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum LifecycleState {
    /// Accepting submissions.
    Active = 0,

    /// No new submissions; outstanding work is draining.
    Closing = 1,

    /// Drained (or force-cancelled). Terminal.
    Inactive = 2,
}

impl LifecycleState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Active,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Inactive,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Active)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Closing => "CLOSING",
            LifecycleState::Inactive => "INACTIVE",
        };
        f.write_str(s)
    }
}
