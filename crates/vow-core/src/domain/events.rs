//! Events - promise の完了イベント
//!
//! `CompletionNotifier` が subscriber に配送するイベントの形です。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::ActionKind;
use super::ids::PromiseId;

/// The semantic kind of a settled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PrimaryCompleted,
    TaskCompleted,
    Transmuted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::PrimaryCompleted,
        EventKind::TaskCompleted,
        EventKind::Transmuted,
    ];

    /// Event published when a link of this kind fulfills. Combinators publish nothing.
    pub fn for_action(kind: ActionKind) -> Option<Self> {
        match kind {
            ActionKind::Primary => Some(EventKind::PrimaryCompleted),
            ActionKind::Task => Some(EventKind::TaskCompleted),
            ActionKind::Transmute => Some(EventKind::Transmuted),
            ActionKind::Combinator => None,
        }
    }
}

/// One completion notification.
///
/// The value is type-erased because a single notifier serves chains of any
/// value type; subscribers recover it with [`CompletionEvent::value`].
#[derive(Clone)]
pub struct CompletionEvent {
    pub kind: EventKind,
    pub promise: PromiseId,
    pub occurred_at: DateTime<Utc>,
    value: Arc<dyn Any + Send + Sync>,
}

impl CompletionEvent {
    pub fn new<T: Any + Send + Sync>(kind: EventKind, promise: PromiseId, value: T) -> Self {
        Self {
            kind,
            promise,
            occurred_at: Utc::now(),
            value: Arc::new(value),
        }
    }

    /// The settled value, if it is a `T`.
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionEvent")
            .field("kind", &self.kind)
            .field("promise", &self.promise)
            .field("occurred_at", &self.occurred_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_downcasts_to_original_type() {
        let event = CompletionEvent::new(EventKind::Transmuted, PromiseId::generate(), 12_u64);
        assert_eq!(event.value::<u64>(), Some(&12));
        assert_eq!(event.value::<String>(), None);
    }

    #[test]
    fn combinators_have_no_event_kind() {
        assert_eq!(EventKind::for_action(ActionKind::Combinator), None);
        assert_eq!(
            EventKind::for_action(ActionKind::Task),
            Some(EventKind::TaskCompleted)
        );
    }
}
