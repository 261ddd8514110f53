//! Subscriber port - 完了通知の受け手

use async_trait::async_trait;

use crate::domain::{BoxError, CompletionEvent};

/// Receives completion events from a `CompletionNotifier`.
///
/// Called on a pool worker, never on the thread that settled or read the
/// promise. Returning `Err` (or panicking) marks the subscriber as toxic: it
/// is unsubscribed and never notified again.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn notify(&self, event: &CompletionEvent) -> Result<(), BoxError>;
}
