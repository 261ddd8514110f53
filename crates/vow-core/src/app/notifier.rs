//! CompletionNotifier - 完了イベントの配送
//!
//! Subscribers are keyed by the identity of their `Arc` (pointer address), so
//! the same subscriber cannot be registered twice and can be removed with any
//! clone of its `Arc`.
//!
//! # 配送
//! 1. `publish` snapshots the subscribers interested in the event's kind
//! 2. one delivery task per subscriber is spawned on the pool runtime
//! 3. a delivery that returns `Err` or panics removes that subscription (toxic)

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use crate::domain::{CompletionEvent, EventKind, SubscriptionId, VowError};
use crate::pool::{WeakPool, WorkerPool};
use crate::pool::settlement::lock;
use crate::ports::Subscriber;

type SubscriberKey = usize;

fn key_of<S: ?Sized>(subscriber: &Arc<S>) -> SubscriberKey {
    Arc::as_ptr(subscriber).cast::<()>() as usize
}

struct Subscription {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
    kinds: HashSet<EventKind>,
}

struct NotifierInner {
    pool: WeakPool,
    subscriptions: Mutex<HashMap<SubscriberKey, Subscription>>,
}

impl NotifierInner {
    /// Remove a subscription only if it is still the one that failed.
    fn remove_toxic(&self, key: SubscriberKey, id: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        match subscriptions.get(&key) {
            Some(current) if current.id == id => {
                subscriptions.remove(&key);
                true
            }
            _ => false,
        }
    }
}

/// Fan-out of completion events to subscribers. Cheap to clone.
#[derive(Clone)]
pub struct CompletionNotifier {
    inner: Arc<NotifierInner>,
}

impl CompletionNotifier {
    /// Deliveries run on `pool`'s runtime as background work. The notifier
    /// does not keep the pool alive; once it is gone nothing is delivered.
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                pool: pool.downgrade(),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe<I>(
        &self,
        subscriber: Arc<dyn Subscriber>,
        kinds: I,
    ) -> Result<SubscriptionId, VowError>
    where
        I: IntoIterator<Item = EventKind>,
    {
        let kinds: HashSet<EventKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            return Err(VowError::InvalidArgument(
                "a subscription needs at least one event kind".to_string(),
            ));
        }

        let key = key_of(&subscriber);
        let mut subscriptions = lock(&self.inner.subscriptions);
        if let Some(existing) = subscriptions.get(&key) {
            return Err(VowError::DuplicateSubscription(existing.id));
        }
        let id = SubscriptionId::generate();
        subscriptions.insert(
            key,
            Subscription {
                id,
                subscriber,
                kinds,
            },
        );
        tracing::debug!(subscription = %id, "subscriber registered");
        Ok(id)
    }

    /// Returns `false` if the subscriber was not registered.
    pub fn unsubscribe<S: ?Sized>(&self, subscriber: &Arc<S>) -> bool {
        lock(&self.inner.subscriptions)
            .remove(&key_of(subscriber))
            .is_some()
    }

    pub fn is_subscribed<S: ?Sized>(&self, subscriber: &Arc<S>) -> bool {
        lock(&self.inner.subscriptions).contains_key(&key_of(subscriber))
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    /// Schedule delivery of `event` to every subscriber currently interested
    /// in its kind. Never blocks; returns the number of deliveries scheduled.
    pub fn publish(&self, event: CompletionEvent) -> usize {
        let Some(pool) = self.inner.pool.upgrade() else {
            return 0;
        };
        let targets: Vec<_> = lock(&self.inner.subscriptions)
            .iter()
            .filter(|(_, s)| s.kinds.contains(&event.kind))
            .map(|(key, s)| (*key, s.id, Arc::clone(&s.subscriber)))
            .collect();

        let mut scheduled = 0;
        for (key, id, subscriber) in targets {
            let event = event.clone();
            let notifier = Arc::downgrade(&self.inner);
            let accepted = pool.spawn_background(deliver(notifier, key, id, subscriber, event));
            if accepted {
                scheduled += 1;
            }
        }
        scheduled
    }
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

async fn deliver(
    notifier: Weak<NotifierInner>,
    key: SubscriberKey,
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
    event: CompletionEvent,
) {
    let kind = event.kind;
    // 内側の task に包んで panic を JoinError として受け取る
    let delivery = tokio::spawn(async move { subscriber.notify(&event).await });

    let reason = match delivery.await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(join) if join.is_panic() => "subscriber panicked".to_string(),
        Err(_) => return,
    };

    let Some(notifier) = notifier.upgrade() else {
        return;
    };
    if notifier.remove_toxic(key, id) {
        tracing::warn!(subscription = %id, ?kind, %reason, "toxic subscriber removed");
    }
}
