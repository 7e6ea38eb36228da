//! Per-user fan-out of progress deltas.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use journey_core::{ProgressDelta, SubscriptionId, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Deltas buffered per subscription before it is considered stalled
    pub subscriber_buffer: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

type Registry = HashMap<UserId, HashMap<SubscriptionId, mpsc::Sender<ProgressDelta>>>;

struct Inner {
    config: NotifierConfig,
    registry: Mutex<Registry>,
    closed: AtomicBool,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, user_id: &UserId, id: &SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(subs) = registry.get_mut(user_id) else {
            return false;
        };
        let removed = subs.remove(id).is_some();
        if subs.is_empty() {
            registry.remove(user_id);
        }
        removed
    }
}

/// Process-wide realtime notifier.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Create a notifier with an empty registry.
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a listener for `user_id`.
    ///
    /// After [`shutdown`](Self::shutdown) the returned subscription is
    /// already closed and yields nothing.
    pub fn subscribe(&self, user_id: &UserId) -> Subscription {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_buffer.max(1));

        // `closed` is read and written under the registry lock so a
        // concurrent shutdown cannot miss this subscription.
        let mut registry = self.inner.registry();
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!(user_id = %user_id, "subscribe after shutdown");
            drop(tx);
        } else {
            registry.entry(user_id.clone()).or_default().insert(id, tx);
            debug!(user_id = %user_id, subscription_id = %id, "subscribed");
        }
        drop(registry);

        Subscription {
            id,
            user_id: user_id.clone(),
            receiver: rx,
            registry: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Deliver `delta` to every subscription of `user_id`.
    ///
    /// Subscriptions that are full or gone are dropped; the rest still
    /// receive the delta. Returns how many subscriptions it reached.
    pub fn publish(&self, user_id: &UserId, delta: ProgressDelta) -> usize {
        let mut registry = self.inner.registry();
        let Some(subs) = registry.get_mut(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|id, tx| match tx.try_send(delta.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(user_id = %user_id, subscription_id = %id, "subscriber stalled, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user_id = %user_id, subscription_id = %id, "subscriber gone, dropping");
                false
            }
        });
        if subs.is_empty() {
            registry.remove(user_id);
        }

        debug!(user_id = %user_id, kind = delta.kind(), delivered, "published delta");
        delivered
    }

    /// Live subscriptions of one user.
    pub fn subscriber_count(&self, user_id: &UserId) -> usize {
        self.inner.registry().get(user_id).map_or(0, HashMap::len)
    }

    /// Live subscriptions across all users.
    pub fn total_subscribers(&self) -> usize {
        self.inner.registry().values().map(HashMap::len).sum()
    }

    /// Close every subscription and refuse new ones.
    pub fn shutdown(&self) {
        let drained: Registry = {
            let mut registry = self.inner.registry();
            self.inner.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *registry)
        };
        let count: usize = drained.values().map(HashMap::len).sum();
        info!(subscriptions = count, "notifier shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(NotifierConfig::default())
    }
}

/// A live listener for one user's deltas.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    user_id: UserId,
    receiver: mpsc::Receiver<ProgressDelta>,
    registry: Weak<Inner>,
    active: bool,
}

impl Subscription {
    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// User this subscription listens to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Next delta, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ProgressDelta> {
        self.receiver.recv().await
    }

    /// Release the registry slot. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.receiver.close();
        if let Some(inner) = self.registry.upgrade() {
            if inner.remove(&self.user_id, &self.id) {
                debug!(user_id = %self.user_id, subscription_id = %self.id, "unsubscribed");
            }
        }
    }
}

impl Stream for Subscription {
    type Item = ProgressDelta;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
