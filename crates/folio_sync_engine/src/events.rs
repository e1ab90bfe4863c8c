//! Local-write event bus.
//!
//! Decouples "an entity was mutated locally" notifications from what
//! triggers synchronization. Fan-out is in-process, synchronous, and
//! at most once per subscriber per call; there are no further delivery
//! guarantees.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Which domain a local write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// A chat session.
    Session,
    /// The literature membership blob.
    Membership,
    /// One paper's metadata.
    PaperMeta,
    /// A collection.
    Collection,
}

/// A local-write notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    /// Id of the mutated scope (session id, paper id, ...).
    pub scope: String,
    /// Which domain was touched.
    pub kind: WriteKind,
}

impl WriteEvent {
    /// Creates an event.
    pub fn new(scope: impl Into<String>, kind: WriteKind) -> Self {
        Self {
            scope: scope.into(),
            kind,
        }
    }
}

type Listener = Arc<dyn Fn(&WriteEvent) + Send + Sync>;

/// A minimal publish/subscribe bus for local-write notifications.
///
/// Subscriber callbacks run isolated: a panicking subscriber is logged
/// and never prevents the remaining subscribers from running.
pub struct LocalWriteBus {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl LocalWriteBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes a callback. The subscription detaches when the
    /// returned handle is dropped or explicitly unsubscribed.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&WriteEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Fans an event out to every current subscriber.
    pub fn notify(&self, event: &WriteEvent) {
        // Snapshot so callbacks run without holding the lock; a
        // subscriber may itself subscribe or unsubscribe.
        let listeners: Vec<(u64, Listener)> = self.listeners.read().clone();
        for (id, listener) in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| (*listener)(event))).is_err() {
                warn!(subscriber = id, scope = %event.scope, "write-bus subscriber panicked");
            }
        }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn detach(&self, id: u64) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}

impl Default for LocalWriteBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active bus subscription.
pub struct Subscription {
    bus: Weak<LocalWriteBus>,
    id: u64,
}

impl Subscription {
    /// Detaches the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.id);
        }
    }
}
