//! Change notification.
//!
//! Every collection owns a [`ChangeNotifier`]; the registry owns one more that sees the
//! events of all collections. Subscribers are kept in a copy-on-write list: publishing
//! snapshots the list and delivers without holding any lock, so subscribing or
//! unsubscribing from inside a handler is fine.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use futures::channel::mpsc::UnboundedSender;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    document::{DocumentExt, Model, RawDocument},
    error::DocumentStoreResult,
};

/// Kind of mutation reported by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutation of one collection.
///
/// A single collection call produces at most one event, carrying every affected document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub documents: Vec<RawDocument>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(collection: impl Into<String>, kind: ChangeKind, documents: Vec<RawDocument>) -> Self {
        Self {
            collection: collection.into(),
            kind,
            documents,
            occurred_at: Utc::now(),
        }
    }

    /// Maps the affected documents back onto a model type.
    pub fn decode<D: Model>(&self) -> DocumentStoreResult<Vec<D>> {
        self.documents
            .iter()
            .cloned()
            .map(D::from_document)
            .collect()
    }
}

/// Receiver of change events.
///
/// `deliver` must not block: channel-backed subscribers push into an unbounded queue.
pub trait Subscriber: Send + Sync {
    /// Returns `false` once the subscriber can no longer receive events.
    fn is_open(&self) -> bool {
        true
    }

    fn deliver(&self, event: &ChangeEvent);
}

impl<F> Subscriber for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn deliver(&self, event: &ChangeEvent) {
        self(event)
    }
}

impl Subscriber for UnboundedSender<ChangeEvent> {
    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn deliver(&self, event: &ChangeEvent) {
        // A closed receiver is pruned on the next publish.
        let _ = self.unbounded_send(event.clone());
    }
}

/// Handle returned by `watch`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    id: SubscriptionId,
    kind: Option<ChangeKind>,
    subscriber: Arc<dyn Subscriber>,
}

impl Entry {
    fn wants(&self, kind: ChangeKind) -> bool {
        self.kind.is_none_or(|wanted| wanted == kind)
    }
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Arc<Entry>>>>,
}

/// Fan-out of change events to subscribers.
///
/// Cloning yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    inner: Arc<Inner>,
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for every kind of change.
    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        self.add(None, Arc::new(subscriber))
    }

    /// Registers a subscriber for one kind of change.
    pub fn subscribe_kind(
        &self,
        kind: ChangeKind,
        subscriber: impl Subscriber + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), Arc::new(subscriber))
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        let kept: Vec<_> = entries.iter().filter(|e| e.id != id).cloned().collect();
        let removed = kept.len() != before;

        if removed {
            *entries = Arc::new(kept);
            tracing::debug!(subscription = %id, "Subscriber removed");
        }

        removed
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every open subscriber interested in its kind.
    ///
    /// Returns the number of deliveries. Subscribers found closed are dropped afterwards.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let snapshot = self.inner.entries.read().clone();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in snapshot.iter() {
            if !entry.subscriber.is_open() {
                closed.push(entry.id);
                continue;
            }

            if entry.wants(event.kind) {
                entry.subscriber.deliver(event);
                delivered += 1;
            }
        }

        if !closed.is_empty() {
            self.prune(&closed);
        }

        delivered
    }

    fn add(&self, kind: Option<ChangeKind>, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry { id, kind, subscriber });

        let mut entries = self.inner.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(entry);
        *entries = Arc::new(next);

        tracing::debug!(subscription = %id, "Subscriber added");

        id
    }

    fn prune(&self, closed: &[SubscriptionId]) {
        let mut entries = self.inner.entries.write();
        let kept: Vec<_> = entries
            .iter()
            .filter(|e| !closed.contains(&e.id))
            .cloned()
            .collect();
        *entries = Arc::new(kept);

        tracing::debug!(pruned = closed.len(), "Closed subscribers pruned");
    }
}
