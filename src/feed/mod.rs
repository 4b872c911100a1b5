//! Change feed delivering store mutation events to local subscribers.
//!
//! Events for the same record arrive in write order at every subscriber;
//! events across different records carry no ordering guarantee. Delivery is
//! at-least-once, so consumers apply events idempotently (by identity and
//! revision, not by arrival).

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dao::storage::{KeyPredicate, Record, RecordKind};

/// Mutation kinds surfaced by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A record was created.
    Insert,
    /// An existing record was rewritten.
    Update,
}

/// One mutation event carrying the full resulting record, not a diff.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Whether the record was inserted or updated.
    pub kind: EventKind,
    /// The record as it existed after the mutation.
    pub record: Record,
}

/// Broadcast hub fanning out store mutations to all subscribers.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Construct a hub backed by a Tokio broadcast channel with the given
    /// capacity. A subscriber that falls further behind than `capacity`
    /// events loses the overwritten ones and must reconcile.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers, ignoring delivery errors
    /// (a feed with no subscribers is not an error).
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to mutations of `kind` matching `predicate`. The handler is
    /// invoked on a dedicated forwarding task, one event at a time, in
    /// arrival order. Dropping the returned handle (or calling
    /// [`SubscriptionHandle::unsubscribe`]) stops delivery.
    pub fn subscribe<H>(
        &self,
        kind: RecordKind,
        predicate: KeyPredicate,
        mut handler: H,
    ) -> SubscriptionHandle
    where
        H: FnMut(ChangeEvent) + Send + 'static,
    {
        // The receiver is taken before spawning so no event published after
        // this call returns can be missed by the subscription.
        let mut receiver = self.sender.subscribe();
        let active = Arc::new(Mutex::new(true));
        let gate = active.clone();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.record.kind() == kind && predicate.matches(&event.record) {
                            // The handler runs under the gate lock so that
                            // unsubscribe can wait out an in-flight delivery
                            // and fence off everything after it.
                            let guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
                            if !*guard {
                                break;
                            }
                            handler(event);
                            drop(guard);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, ?kind, "change feed subscriber lagged; events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle { task, active }
    }
}

/// Handle owning one active subscription.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
    active: Arc<Mutex<bool>>,
}

impl SubscriptionHandle {
    /// Stop delivery. An event mid-handler finishes first; once this
    /// returns, no further events reach the handler.
    pub fn unsubscribe(self) {
        // Consuming self; Drop does the actual teardown.
    }

    fn shutdown(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = false;
        drop(active);
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::*;
    use crate::dao::models::{GameRecord, StoredPhase};

    fn game_record(id: Uuid) -> Record {
        Record::Game(GameRecord {
            id,
            rev: 0,
            created_seq: 1,
            created_at: SystemTime::now(),
            title: "feed test".into(),
            description: String::new(),
            category: "other".into(),
            phase: StoredPhase::Lobby,
        })
    }

    #[tokio::test]
    async fn predicate_filters_by_identity() {
        let feed = ChangeFeed::new(8);
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let _sub = feed.subscribe(RecordKind::Game, KeyPredicate::ById(wanted), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed.publish(ChangeEvent {
            kind: EventKind::Insert,
            record: game_record(other),
        });
        feed.publish(ChangeEvent {
            kind: EventKind::Insert,
            record: game_record(wanted),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let feed = ChangeFeed::new(8);
        let id = Uuid::new_v4();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let sub = feed.subscribe(RecordKind::Game, KeyPredicate::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed.publish(ChangeEvent {
            kind: EventKind::Insert,
            record: game_record(id),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        sub.unsubscribe();

        feed.publish(ChangeEvent {
            kind: EventKind::Update,
            record: game_record(id),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_delivery_after_unsubscribe_returns() {
        let feed = ChangeFeed::new(64);
        let id = Uuid::new_v4();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let sub = feed.subscribe(RecordKind::Game, KeyPredicate::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Burst of events still in flight when the unsubscribe lands.
        for _ in 0..32 {
            feed.publish(ChangeEvent {
                kind: EventKind::Update,
                record: game_record(id),
            });
        }
        sub.unsubscribe();
        let at_unsubscribe = seen.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), at_unsubscribe);
    }
}
