//! Change notifier: per-observer subscription fanout.
//!
//! Each [`Subscription`] runs one task that turns the store's commit-ordered
//! change feed into [`ObserverMessage`]s for a single filter:
//!
//! ```text
//! Subscribing --snapshot sent--> Active --unsubscribe / observer gone--> Closed
//!                                  |  ^
//!                                  +--+ feed gap or lag: resync snapshot
//! ```
//!
//! Delivery is at-least-once and ordered per record: the task remembers
//! the last version it saw for every id and drops anything not newer.
//! Records the observer has not been shown arrive as `insert`; records
//! that stop matching the filter (or are deleted) arrive as `removed`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_store::{EntityFilter, EntityStore, FeedItem};
use dispatch_types::{ChangeEvent, ChangeOp, Entity, ObserverId, ObserverMessage};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, bounded};

/// Lifecycle of one observer subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for the initial snapshot to be delivered.
    Subscribing,
    /// Snapshot delivered; streaming changes.
    Active,
    /// Released; no further messages.
    Closed,
}

/// Opens observer subscriptions against a store.
pub struct ChangeNotifier<S> {
    store: Arc<S>,
    queue_capacity: usize,
    store_timeout: Duration,
}

impl<S> Clone for ChangeNotifier<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue_capacity: self.queue_capacity,
            store_timeout: self.store_timeout,
        }
    }
}

impl<S> core::fmt::Debug for ChangeNotifier<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl<S: EntityStore> ChangeNotifier<S> {
    /// Create a notifier over a store.
    pub fn new(store: Arc<S>, config: &DispatchConfig) -> Self {
        Self {
            store,
            queue_capacity: config.notifier.queue_capacity.max(1),
            store_timeout: config.timeouts.store(),
        }
    }

    /// Subscribe to the records matching `filter`.
    ///
    /// The first message on the returned subscription is always a
    /// snapshot; a reconnecting observer simply subscribes again.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::StoreUnavailable`] if the initial snapshot
    /// cannot be read.
    pub async fn subscribe(&self, filter: EntityFilter) -> Result<Subscription, DispatchError> {
        let feed = bounded(self.store_timeout, self.store.subscribe(filter.kind())).await?;
        let id = ObserverId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let state = Arc::new(watch::Sender::new(SubscriptionState::Subscribing));

        let fanout = Fanout {
            id,
            store: Arc::clone(&self.store),
            filter,
            store_timeout: self.store_timeout,
            tx,
            state: Arc::clone(&state),
            versions: BTreeMap::new(),
            visible: BTreeSet::new(),
        };
        let task = tokio::spawn(fanout.run(feed.snapshot, feed.changes));
        tracing::debug!(observer_id = %id, "Observer subscribed");

        Ok(Subscription {
            id,
            rx,
            state,
            task,
        })
    }
}

/// A live observer subscription.
///
/// Dropping it is equivalent to [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<ObserverMessage>,
    state: Arc<watch::Sender<SubscriptionState>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Observer handle.
    pub const fn id(&self) -> ObserverId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Next message, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ObserverMessage> {
        self.rx.recv().await
    }

    /// Close the subscription and drop undelivered messages.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        self.rx.close();
        self.state.send_replace(SubscriptionState::Closed);
        tracing::debug!(observer_id = %self.id, "Observer unsubscribed");
    }
}

/// The observer's queue is gone.
struct Disconnected;

struct Fanout<S> {
    id: ObserverId,
    store: Arc<S>,
    filter: EntityFilter,
    store_timeout: Duration,
    tx: mpsc::Sender<ObserverMessage>,
    state: Arc<watch::Sender<SubscriptionState>>,
    /// Newest version seen per id, whether or not it matched.
    versions: BTreeMap<Uuid, u64>,
    /// Ids the observer currently holds.
    visible: BTreeSet<Uuid>,
}

impl<S: EntityStore> Fanout<S> {
    async fn run(mut self, snapshot: Vec<Entity>, mut changes: broadcast::Receiver<FeedItem>) {
        if self.send_snapshot(snapshot, false).await.is_ok() {
            self.state.send_replace(SubscriptionState::Active);
            self.stream(&mut changes).await;
        }
        self.state.send_replace(SubscriptionState::Closed);
        tracing::debug!(observer_id = %self.id, "Fanout stopped");
    }

    async fn stream(&mut self, changes: &mut broadcast::Receiver<FeedItem>) {
        loop {
            let outcome = match changes.recv().await {
                Ok(FeedItem::Change(event)) if event.key.kind == self.filter.kind() => {
                    self.deliver(event).await
                }
                Ok(FeedItem::Change(_)) => Ok(()),
                Ok(FeedItem::Gap) => self.resync("feed gap").await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(observer_id = %self.id, skipped, "Observer lagged");
                    self.resync("lagged").await
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if outcome.is_err() {
                return;
            }
        }
    }

    async fn send(&self, msg: ObserverMessage) -> Result<(), Disconnected> {
        self.tx.send(msg).await.map_err(|_| Disconnected)
    }

    async fn send_snapshot(&mut self, all: Vec<Entity>, resync: bool) -> Result<(), Disconnected> {
        let now = Utc::now();
        self.versions = all.iter().map(|e| (e.id(), e.version())).collect();
        let entities: Vec<Entity> = all
            .into_iter()
            .filter(|e| self.filter.matches(e, now))
            .collect();
        self.visible = entities.iter().map(Entity::id).collect();
        self.send(ObserverMessage::Snapshot { entities, resync }).await
    }

    async fn resync(&mut self, reason: &'static str) -> Result<(), Disconnected> {
        match bounded(self.store_timeout, self.store.list(self.filter.kind())).await {
            Ok(all) => {
                tracing::info!(observer_id = %self.id, reason, "Resynchronising observer");
                self.send_snapshot(all, true).await
            }
            Err(e) => {
                // Without a fresh view the stream cannot be trusted; close
                // so the observer reconnects with a new snapshot.
                tracing::warn!(observer_id = %self.id, error = %e, "Resync failed, closing");
                Err(Disconnected)
            }
        }
    }

    async fn deliver(&mut self, event: ChangeEvent) -> Result<(), Disconnected> {
        let id = event.key.id;
        let Some(entity) = event.entity else {
            // Tombstone: a delete carries the last live version, and any
            // replay of an earlier write must not resurrect the record.
            self.versions.insert(id, u64::MAX);
            if self.visible.remove(&id) {
                return self
                    .send(ObserverMessage::Removed {
                        kind: event.key.kind,
                        id,
                    })
                    .await;
            }
            return Ok(());
        };

        if self.versions.get(&id).is_some_and(|&seen| seen >= event.version) {
            return Ok(());
        }
        self.versions.insert(id, event.version);
        if self.filter.matches(&entity, Utc::now()) {
            let op = if self.visible.insert(id) {
                ChangeOp::Insert
            } else {
                ChangeOp::Update
            };
            self.send(ObserverMessage::Upsert { op, entity }).await
        } else if self.visible.remove(&id) {
            self.send(ObserverMessage::Removed {
                kind: event.key.kind,
                id,
            })
            .await
        } else {
            Ok(())
        }
    }
}
