//! In-process [`EntityStore`] backed by ordered maps.
//!
//! One [`tokio::sync::RwLock`] guards every collection. Writes validate
//! the whole batch, stage stamped copies, then install them and publish
//! change events while still holding the write lock, so feed order equals
//! commit order and readers never see half a batch.

use std::collections::BTreeMap;
#[cfg(any(test, feature = "fault-injection"))]
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dispatch_types::{ChangeEvent, ChangeOp, Entity, EntityKey, EntityKind};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::feed::{ChangeFeed, FeedSubscription};
use crate::filter::EntityFilter;
use crate::store::{EntityStore, WriteBatch};

type Collection = BTreeMap<Uuid, Entity>;

/// Memory-resident entity store.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<EntityKind, Collection>>,
    feed: ChangeFeed,
    #[cfg(any(test, feature = "fault-injection"))]
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store with the default feed capacity.
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::default())
    }

    /// Create an empty store publishing on `feed`.
    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            feed,
            #[cfg(any(test, feature = "fault-injection"))]
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// The store's change feed.
    pub const fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Make the next [`EntityStore::apply`] fail after validation, as if
    /// the backing medium went away mid-commit. Nothing is installed.
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn take_injected_fault(&self) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable(String::from(
                "injected commit failure",
            )));
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "fault-injection")))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    const fn take_injected_fault(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(collection: Option<&Collection>) -> Vec<Entity> {
    collection
        .map(|c| c.values().cloned().collect())
        .unwrap_or_default()
}

impl EntityStore for MemoryStore {
    async fn get(&self, key: EntityKey) -> Result<Option<Entity>, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard.get(&key.kind).and_then(|c| c.get(&key.id)).cloned())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        let guard = self.collections.read().await;
        Ok(sorted(guard.get(&kind)))
    }

    async fn query(&self, filter: &EntityFilter) -> Result<Vec<Entity>, StoreError> {
        let now = Utc::now();
        let guard = self.collections.read().await;
        Ok(guard
            .get(&filter.kind())
            .map(|c| {
                c.values()
                    .filter(|e| filter.matches(e, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, mut entity: Entity) -> Result<Entity, StoreError> {
        let key = entity.key();
        let now = Utc::now();
        let mut guard = self.collections.write().await;
        let collection = guard.entry(key.kind).or_default();
        if collection.contains_key(&key.id) {
            return Err(StoreError::AlreadyExists(key));
        }
        entity.stamp(1, now);
        collection.insert(key.id, entity.clone());
        self.feed.publish(ChangeEvent {
            key,
            version: 1,
            op: ChangeOp::Insert,
            entity: Some(entity.clone()),
            committed_at: now,
        });
        drop(guard);
        Ok(entity)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Entity>, StoreError> {
        batch.validate()?;
        let now = Utc::now();
        let mut guard = self.collections.write().await;

        let mut staged = Vec::with_capacity(batch.len());
        for mut entity in batch.into_writes() {
            let key = entity.key();
            let stored = guard
                .get(&key.kind)
                .and_then(|c| c.get(&key.id))
                .ok_or(StoreError::NotFound(key))?;
            if stored.version() != entity.version() {
                return Err(StoreError::Conflict {
                    key,
                    expected: entity.version(),
                    actual: stored.version(),
                });
            }
            let next = stored.version().saturating_add(1);
            entity.stamp(next, now);
            staged.push(entity);
        }

        self.take_injected_fault()?;

        for entity in &staged {
            let key = entity.key();
            guard
                .entry(key.kind)
                .or_default()
                .insert(key.id, entity.clone());
            self.feed.publish(ChangeEvent {
                key,
                version: entity.version(),
                op: ChangeOp::Update,
                entity: Some(entity.clone()),
                committed_at: now,
            });
        }
        drop(guard);
        Ok(staged)
    }

    async fn delete(&self, key: EntityKey, expected_version: u64) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        let collection = guard
            .get_mut(&key.kind)
            .ok_or(StoreError::NotFound(key))?;
        let actual = collection
            .get(&key.id)
            .map(Entity::version)
            .ok_or(StoreError::NotFound(key))?;
        if actual != expected_version {
            return Err(StoreError::Conflict {
                key,
                expected: expected_version,
                actual,
            });
        }
        collection.remove(&key.id);
        self.feed.publish(ChangeEvent {
            key,
            version: actual,
            op: ChangeOp::Delete,
            entity: None,
            committed_at: Utc::now(),
        });
        drop(guard);
        Ok(())
    }

    async fn subscribe(&self, kind: EntityKind) -> Result<FeedSubscription, StoreError> {
        // Holding the read lock blocks writers, so nothing commits between
        // the snapshot and the receiver's starting point.
        let guard = self.collections.read().await;
        let changes = self.feed.subscribe();
        let snapshot = sorted(guard.get(&kind));
        drop(guard);
        Ok(FeedSubscription { snapshot, changes })
    }
}
