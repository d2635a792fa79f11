//! The [`EntityStore`] trait and the atomic [`WriteBatch`].
//!
//! Every write is a compare-and-set on the record's `version`: a writer
//! reads a record, mutates its copy, and submits it. The store accepts
//! the write only if the stored version still equals the version the
//! writer read, then stamps `version + 1`. A [`WriteBatch`] applies
//! several such writes all-or-nothing, which is how the assignment
//! engine updates an ambulance and an emergency together.

use std::future::Future;

use dispatch_types::{
    Ambulance, AmbulanceId, Emergency, EmergencyId, Entity, EntityKey, EntityKind, Hazard,
    HazardId, Hospital, HospitalId,
};

use crate::error::StoreError;
use crate::feed::FeedSubscription;
use crate::filter::EntityFilter;

/// An ordered set of compare-and-set writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Entity>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Add an update. The record's current `version` field is the version
    /// the writer read and is used as the expected version.
    #[must_use]
    pub fn update(mut self, entity: impl Into<Entity>) -> Self {
        self.writes.push(entity.into());
        self
    }

    /// Add an update in place.
    pub fn push(&mut self, entity: impl Into<Entity>) {
        self.writes.push(entity.into());
    }

    /// Number of writes in the batch.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the batch has no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consume the batch into its writes.
    pub fn into_writes(self) -> Vec<Entity> {
        self.writes
    }

    /// Reject batches that name the same record twice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidBatch`] on an empty batch or a
    /// duplicate key.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Err(StoreError::InvalidBatch(String::from("empty batch")));
        }
        let mut keys: Vec<EntityKey> = self.writes.iter().map(Entity::key).collect();
        keys.sort_unstable();
        if let Some(pair) = keys.windows(2).find(|w| w.first() == w.last()) {
            let key = pair.first().map_or_else(String::new, ToString::to_string);
            return Err(StoreError::InvalidBatch(format!("duplicate key {key}")));
        }
        Ok(())
    }
}

/// Durable record storage with change notification.
///
/// Implementations must guarantee:
/// - [`apply`](Self::apply) is atomic: either every write commits or none
///   does, and no reader observes a partial batch.
/// - Committed changes are published on the change feed in commit order.
/// - [`subscribe`](Self::subscribe) returns a snapshot and a receiver such
///   that no change committed after the snapshot is missed.
pub trait EntityStore: Send + Sync + 'static {
    /// Fetch one record.
    fn get(&self, key: EntityKey)
    -> impl Future<Output = Result<Option<Entity>, StoreError>> + Send;

    /// Every record of a collection, ordered by id.
    fn list(&self, kind: EntityKind)
    -> impl Future<Output = Result<Vec<Entity>, StoreError>> + Send;

    /// Records matching a filter, ordered by id.
    fn query(
        &self,
        filter: &EntityFilter,
    ) -> impl Future<Output = Result<Vec<Entity>, StoreError>> + Send;

    /// Insert a new record. Returns it stamped with version 1.
    fn insert(&self, entity: Entity) -> impl Future<Output = Result<Entity, StoreError>> + Send;

    /// Commit a batch of compare-and-set writes atomically.
    ///
    /// Returns the records as committed (new versions), in batch order.
    fn apply(
        &self,
        batch: WriteBatch,
    ) -> impl Future<Output = Result<Vec<Entity>, StoreError>> + Send;

    /// Delete a record if its version still matches.
    fn delete(
        &self,
        key: EntityKey,
        expected_version: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Snapshot a collection and open a change receiver.
    fn subscribe(
        &self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<FeedSubscription, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Typed helpers
    // -----------------------------------------------------------------------

    /// Commit a single compare-and-set write.
    fn update(&self, entity: Entity) -> impl Future<Output = Result<Entity, StoreError>> + Send {
        async move {
            let key = entity.key();
            self.apply(WriteBatch::new().update(entity))
                .await?
                .into_iter()
                .next()
                .ok_or(StoreError::NotFound(key))
        }
    }

    /// Fetch an emergency, failing with [`StoreError::NotFound`].
    fn emergency(
        &self,
        id: EmergencyId,
    ) -> impl Future<Output = Result<Emergency, StoreError>> + Send {
        async move {
            let key = EntityKey::new(EntityKind::Emergency, id);
            self.get(key)
                .await?
                .and_then(Entity::into_emergency)
                .ok_or(StoreError::NotFound(key))
        }
    }

    /// Fetch an ambulance, failing with [`StoreError::NotFound`].
    fn ambulance(
        &self,
        id: AmbulanceId,
    ) -> impl Future<Output = Result<Ambulance, StoreError>> + Send {
        async move {
            let key = EntityKey::new(EntityKind::Ambulance, id);
            self.get(key)
                .await?
                .and_then(Entity::into_ambulance)
                .ok_or(StoreError::NotFound(key))
        }
    }

    /// Fetch a hospital, failing with [`StoreError::NotFound`].
    fn hospital(
        &self,
        id: HospitalId,
    ) -> impl Future<Output = Result<Hospital, StoreError>> + Send {
        async move {
            let key = EntityKey::new(EntityKind::Hospital, id);
            self.get(key)
                .await?
                .and_then(Entity::into_hospital)
                .ok_or(StoreError::NotFound(key))
        }
    }

    /// Fetch a hazard, failing with [`StoreError::NotFound`].
    fn hazard(&self, id: HazardId) -> impl Future<Output = Result<Hazard, StoreError>> + Send {
        async move {
            let key = EntityKey::new(EntityKind::Hazard, id);
            self.get(key)
                .await?
                .and_then(Entity::into_hazard)
                .ok_or(StoreError::NotFound(key))
        }
    }
}
