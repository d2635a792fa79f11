//! Type-erased entity wrapper and change events.
//!
//! The entity store and the change notifier deal with all four record
//! collections uniformly through [`Entity`]. Every committed write
//! produces one [`ChangeEvent`], published in commit order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{ChangeOp, EntityKind};
use crate::structs::{Ambulance, Emergency, Hazard, Hospital};

/// Identifies one record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EntityKey {
    /// Collection the record belongs to.
    pub kind: EntityKind,
    /// Record identifier.
    pub id: Uuid,
}

impl EntityKey {
    /// Build a key from a kind and any typed ID.
    pub fn new(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Any record held by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
#[allow(clippy::large_enum_variant)]
pub enum Entity {
    /// An emergency record.
    Emergency(Emergency),
    /// An ambulance record.
    Ambulance(Ambulance),
    /// A hospital record.
    Hospital(Hospital),
    /// A hazard record.
    Hazard(Hazard),
}

impl Entity {
    /// The collection this record belongs to.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Emergency(_) => EntityKind::Emergency,
            Self::Ambulance(_) => EntityKind::Ambulance,
            Self::Hospital(_) => EntityKind::Hospital,
            Self::Hazard(_) => EntityKind::Hazard,
        }
    }

    /// The record's identifier as a bare UUID.
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Emergency(e) => e.id.into_inner(),
            Self::Ambulance(a) => a.id.into_inner(),
            Self::Hospital(h) => h.id.into_inner(),
            Self::Hazard(h) => h.id.into_inner(),
        }
    }

    /// The record's store key.
    pub const fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind(),
            id: self.id(),
        }
    }

    /// The record's optimistic concurrency token.
    pub const fn version(&self) -> u64 {
        match self {
            Self::Emergency(e) => e.version,
            Self::Ambulance(a) => a.version,
            Self::Hospital(h) => h.version,
            Self::Hazard(h) => h.version,
        }
    }

    /// Stamp a new version and write time onto the record.
    pub fn stamp(&mut self, version: u64, at: DateTime<Utc>) {
        match self {
            Self::Emergency(e) => {
                e.version = version;
                e.updated_at = at;
            }
            Self::Ambulance(a) => {
                a.version = version;
                a.updated_at = at;
            }
            Self::Hospital(h) => {
                h.version = version;
                h.updated_at = at;
            }
            Self::Hazard(h) => {
                h.version = version;
                h.updated_at = at;
            }
        }
    }

    /// Unwrap an emergency record.
    pub fn into_emergency(self) -> Option<Emergency> {
        match self {
            Self::Emergency(e) => Some(e),
            _ => None,
        }
    }

    /// Unwrap an ambulance record.
    pub fn into_ambulance(self) -> Option<Ambulance> {
        match self {
            Self::Ambulance(a) => Some(a),
            _ => None,
        }
    }

    /// Unwrap a hospital record.
    pub fn into_hospital(self) -> Option<Hospital> {
        match self {
            Self::Hospital(h) => Some(h),
            _ => None,
        }
    }

    /// Unwrap a hazard record.
    pub fn into_hazard(self) -> Option<Hazard> {
        match self {
            Self::Hazard(h) => Some(h),
            _ => None,
        }
    }
}

impl From<Emergency> for Entity {
    fn from(e: Emergency) -> Self {
        Self::Emergency(e)
    }
}

impl From<Ambulance> for Entity {
    fn from(a: Ambulance) -> Self {
        Self::Ambulance(a)
    }
}

impl From<Hospital> for Entity {
    fn from(h: Hospital) -> Self {
        Self::Hospital(h)
    }
}

impl From<Hazard> for Entity {
    fn from(h: Hazard) -> Self {
        Self::Hazard(h)
    }
}

/// One committed mutation, as published on the store's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeEvent {
    /// Key of the mutated record.
    pub key: EntityKey,
    /// Version after the mutation (the deleted version for deletes).
    pub version: u64,
    /// What happened.
    pub op: ChangeOp,
    /// New state of the record; `None` for deletes.
    pub entity: Option<Entity>,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
}

/// One message on an observer subscription.
///
/// A subscription always opens with an [`ObserverMessage::Snapshot`]; every
/// later message concerns a single record. `resync` snapshots replace the
/// observer's whole view after the subscription fell behind the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ObserverMessage {
    /// Full state of every record in scope.
    Snapshot {
        /// Records in scope, ordered by id.
        entities: Vec<Entity>,
        /// True when this replaces an earlier view.
        resync: bool,
    },
    /// A record entered scope (`insert`) or changed within it (`update`).
    Upsert {
        /// `insert` if the observer has not seen this id, else `update`.
        op: ChangeOp,
        /// New state of the record.
        entity: Entity,
    },
    /// A record left scope or was deleted.
    Removed {
        /// Collection of the record.
        kind: EntityKind,
        /// Record identifier.
        id: Uuid,
    },
}
