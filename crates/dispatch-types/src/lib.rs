//! Shared type definitions for the dispatch coordination engine.
//!
//! This crate is the single source of truth for the records exchanged
//! between the engine, the entity store and the dashboards. Types flow
//! downstream to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all record identifiers
//! - [`enums`] -- Severity, status and collection enums
//! - [`structs`] -- Emergency, ambulance, hospital and hazard records
//! - [`events`] -- Type-erased [`Entity`], commit-ordered [`ChangeEvent`] and
//!   the [`ObserverMessage`] subscription protocol

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{AmbulanceStatus, ChangeOp, EmergencyStatus, EntityKind, ParseEnumError, Severity};
pub use events::{ChangeEvent, Entity, EntityKey, ObserverMessage};
pub use ids::{AmbulanceId, EmergencyId, HazardId, HospitalId, ObserverId, UserId};
pub use structs::{
    Ambulance, AmbulanceRegistration, Emergency, EmergencyReport, Hazard, HazardReport, Hospital,
    HospitalRegistration, Position,
};
