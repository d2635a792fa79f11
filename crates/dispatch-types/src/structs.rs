//! Entity records held by the entity store.
//!
//! Field names mirror the dashboard tables (`location_address`,
//! `assigned_ambulance_id`, `available_beds`, ...). Every record carries
//! a `version` used for optimistic compare-and-set: the store assigns 1 on
//! insert and increments it on every committed write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{AmbulanceStatus, EmergencyStatus, Severity};
use crate::ids::{AmbulanceId, EmergencyId, HazardId, HospitalId, UserId};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A point on the earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Latitude, -90 to 90.
    pub latitude: f64,
    /// Longitude, -180 to 180.
    pub longitude: f64,
}

impl Position {
    /// Create a position from latitude and longitude.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Emergency
// ---------------------------------------------------------------------------

/// A reported incident requiring an ambulance response.
///
/// Invariants maintained by the engine:
/// - `assigned_ambulance_id` is `Some` iff the status is `assigned`,
///   `en_route` or `on_scene`.
/// - `assigned_hospital_id` is only ever `Some` in those same statuses.
/// - `eta_minutes` is only ever `Some` while `assigned` or `en_route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Emergency {
    /// Unique identifier.
    pub id: EmergencyId,
    /// The citizen who reported it, if known.
    pub reporter_id: Option<UserId>,
    /// Free-text address of the incident.
    pub location_address: String,
    /// Coordinates of the incident.
    #[serde(flatten)]
    pub position: Position,
    /// How severe the incident is.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: EmergencyStatus,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Ambulance bound to this emergency.
    pub assigned_ambulance_id: Option<AmbulanceId>,
    /// Destination hospital for the patient.
    pub assigned_hospital_id: Option<HospitalId>,
    /// Estimated minutes until the ambulance arrives.
    pub eta_minutes: Option<u32>,
    /// The ETA came from a fallback path (no live routing estimate).
    pub eta_degraded: bool,
    /// When the emergency was reported.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    pub version: u64,
}

impl Emergency {
    /// Whether the reference/ETA invariants hold for the current status.
    pub const fn invariants_hold(&self) -> bool {
        let assigned = self.status.has_assignment();
        let ambulance_ok = self.assigned_ambulance_id.is_some() == assigned;
        let hospital_ok = assigned || self.assigned_hospital_id.is_none();
        let eta_ok = self.status.tracks_eta() || self.eta_minutes.is_none();
        ambulance_ok && hospital_ok && eta_ok
    }

    /// Drop the ambulance/hospital references and ETA.
    ///
    /// Used when the emergency leaves the assigned set of statuses.
    pub fn clear_assignment(&mut self) {
        self.assigned_ambulance_id = None;
        self.assigned_hospital_id = None;
        self.eta_minutes = None;
        self.eta_degraded = false;
    }
}

/// Intake payload for a new emergency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EmergencyReport {
    /// The citizen reporting it, if authenticated.
    #[serde(default)]
    pub reporter_id: Option<UserId>,
    /// Free-text address of the incident.
    pub location_address: String,
    /// Incident latitude.
    pub latitude: f64,
    /// Incident longitude.
    pub longitude: f64,
    /// Severity; required at intake.
    pub severity: Severity,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

impl EmergencyReport {
    /// Build a pending [`Emergency`] from this report.
    ///
    /// The returned record has version 0; the store assigns the first
    /// committed version.
    pub fn into_emergency(self, now: DateTime<Utc>) -> Emergency {
        Emergency {
            id: EmergencyId::new(),
            reporter_id: self.reporter_id,
            location_address: self.location_address,
            position: Position::new(self.latitude, self.longitude),
            severity: self.severity,
            status: EmergencyStatus::Pending,
            description: self.description,
            assigned_ambulance_id: None,
            assigned_hospital_id: None,
            eta_minutes: None,
            eta_degraded: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Ambulance
// ---------------------------------------------------------------------------

/// A registered vehicle.
///
/// Invariant: status `idle` implies no active emergency references this
/// ambulance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Ambulance {
    /// Unique identifier.
    pub id: AmbulanceId,
    /// Human-facing vehicle identifier (e.g. `AMB-001`).
    pub vehicle_id: String,
    /// Assigned driver. `None` means the vehicle is unstaffed.
    pub driver_id: Option<UserId>,
    /// Operational status.
    pub status: AmbulanceStatus,
    /// Last reported position; unknown until the first telemetry report.
    pub current_position: Option<Position>,
    /// Home hospital.
    pub hospital_id: Option<HospitalId>,
    /// When the vehicle was registered.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    pub version: u64,
}

impl Ambulance {
    /// Whether a driver is on board.
    pub const fn is_staffed(&self) -> bool {
        self.driver_id.is_some()
    }
}

/// Registration payload for a new ambulance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AmbulanceRegistration {
    /// Human-facing vehicle identifier.
    pub vehicle_id: String,
    /// Driver on shift, if any.
    #[serde(default)]
    pub driver_id: Option<UserId>,
    /// Home hospital, if any.
    #[serde(default)]
    pub hospital_id: Option<HospitalId>,
}

impl AmbulanceRegistration {
    /// Build an idle [`Ambulance`] with unknown position.
    pub fn into_ambulance(self, now: DateTime<Utc>) -> Ambulance {
        Ambulance {
            id: AmbulanceId::new(),
            vehicle_id: self.vehicle_id,
            driver_id: self.driver_id,
            status: AmbulanceStatus::Idle,
            current_position: None,
            hospital_id: self.hospital_id,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Hospital
// ---------------------------------------------------------------------------

/// A receiving hospital.
///
/// Bed counts are maintained by admission/discharge events outside the
/// engine; the engine only reads them when choosing a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Hospital {
    /// Unique identifier.
    pub id: HospitalId,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Coordinates.
    #[serde(flatten)]
    pub position: Position,
    /// Total bed capacity.
    pub capacity: u32,
    /// Currently free beds, never above `capacity`.
    pub available_beds: u32,
    /// Contact phone number.
    pub contact_phone: Option<String>,
    /// When the hospital was registered.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    pub version: u64,
}

/// Registration payload for a hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HospitalRegistration {
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Total bed capacity.
    pub capacity: u32,
    /// Currently free beds.
    pub available_beds: u32,
    /// Contact phone number.
    #[serde(default)]
    pub contact_phone: Option<String>,
}

impl HospitalRegistration {
    /// Build a [`Hospital`] record.
    pub fn into_hospital(self, now: DateTime<Utc>) -> Hospital {
        Hospital {
            id: HospitalId::new(),
            name: self.name,
            address: self.address,
            position: Position::new(self.latitude, self.longitude),
            capacity: self.capacity,
            available_beds: self.available_beds,
            contact_phone: self.contact_phone,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Hazard
// ---------------------------------------------------------------------------

/// A geographically scoped condition that slows travel.
///
/// A hazard whose `expires_at` lies in the past is inactive regardless of
/// `is_active`; readers apply that check at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Hazard {
    /// Unique identifier.
    pub id: HazardId,
    /// Free-form type (`heavy_rain`, `traffic_jam`, `fog`, ...).
    pub hazard_type: String,
    /// Severity; drives the ETA penalty weight.
    pub severity: Severity,
    /// Centre of the affected area.
    #[serde(flatten)]
    pub position: Position,
    /// Effect radius in kilometres.
    pub radius_km: f64,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Persisted active flag. Cleared manually or by the expiry sweep.
    pub is_active: bool,
    /// When the hazard was reported.
    pub created_at: DateTime<Utc>,
    /// When the hazard stops applying, if ever.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    pub version: u64,
}

impl Hazard {
    /// Whether the hazard applies at `now`.
    ///
    /// Expiry is evaluated here, at read time: a hazard past its
    /// `expires_at` is inactive even if `is_active` is still set.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Intake payload for a hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HazardReport {
    /// Free-form type.
    pub hazard_type: String,
    /// Severity.
    pub severity: Severity,
    /// Latitude of the centre.
    pub latitude: f64,
    /// Longitude of the centre.
    pub longitude: f64,
    /// Effect radius in kilometres.
    pub radius_km: f64,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl HazardReport {
    /// Build an active [`Hazard`] record.
    pub fn into_hazard(self, now: DateTime<Utc>) -> Hazard {
        Hazard {
            id: HazardId::new(),
            hazard_type: self.hazard_type,
            severity: self.severity,
            position: Position::new(self.latitude, self.longitude),
            radius_km: self.radius_km,
            description: self.description,
            is_active: true,
            created_at: now,
            expires_at: self.expires_at,
            updated_at: now,
            version: 0,
        }
    }
}
