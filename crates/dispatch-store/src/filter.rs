//! Record filters shared by store queries and observer subscriptions.
//!
//! A filter is evaluated against a record's current state, so a record can
//! enter or leave a filter's scope as it is updated. Hazard filters apply
//! lazy expiry using the evaluation time passed to [`EntityFilter::matches`].

use chrono::{DateTime, Utc};
use dispatch_types::{
    AmbulanceId, AmbulanceStatus, EmergencyStatus, Entity, EntityKind, HospitalId, Severity,
};

/// Filter over emergency records. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmergencyFilter {
    /// Accept only these statuses.
    pub statuses: Vec<EmergencyStatus>,
    /// Accept only emergencies bound to this ambulance.
    pub ambulance_id: Option<AmbulanceId>,
    /// Accept only emergencies inbound to this hospital.
    pub hospital_id: Option<HospitalId>,
    /// Accept only emergencies at least this severe.
    pub min_severity: Option<Severity>,
}

/// Filter over ambulance records. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbulanceFilter {
    /// Accept only these statuses.
    pub statuses: Vec<AmbulanceStatus>,
    /// Accept only ambulances with a driver.
    pub staffed_only: bool,
}

/// Filter over hazard records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HazardFilter {
    /// Accept only hazards active at evaluation time.
    pub active_only: bool,
}

/// A filter scoped to one record collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    /// Every record of the kind.
    All(EntityKind),
    /// Emergencies matching the inner filter.
    Emergencies(EmergencyFilter),
    /// Ambulances matching the inner filter.
    Ambulances(AmbulanceFilter),
    /// Hazards matching the inner filter.
    Hazards(HazardFilter),
}

impl EntityFilter {
    /// Idle ambulances with a driver: the assignment candidate set.
    pub fn assignable_ambulances() -> Self {
        Self::Ambulances(AmbulanceFilter {
            statuses: vec![AmbulanceStatus::Idle],
            staffed_only: true,
        })
    }

    /// Hazards active at evaluation time.
    pub const fn active_hazards() -> Self {
        Self::Hazards(HazardFilter { active_only: true })
    }

    /// The record collection this filter is scoped to.
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::All(kind) => *kind,
            Self::Emergencies(_) => EntityKind::Emergency,
            Self::Ambulances(_) => EntityKind::Ambulance,
            Self::Hazards(_) => EntityKind::Hazard,
        }
    }

    /// Whether `entity` is in scope at time `now`.
    pub fn matches(&self, entity: &Entity, now: DateTime<Utc>) -> bool {
        match (self, entity) {
            (Self::All(kind), e) => e.kind() == *kind,
            (Self::Emergencies(f), Entity::Emergency(e)) => {
                (f.statuses.is_empty() || f.statuses.contains(&e.status))
                    && f.ambulance_id.is_none_or(|id| e.assigned_ambulance_id == Some(id))
                    && f.hospital_id.is_none_or(|id| e.assigned_hospital_id == Some(id))
                    && f.min_severity.is_none_or(|min| e.severity >= min)
            }
            (Self::Ambulances(f), Entity::Ambulance(a)) => {
                (f.statuses.is_empty() || f.statuses.contains(&a.status))
                    && (!f.staffed_only || a.is_staffed())
            }
            (Self::Hazards(f), Entity::Hazard(h)) => !f.active_only || h.is_active_at(now),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use dispatch_types::{
        AmbulanceRegistration, EmergencyReport, HazardReport, UserId,
    };

    use super::*;

    fn emergency(severity: Severity) -> Entity {
        EmergencyReport {
            reporter_id: None,
            location_address: String::from("1 Main Street"),
            latitude: 0.0,
            longitude: 0.0,
            severity,
            description: None,
        }
        .into_emergency(Utc::now())
        .into()
    }

    #[test]
    fn kind_mismatch_never_matches() {
        let filter = EntityFilter::All(EntityKind::Ambulance);
        assert!(!filter.matches(&emergency(Severity::Low), Utc::now()));
    }

    #[test]
    fn emergency_filter_by_status_and_severity() {
        let filter = EntityFilter::Emergencies(EmergencyFilter {
            statuses: vec![EmergencyStatus::Pending],
            min_severity: Some(Severity::High),
            ..EmergencyFilter::default()
        });
        assert!(filter.matches(&emergency(Severity::Critical), Utc::now()));
        assert!(!filter.matches(&emergency(Severity::Medium), Utc::now()));
    }

    #[test]
    fn assignable_requires_driver() {
        let now = Utc::now();
        let unstaffed = AmbulanceRegistration {
            vehicle_id: String::from("AMB-001"),
            driver_id: None,
            hospital_id: None,
        }
        .into_ambulance(now);
        let mut staffed = unstaffed.clone();
        staffed.driver_id = Some(UserId::new());

        let filter = EntityFilter::assignable_ambulances();
        assert!(!filter.matches(&unstaffed.into(), now));
        assert!(filter.matches(&staffed.into(), now));
    }

    #[test]
    fn active_hazard_filter_applies_expiry() {
        let now = Utc::now();
        let hazard: Entity = HazardReport {
            hazard_type: String::from("fog"),
            severity: Severity::Low,
            latitude: 0.0,
            longitude: 0.0,
            radius_km: 1.0,
            description: None,
            expires_at: Some(now + Duration::minutes(1)),
        }
        .into_hazard(now)
        .into();

        let filter = EntityFilter::active_hazards();
        assert!(filter.matches(&hazard, now));
        assert!(!filter.matches(&hazard, now + Duration::minutes(2)));
    }
}
