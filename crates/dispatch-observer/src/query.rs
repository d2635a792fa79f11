//! Query-string filters shared by list endpoints and `WebSocket`
//! subscriptions.
//!
//! ```text
//! ?kind=emergency&status=pending,assigned&min_severity=high
//! ?kind=ambulance&status=idle&staffed_only=true
//! ?kind=hazard&active_only=true
//! ```

use dispatch_store::{AmbulanceFilter, EmergencyFilter, EntityFilter, HazardFilter};
use dispatch_types::{AmbulanceId, EntityKind, HospitalId, Severity};

use crate::error::ObserverError;

/// Raw filter parameters.
#[derive(Debug, Default, serde::Deserialize)]
pub struct FilterQuery {
    /// Record collection; defaults to the route's own collection.
    pub kind: Option<EntityKind>,
    /// Comma-separated statuses (emergencies or ambulances).
    pub status: Option<String>,
    /// Emergencies bound to this ambulance.
    pub ambulance_id: Option<AmbulanceId>,
    /// Emergencies inbound to this hospital.
    pub hospital_id: Option<HospitalId>,
    /// Emergencies at least this severe.
    pub min_severity: Option<Severity>,
    /// Ambulances with a driver only.
    #[serde(default)]
    pub staffed_only: bool,
    /// Hazards active now only.
    #[serde(default)]
    pub active_only: bool,
}

impl FilterQuery {
    /// Build an [`EntityFilter`], using `default_kind` when `kind` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::InvalidQuery`] for unknown statuses or
    /// parameters that do not apply to the chosen kind.
    pub fn into_filter(self, default_kind: EntityKind) -> Result<EntityFilter, ObserverError> {
        let kind = self.kind.unwrap_or(default_kind);
        let emergency_only = self.ambulance_id.is_some()
            || self.hospital_id.is_some()
            || self.min_severity.is_some();

        match kind {
            EntityKind::Emergency => Ok(EntityFilter::Emergencies(EmergencyFilter {
                statuses: parse_list(self.status.as_deref())?,
                ambulance_id: self.ambulance_id,
                hospital_id: self.hospital_id,
                min_severity: self.min_severity,
            })),
            _ if emergency_only => Err(ObserverError::InvalidQuery(format!(
                "ambulance_id, hospital_id and min_severity only apply to emergencies, not {kind}"
            ))),
            EntityKind::Ambulance => Ok(EntityFilter::Ambulances(AmbulanceFilter {
                statuses: parse_list(self.status.as_deref())?,
                staffed_only: self.staffed_only,
            })),
            EntityKind::Hazard => Ok(EntityFilter::Hazards(HazardFilter {
                active_only: self.active_only,
            })),
            EntityKind::Hospital => Ok(EntityFilter::All(EntityKind::Hospital)),
        }
    }
}

fn parse_list<T: core::str::FromStr>(raw: Option<&str>) -> Result<Vec<T>, ObserverError>
where
    T::Err: core::fmt::Display,
{
    raw.map_or_else(
        || Ok(Vec::new()),
        |list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .map_err(|e: T::Err| ObserverError::InvalidQuery(e.to_string()))
                })
                .collect()
        },
    )
}
