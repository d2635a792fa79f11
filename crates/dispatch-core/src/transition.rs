//! Legal status transitions for emergencies and ambulances.
//!
//! Pure functions only. Every component that changes a status asks
//! [`check_emergency`] or [`check_ambulance`] first and must not write the
//! mutation when they fail.
//!
//! Emergency lifecycle:
//!
//! ```text
//! pending -> assigned -> en_route -> on_scene -> completed
//!    \          \            \           \
//!     +----------+------------+-----------+--> cancelled
//! ```
//!
//! Ambulance lifecycle: `idle -> en_route -> on_scene -> returning -> idle`.

use dispatch_types::{AmbulanceStatus, EmergencyStatus, EntityKind};

/// A requested status change is not a legal edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The `(from, to)` pair is not in the transition table.
    #[error("invalid {kind} transition: {from} -> {to}")]
    InvalidTransition {
        /// Which record collection the status belongs to.
        kind: EntityKind,
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },
}

/// Whether an emergency may move from `from` to `to`.
pub const fn emergency_can_transition(from: EmergencyStatus, to: EmergencyStatus) -> bool {
    use EmergencyStatus::{Assigned, Cancelled, Completed, EnRoute, OnScene, Pending};
    match (from, to) {
        (Pending, Assigned)
        | (Assigned, EnRoute)
        | (EnRoute, OnScene)
        | (OnScene, Completed)
        | (Pending | Assigned | EnRoute | OnScene, Cancelled) => true,
        _ => false,
    }
}

/// Whether an ambulance may move from `from` to `to`.
pub const fn ambulance_can_transition(from: AmbulanceStatus, to: AmbulanceStatus) -> bool {
    use AmbulanceStatus::{EnRoute, Idle, OnScene, Returning};
    matches!(
        (from, to),
        (Idle, EnRoute) | (EnRoute, OnScene) | (OnScene, Returning) | (Returning, Idle)
    )
}

/// String-keyed form used by transports that carry raw status values.
///
/// Unknown status strings and kinds without a lifecycle (hospitals,
/// hazards) are never transitionable.
pub fn can_transition(kind: EntityKind, from: &str, to: &str) -> bool {
    match kind {
        EntityKind::Emergency => match (from.parse(), to.parse()) {
            (Ok(f), Ok(t)) => emergency_can_transition(f, t),
            _ => false,
        },
        EntityKind::Ambulance => match (from.parse(), to.parse()) {
            (Ok(f), Ok(t)) => ambulance_can_transition(f, t),
            _ => false,
        },
        EntityKind::Hospital | EntityKind::Hazard => false,
    }
}

/// Checked emergency transition.
///
/// # Errors
///
/// Returns [`TransitionError::InvalidTransition`] carrying the attempted
/// pair when the edge is not legal.
pub const fn check_emergency(
    from: EmergencyStatus,
    to: EmergencyStatus,
) -> Result<(), TransitionError> {
    if emergency_can_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition {
            kind: EntityKind::Emergency,
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Checked ambulance transition.
///
/// # Errors
///
/// Returns [`TransitionError::InvalidTransition`] carrying the attempted
/// pair when the edge is not legal.
pub const fn check_ambulance(
    from: AmbulanceStatus,
    to: AmbulanceStatus,
) -> Result<(), TransitionError> {
    if ambulance_can_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition {
            kind: EntityKind::Ambulance,
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMERGENCY_EDGES: &[(EmergencyStatus, EmergencyStatus)] = &[
        (EmergencyStatus::Pending, EmergencyStatus::Assigned),
        (EmergencyStatus::Assigned, EmergencyStatus::EnRoute),
        (EmergencyStatus::EnRoute, EmergencyStatus::OnScene),
        (EmergencyStatus::OnScene, EmergencyStatus::Completed),
        (EmergencyStatus::Pending, EmergencyStatus::Cancelled),
        (EmergencyStatus::Assigned, EmergencyStatus::Cancelled),
        (EmergencyStatus::EnRoute, EmergencyStatus::Cancelled),
        (EmergencyStatus::OnScene, EmergencyStatus::Cancelled),
    ];

    const AMBULANCE_EDGES: &[(AmbulanceStatus, AmbulanceStatus)] = &[
        (AmbulanceStatus::Idle, AmbulanceStatus::EnRoute),
        (AmbulanceStatus::EnRoute, AmbulanceStatus::OnScene),
        (AmbulanceStatus::OnScene, AmbulanceStatus::Returning),
        (AmbulanceStatus::Returning, AmbulanceStatus::Idle),
    ];

    #[test]
    fn emergency_table_is_exact() {
        for &from in EmergencyStatus::ALL {
            for &to in EmergencyStatus::ALL {
                let expected = EMERGENCY_EDGES.contains(&(from, to));
                assert_eq!(
                    emergency_can_transition(from, to),
                    expected,
                    "{from} -> {to}"
                );
                assert_eq!(
                    can_transition(EntityKind::Emergency, from.as_str(), to.as_str()),
                    expected
                );
            }
        }
    }

    #[test]
    fn ambulance_table_is_exact() {
        for &from in AmbulanceStatus::ALL {
            for &to in AmbulanceStatus::ALL {
                let expected = AMBULANCE_EDGES.contains(&(from, to));
                assert_eq!(
                    ambulance_can_transition(from, to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_are_closed() {
        for &to in EmergencyStatus::ALL {
            assert!(!emergency_can_transition(EmergencyStatus::Completed, to));
            assert!(!emergency_can_transition(EmergencyStatus::Cancelled, to));
        }
    }

    #[test]
    fn checked_form_carries_the_pair() {
        let err = check_emergency(EmergencyStatus::Pending, EmergencyStatus::OnScene);
        assert_eq!(
            err,
            Err(TransitionError::InvalidTransition {
                kind: EntityKind::Emergency,
                from: "pending",
                to: "on_scene",
            })
        );
    }

    #[test]
    fn unknown_strings_and_kinds_are_rejected() {
        assert!(!can_transition(EntityKind::Emergency, "pending", "teleported"));
        assert!(!can_transition(EntityKind::Hazard, "active", "inactive"));
    }
}
