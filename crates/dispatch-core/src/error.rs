//! Error types for the dispatch core.
//!
//! `Deferred` assignment is not here: it is a successful
//! [`AssignmentResult`](crate::assignment::AssignmentResult).
//! Routing failures never surface either; the ETA estimator absorbs them.

use std::future::Future;
use std::time::Duration;

use dispatch_store::StoreError;
use dispatch_types::{AmbulanceId, AmbulanceStatus, EmergencyId, EmergencyStatus, EntityKey};

use crate::transition::TransitionError;

/// Errors returned by the dispatch coordination engine.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A status change is not a legal edge; nothing was written.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Assignment was requested for an emergency that is not pending.
    #[error("emergency {id} is {status}, not pending")]
    NotPending {
        /// The emergency.
        id: EmergencyId,
        /// Its current status.
        status: EmergencyStatus,
    },

    /// The ambulance named for a manual assignment cannot take it.
    #[error("ambulance {id} is not available ({status}, staffed: {staffed})")]
    AmbulanceNotAvailable {
        /// The ambulance.
        id: AmbulanceId,
        /// Its current status.
        status: AmbulanceStatus,
        /// Whether a driver is on board.
        staffed: bool,
    },

    /// The ambulance is still bound to an active emergency.
    #[error("ambulance {id} is assigned to active emergency {emergency_id}")]
    AmbulanceInUse {
        /// The ambulance.
        id: AmbulanceId,
        /// The emergency referencing it.
        emergency_id: EmergencyId,
    },

    /// Every assignment attempt lost a version race.
    #[error("assignment of emergency {id} failed after {attempts} attempts")]
    AssignmentFailed {
        /// The emergency.
        id: EmergencyId,
        /// Attempts made.
        attempts: u32,
    },

    /// A non-assignment write lost every version race.
    #[error("{key} kept changing; gave up after {attempts} attempts")]
    Contended {
        /// The contended record.
        key: EntityKey,
        /// Attempts made.
        attempts: u32,
    },

    /// The store could not be reached in time; nothing was committed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The record does not exist.
    #[error("not found: {0}")]
    NotFound(EntityKey),

    /// Input failed intake validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl DispatchError {
    /// Whether a retry from fresh reads could succeed.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(key),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Postgres(e) => Self::StoreUnavailable(e.to_string()),
            other => Self::Store(other),
        }
    }
}

/// Run a store call under `limit`.
///
/// Elapsed time maps to [`DispatchError::StoreUnavailable`]. The outcome
/// of a write cut off this way is unknown: it may have committed. Callers
/// re-read before retrying, and version checks reject a stale retry.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, DispatchError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(DispatchError::from),
        Err(_) => Err(DispatchError::StoreUnavailable(format!(
            "store call exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use dispatch_types::EntityKind;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let key = EntityKey::new(EntityKind::Emergency, Uuid::nil());
        assert!(matches!(
            DispatchError::from(StoreError::NotFound(key)),
            DispatchError::NotFound(_)
        ));
        assert!(matches!(
            DispatchError::from(StoreError::Unavailable(String::from("down"))),
            DispatchError::StoreUnavailable(_)
        ));
        let conflict = DispatchError::from(StoreError::Conflict {
            key,
            expected: 1,
            actual: 2,
        });
        assert!(conflict.is_conflict());
    }
}
