//! Emergency-to-ambulance assignment.
//!
//! # Algorithm
//!
//! 1. Read the emergency; anything but `pending` is a precondition
//!    failure, which makes a repeated `assign` harmless.
//! 2. Scan staffed idle ambulances. None: [`AssignmentResult::Deferred`].
//! 3. Rank candidates by `(distance bucket, hazard penalty, id)`, all
//!    ascending. Unknown positions score as the farthest bucket; for
//!    non-critical emergencies the home hospital stands in when known.
//! 4. Choose the destination hospital and estimate the initial ETA.
//! 5. Re-read the emergency. If it left `pending` (cancelled mid-flight),
//!    abort without touching the ambulance.
//! 6. Commit ambulance `idle -> en_route` and emergency
//!    `pending -> assigned` as one [`WriteBatch`] guarded by both versions.
//!    A version conflict restarts from step 1 with a fresh scan, up to
//!    `max_attempts`, then surfaces [`DispatchError::AssignmentFailed`].

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dispatch_store::{EntityFilter, EntityStore, WriteBatch};
use dispatch_types::{
    Ambulance, AmbulanceId, AmbulanceStatus, Emergency, EmergencyId, EmergencyStatus, Entity,
    EntityKind, Hazard, Hospital, HospitalId, Position, Severity,
};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, bounded};
use crate::eta::{Eta, EtaEstimator, RoutingService};
use crate::geo;
use crate::hazard::{HazardOverlay, NO_PENALTY};
use crate::transition::{check_ambulance, check_emergency};

/// Why an emergency stays pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// No staffed idle ambulance exists right now.
    NoAmbulanceAvailable,
}

/// A committed assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// The emergency as committed (`assigned`).
    pub emergency: Emergency,
    /// The ambulance as committed (`en_route`).
    pub ambulance: Ambulance,
    /// Position the initial ETA was computed from, if any.
    pub eta_origin: Option<Position>,
    /// Attempts used, 1 when the first commit succeeded.
    pub attempts: u32,
}

/// Outcome of a successful `assign` call.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentResult {
    /// The emergency now has an ambulance.
    Assigned(Box<Assignment>),
    /// The emergency remains pending; retry on the next availability change.
    Deferred(DeferReason),
}

impl AssignmentResult {
    /// The assigned ambulance, if any.
    pub fn ambulance_id(&self) -> Option<AmbulanceId> {
        match self {
            Self::Assigned(a) => Some(a.ambulance.id),
            Self::Deferred(_) => None,
        }
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// The ambulance.
    pub ambulance: Ambulance,
    /// Position used for scoring and the initial ETA.
    pub origin: Option<Position>,
    /// Distance bucket; `u64::MAX` when the origin is unknown.
    pub bucket: u64,
    /// Hazard travel penalty factor on the route to the emergency.
    pub penalty: f64,
}

impl ScoredCandidate {
    fn cmp_rank(&self, other: &Self) -> Ordering {
        self.bucket
            .cmp(&other.bucket)
            .then_with(|| self.penalty.total_cmp(&other.penalty))
            .then_with(|| self.ambulance.id.cmp(&other.ambulance.id))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bucket_of(distance_km: f64, bucket_km: f64) -> u64 {
    if bucket_km <= 0.0 {
        return 0;
    }
    let bucket = (distance_km / bucket_km).floor();
    if !bucket.is_finite() || bucket < 0.0 {
        u64::MAX
    } else {
        // Saturating float-to-int conversion.
        bucket as u64
    }
}

/// Destination hospital for an emergency at `target`.
///
/// Nearest hospital with a free bed; failing that, the ambulance's home
/// hospital; failing that, the nearest hospital. `None` only when no
/// hospital is registered.
pub fn select_hospital(
    target: Position,
    home: Option<HospitalId>,
    hospitals: &[Hospital],
) -> Option<HospitalId> {
    let nearest = |with_beds: bool| {
        hospitals
            .iter()
            .filter(|h| !with_beds || h.available_beds > 0)
            .min_by(|a, b| {
                geo::distance_km(a.position, target)
                    .total_cmp(&geo::distance_km(b.position, target))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|h| h.id)
    };
    nearest(true)
        .or_else(|| home.filter(|id| hospitals.iter().any(|h| h.id == *id)))
        .or_else(|| nearest(false))
}

/// Rank `candidates` for `emergency`, best first.
pub fn rank_candidates(
    overlay: &HazardOverlay,
    bucket_km: f64,
    emergency: &Emergency,
    candidates: Vec<Ambulance>,
    hospitals: &[Hospital],
    hazards: &[Hazard],
    now: DateTime<Utc>,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|ambulance| {
            let origin = scoring_origin(&ambulance, emergency.severity, hospitals);
            let (bucket, penalty) = origin.map_or((u64::MAX, NO_PENALTY), |o| {
                (
                    bucket_of(geo::distance_km(o, emergency.position), bucket_km),
                    overlay.penalty_factor(hazards, o, emergency.position, now),
                )
            });
            ScoredCandidate {
                ambulance,
                origin,
                bucket,
                penalty,
            }
        })
        .collect();
    scored.sort_by(ScoredCandidate::cmp_rank);
    scored
}

/// Selects and commits ambulance assignments.
pub struct AssignmentEngine<S, R> {
    store: Arc<S>,
    eta: Arc<EtaEstimator<R>>,
    overlay: HazardOverlay,
    bucket_km: f64,
    max_attempts: u32,
    store_timeout: Duration,
}

impl<S: EntityStore, R: RoutingService> AssignmentEngine<S, R> {
    /// Create an engine over a store and ETA estimator.
    pub fn new(
        store: Arc<S>,
        eta: Arc<EtaEstimator<R>>,
        overlay: HazardOverlay,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            eta,
            overlay,
            bucket_km: config.assignment.distance_bucket_km,
            max_attempts: config.assignment.max_attempts.max(1),
            store_timeout: config.timeouts.store(),
        }
    }

    /// Rank candidates best-first. Pure; same inputs give the same order.
    pub fn rank(
        &self,
        emergency: &Emergency,
        candidates: Vec<Ambulance>,
        hospitals: &[Hospital],
        hazards: &[Hazard],
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        rank_candidates(
            &self.overlay,
            self.bucket_km,
            emergency,
            candidates,
            hospitals,
            hazards,
            now,
        )
    }

    /// Assign the best available ambulance to a pending emergency.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotPending`] if the emergency is not pending,
    ///   including when it was cancelled while the assignment was in flight.
    /// - [`DispatchError::AssignmentFailed`] after `max_attempts` conflicts.
    /// - [`DispatchError::StoreUnavailable`] when the store does not answer.
    pub async fn assign(&self, id: EmergencyId) -> Result<AssignmentResult, DispatchError> {
        for attempt in 1..=self.max_attempts {
            let emergency = self.read_pending(id).await?;
            let candidates: Vec<Ambulance> = bounded(
                self.store_timeout,
                self.store.query(&EntityFilter::assignable_ambulances()),
            )
            .await?
            .into_iter()
            .filter_map(Entity::into_ambulance)
            .collect();

            if candidates.is_empty() {
                tracing::info!(emergency_id = %id, "No ambulance available, assignment deferred");
                return Ok(AssignmentResult::Deferred(DeferReason::NoAmbulanceAvailable));
            }

            let (hospitals, hazards) = self.load_context().await?;
            let Some(best) = self
                .rank(&emergency, candidates, &hospitals, &hazards, Utc::now())
                .into_iter()
                .next()
            else {
                return Ok(AssignmentResult::Deferred(DeferReason::NoAmbulanceAvailable));
            };

            match self
                .commit(&emergency, best.ambulance, best.origin, &hospitals, &hazards, attempt)
                .await
            {
                Ok(assignment) => return Ok(AssignmentResult::Assigned(Box::new(assignment))),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(emergency_id = %id, attempt, "Stale candidate, rescanning");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::warn!(emergency_id = %id, attempts = self.max_attempts, "Assignment failed");
        Err(DispatchError::AssignmentFailed {
            id,
            attempts: self.max_attempts,
        })
    }

    /// Assign a specific ambulance (dispatcher override).
    ///
    /// # Errors
    ///
    /// As [`assign`](Self::assign), plus
    /// [`DispatchError::AmbulanceNotAvailable`] when the ambulance is not
    /// idle or has no driver.
    pub async fn assign_to(
        &self,
        id: EmergencyId,
        ambulance_id: AmbulanceId,
    ) -> Result<Assignment, DispatchError> {
        for attempt in 1..=self.max_attempts {
            let emergency = self.read_pending(id).await?;
            let ambulance =
                bounded(self.store_timeout, self.store.ambulance(ambulance_id)).await?;
            if ambulance.status != AmbulanceStatus::Idle || !ambulance.is_staffed() {
                return Err(DispatchError::AmbulanceNotAvailable {
                    id: ambulance.id,
                    status: ambulance.status,
                    staffed: ambulance.is_staffed(),
                });
            }

            let (hospitals, hazards) = self.load_context().await?;
            let origin = scoring_origin(&ambulance, emergency.severity, &hospitals);
            match self
                .commit(&emergency, ambulance, origin, &hospitals, &hazards, attempt)
                .await
            {
                Ok(assignment) => return Ok(assignment),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(emergency_id = %id, attempt, "Manual assignment raced, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(DispatchError::AssignmentFailed {
            id,
            attempts: self.max_attempts,
        })
    }

    async fn read_pending(&self, id: EmergencyId) -> Result<Emergency, DispatchError> {
        let emergency = bounded(self.store_timeout, self.store.emergency(id)).await?;
        if emergency.status != EmergencyStatus::Pending {
            return Err(DispatchError::NotPending {
                id,
                status: emergency.status,
            });
        }
        Ok(emergency)
    }

    async fn load_context(&self) -> Result<(Vec<Hospital>, Vec<Hazard>), DispatchError> {
        let hospitals = bounded(self.store_timeout, self.store.list(EntityKind::Hospital))
            .await?
            .into_iter()
            .filter_map(Entity::into_hospital)
            .collect();
        let hazards = bounded(
            self.store_timeout,
            self.store.query(&EntityFilter::active_hazards()),
        )
        .await?
        .into_iter()
        .filter_map(Entity::into_hazard)
        .collect();
        Ok((hospitals, hazards))
    }

    async fn commit(
        &self,
        scanned: &Emergency,
        mut ambulance: Ambulance,
        origin: Option<Position>,
        hospitals: &[Hospital],
        hazards: &[Hazard],
        attempt: u32,
    ) -> Result<Assignment, DispatchError> {
        check_ambulance(ambulance.status, AmbulanceStatus::EnRoute)?;
        let hospital_id = select_hospital(scanned.position, ambulance.hospital_id, hospitals);
        let eta = match origin {
            Some(o) => Some(self.eta.estimate(o, scanned.position, hazards, None).await),
            None => None,
        };

        // Cancellation check: the routing call above may have taken a while.
        let mut emergency = self.read_pending(scanned.id).await?;
        check_emergency(emergency.status, EmergencyStatus::Assigned)?;

        emergency.status = EmergencyStatus::Assigned;
        emergency.assigned_ambulance_id = Some(ambulance.id);
        emergency.assigned_hospital_id = hospital_id;
        emergency.eta_minutes = eta.map(|e: Eta| e.minutes);
        // No origin at all means no estimate; flag it like any fallback.
        emergency.eta_degraded = eta.is_none_or(|e| e.degraded);
        ambulance.status = AmbulanceStatus::EnRoute;

        let committed = bounded(
            self.store_timeout,
            self.store
                .apply(WriteBatch::new().update(ambulance).update(emergency)),
        )
        .await?;
        let mut committed = committed.into_iter();
        let (Some(Entity::Ambulance(ambulance)), Some(Entity::Emergency(emergency))) =
            (committed.next(), committed.next())
        else {
            return Err(DispatchError::Validation(String::from(
                "store returned an unexpected batch result",
            )));
        };

        tracing::info!(
            emergency_id = %emergency.id,
            ambulance_id = %ambulance.id,
            hospital_id = ?emergency.assigned_hospital_id,
            eta_minutes = ?emergency.eta_minutes,
            degraded = emergency.eta_degraded,
            attempt,
            "Ambulance assigned"
        );
        Ok(Assignment {
            emergency,
            ambulance,
            eta_origin: origin,
            attempts: attempt,
        })
    }
}

/// Position an ambulance is scored from.
///
/// Critical emergencies only trust live positions; others fall back to
/// the home hospital.
pub fn scoring_origin(
    ambulance: &Ambulance,
    severity: Severity,
    hospitals: &[Hospital],
) -> Option<Position> {
    ambulance.current_position.or_else(|| {
        if severity == Severity::Critical {
            return None;
        }
        let home = ambulance.hospital_id?;
        hospitals.iter().find(|h| h.id == home).map(|h| h.position)
    })
}

impl<S, R> core::fmt::Debug for AssignmentEngine<S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AssignmentEngine")
            .field("bucket_km", &self.bucket_km)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
