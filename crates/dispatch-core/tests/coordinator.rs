//! End-to-end behaviour of [`Coordinator`] over the in-memory store:
//! assignment outcomes, lifecycle propagation, deferred retries, hazard
//! driven ETA refreshes and observer delivery order.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use dispatch_core::{
    AssignmentResult, Coordinator, DispatchConfig, DispatchError, RouteEstimate, RoutingError,
    RoutingService, StraightLine,
};
use dispatch_store::{EmergencyFilter, EntityFilter, EntityStore, MemoryStore};
use dispatch_types::{
    Ambulance, AmbulanceId, AmbulanceRegistration, AmbulanceStatus, ChangeOp, Emergency,
    EmergencyReport, EmergencyStatus, EntityKind, HazardReport, HospitalRegistration,
    ObserverMessage, Position, Severity, UserId,
};
use tokio::sync::Notify;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn coordinator() -> (Arc<MemoryStore>, Coordinator<MemoryStore, StraightLine>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(Arc::clone(&store), StraightLine, DispatchConfig::default());
    (store, coordinator)
}

async fn seed_ambulance(store: &MemoryStore, n: u128, position: Option<Position>) -> Ambulance {
    let mut ambulance = AmbulanceRegistration {
        vehicle_id: format!("AMB-{n:03}"),
        driver_id: Some(UserId::new()),
        hospital_id: None,
    }
    .into_ambulance(Utc::now());
    ambulance.id = AmbulanceId::from(Uuid::from_u128(n));
    ambulance.current_position = position;
    store
        .insert(ambulance.into())
        .await
        .unwrap()
        .into_ambulance()
        .unwrap()
}

async fn seed_emergency(store: &MemoryStore, position: Position, severity: Severity) -> Emergency {
    store
        .insert(report(position, severity).into_emergency(Utc::now()).into())
        .await
        .unwrap()
        .into_emergency()
        .unwrap()
}

fn report(position: Position, severity: Severity) -> EmergencyReport {
    EmergencyReport {
        reporter_id: None,
        location_address: String::from("14 Quay Street"),
        latitude: position.latitude,
        longitude: position.longitude,
        severity,
        description: None,
    }
}

fn hazard(position: Position, severity: Severity) -> HazardReport {
    HazardReport {
        hazard_type: String::from("flood"),
        severity,
        latitude: position.latitude,
        longitude: position.longitude,
        radius_km: 1.0,
        description: None,
        expires_at: None,
    }
}

const ORIGIN: Position = Position::new(0.0, 0.0);
const SCENE: Position = Position::new(0.0, 1.0);

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_idle_ambulance_is_assigned_with_fallback_eta() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;

    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();

    let Some(AssignmentResult::Assigned(assignment)) = outcome.assignment else {
        panic!("expected assignment, got {:?}", outcome.assignment);
    };
    assert_eq!(assignment.ambulance.id, ambulance.id);
    assert_eq!(assignment.ambulance.status, AmbulanceStatus::EnRoute);
    assert_eq!(outcome.emergency.status, EmergencyStatus::Assigned);
    // 111.19 km at 40 km/h.
    assert_eq!(outcome.emergency.eta_minutes, Some(167));
    assert!(outcome.emergency.eta_degraded);
    assert!(outcome.emergency.invariants_hold());
}

#[tokio::test]
async fn equidistant_ambulances_tie_break_on_lowest_id() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 2, Some(Position::new(0.0, 2.0))).await;
    seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let emergency = seed_emergency(&store, SCENE, Severity::Medium).await;

    let result = coordinator.assign(emergency.id).await.unwrap();
    assert_eq!(
        result.ambulance_id(),
        Some(AmbulanceId::from(Uuid::from_u128(1)))
    );
}

#[tokio::test]
async fn no_idle_ambulance_defers_and_stays_pending() {
    let (store, coordinator) = coordinator();
    let emergency = seed_emergency(&store, SCENE, Severity::Critical).await;

    let result = coordinator.assign(emergency.id).await.unwrap();
    assert!(matches!(result, AssignmentResult::Deferred(_)));
    let stored = store.emergency(emergency.id).await.unwrap();
    assert_eq!(stored.status, EmergencyStatus::Pending);
    assert_eq!(stored.version, 1);
}

/// Blocks inside the routing call until released.
struct Gated {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl RoutingService for Gated {
    async fn route_estimate(
        &self,
        _origin: Position,
        _destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(RouteEstimate {
            distance_km: 10.0,
            duration_minutes: 10.0,
        })
    }
}

#[tokio::test]
async fn cancellation_during_assignment_leaves_ambulance_untouched() {
    let store = Arc::new(MemoryStore::new());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let routing = Gated {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&store),
        routing,
        DispatchConfig::default(),
    ));
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let emergency = seed_emergency(&store, SCENE, Severity::High).await;

    let assigning = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.assign(emergency.id).await })
    };
    entered.notified().await;
    coordinator.cancel_emergency(emergency.id).await.unwrap();
    release.notify_one();

    let result = assigning.await.unwrap();
    assert!(matches!(result, Err(DispatchError::NotPending { .. })));

    let stored = store.ambulance(ambulance.id).await.unwrap();
    assert_eq!(stored.status, AmbulanceStatus::Idle);
    assert_eq!(stored.version, ambulance.version);
    let cancelled = store.emergency(emergency.id).await.unwrap();
    assert_eq!(cancelled.status, EmergencyStatus::Cancelled);
    assert_eq!(cancelled.assigned_ambulance_id, None);
}

#[tokio::test]
async fn failed_commit_writes_neither_record() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let emergency = seed_emergency(&store, SCENE, Severity::High).await;

    store.fail_next_commit();
    let err = coordinator.assign(emergency.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::StoreUnavailable(_)));
    assert_eq!(
        store.ambulance(ambulance.id).await.unwrap().status,
        AmbulanceStatus::Idle
    );
    assert_eq!(
        store.emergency(emergency.id).await.unwrap().status,
        EmergencyStatus::Pending
    );

    // Nothing was half-applied, so a retry goes through cleanly.
    let retried = coordinator.assign(emergency.id).await.unwrap();
    assert_eq!(retried.ambulance_id(), Some(ambulance.id));
}

/// Answers after a fixed delay, long enough for concurrent assignments to
/// overlap.
struct Slow;

impl RoutingService for Slow {
    async fn route_estimate(
        &self,
        _origin: Position,
        _destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(RouteEstimate {
            distance_km: 10.0,
            duration_minutes: 10.0,
        })
    }
}

#[tokio::test]
async fn concurrent_assignments_rescan_after_losing_the_race() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(Arc::clone(&store), Slow, DispatchConfig::default());
    let near = seed_ambulance(&store, 1, Some(SCENE)).await;
    let far = seed_ambulance(&store, 2, Some(ORIGIN)).await;
    let first = seed_emergency(&store, SCENE, Severity::High).await;
    let second = seed_emergency(&store, SCENE, Severity::High).await;

    // Both scans rank the nearer ambulance first; only one commit can win it.
    let (a, b) = tokio::join!(coordinator.assign(first.id), coordinator.assign(second.id));
    let (AssignmentResult::Assigned(a), AssignmentResult::Assigned(b)) = (a.unwrap(), b.unwrap())
    else {
        panic!("both emergencies should be assigned");
    };

    let mut outcomes = vec![(a.ambulance.id, a.attempts), (b.ambulance.id, b.attempts)];
    outcomes.sort();
    assert_eq!(outcomes, vec![(near.id, 1), (far.id, 2)]);

    for id in [first.id, second.id] {
        let stored = store.emergency(id).await.unwrap();
        assert_eq!(stored.status, EmergencyStatus::Assigned);
        assert!(stored.invariants_hold());
    }
    assert_ne!(
        store.emergency(first.id).await.unwrap().assigned_ambulance_id,
        store.emergency(second.id).await.unwrap().assigned_ambulance_id
    );
}

/// Touches the ambulance record during every routing call, so each commit
/// finds a newer version than the one it scanned.
struct Bumping {
    store: Arc<MemoryStore>,
    ambulance: AmbulanceId,
}

impl RoutingService for Bumping {
    async fn route_estimate(
        &self,
        _origin: Position,
        _destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        let current = self.store.ambulance(self.ambulance).await.unwrap();
        self.store.update(current.into()).await.unwrap();
        Ok(RouteEstimate {
            distance_km: 10.0,
            duration_minutes: 10.0,
        })
    }
}

#[tokio::test]
async fn persistent_conflicts_exhaust_attempts() {
    let store = Arc::new(MemoryStore::new());
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let routing = Bumping {
        store: Arc::clone(&store),
        ambulance: ambulance.id,
    };
    let coordinator = Coordinator::new(Arc::clone(&store), routing, DispatchConfig::default());
    let emergency = seed_emergency(&store, SCENE, Severity::High).await;

    let err = coordinator.assign(emergency.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::AssignmentFailed { id, attempts: 3 } if id == emergency.id
    ));

    let stored = store.ambulance(ambulance.id).await.unwrap();
    assert_eq!(stored.status, AmbulanceStatus::Idle);
    // One touch per attempt, no assignment write.
    assert_eq!(stored.version, ambulance.version + 3);
    let pending = store.emergency(emergency.id).await.unwrap();
    assert_eq!(pending.status, EmergencyStatus::Pending);
    assert_eq!(pending.version, emergency.version);
}

#[tokio::test]
async fn assigning_twice_is_rejected_without_side_effects() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let spare = seed_ambulance(&store, 2, Some(ORIGIN)).await;
    let emergency = seed_emergency(&store, SCENE, Severity::Low).await;

    coordinator.assign(emergency.id).await.unwrap();
    let err = coordinator.assign(emergency.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotPending {
            status: EmergencyStatus::Assigned,
            ..
        }
    ));
    assert_eq!(
        store.ambulance(spare.id).await.unwrap().status,
        AmbulanceStatus::Idle
    );
}

#[tokio::test]
async fn manual_assignment_picks_named_ambulance() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 1, Some(SCENE)).await;
    let far = seed_ambulance(&store, 2, Some(ORIGIN)).await;
    let first = seed_emergency(&store, SCENE, Severity::High).await;
    let second = seed_emergency(&store, SCENE, Severity::High).await;

    let assignment = coordinator.assign_to(first.id, far.id).await.unwrap();
    assert_eq!(assignment.ambulance.id, far.id);
    assert_eq!(assignment.emergency.assigned_ambulance_id, Some(far.id));

    let err = coordinator.assign_to(second.id, far.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::AmbulanceNotAvailable {
            status: AmbulanceStatus::EnRoute,
            ..
        }
    ));
}

#[tokio::test]
async fn hospital_with_beds_becomes_destination() {
    let (store, coordinator) = coordinator();
    let full = coordinator
        .register_hospital(HospitalRegistration {
            name: String::from("Harbour General"),
            address: String::from("1 Quay"),
            latitude: 0.0,
            longitude: 1.0,
            capacity: 10,
            available_beds: 0,
            contact_phone: None,
        })
        .await
        .unwrap();
    let open = coordinator
        .register_hospital(HospitalRegistration {
            name: String::from("Hill Clinic"),
            address: String::from("9 Ridge"),
            latitude: 0.0,
            longitude: 1.2,
            capacity: 10,
            available_beds: 4,
            contact_phone: None,
        })
        .await
        .unwrap();
    seed_ambulance(&store, 1, Some(ORIGIN)).await;

    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    assert_ne!(outcome.emergency.assigned_hospital_id, Some(full.id));
    assert_eq!(outcome.emergency.assigned_hospital_id, Some(open.id));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn driver_lifecycle_carries_emergency_to_completion() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let id = outcome.emergency.id;

    let acknowledged = coordinator.acknowledge(ambulance.id).await.unwrap();
    assert_eq!(acknowledged.status, EmergencyStatus::EnRoute);
    assert!(acknowledged.eta_minutes.is_some());

    coordinator
        .update_ambulance_status(ambulance.id, AmbulanceStatus::OnScene)
        .await
        .unwrap();
    let on_scene = store.emergency(id).await.unwrap();
    assert_eq!(on_scene.status, EmergencyStatus::OnScene);
    assert_eq!(on_scene.eta_minutes, None);
    assert!(on_scene.invariants_hold());

    coordinator
        .update_ambulance_status(ambulance.id, AmbulanceStatus::Returning)
        .await
        .unwrap();
    let done = store.emergency(id).await.unwrap();
    assert_eq!(done.status, EmergencyStatus::Completed);
    assert_eq!(done.assigned_ambulance_id, None);
    assert_eq!(done.assigned_hospital_id, None);

    let idle = coordinator
        .update_ambulance_status(ambulance.id, AmbulanceStatus::Idle)
        .await
        .unwrap();
    assert_eq!(idle.status, AmbulanceStatus::Idle);
}

#[tokio::test]
async fn arrival_without_acknowledgement_passes_through_en_route() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();

    coordinator
        .update_ambulance_status(ambulance.id, AmbulanceStatus::OnScene)
        .await
        .unwrap();
    let stored = store.emergency(outcome.emergency.id).await.unwrap();
    assert_eq!(stored.status, EmergencyStatus::OnScene);
}

#[tokio::test]
async fn illegal_ambulance_transition_writes_nothing() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;

    let err = coordinator
        .update_ambulance_status(ambulance.id, AmbulanceStatus::Returning)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition(_)));
    assert_eq!(store.ambulance(ambulance.id).await.unwrap().version, 1);
}

#[tokio::test]
async fn cancelling_assigned_emergency_releases_references() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();

    let cancelled = coordinator
        .cancel_emergency(outcome.emergency.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, EmergencyStatus::Cancelled);
    assert_eq!(cancelled.assigned_ambulance_id, None);
    assert_eq!(cancelled.eta_minutes, None);
    // The vehicle is still driving; telemetry brings it back.
    assert_eq!(
        store.ambulance(ambulance.id).await.unwrap().status,
        AmbulanceStatus::EnRoute
    );

    let again = coordinator.cancel_emergency(outcome.emergency.id).await;
    assert!(matches!(again, Err(DispatchError::InvalidTransition(_))));
}

#[tokio::test]
async fn decommission_refused_while_assigned() {
    let (store, coordinator) = coordinator();
    let busy = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let spare = seed_ambulance(&store, 2, None).await;

    let err = coordinator.decommission_ambulance(busy.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::AmbulanceInUse { .. }));

    coordinator.decommission_ambulance(spare.id).await.unwrap();
    assert!(matches!(
        coordinator.decommission_ambulance(spare.id).await,
        Err(DispatchError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Deferred retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn newly_staffed_ambulance_takes_most_severe_pending() {
    let (store, coordinator) = coordinator();
    let minor = coordinator
        .report_emergency(report(SCENE, Severity::Low))
        .await
        .unwrap();
    let major = coordinator
        .report_emergency(report(SCENE, Severity::Critical))
        .await
        .unwrap();
    assert!(matches!(
        major.assignment,
        Some(AssignmentResult::Deferred(_))
    ));

    let ambulance = coordinator
        .register_ambulance(AmbulanceRegistration {
            vehicle_id: String::from("AMB-100"),
            driver_id: Some(UserId::new()),
            hospital_id: None,
        })
        .await
        .unwrap();

    let major = store.emergency(major.emergency.id).await.unwrap();
    assert_eq!(major.status, EmergencyStatus::Assigned);
    assert_eq!(major.assigned_ambulance_id, Some(ambulance.id));
    // Unknown position: no estimate, flagged.
    assert_eq!(major.eta_minutes, None);
    assert!(major.eta_degraded);
    assert_eq!(
        store.emergency(minor.emergency.id).await.unwrap().status,
        EmergencyStatus::Pending
    );
}

#[tokio::test]
async fn unstaffed_registration_does_not_assign() {
    let (store, coordinator) = coordinator();
    let pending = seed_emergency(&store, SCENE, Severity::High).await;
    coordinator
        .register_ambulance(AmbulanceRegistration {
            vehicle_id: String::from("AMB-200"),
            driver_id: None,
            hospital_id: None,
        })
        .await
        .unwrap();
    assert_eq!(
        store.emergency(pending.id).await.unwrap().status,
        EmergencyStatus::Pending
    );
}

#[tokio::test]
async fn returning_to_idle_picks_up_waiting_emergency() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let waiting = coordinator
        .report_emergency(report(SCENE, Severity::Medium))
        .await
        .unwrap();
    assert_eq!(waiting.emergency.status, EmergencyStatus::Pending);

    for status in [
        AmbulanceStatus::OnScene,
        AmbulanceStatus::Returning,
        AmbulanceStatus::Idle,
    ] {
        coordinator
            .update_ambulance_status(ambulance.id, status)
            .await
            .unwrap();
    }

    let waiting = store.emergency(waiting.emergency.id).await.unwrap();
    assert_eq!(waiting.status, EmergencyStatus::Assigned);
    assert_eq!(waiting.assigned_ambulance_id, Some(ambulance.id));
}

// ---------------------------------------------------------------------------
// ETA maintenance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn small_movements_do_not_recompute_eta() {
    let (store, coordinator) = coordinator();
    let ambulance = seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let id = outcome.emergency.id;

    coordinator
        .update_ambulance_position(ambulance.id, Position::new(0.001, 0.0))
        .await
        .unwrap();
    assert_eq!(store.emergency(id).await.unwrap().version, outcome.emergency.version);

    coordinator
        .update_ambulance_position(ambulance.id, Position::new(0.0, 0.5))
        .await
        .unwrap();
    let refreshed = store.emergency(id).await.unwrap();
    // 55.6 km at 40 km/h.
    assert_eq!(refreshed.eta_minutes, Some(83));
}

#[tokio::test]
async fn hazard_on_route_refreshes_eta_until_cleared() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let id = outcome.emergency.id;

    let flood = coordinator
        .report_hazard(hazard(Position::new(0.0, 0.5), Severity::Critical))
        .await
        .unwrap();
    assert_eq!(store.emergency(id).await.unwrap().eta_minutes, Some(334));

    coordinator.clear_hazard(flood.id).await.unwrap();
    assert_eq!(store.emergency(id).await.unwrap().eta_minutes, Some(167));
}

#[tokio::test]
async fn hazard_report_stands_when_eta_refresh_fails() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let id = outcome.emergency.id;

    // The hazard insert commits; the ETA write that follows does not.
    store.fail_next_commit();
    let flood = coordinator
        .report_hazard(hazard(Position::new(0.0, 0.5), Severity::Critical))
        .await
        .unwrap();

    assert_eq!(store.hazard(flood.id).await.unwrap().id, flood.id);
    assert_eq!(coordinator.list(EntityKind::Hazard).await.unwrap().len(), 1);
    assert_eq!(store.emergency(id).await.unwrap().eta_minutes, Some(167));

    // A later full refresh catches up.
    assert_eq!(coordinator.refresh_etas_near(None).await.unwrap(), 1);
    assert_eq!(store.emergency(id).await.unwrap().eta_minutes, Some(334));
}

#[tokio::test]
async fn registration_stands_when_deferred_retry_fails() {
    let (store, coordinator) = coordinator();
    let pending = seed_emergency(&store, SCENE, Severity::High).await;

    store.fail_next_commit();
    let ambulance = coordinator
        .register_ambulance(AmbulanceRegistration {
            vehicle_id: String::from("AMB-400"),
            driver_id: Some(UserId::new()),
            hospital_id: None,
        })
        .await
        .unwrap();

    assert_eq!(
        store.ambulance(ambulance.id).await.unwrap().status,
        AmbulanceStatus::Idle
    );
    assert_eq!(
        store.emergency(pending.id).await.unwrap().status,
        EmergencyStatus::Pending
    );

    assert_eq!(coordinator.retry_deferred().await.unwrap(), 1);
    let assigned = store.emergency(pending.id).await.unwrap();
    assert_eq!(assigned.assigned_ambulance_id, Some(ambulance.id));
}

#[tokio::test]
async fn distant_hazard_leaves_eta_alone() {
    let (store, coordinator) = coordinator();
    seed_ambulance(&store, 1, Some(ORIGIN)).await;
    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();

    coordinator
        .report_hazard(hazard(Position::new(10.0, 10.0), Severity::Critical))
        .await
        .unwrap();
    let stored = store.emergency(outcome.emergency.id).await.unwrap();
    assert_eq!(stored.version, outcome.emergency.version);
}

#[tokio::test]
async fn sweep_flips_expired_hazards_once() {
    let (store, coordinator) = coordinator();
    let mut stale = hazard(ORIGIN, Severity::Low);
    stale.expires_at = Some(Utc::now() - Duration::minutes(5));
    let stale = coordinator.report_hazard(stale).await.unwrap();
    coordinator
        .report_hazard(hazard(SCENE, Severity::Low))
        .await
        .unwrap();

    // Expired hazards are already hidden from reads before the sweep.
    assert_eq!(coordinator.list(EntityKind::Hazard).await.unwrap().len(), 1);

    assert_eq!(coordinator.sweep_expired_hazards().await.unwrap(), 1);
    assert!(!store.hazard(stale.id).await.unwrap().is_active);
    assert_eq!(coordinator.sweep_expired_hazards().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Intake validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_inputs_are_rejected() {
    let (_store, coordinator) = coordinator();

    let err = coordinator
        .report_emergency(report(Position::new(91.0, 0.0), Severity::Low))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    let mut blank = report(SCENE, Severity::Low);
    blank.location_address = String::from("  ");
    assert!(matches!(
        coordinator.report_emergency(blank).await,
        Err(DispatchError::Validation(_))
    ));

    let mut flat = hazard(SCENE, Severity::Low);
    flat.radius_km = 0.0;
    assert!(matches!(
        coordinator.report_hazard(flat).await,
        Err(DispatchError::Validation(_))
    ));

    let overfull = HospitalRegistration {
        name: String::from("Overfull"),
        address: String::from("2 Quay"),
        latitude: 0.0,
        longitude: 0.0,
        capacity: 2,
        available_beds: 3,
        contact_phone: None,
    };
    assert!(matches!(
        coordinator.register_hospital(overfull).await,
        Err(DispatchError::Validation(_))
    ));
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observer_sees_snapshot_then_ordered_changes() {
    let (store, coordinator) = coordinator();
    for _ in 0..3 {
        seed_emergency(&store, SCENE, Severity::Low).await;
    }

    let mut sub = coordinator
        .notifier()
        .subscribe(EntityFilter::All(EntityKind::Emergency))
        .await
        .unwrap();
    let Some(ObserverMessage::Snapshot { entities, resync }) = sub.recv().await else {
        panic!("first message must be a snapshot");
    };
    assert_eq!(entities.len(), 3);
    assert!(!resync);

    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    let id = outcome.emergency.id;
    let mut current = outcome.emergency;
    for note in ["caller on scene", "second caller"] {
        current.description = Some(String::from(note));
        current = store
            .update(current.into())
            .await
            .unwrap()
            .into_emergency()
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        match sub.recv().await {
            Some(ObserverMessage::Upsert { op, entity }) => {
                assert_eq!(entity.id(), Uuid::from(id));
                seen.push((op, entity.version()));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert_eq!(
        seen,
        vec![
            (ChangeOp::Insert, 1),
            (ChangeOp::Update, 2),
            (ChangeOp::Update, 3)
        ]
    );
}

#[tokio::test]
async fn leaving_filter_scope_is_reported_as_removed() {
    let (_store, coordinator) = coordinator();
    let mut sub = coordinator
        .notifier()
        .subscribe(EntityFilter::Emergencies(EmergencyFilter {
            statuses: vec![EmergencyStatus::Pending],
            ..EmergencyFilter::default()
        }))
        .await
        .unwrap();
    assert!(matches!(
        sub.recv().await,
        Some(ObserverMessage::Snapshot { .. })
    ));

    let outcome = coordinator
        .report_emergency(report(SCENE, Severity::High))
        .await
        .unwrap();
    assert!(matches!(
        sub.recv().await,
        Some(ObserverMessage::Upsert {
            op: ChangeOp::Insert,
            ..
        })
    ));

    coordinator
        .register_ambulance(AmbulanceRegistration {
            vehicle_id: String::from("AMB-300"),
            driver_id: Some(UserId::new()),
            hospital_id: None,
        })
        .await
        .unwrap();
    match sub.recv().await {
        Some(ObserverMessage::Removed { kind, id }) => {
            assert_eq!(kind, EntityKind::Emergency);
            assert_eq!(id, Uuid::from(outcome.emergency.id));
        }
        other => panic!("unexpected message {other:?}"),
    }
}
