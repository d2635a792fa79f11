//! Trigger handling: the only component that composes the others.
//!
//! Every external input (report intake, dispatcher command, driver
//! telemetry, hazard report, expiry sweep) enters through a
//! [`Coordinator`] method. Each method is an optimistic read-modify-write
//! loop: read the records, validate the transition, commit with version
//! checks, and re-read on conflict up to the configured attempt bound.
//!
//! Follow-up work runs inline after the triggering commit:
//! - an ambulance becoming available (registered, or back to `idle`)
//!   retries pending emergencies, most severe first;
//! - ambulance movement past the threshold refreshes its emergency's ETA;
//! - a hazard appearing, clearing or expiring refreshes ETAs on routes in
//!   its vicinity.
//!
//! [`Coordinator::run_reactor`] reconciles the same follow-ups when the
//! change feed reports a gap, and [`Coordinator::run_hazard_sweep`] flips
//! the persisted flag of expired hazards.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_store::{EmergencyFilter, EntityFilter, EntityStore, FeedItem, WriteBatch};
use dispatch_types::{
    Ambulance, AmbulanceId, AmbulanceRegistration, AmbulanceStatus, Emergency, EmergencyId,
    EmergencyReport, EmergencyStatus, Entity, EntityKey, EntityKind, Hazard, HazardId,
    HazardReport, Hospital, HospitalId, HospitalRegistration, Position,
};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::assignment::{Assignment, AssignmentEngine, AssignmentResult};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, bounded};
use crate::eta::{EtaEstimator, EtaTracker, RoutingService};
use crate::hazard::HazardOverlay;
use crate::notifier::ChangeNotifier;
use crate::transition::{check_ambulance, check_emergency};

/// Statuses in which an emergency holds an ambulance.
const ACTIVE_STATUSES: [EmergencyStatus; 3] = [
    EmergencyStatus::Assigned,
    EmergencyStatus::EnRoute,
    EmergencyStatus::OnScene,
];

/// Result of report intake.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    /// The emergency in its latest known state.
    pub emergency: Emergency,
    /// Assignment outcome; `None` when the attempt errored and the
    /// emergency was left pending for a later retry.
    pub assignment: Option<AssignmentResult>,
}

/// Composes store, assignment, ETA, hazards and notifier.
pub struct Coordinator<S, R> {
    store: Arc<S>,
    config: DispatchConfig,
    overlay: HazardOverlay,
    eta: Arc<EtaEstimator<R>>,
    engine: AssignmentEngine<S, R>,
    notifier: ChangeNotifier<S>,
    tracker: Mutex<EtaTracker>,
}

impl<S, R> core::fmt::Debug for Coordinator<S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<S: EntityStore, R: RoutingService> Coordinator<S, R> {
    /// Wire the components over a store and a routing backend.
    pub fn new(store: Arc<S>, routing: R, config: DispatchConfig) -> Self {
        let overlay = HazardOverlay::from_config(config.eta.penalty_weights, &config.hazards);
        let eta = Arc::new(EtaEstimator::new(
            routing,
            overlay,
            &config.eta,
            &config.timeouts,
        ));
        let engine = AssignmentEngine::new(Arc::clone(&store), Arc::clone(&eta), overlay, &config);
        let notifier = ChangeNotifier::new(Arc::clone(&store), &config);
        let tracker = Mutex::new(EtaTracker::new(config.eta.recompute_threshold_km));
        Self {
            store,
            config,
            overlay,
            eta,
            engine,
            notifier,
            tracker,
        }
    }

    /// The observer subscription fanout.
    pub const fn notifier(&self) -> &ChangeNotifier<S> {
        &self.notifier
    }

    fn store_timeout(&self) -> Duration {
        self.config.timeouts.store()
    }

    fn max_attempts(&self) -> u32 {
        self.config.assignment.max_attempts.max(1)
    }

    fn contended(&self, kind: EntityKind, id: impl Into<Uuid>) -> DispatchError {
        DispatchError::Contended {
            key: EntityKey::new(kind, id),
            attempts: self.max_attempts(),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every record of a collection. Hazard listings apply expiry.
    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, DispatchError> {
        if kind == EntityKind::Hazard {
            return self.query(&EntityFilter::active_hazards()).await;
        }
        bounded(self.store_timeout(), self.store.list(kind)).await
    }

    /// Records matching `filter`, ordered by id.
    pub async fn query(&self, filter: &EntityFilter) -> Result<Vec<Entity>, DispatchError> {
        bounded(self.store_timeout(), self.store.query(filter)).await
    }

    /// One emergency.
    pub async fn emergency(&self, id: EmergencyId) -> Result<Emergency, DispatchError> {
        bounded(self.store_timeout(), self.store.emergency(id)).await
    }

    async fn active_hazards(&self) -> Result<Vec<Hazard>, DispatchError> {
        Ok(bounded(
            self.store_timeout(),
            self.store.query(&EntityFilter::active_hazards()),
        )
        .await?
        .into_iter()
        .filter_map(Entity::into_hazard)
        .collect())
    }

    async fn emergencies(&self, filter: EmergencyFilter) -> Result<Vec<Emergency>, DispatchError> {
        Ok(bounded(
            self.store_timeout(),
            self.store.query(&EntityFilter::Emergencies(filter)),
        )
        .await?
        .into_iter()
        .filter_map(Entity::into_emergency)
        .collect())
    }

    async fn active_emergency_for(
        &self,
        ambulance: AmbulanceId,
    ) -> Result<Option<Emergency>, DispatchError> {
        let mut found = self
            .emergencies(EmergencyFilter {
                statuses: ACTIVE_STATUSES.to_vec(),
                ambulance_id: Some(ambulance),
                ..EmergencyFilter::default()
            })
            .await?;
        if found.len() > 1 {
            tracing::warn!(ambulance_id = %ambulance, count = found.len(), "Ambulance bound to several emergencies");
        }
        Ok(found.pop())
    }

    // -----------------------------------------------------------------------
    // Emergencies
    // -----------------------------------------------------------------------

    /// Record a new emergency and try to assign it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] for malformed reports and
    /// store errors from the insert. Assignment errors do not fail intake.
    pub async fn report_emergency(
        &self,
        report: EmergencyReport,
    ) -> Result<ReportOutcome, DispatchError> {
        if report.location_address.trim().is_empty() {
            return Err(DispatchError::Validation(String::from(
                "location_address must not be empty",
            )));
        }
        validate_position(Position::new(report.latitude, report.longitude))?;

        let emergency = report.into_emergency(Utc::now());
        let inserted = bounded(self.store_timeout(), self.store.insert(emergency.into()))
            .await?
            .into_emergency()
            .ok_or_else(|| DispatchError::Validation(String::from("insert returned wrong kind")))?;
        tracing::info!(
            emergency_id = %inserted.id,
            severity = %inserted.severity,
            "Emergency reported"
        );

        match self.assign(inserted.id).await {
            Ok(result) => {
                let emergency = match &result {
                    AssignmentResult::Assigned(a) => a.emergency.clone(),
                    AssignmentResult::Deferred(_) => inserted,
                };
                Ok(ReportOutcome {
                    emergency,
                    assignment: Some(result),
                })
            }
            Err(e) => {
                tracing::warn!(emergency_id = %inserted.id, error = %e, "Initial assignment failed");
                Ok(ReportOutcome {
                    emergency: inserted,
                    assignment: None,
                })
            }
        }
    }

    /// Automatic assignment of a pending emergency.
    pub async fn assign(&self, id: EmergencyId) -> Result<AssignmentResult, DispatchError> {
        let result = self.engine.assign(id).await?;
        if let AssignmentResult::Assigned(assignment) = &result {
            self.track(assignment).await;
        }
        Ok(result)
    }

    /// Dispatcher override: assign a specific ambulance.
    pub async fn assign_to(
        &self,
        id: EmergencyId,
        ambulance: AmbulanceId,
    ) -> Result<Assignment, DispatchError> {
        let assignment = self.engine.assign_to(id, ambulance).await?;
        self.track(&assignment).await;
        Ok(assignment)
    }

    async fn track(&self, assignment: &Assignment) {
        if let Some(origin) = assignment.eta_origin {
            self.tracker
                .lock()
                .await
                .record(assignment.emergency.id, origin);
        }
    }

    /// Cancel an emergency from any non-terminal status.
    ///
    /// Ambulance and hospital references are cleared. A bound ambulance
    /// keeps its status; the driver returns it through telemetry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] for terminal emergencies.
    pub async fn cancel_emergency(&self, id: EmergencyId) -> Result<Emergency, DispatchError> {
        for _ in 0..self.max_attempts() {
            let mut emergency = self.emergency(id).await?;
            check_emergency(emergency.status, EmergencyStatus::Cancelled)?;
            let released = emergency.assigned_ambulance_id;
            emergency.status = EmergencyStatus::Cancelled;
            emergency.clear_assignment();

            match bounded(self.store_timeout(), self.store.update(emergency.into())).await {
                Ok(committed) => {
                    self.tracker.lock().await.forget(id);
                    if let Some(ambulance_id) = released {
                        tracing::warn!(
                            emergency_id = %id,
                            ambulance_id = %ambulance_id,
                            "Emergency cancelled with ambulance assigned"
                        );
                    } else {
                        tracing::info!(emergency_id = %id, "Emergency cancelled");
                    }
                    return committed.into_emergency().ok_or(DispatchError::NotFound(
                        EntityKey::new(EntityKind::Emergency, id),
                    ));
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Err(self.contended(EntityKind::Emergency, id))
    }

    /// Retry pending emergencies, most severe first, oldest first within a
    /// severity. Stops at the first deferral. Returns how many were
    /// assigned.
    pub async fn retry_deferred(&self) -> Result<usize, DispatchError> {
        let mut pending = self
            .emergencies(EmergencyFilter {
                statuses: vec![EmergencyStatus::Pending],
                ..EmergencyFilter::default()
            })
            .await?;
        pending.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut assigned: usize = 0;
        for emergency in pending {
            match self.assign(emergency.id).await {
                Ok(AssignmentResult::Assigned(_)) => assigned = assigned.saturating_add(1),
                Ok(AssignmentResult::Deferred(_)) => break,
                // Someone else got there first.
                Err(DispatchError::NotPending { .. }) => {}
                Err(e) => {
                    tracing::warn!(emergency_id = %emergency.id, error = %e, "Retry failed");
                }
            }
        }
        if assigned > 0 {
            tracing::info!(assigned, "Deferred emergencies assigned");
        }
        Ok(assigned)
    }

    // -----------------------------------------------------------------------
    // Ambulances
    // -----------------------------------------------------------------------

    /// Register a vehicle. A staffed registration retries deferred work.
    pub async fn register_ambulance(
        &self,
        registration: AmbulanceRegistration,
    ) -> Result<Ambulance, DispatchError> {
        if registration.vehicle_id.trim().is_empty() {
            return Err(DispatchError::Validation(String::from(
                "vehicle_id must not be empty",
            )));
        }
        let ambulance = registration.into_ambulance(Utc::now());
        let inserted = bounded(self.store_timeout(), self.store.insert(ambulance.into()))
            .await?
            .into_ambulance()
            .ok_or_else(|| DispatchError::Validation(String::from("insert returned wrong kind")))?;
        tracing::info!(ambulance_id = %inserted.id, vehicle_id = %inserted.vehicle_id, "Ambulance registered");

        if inserted.is_staffed() {
            self.retry_after_commit().await;
        }
        Ok(inserted)
    }

    /// Remove a vehicle that no active emergency references.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AmbulanceInUse`] while it is assigned.
    pub async fn decommission_ambulance(&self, id: AmbulanceId) -> Result<(), DispatchError> {
        if let Some(emergency) = self.active_emergency_for(id).await? {
            return Err(DispatchError::AmbulanceInUse {
                id,
                emergency_id: emergency.id,
            });
        }
        let ambulance = bounded(self.store_timeout(), self.store.ambulance(id)).await?;
        bounded(
            self.store_timeout(),
            self.store
                .delete(EntityKey::new(EntityKind::Ambulance, id), ambulance.version),
        )
        .await?;
        tracing::info!(ambulance_id = %id, "Ambulance decommissioned");
        Ok(())
    }

    /// Driver status telemetry.
    ///
    /// The bound emergency follows the ambulance in the same batch:
    /// arriving on scene moves it to `on_scene`, leaving the scene
    /// completes it and releases its references. Returning to `idle`
    /// retries deferred emergencies.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] for illegal edges.
    pub async fn update_ambulance_status(
        &self,
        id: AmbulanceId,
        next: AmbulanceStatus,
    ) -> Result<Ambulance, DispatchError> {
        for _ in 0..self.max_attempts() {
            let mut ambulance = bounded(self.store_timeout(), self.store.ambulance(id)).await?;
            check_ambulance(ambulance.status, next)?;
            let bound = self.active_emergency_for(id).await?;

            ambulance.status = next;
            let mut batch = WriteBatch::new().update(ambulance);
            let mut settled = None;
            if let Some(mut emergency) = bound
                && follow_ambulance(&mut emergency, next)?
            {
                settled = Some(emergency.id);
                batch.push(emergency);
            }

            match bounded(self.store_timeout(), self.store.apply(batch)).await {
                Ok(committed) => {
                    if let Some(emergency_id) = settled {
                        self.tracker.lock().await.forget(emergency_id);
                    }
                    let ambulance = committed
                        .into_iter()
                        .find_map(Entity::into_ambulance)
                        .ok_or(DispatchError::NotFound(EntityKey::new(EntityKind::Ambulance, id)))?;
                    tracing::info!(ambulance_id = %id, status = %next, "Ambulance status updated");
                    if next == AmbulanceStatus::Idle && ambulance.is_staffed() {
                        self.retry_after_commit().await;
                    }
                    return Ok(ambulance);
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Err(self.contended(EntityKind::Ambulance, id))
    }

    /// Driver acknowledges the assignment: emergency `assigned -> en_route`.
    pub async fn acknowledge(&self, id: AmbulanceId) -> Result<Emergency, DispatchError> {
        for _ in 0..self.max_attempts() {
            let Some(mut emergency) = self.active_emergency_for(id).await? else {
                return Err(DispatchError::Validation(format!(
                    "ambulance {id} has no assigned emergency"
                )));
            };
            check_emergency(emergency.status, EmergencyStatus::EnRoute)?;
            emergency.status = EmergencyStatus::EnRoute;

            match bounded(self.store_timeout(), self.store.update(emergency.into())).await {
                Ok(committed) => {
                    let emergency = committed
                        .into_emergency()
                        .ok_or_else(|| DispatchError::Validation(String::from("wrong kind")))?;
                    tracing::info!(emergency_id = %emergency.id, ambulance_id = %id, "Assignment acknowledged");
                    return Ok(emergency);
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Err(self.contended(EntityKind::Ambulance, id))
    }

    /// Driver position telemetry. Refreshes the bound emergency's ETA once
    /// the ambulance has moved past the recompute threshold.
    pub async fn update_ambulance_position(
        &self,
        id: AmbulanceId,
        position: Position,
    ) -> Result<Ambulance, DispatchError> {
        validate_position(position)?;
        let mut committed = None;
        for _ in 0..self.max_attempts() {
            let mut ambulance = bounded(self.store_timeout(), self.store.ambulance(id)).await?;
            ambulance.current_position = Some(position);
            match bounded(self.store_timeout(), self.store.update(ambulance.into())).await {
                Ok(entity) => {
                    committed = entity.into_ambulance();
                    break;
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        let Some(ambulance) = committed else {
            return Err(self.contended(EntityKind::Ambulance, id));
        };

        if let Some(emergency) = self.active_emergency_for(id).await? {
            let due = emergency.status.tracks_eta()
                && self
                    .tracker
                    .lock()
                    .await
                    .should_recompute(emergency.id, position);
            if due {
                self.refresh_eta(emergency.id, position).await?;
            }
        }
        Ok(ambulance)
    }

    /// Recompute one emergency's ETA from `origin`.
    async fn refresh_eta(
        &self,
        id: EmergencyId,
        origin: Position,
    ) -> Result<Option<Emergency>, DispatchError> {
        for _ in 0..self.max_attempts() {
            let mut emergency = self.emergency(id).await?;
            if !emergency.status.tracks_eta() {
                self.tracker.lock().await.forget(id);
                return Ok(None);
            }
            let hazards = self.active_hazards().await?;
            let eta = self
                .eta
                .estimate(origin, emergency.position, &hazards, emergency.eta_minutes)
                .await;
            if emergency.eta_minutes == Some(eta.minutes) && emergency.eta_degraded == eta.degraded
            {
                self.tracker.lock().await.record(id, origin);
                return Ok(Some(emergency));
            }
            emergency.eta_minutes = Some(eta.minutes);
            emergency.eta_degraded = eta.degraded;

            match bounded(self.store_timeout(), self.store.update(emergency.into())).await {
                Ok(committed) => {
                    self.tracker.lock().await.record(id, origin);
                    tracing::debug!(emergency_id = %id, minutes = eta.minutes, degraded = eta.degraded, "ETA refreshed");
                    return Ok(committed.into_emergency());
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Refresh ETAs on routes near `hazard`, or every live ETA when `None`.
    /// Returns how many were recomputed.
    pub async fn refresh_etas_near(&self, hazard: Option<&Hazard>) -> Result<usize, DispatchError> {
        let live = self
            .emergencies(EmergencyFilter {
                statuses: vec![EmergencyStatus::Assigned, EmergencyStatus::EnRoute],
                ..EmergencyFilter::default()
            })
            .await?;

        let mut refreshed: usize = 0;
        for emergency in live {
            let Some(ambulance_id) = emergency.assigned_ambulance_id else {
                continue;
            };
            let tracked = self.tracker.lock().await.origin(emergency.id);
            let origin = match tracked {
                Some(o) => Some(o),
                None => match bounded(self.store_timeout(), self.store.ambulance(ambulance_id)).await {
                    Ok(ambulance) => ambulance.current_position,
                    Err(e) => {
                        tracing::warn!(
                            emergency_id = %emergency.id,
                            ambulance_id = %ambulance_id,
                            error = %e,
                            "Skipping ETA refresh, ambulance unreadable"
                        );
                        None
                    }
                },
            };
            let Some(origin) = origin else {
                continue;
            };
            let affected =
                hazard.is_none_or(|h| self.overlay.affects_route(h, origin, emergency.position));
            if affected && self.refresh_eta(emergency.id, origin).await?.is_some() {
                refreshed = refreshed.saturating_add(1);
            }
        }
        Ok(refreshed)
    }

    // -----------------------------------------------------------------------
    // Hospitals
    // -----------------------------------------------------------------------

    /// Register a receiving hospital.
    pub async fn register_hospital(
        &self,
        registration: HospitalRegistration,
    ) -> Result<Hospital, DispatchError> {
        if registration.name.trim().is_empty() {
            return Err(DispatchError::Validation(String::from(
                "name must not be empty",
            )));
        }
        validate_position(Position::new(registration.latitude, registration.longitude))?;
        validate_beds(registration.available_beds, registration.capacity)?;

        let hospital = registration.into_hospital(Utc::now());
        let inserted = bounded(self.store_timeout(), self.store.insert(hospital.into()))
            .await?
            .into_hospital()
            .ok_or_else(|| DispatchError::Validation(String::from("insert returned wrong kind")))?;
        tracing::info!(hospital_id = %inserted.id, name = %inserted.name, "Hospital registered");
        Ok(inserted)
    }

    /// Admission/discharge feed: set the free bed count.
    pub async fn update_hospital_beds(
        &self,
        id: HospitalId,
        available_beds: u32,
    ) -> Result<Hospital, DispatchError> {
        for _ in 0..self.max_attempts() {
            let mut hospital = bounded(self.store_timeout(), self.store.hospital(id)).await?;
            validate_beds(available_beds, hospital.capacity)?;
            hospital.available_beds = available_beds;
            match bounded(self.store_timeout(), self.store.update(hospital.into())).await {
                Ok(committed) => {
                    return committed
                        .into_hospital()
                        .ok_or(DispatchError::NotFound(EntityKey::new(EntityKind::Hospital, id)));
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Err(self.contended(EntityKind::Hospital, id))
    }

    // -----------------------------------------------------------------------
    // Hazards
    // -----------------------------------------------------------------------

    /// Record a hazard and refresh ETAs it touches.
    pub async fn report_hazard(&self, report: HazardReport) -> Result<Hazard, DispatchError> {
        validate_position(Position::new(report.latitude, report.longitude))?;
        if !(report.radius_km.is_finite() && report.radius_km > 0.0) {
            return Err(DispatchError::Validation(String::from(
                "radius_km must be positive",
            )));
        }
        let hazard = report.into_hazard(Utc::now());
        let inserted = bounded(self.store_timeout(), self.store.insert(hazard.into()))
            .await?
            .into_hazard()
            .ok_or_else(|| DispatchError::Validation(String::from("insert returned wrong kind")))?;
        tracing::info!(
            hazard_id = %inserted.id,
            hazard_type = %inserted.hazard_type,
            severity = %inserted.severity,
            "Hazard reported"
        );
        self.refresh_after_commit(&inserted).await;
        Ok(inserted)
    }

    /// Manually clear a hazard and refresh ETAs it touched.
    pub async fn clear_hazard(&self, id: HazardId) -> Result<Hazard, DispatchError> {
        for _ in 0..self.max_attempts() {
            let mut hazard = bounded(self.store_timeout(), self.store.hazard(id)).await?;
            if !hazard.is_active {
                return Ok(hazard);
            }
            hazard.is_active = false;
            match bounded(self.store_timeout(), self.store.update(hazard.into())).await {
                Ok(committed) => {
                    let hazard = committed
                        .into_hazard()
                        .ok_or(DispatchError::NotFound(EntityKey::new(EntityKind::Hazard, id)))?;
                    tracing::info!(hazard_id = %id, "Hazard cleared");
                    self.refresh_after_commit(&hazard).await;
                    return Ok(hazard);
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Err(self.contended(EntityKind::Hazard, id))
    }

    /// Flip the persisted flag of hazards past their expiry. Returns how
    /// many were flipped. Reads never depend on this.
    pub async fn sweep_expired_hazards(&self) -> Result<usize, DispatchError> {
        let now = Utc::now();
        let hazards: Vec<Hazard> = bounded(self.store_timeout(), self.store.list(EntityKind::Hazard))
            .await?
            .into_iter()
            .filter_map(Entity::into_hazard)
            .collect();

        let mut flipped: usize = 0;
        for hazard in HazardOverlay::expired(&hazards, now) {
            let mut cleared = hazard.clone();
            cleared.is_active = false;
            match bounded(self.store_timeout(), self.store.update(cleared.into())).await {
                Ok(_) => {
                    flipped = flipped.saturating_add(1);
                    tracing::info!(hazard_id = %hazard.id, "Hazard expired");
                    self.refresh_after_commit(hazard).await;
                }
                // Changed under us; the next sweep looks again.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(flipped)
    }

    // Follow-up work after a committed write. The write stands either way,
    // so failures are logged and left to the reactor's reconcile.

    async fn retry_after_commit(&self) {
        if let Err(e) = self.retry_deferred().await {
            tracing::warn!(error = %e, "Deferred retry after commit failed");
        }
    }

    async fn refresh_after_commit(&self, hazard: &Hazard) {
        if let Err(e) = self.refresh_etas_near(Some(hazard)).await {
            tracing::warn!(hazard_id = %hazard.id, error = %e, "ETA refresh after hazard change failed");
        }
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    /// Run the expiry sweep forever at the configured interval.
    pub async fn run_hazard_sweep(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.hazards.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_expired_hazards().await {
                tracing::warn!(error = %e, "Hazard sweep failed");
            }
        }
    }

    /// Watch the change feed and reconcile whenever notifications may have
    /// been lost: retry deferred emergencies and refresh every live ETA.
    pub async fn run_reactor(self: Arc<Self>) {
        let mut changes = match bounded(
            self.store_timeout(),
            self.store.subscribe(EntityKind::Ambulance),
        )
        .await
        {
            Ok(feed) => feed.changes,
            Err(e) => {
                tracing::error!(error = %e, "Reactor could not subscribe");
                return;
            }
        };
        tracing::info!("Reactor started");
        // Work queued while the engine was down.
        self.reconcile().await;

        loop {
            match changes.recv().await {
                Ok(FeedItem::Change(_)) => {}
                Ok(FeedItem::Gap) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    self.reconcile().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!("Change feed closed, reactor stopping");
                    return;
                }
            }
        }
    }

    async fn reconcile(&self) {
        if let Err(e) = self.retry_deferred().await {
            tracing::warn!(error = %e, "Reconcile: retry failed");
        }
        if let Err(e) = self.refresh_etas_near(None).await {
            tracing::warn!(error = %e, "Reconcile: ETA refresh failed");
        }
    }
}

/// Move the emergency bound to an ambulance along with it.
///
/// Returns whether the emergency changed and leaves ETA tracking.
fn follow_ambulance(
    emergency: &mut Emergency,
    ambulance_next: AmbulanceStatus,
) -> Result<bool, DispatchError> {
    match (ambulance_next, emergency.status) {
        (AmbulanceStatus::OnScene, EmergencyStatus::Assigned) => {
            // Arrived without acknowledging: pass through en_route.
            check_emergency(EmergencyStatus::Assigned, EmergencyStatus::EnRoute)?;
            check_emergency(EmergencyStatus::EnRoute, EmergencyStatus::OnScene)?;
            emergency.status = EmergencyStatus::OnScene;
        }
        (AmbulanceStatus::OnScene, EmergencyStatus::EnRoute) => {
            check_emergency(EmergencyStatus::EnRoute, EmergencyStatus::OnScene)?;
            emergency.status = EmergencyStatus::OnScene;
        }
        (AmbulanceStatus::Returning, EmergencyStatus::OnScene) => {
            check_emergency(EmergencyStatus::OnScene, EmergencyStatus::Completed)?;
            emergency.status = EmergencyStatus::Completed;
            emergency.clear_assignment();
            return Ok(true);
        }
        _ => return Ok(false),
    }
    emergency.eta_minutes = None;
    emergency.eta_degraded = false;
    Ok(true)
}

fn validate_position(position: Position) -> Result<(), DispatchError> {
    if position.is_valid() {
        Ok(())
    } else {
        Err(DispatchError::Validation(format!(
            "position ({}, {}) is out of range",
            position.latitude, position.longitude
        )))
    }
}

fn validate_beds(available: u32, capacity: u32) -> Result<(), DispatchError> {
    if available > capacity {
        return Err(DispatchError::Validation(format!(
            "available_beds {available} exceeds capacity {capacity}"
        )));
    }
    Ok(())
}
