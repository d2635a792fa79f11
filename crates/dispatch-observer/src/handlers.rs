//! REST endpoint handlers for the Observer server.
//!
//! Read endpoints query the store through the shared [`AppState`];
//! command endpoints call the matching [`Coordinator`] trigger.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness and uptime |
//! | `GET` | `/api/emergencies` | List emergencies (filterable) |
//! | `POST` | `/api/emergencies` | Report intake; attempts assignment |
//! | `GET` | `/api/emergencies/{id}` | Single emergency |
//! | `POST` | `/api/emergencies/{id}/cancel` | Cancel |
//! | `POST` | `/api/emergencies/{id}/assign` | Automatic or manual assignment |
//! | `GET` | `/api/ambulances` | List ambulances (filterable) |
//! | `POST` | `/api/ambulances` | Register a vehicle |
//! | `DELETE` | `/api/ambulances/{id}` | Decommission |
//! | `POST` | `/api/ambulances/{id}/status` | Driver status telemetry |
//! | `POST` | `/api/ambulances/{id}/position` | Driver position telemetry |
//! | `POST` | `/api/ambulances/{id}/acknowledge` | Driver acknowledges assignment |
//! | `GET` | `/api/hospitals` | List hospitals |
//! | `POST` | `/api/hospitals` | Register a hospital |
//! | `POST` | `/api/hospitals/{id}/beds` | Set free bed count |
//! | `GET` | `/api/hazards` | List hazards (expired ones hidden) |
//! | `POST` | `/api/hazards` | Report a hazard |
//! | `POST` | `/api/hazards/{id}/clear` | Clear a hazard |
//!
//! [`Coordinator`]: dispatch_core::Coordinator

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use dispatch_core::{AssignmentResult, DeferReason, RoutingService};
use dispatch_store::EntityStore;
use dispatch_types::{
    AmbulanceId, AmbulanceRegistration, AmbulanceStatus, EmergencyId, EmergencyReport, Entity,
    EntityKind, HazardId, HazardReport, HospitalId, HospitalRegistration, Position,
};
use uuid::Uuid;

use crate::error::ObserverError;
use crate::query::FilterQuery;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Request body for `POST /api/emergencies/{id}/assign`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct AssignRequest {
    /// Ambulance chosen by the dispatcher; absent for automatic selection.
    #[serde(default)]
    pub ambulance_id: Option<AmbulanceId>,
}

/// Request body for `POST /api/ambulances/{id}/status`.
#[derive(Debug, serde::Deserialize)]
pub struct StatusRequest {
    /// Requested status.
    pub status: AmbulanceStatus,
}

/// Request body for `POST /api/hospitals/{id}/beds`.
#[derive(Debug, serde::Deserialize)]
pub struct BedsRequest {
    /// Free beds after the admission or discharge.
    pub available_beds: u32,
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health<S, R>(State(state): State<Arc<AppState<S, R>>>) -> impl IntoResponse
where
    S: EntityStore,
    R: RoutingService,
{
    let uptime_secs = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    Json(serde_json::json!({
        "status": "ok",
        "started_at": state.started_at,
        "uptime_secs": uptime_secs,
    }))
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

async fn list_filtered<S, R>(
    state: &AppState<S, R>,
    params: FilterQuery,
    kind: EntityKind,
    field: &'static str,
) -> Result<Json<serde_json::Value>, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    if params.kind.is_some_and(|k| k != kind) {
        return Err(ObserverError::InvalidQuery(format!(
            "kind must be {kind} on this route"
        )));
    }
    let filter = params.into_filter(kind)?;
    let records = state.coordinator.query(&filter).await?;
    records_json(&records, field)
}

/// `{"count": n, <field>: [record, ...]}` with bare records.
fn records_json(
    records: &[Entity],
    field: &'static str,
) -> Result<Json<serde_json::Value>, ObserverError> {
    let bare = records
        .iter()
        .map(|entity| match entity {
            Entity::Emergency(e) => serde_json::to_value(e),
            Entity::Ambulance(a) => serde_json::to_value(a),
            Entity::Hospital(h) => serde_json::to_value(h),
            Entity::Hazard(h) => serde_json::to_value(h),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut body = serde_json::Map::new();
    body.insert(String::from("count"), serde_json::Value::from(bare.len()));
    body.insert(String::from(field), serde_json::Value::Array(bare));
    Ok(Json(serde_json::Value::Object(body)))
}

/// `GET /api/emergencies`
pub async fn list_emergencies<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Query(params): Query<FilterQuery>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    list_filtered(&state, params, EntityKind::Emergency, "emergencies").await
}

/// `GET /api/ambulances`
pub async fn list_ambulances<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Query(params): Query<FilterQuery>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    list_filtered(&state, params, EntityKind::Ambulance, "ambulances").await
}

/// `GET /api/hospitals`
pub async fn list_hospitals<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    list_filtered(
        &state,
        FilterQuery::default(),
        EntityKind::Hospital,
        "hospitals",
    )
    .await
}

/// `GET /api/hazards`. Expired hazards are never listed.
pub async fn list_hazards<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let hazards = state.coordinator.list(EntityKind::Hazard).await?;
    records_json(&hazards, "hazards")
}

// ---------------------------------------------------------------------------
// Emergencies
// ---------------------------------------------------------------------------

/// `GET /api/emergencies/{id}`
pub async fn get_emergency<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = EmergencyId::from(parse_uuid(&id_str)?);
    Ok(Json(state.coordinator.emergency(id).await?))
}

/// `POST /api/emergencies`
///
/// Responds `201` with the emergency and the assignment outcome. A
/// deferred or failed assignment still records the report.
pub async fn report_emergency<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(body): Json<EmergencyReport>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let outcome = state.coordinator.report_emergency(body).await?;
    let assignment = outcome.assignment.as_ref().map(assignment_json);
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "emergency": outcome.emergency,
            "assignment": assignment,
        })),
    ))
}

/// `POST /api/emergencies/{id}/cancel`
pub async fn cancel_emergency<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = EmergencyId::from(parse_uuid(&id_str)?);
    Ok(Json(state.coordinator.cancel_emergency(id).await?))
}

/// `POST /api/emergencies/{id}/assign`
///
/// With `ambulance_id` the dispatcher's choice is committed; without it
/// the engine picks.
pub async fn assign_emergency<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = EmergencyId::from(parse_uuid(&id_str)?);
    let result = match body.ambulance_id {
        Some(ambulance) => {
            let assignment = state.coordinator.assign_to(id, ambulance).await?;
            AssignmentResult::Assigned(Box::new(assignment))
        }
        None => state.coordinator.assign(id).await?,
    };
    Ok(Json(assignment_json(&result)))
}

fn assignment_json(result: &AssignmentResult) -> serde_json::Value {
    match result {
        AssignmentResult::Assigned(a) => serde_json::json!({
            "outcome": "assigned",
            "ambulance_id": a.ambulance.id,
            "hospital_id": a.emergency.assigned_hospital_id,
            "eta_minutes": a.emergency.eta_minutes,
            "eta_degraded": a.emergency.eta_degraded,
        }),
        AssignmentResult::Deferred(DeferReason::NoAmbulanceAvailable) => serde_json::json!({
            "outcome": "deferred",
            "reason": "no_ambulance_available",
        }),
    }
}

// ---------------------------------------------------------------------------
// Ambulances
// ---------------------------------------------------------------------------

/// `POST /api/ambulances`
pub async fn register_ambulance<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(body): Json<AmbulanceRegistration>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let ambulance = state.coordinator.register_ambulance(body).await?;
    Ok((StatusCode::CREATED, Json(ambulance)))
}

/// `DELETE /api/ambulances/{id}`
pub async fn decommission_ambulance<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = AmbulanceId::from(parse_uuid(&id_str)?);
    state.coordinator.decommission_ambulance(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/ambulances/{id}/status`
pub async fn update_ambulance_status<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
    Json(body): Json<StatusRequest>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = AmbulanceId::from(parse_uuid(&id_str)?);
    Ok(Json(
        state
            .coordinator
            .update_ambulance_status(id, body.status)
            .await?,
    ))
}

/// `POST /api/ambulances/{id}/position`
pub async fn update_ambulance_position<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
    Json(body): Json<Position>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = AmbulanceId::from(parse_uuid(&id_str)?);
    Ok(Json(
        state.coordinator.update_ambulance_position(id, body).await?,
    ))
}

/// `POST /api/ambulances/{id}/acknowledge`
pub async fn acknowledge<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = AmbulanceId::from(parse_uuid(&id_str)?);
    Ok(Json(state.coordinator.acknowledge(id).await?))
}

// ---------------------------------------------------------------------------
// Hospitals
// ---------------------------------------------------------------------------

/// `POST /api/hospitals`
pub async fn register_hospital<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(body): Json<HospitalRegistration>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let hospital = state.coordinator.register_hospital(body).await?;
    Ok((StatusCode::CREATED, Json(hospital)))
}

/// `POST /api/hospitals/{id}/beds`
pub async fn update_hospital_beds<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
    Json(body): Json<BedsRequest>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = HospitalId::from(parse_uuid(&id_str)?);
    Ok(Json(
        state
            .coordinator
            .update_hospital_beds(id, body.available_beds)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// Hazards
// ---------------------------------------------------------------------------

/// `POST /api/hazards`
pub async fn report_hazard<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(body): Json<HazardReport>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let hazard = state.coordinator.report_hazard(body).await?;
    Ok((StatusCode::CREATED, Json(hazard)))
}

/// `POST /api/hazards/{id}/clear`
pub async fn clear_hazard<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let id = HazardId::from(parse_uuid(&id_str)?);
    Ok(Json(state.coordinator.clear_hazard(id).await?))
}

fn parse_uuid(s: &str) -> Result<Uuid, ObserverError> {
    s.parse::<Uuid>()
        .map_err(|e| ObserverError::InvalidUuid(format!("{s}: {e}")))
}
