//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use dispatch_core::RoutingService;
use dispatch_store::EntityStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// See [`handlers`] for the REST table; `GET /ws/subscribe` is the live
/// feed.
pub fn build_router<S, R>(state: Arc<AppState<S, R>>) -> Router
where
    S: EntityStore,
    R: RoutingService,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::<S, R>))
        // WebSocket
        .route("/ws/subscribe", get(ws::ws_subscribe::<S, R>))
        // Emergencies
        .route(
            "/api/emergencies",
            get(handlers::list_emergencies::<S, R>).post(handlers::report_emergency::<S, R>),
        )
        .route("/api/emergencies/{id}", get(handlers::get_emergency::<S, R>))
        .route(
            "/api/emergencies/{id}/cancel",
            post(handlers::cancel_emergency::<S, R>),
        )
        .route(
            "/api/emergencies/{id}/assign",
            post(handlers::assign_emergency::<S, R>),
        )
        // Ambulances
        .route(
            "/api/ambulances",
            get(handlers::list_ambulances::<S, R>).post(handlers::register_ambulance::<S, R>),
        )
        .route(
            "/api/ambulances/{id}",
            delete(handlers::decommission_ambulance::<S, R>),
        )
        .route(
            "/api/ambulances/{id}/status",
            post(handlers::update_ambulance_status::<S, R>),
        )
        .route(
            "/api/ambulances/{id}/position",
            post(handlers::update_ambulance_position::<S, R>),
        )
        .route(
            "/api/ambulances/{id}/acknowledge",
            post(handlers::acknowledge::<S, R>),
        )
        // Hospitals
        .route(
            "/api/hospitals",
            get(handlers::list_hospitals::<S, R>).post(handlers::register_hospital::<S, R>),
        )
        .route(
            "/api/hospitals/{id}/beds",
            post(handlers::update_hospital_beds::<S, R>),
        )
        // Hazards
        .route(
            "/api/hazards",
            get(handlers::list_hazards::<S, R>).post(handlers::report_hazard::<S, R>),
        )
        .route(
            "/api/hazards/{id}/clear",
            post(handlers::clear_hazard::<S, R>),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
