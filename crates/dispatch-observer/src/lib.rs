//! Observer and command API server for the dispatch engine.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/subscribe`) for filtered live views:
//!   a snapshot of every matching record, then per-record changes in
//!   commit order
//! - **REST endpoints** for reading emergencies, ambulances, hospitals and
//!   hazards
//! - **Command endpoints** for report intake, dispatcher overrides, driver
//!   telemetry and hazard reports
//!
//! # Architecture
//!
//! Every route is a thin adapter over a shared
//! [`Coordinator`](dispatch_core::Coordinator). The server holds no
//! records of its own; `WebSocket` clients are served by one
//! [`Subscription`](dispatch_core::Subscription) each.

pub mod error;
pub mod handlers;
pub mod query;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
