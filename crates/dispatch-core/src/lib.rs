//! Coordination logic for the ambulance dispatch engine.
//!
//! This crate decides which ambulance answers which emergency, how long it
//! will take to arrive, and how every change reaches connected observers.
//! All state lives in a [`dispatch_store::EntityStore`]; nothing here holds
//! records between calls except the ETA tracker's last-origin cache.
//!
//! # Modules
//!
//! - [`coordinator`] -- [`Coordinator`]: every trigger enters here
//! - [`assignment`] -- Candidate ranking, hospital selection and the
//!   atomic assignment commit
//! - [`eta`] -- [`RoutingService`] trait, hazard-adjusted ETA estimation and
//!   the recompute threshold tracker
//! - [`hazard`] -- Hazard overlay: vicinity, route impact, penalty factor
//! - [`notifier`] -- Per-observer snapshot-then-stream subscriptions
//! - [`transition`] -- Emergency and ambulance status machines
//! - [`geo`] -- Great-circle distance and midpoint
//! - [`config`] -- `dispatch-config.yaml` loading
//! - [`error`] -- [`DispatchError`]
//!
//! [`Coordinator`]: coordinator::Coordinator
//! [`RoutingService`]: eta::RoutingService
//! [`DispatchError`]: error::DispatchError

pub mod assignment;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eta;
pub mod geo;
pub mod hazard;
pub mod notifier;
pub mod transition;

pub use assignment::{Assignment, AssignmentEngine, AssignmentResult, DeferReason};
pub use config::DispatchConfig;
pub use coordinator::{Coordinator, ReportOutcome};
pub use error::DispatchError;
pub use eta::{Eta, EtaEstimator, RouteEstimate, RoutingError, RoutingService, StraightLine};
pub use hazard::HazardOverlay;
pub use notifier::{ChangeNotifier, Subscription, SubscriptionState};
pub use transition::TransitionError;
