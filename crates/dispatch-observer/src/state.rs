//! Shared application state for the Observer API server.
//!
//! [`AppState`] wraps the engine's [`Coordinator`]; every handler reads and
//! writes through it so the HTTP surface never bypasses transition checks
//! or version guards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dispatch_core::{ChangeNotifier, Coordinator, RoutingService};
use dispatch_store::EntityStore;

/// State shared by all route handlers.
pub struct AppState<S, R> {
    /// The dispatch coordinator.
    pub coordinator: Arc<Coordinator<S, R>>,
    /// When the server state was created.
    pub started_at: DateTime<Utc>,
}

impl<S, R> AppState<S, R> {
    /// Wrap a coordinator.
    pub fn new(coordinator: Arc<Coordinator<S, R>>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }

    /// The observer subscription fanout.
    pub fn notifier(&self) -> &ChangeNotifier<S>
    where
        S: EntityStore,
        R: RoutingService,
    {
        self.coordinator.notifier()
    }
}

impl<S, R> core::fmt::Debug for AppState<S, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
