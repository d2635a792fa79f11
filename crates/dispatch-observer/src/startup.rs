//! Observer server startup helper for embedding in the engine binary.
//!
//! Provides [`spawn_observer`] which launches the Observer HTTP +
//! `WebSocket` server on a background Tokio task so the API runs
//! alongside the engine's reactor and hazard sweep.

use std::sync::Arc;

use dispatch_core::RoutingService;
use dispatch_store::EntityStore;
use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the Observer HTTP server on a background Tokio task.
///
/// Binds to `0.0.0.0:{port}`. The caller holds the returned handle and
/// aborts or awaits it during shutdown.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address is malformed. Bind
/// failures happen on the background task and are logged there.
pub fn spawn_observer<S, R>(
    port: u16,
    state: Arc<AppState<S, R>>,
) -> Result<JoinHandle<()>, StartupError>
where
    S: EntityStore,
    R: RoutingService,
{
    let config = ServerConfig {
        host: String::from("0.0.0.0"),
        port,
    };
    config.addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = crate::server::start_server(&config, state).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(port, "Observer server spawned on background task");
    Ok(handle)
}
