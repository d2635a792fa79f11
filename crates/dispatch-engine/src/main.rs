//! Dispatch engine binary.
//!
//! This is the main entry point that wires together the entity store,
//! the routing backend, the coordinator's background tasks, and the
//! Observer API. It loads configuration, initializes all subsystems, and
//! runs until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `dispatch-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Select the routing backend
//! 4. Connect the entity store (in-memory or `PostgreSQL`)
//! 5. Create the coordinator and spawn the telemetry reactor and hazard sweep
//! 6. Resume emergencies left pending by a previous run
//! 7. Start the Observer API server
//! 8. Wait for Ctrl-C, then stop background tasks

mod error;
mod routing;

use std::path::Path;
use std::sync::Arc;

use dispatch_core::config::StoreBackend;
use dispatch_core::{Coordinator, DispatchConfig};
use dispatch_observer::state::AppState;
use dispatch_store::{EntityStore, MemoryStore, PostgresConfig, PostgresStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::routing::RoutingBackend;

/// Configuration file read from the working directory.
const CONFIG_PATH: &str = "dispatch-config.yaml";

/// Application entry point for the dispatch engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = DispatchConfig::load_or_default(Path::new(CONFIG_PATH)).map_err(EngineError::from)?;

    // 2. Initialize structured logging. RUST_LOG wins over the config level.
    init_logging(&config);
    info!("dispatch-engine starting");
    info!(
        store = ?config.infrastructure.store,
        observer_port = config.infrastructure.observer_port,
        store_timeout_ms = config.timeouts.store_ms,
        routing_timeout_ms = config.timeouts.routing_ms,
        "Configuration loaded"
    );

    // 3. Select the routing backend.
    let routing = RoutingBackend::from_url(config.infrastructure.routing_url.as_deref());
    info!(backend = routing.name(), "Routing backend selected");

    // 4. Connect the entity store and run until shutdown.
    let backend = config.infrastructure.store;
    match backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; state is lost on restart");
            run(Arc::new(MemoryStore::new()), routing, config).await?;
        }
        StoreBackend::Postgres => {
            let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
                .with_max_connections(config.infrastructure.postgres_max_connections)
                .with_connect_timeout(config.infrastructure.postgres_connect_timeout());
            let store = Arc::new(
                PostgresStore::connect(&pg_config)
                    .await
                    .map_err(EngineError::from)?,
            );
            info!("PostgreSQL store connected and migrated");
            let result = run(Arc::clone(&store), routing, config).await;
            store.close().await;
            result?;
        }
    }

    info!("dispatch-engine stopped");
    Ok(())
}

/// Install the global tracing subscriber.
fn init_logging(config: &DispatchConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Steps 5 to 8 over whichever store was selected.
async fn run<S: EntityStore>(
    store: Arc<S>,
    routing: RoutingBackend,
    config: DispatchConfig,
) -> Result<(), EngineError> {
    let observer_port = config.infrastructure.observer_port;

    // 5. Coordinator and background tasks.
    let coordinator = Arc::new(Coordinator::new(store, routing, config));
    let reactor = tokio::spawn(Arc::clone(&coordinator).run_reactor());
    let sweep = tokio::spawn(Arc::clone(&coordinator).run_hazard_sweep());
    info!("Telemetry reactor and hazard sweep started");

    // 6. Resume pending emergencies.
    match coordinator.retry_deferred().await {
        Ok(assigned) => info!(assigned, "Pending emergencies resumed"),
        Err(e) => warn!(error = %e, "Could not resume pending emergencies"),
    }

    // 7. Observer API.
    let app_state = Arc::new(AppState::new(Arc::clone(&coordinator)));
    let observer = dispatch_observer::startup::spawn_observer(observer_port, app_state)
        .map_err(|e| EngineError::Observer {
            message: format!("{e}"),
        })?;
    info!(port = observer_port, "Observer API server started");

    // 8. Shutdown.
    let signal = tokio::signal::ctrl_c().await.map_err(|e| EngineError::Signal {
        message: format!("{e}"),
    });
    info!("Shutdown requested, stopping background tasks");
    observer.abort();
    reactor.abort();
    sweep.abort();
    signal
}
