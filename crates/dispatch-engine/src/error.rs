//! Error types for the dispatch engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup.

/// Top-level error for the dispatch engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: dispatch_core::config::ConfigError,
    },

    /// Connecting to or migrating the entity store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: dispatch_store::StoreError,
    },

    /// The routing client could not be built.
    #[error("routing error: {message}")]
    Routing {
        /// Description of the routing failure.
        message: String,
    },

    /// Observer API server failed to start.
    #[error("observer error: {message}")]
    Observer {
        /// Description of the observer failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the signal failure.
        message: String,
    },
}
