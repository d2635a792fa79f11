//! Error types for the entity store.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! [`sqlx`] errors and adds the optimistic-concurrency outcomes callers
//! need to branch on ([`StoreError::Conflict`] in particular).

use dispatch_types::EntityKey;

/// Errors that can occur in the entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The record does not exist.
    #[error("entity not found: {0}")]
    NotFound(EntityKey),

    /// A record with the same key already exists.
    #[error("entity already exists: {0}")]
    AlreadyExists(EntityKey),

    /// The record changed since it was read (stale write).
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        /// The contended record.
        key: EntityKey,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// A write batch was malformed (e.g. the same key twice).
    #[error("invalid write batch: {0}")]
    InvalidBatch(String),

    /// The store could not complete the operation; nothing was committed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the error is a stale-write conflict that a caller may
    /// resolve by re-reading and retrying.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
