//! Entity store for the dispatch coordination engine.
//!
//! Holds the four record collections (emergencies, ambulances, hospitals,
//! hazards) behind the [`EntityStore`] trait and publishes every committed
//! write on a commit-ordered [`ChangeFeed`].
//!
//! # Architecture
//!
//! ```text
//! writer --read--> record@v
//!        --apply(WriteBatch [record@v, ...])--> CAS on every version
//!                                               |
//!                           all match: commit --+--> ChangeFeed (commit order)
//!                           any stale: Conflict, nothing committed
//! ```
//!
//! # Modules
//!
//! - [`store`] -- The [`EntityStore`] trait and atomic [`WriteBatch`]
//! - [`memory`] -- In-process store for tests and single-node deployments
//! - [`postgres`] -- `PostgreSQL` document store with `LISTEN/NOTIFY` feed
//! - [`feed`] -- Broadcast change feed and snapshot subscriptions
//! - [`filter`] -- Record filters shared with observer subscriptions
//! - [`error`] -- Shared error types

pub mod error;
pub mod feed;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use feed::{ChangeFeed, DEFAULT_FEED_CAPACITY, FeedItem, FeedSubscription};
pub use filter::{AmbulanceFilter, EmergencyFilter, EntityFilter, HazardFilter};
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresPool, PostgresStore};
pub use store::{EntityStore, WriteBatch};
