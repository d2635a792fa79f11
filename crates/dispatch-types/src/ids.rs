//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every record the dispatch engine touches has a strongly-typed ID so an
//! ambulance ID can never be passed where an emergency ID is expected.
//! IDs are totally ordered; the assignment engine relies on that ordering
//! for its deterministic lowest-id tie-break.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a reported emergency.
    EmergencyId
}

define_id! {
    /// Unique identifier for a registered ambulance.
    AmbulanceId
}

define_id! {
    /// Unique identifier for a hospital.
    HospitalId
}

define_id! {
    /// Unique identifier for a reported hazard.
    HazardId
}

define_id! {
    /// Unique identifier for a user (reporter or driver).
    UserId
}

define_id! {
    /// Unique identifier for an observer subscription.
    ObserverId
}
