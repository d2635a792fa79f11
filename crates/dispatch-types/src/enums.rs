//! Enumeration types for the dispatch engine.
//!
//! Every enum serializes in `snake_case` (`en_route`, `on_scene`, ...).
//! Those strings are the canonical contract shared with every transport
//! and with the `PostgreSQL` document columns, so they must never change.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A string could not be parsed into one of the enums in this module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    /// Name of the enum being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Implements `as_str`, [`Display`](fmt::Display) and [`FromStr`] from a
/// single variant/string table.
macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// The canonical wire string for this variant.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $label,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of an emergency or a hazard.
///
/// Variants are declared from least to most severe so the derived
/// ordering can be used for "at least this severe" filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Severity {
    /// Minor; no time pressure.
    Low,
    /// Needs attention soon.
    Medium,
    /// Serious; respond quickly.
    High,
    /// Life-threatening.
    Critical,
}

string_enum!(Severity, "severity", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

// ---------------------------------------------------------------------------
// Emergency status
// ---------------------------------------------------------------------------

/// Lifecycle status of an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EmergencyStatus {
    /// Reported, awaiting an ambulance.
    Pending,
    /// An ambulance has been bound to the emergency.
    Assigned,
    /// The crew acknowledged and is travelling to the scene.
    EnRoute,
    /// The crew is at the scene.
    OnScene,
    /// Response finished. Terminal.
    Completed,
    /// Withdrawn by a dispatcher or the reporter. Terminal.
    Cancelled,
}

string_enum!(EmergencyStatus, "emergency status", {
    Pending => "pending",
    Assigned => "assigned",
    EnRoute => "en_route",
    OnScene => "on_scene",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl EmergencyStatus {
    /// Whether no further transition can leave this status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether an ambulance is bound to the emergency in this status.
    pub const fn has_assignment(self) -> bool {
        matches!(self, Self::Assigned | Self::EnRoute | Self::OnScene)
    }

    /// Whether an ETA is meaningful in this status.
    pub const fn tracks_eta(self) -> bool {
        matches!(self, Self::Assigned | Self::EnRoute)
    }
}

// ---------------------------------------------------------------------------
// Ambulance status
// ---------------------------------------------------------------------------

/// Operational status of an ambulance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AmbulanceStatus {
    /// Available for assignment.
    Idle,
    /// Travelling to an emergency.
    EnRoute,
    /// At the scene of an emergency.
    OnScene,
    /// Heading back to base.
    Returning,
}

string_enum!(AmbulanceStatus, "ambulance status", {
    Idle => "idle",
    EnRoute => "en_route",
    OnScene => "on_scene",
    Returning => "returning",
});

// ---------------------------------------------------------------------------
// Entity kind / change op
// ---------------------------------------------------------------------------

/// The four record collections held by the entity store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EntityKind {
    /// Reported emergencies.
    Emergency,
    /// Registered ambulances.
    Ambulance,
    /// Hospitals.
    Hospital,
    /// Reported hazards.
    Hazard,
}

string_enum!(EntityKind, "entity kind", {
    Emergency => "emergency",
    Ambulance => "ambulance",
    Hospital => "hospital",
    Hazard => "hazard",
});

/// The kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeOp {
    /// The entity was created.
    Insert,
    /// The entity was modified.
    Update,
    /// The entity was removed.
    Delete,
}

string_enum!(ChangeOp, "change op", {
    Insert => "insert",
    Update => "update",
    Delete => "delete",
});
