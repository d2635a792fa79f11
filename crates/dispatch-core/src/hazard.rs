//! Hazard overlay: which hazards apply where, and how much they slow travel.
//!
//! The overlay evaluates a hazard set read from the store at decision
//! time. Expiry is applied on every evaluation via
//! [`Hazard::is_active_at`], so a hazard past its `expires_at` never
//! contributes even while its persisted `is_active` flag is still set.

use chrono::{DateTime, Utc};
use dispatch_types::{Hazard, Position};

use crate::config::{HazardConfig, PenaltyWeights};
use crate::geo;

/// Penalty factor applied when no hazard touches a route.
pub const NO_PENALTY: f64 = 1.0;

/// Evaluates a hazard set against positions and routes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HazardOverlay {
    weights: PenaltyWeights,
    vicinity_margin_km: f64,
}

impl HazardOverlay {
    /// Create an overlay with explicit weights and vicinity margin.
    pub const fn new(weights: PenaltyWeights, vicinity_margin_km: f64) -> Self {
        Self {
            weights,
            vicinity_margin_km,
        }
    }

    /// Create an overlay from configuration sections.
    pub const fn from_config(weights: PenaltyWeights, hazards: &HazardConfig) -> Self {
        Self::new(weights, hazards.vicinity_margin_km)
    }

    /// Whether `hazard` applies at `now`.
    pub fn is_active(hazard: &Hazard, now: DateTime<Utc>) -> bool {
        hazard.is_active_at(now)
    }

    /// Whether the hazard's effect radius contains `position`.
    pub fn contains(hazard: &Hazard, position: Position) -> bool {
        geo::distance_km(hazard.position, position) <= hazard.radius_km
    }

    fn is_near(&self, hazard: &Hazard, position: Position) -> bool {
        geo::distance_km(hazard.position, position) <= hazard.radius_km + self.vicinity_margin_km
    }

    /// Active hazards whose radius plus the vicinity margin contains
    /// `position`, in input order.
    pub fn active_hazards_near<'a>(
        &self,
        hazards: &'a [Hazard],
        position: Position,
        now: DateTime<Utc>,
    ) -> Vec<&'a Hazard> {
        hazards
            .iter()
            .filter(|h| Self::is_active(h, now) && self.is_near(h, position))
            .collect()
    }

    /// Whether `hazard` touches the straight-line route at its origin,
    /// destination or midpoint.
    pub fn on_route(hazard: &Hazard, origin: Position, destination: Position) -> bool {
        let mid = geo::midpoint(origin, destination);
        [origin, destination, mid]
            .into_iter()
            .any(|p| Self::contains(hazard, p))
    }

    /// Whether `hazard` lies in the vicinity of the route; used to decide
    /// which ETAs a hazard-set change invalidates.
    pub fn affects_route(&self, hazard: &Hazard, origin: Position, destination: Position) -> bool {
        let mid = geo::midpoint(origin, destination);
        [origin, destination, mid]
            .into_iter()
            .any(|p| self.is_near(hazard, p))
    }

    /// Travel-time multiplier for a route: `1 + Σ weight(severity)` over
    /// active hazards on the route. Overlapping hazards add, they do not
    /// compound.
    pub fn penalty_factor(
        &self,
        hazards: &[Hazard],
        origin: Position,
        destination: Position,
        now: DateTime<Utc>,
    ) -> f64 {
        hazards
            .iter()
            .filter(|h| Self::is_active(h, now) && Self::on_route(h, origin, destination))
            .fold(NO_PENALTY, |factor, h| {
                factor + self.weights.weight(h.severity)
            })
    }

    /// Hazards still flagged active whose expiry has passed.
    pub fn expired(hazards: &[Hazard], now: DateTime<Utc>) -> Vec<&Hazard> {
        hazards
            .iter()
            .filter(|h| h.is_active && !h.is_active_at(now))
            .collect()
    }
}

impl Default for HazardOverlay {
    fn default() -> Self {
        Self::new(PenaltyWeights::default(), 0.0)
    }
}
