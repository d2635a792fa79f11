//! Arrival-time estimation.
//!
//! A [`RoutingService`] supplies the nominal drive time; the estimator
//! multiplies it by the hazard overlay's penalty factor, rounds to whole
//! minutes and never returns less than one. Routing failures never reach
//! the caller:
//!
//! | routing outcome        | result                                          |
//! |------------------------|-------------------------------------------------|
//! | estimate               | routed minutes x penalty                        |
//! | unavailable            | great-circle at fallback speed x penalty, degraded |
//! | timeout, previous ETA  | previous ETA unchanged, degraded               |
//! | timeout, no previous   | great-circle at fallback speed x penalty, degraded |

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use dispatch_types::{EmergencyId, Hazard, Position};

use crate::config::{EtaConfig, TimeoutConfig};
use crate::geo;
use crate::hazard::HazardOverlay;

/// Nominal route between two positions, as reported by a routing service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEstimate {
    /// Driving distance in kilometres.
    pub distance_km: f64,
    /// Nominal driving time in minutes, before hazard adjustment.
    pub duration_minutes: f64,
}

/// A routing service could not produce an estimate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// The service is down, unreachable or returned no route.
    #[error("routing unavailable: {0}")]
    Unavailable(String),
    /// The service did not answer in time.
    #[error("routing timed out")]
    Timeout,
}

/// External routing collaborator.
pub trait RoutingService: Send + Sync + 'static {
    /// Distance and nominal duration from `origin` to `destination`.
    fn route_estimate(
        &self,
        origin: Position,
        destination: Position,
    ) -> impl Future<Output = Result<RouteEstimate, RoutingError>> + Send;
}

/// Routing backend for deployments without a routing service.
///
/// Always reports [`RoutingError::Unavailable`], so every estimate takes
/// the great-circle fallback and is flagged degraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLine;

impl RoutingService for StraightLine {
    async fn route_estimate(
        &self,
        _origin: Position,
        _destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        Err(RoutingError::Unavailable(String::from(
            "no routing service configured",
        )))
    }
}

/// An arrival estimate in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eta {
    /// Minutes until arrival, at least 1.
    pub minutes: u32,
    /// The estimate came from a fallback path.
    pub degraded: bool,
}

/// Round a positive duration to whole minutes, minimum 1.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_minutes(minutes: f64) -> u32 {
    let rounded = minutes.round();
    if !rounded.is_finite() || rounded < 1.0 {
        1
    } else if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        // Range checked above.
        rounded as u32
    }
}

/// Combines routing estimates with the hazard overlay.
#[derive(Debug)]
pub struct EtaEstimator<R> {
    routing: R,
    overlay: HazardOverlay,
    fallback_speed_kmh: f64,
    timeout: Duration,
}

impl<R: RoutingService> EtaEstimator<R> {
    /// Create an estimator.
    pub fn new(routing: R, overlay: HazardOverlay, eta: &EtaConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            routing,
            overlay,
            fallback_speed_kmh: eta.fallback_speed_kmh,
            timeout: timeouts.routing(),
        }
    }

    /// Great-circle drive time in minutes at the fallback speed.
    pub fn fallback_minutes(&self, origin: Position, destination: Position) -> f64 {
        if self.fallback_speed_kmh <= 0.0 {
            return f64::INFINITY;
        }
        geo::distance_km(origin, destination) / self.fallback_speed_kmh * 60.0
    }

    /// Hazard-adjusted ETA from `origin` to `destination`.
    ///
    /// `previous` is the ETA currently shown for this trip, kept when the
    /// routing service times out.
    pub async fn estimate(
        &self,
        origin: Position,
        destination: Position,
        hazards: &[Hazard],
        previous: Option<u32>,
    ) -> Eta {
        let routed = tokio::time::timeout(
            self.timeout,
            self.routing.route_estimate(origin, destination),
        )
        .await
        .unwrap_or(Err(RoutingError::Timeout));

        let (base, degraded) = match routed {
            Ok(route) => (route.duration_minutes, false),
            Err(RoutingError::Timeout) => {
                if let Some(minutes) = previous {
                    tracing::warn!(minutes, "Routing timed out, keeping previous ETA");
                    return Eta {
                        minutes,
                        degraded: true,
                    };
                }
                tracing::warn!("Routing timed out, using great-circle fallback");
                (self.fallback_minutes(origin, destination), true)
            }
            Err(RoutingError::Unavailable(reason)) => {
                tracing::debug!(%reason, "Routing unavailable, using great-circle fallback");
                (self.fallback_minutes(origin, destination), true)
            }
        };

        let factor = self
            .overlay
            .penalty_factor(hazards, origin, destination, Utc::now());
        Eta {
            minutes: whole_minutes(base * factor),
            degraded,
        }
    }
}

/// Remembers the ambulance position each live ETA was computed from, so
/// position telemetry only triggers a recompute after real movement.
#[derive(Debug, Clone, Default)]
pub struct EtaTracker {
    threshold_km: f64,
    origins: BTreeMap<EmergencyId, Position>,
}

impl EtaTracker {
    /// Create a tracker with the given movement threshold.
    pub const fn new(threshold_km: f64) -> Self {
        Self {
            threshold_km,
            origins: BTreeMap::new(),
        }
    }

    /// Record the origin used for the latest estimate.
    pub fn record(&mut self, emergency: EmergencyId, origin: Position) {
        self.origins.insert(emergency, origin);
    }

    /// Whether an ambulance now at `position` has moved far enough from
    /// the last estimate's origin to warrant a recompute.
    pub fn should_recompute(&self, emergency: EmergencyId, position: Position) -> bool {
        self.origins
            .get(&emergency)
            .is_none_or(|&origin| geo::distance_km(origin, position) > self.threshold_km)
    }

    /// The origin of the latest estimate.
    pub fn origin(&self, emergency: EmergencyId) -> Option<Position> {
        self.origins.get(&emergency).copied()
    }

    /// Stop tracking an emergency (no longer has a live ETA).
    pub fn forget(&mut self, emergency: EmergencyId) {
        self.origins.remove(&emergency);
    }

    /// Number of tracked emergencies.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}
