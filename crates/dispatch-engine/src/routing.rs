//! Routing backends available to the engine.
//!
//! The coordinator is generic over [`RoutingService`]; the engine picks
//! one concrete backend at startup from `infrastructure.routing_url`.
//! [`RoutingBackend`] uses enum dispatch so a single coordinator type
//! covers both choices.

use dispatch_core::{RouteEstimate, RoutingError, RoutingService, StraightLine};
use dispatch_types::Position;

// ---------------------------------------------------------------------------
// Unified backend enum
// ---------------------------------------------------------------------------

/// The routing backend selected from configuration.
#[derive(Debug)]
pub enum RoutingBackend {
    /// OSRM-compatible HTTP routing service.
    Http(HttpRouter),
    /// No routing service; every estimate falls back to great-circle.
    StraightLine(StraightLine),
}

impl RoutingBackend {
    /// Build the backend for an optional routing service URL.
    pub fn from_url(url: Option<&str>) -> Self {
        match url {
            Some(base) if !base.trim().is_empty() => Self::Http(HttpRouter::new(base)),
            _ => Self::StraightLine(StraightLine),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "osrm-http",
            Self::StraightLine(_) => "straight-line",
        }
    }
}

impl RoutingService for RoutingBackend {
    async fn route_estimate(
        &self,
        origin: Position,
        destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        match self {
            Self::Http(router) => router.route_estimate(origin, destination).await,
            Self::StraightLine(fallback) => fallback.route_estimate(origin, destination).await,
        }
    }
}

// ---------------------------------------------------------------------------
// OSRM-compatible backend
// ---------------------------------------------------------------------------

/// Backend for OSRM-compatible `route` services.
///
/// Sends `GET {base_url}/route/v1/driving/{lon},{lat};{lon},{lat}` and
/// reads the first route's distance (metres) and duration (seconds).
/// Timeouts are applied by the ETA estimator, not here.
#[derive(Debug, Clone)]
pub struct HttpRouter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRouter {
    /// Create a router for the service at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn route_url(&self, origin: Position, destination: Position) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false",
            self.base_url,
            origin.longitude,
            origin.latitude,
            destination.longitude,
            destination.latitude
        )
    }
}

impl RoutingService for HttpRouter {
    async fn route_estimate(
        &self,
        origin: Position,
        destination: Position,
    ) -> Result<RouteEstimate, RoutingError> {
        let url = self.route_url(origin, destination);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RoutingError::Unavailable(format!("route request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoutingError::Unavailable(format!(
                "routing service returned {status}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RoutingError::Unavailable(format!("route response parse failed: {e}")))?;

        extract_route(&json)
    }
}

/// Extract the first route from an OSRM `route` response.
fn extract_route(json: &serde_json::Value) -> Result<RouteEstimate, RoutingError> {
    if let Some(code) = json.get("code").and_then(serde_json::Value::as_str)
        && code != "Ok"
    {
        return Err(RoutingError::Unavailable(format!("no route: {code}")));
    }

    let route = json
        .get("routes")
        .and_then(|r| r.get(0))
        .ok_or_else(|| RoutingError::Unavailable("response missing routes[0]".to_owned()))?;

    let metres = route_field(route, "distance")?;
    let seconds = route_field(route, "duration")?;

    Ok(RouteEstimate {
        distance_km: metres / 1000.0,
        duration_minutes: seconds / 60.0,
    })
}

fn route_field(route: &serde_json::Value, name: &str) -> Result<f64, RoutingError> {
    route
        .get(name)
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| RoutingError::Unavailable(format!("route has no usable {name}")))
}
