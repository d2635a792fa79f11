//! Great-circle geometry on a spherical earth.

use dispatch_types::Position;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle (haversine) distance between two positions in kilometres.
pub fn distance_km(a: Position, b: Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().clamp(0.0, 1.0).asin()
}

/// Point halfway along the great circle between two positions.
pub fn midpoint(a: Position, b: Position) -> Position {
    let lat1 = a.latitude.to_radians();
    let lon1 = a.longitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let bx = lat2.cos() * dlon.cos();
    let by = lat2.cos() * dlon.sin();
    let lat = (lat1.sin() + lat2.sin()).atan2((lat1.cos() + bx).hypot(by));
    let lon = lon1 + by.atan2(lat1.cos() + bx);

    // Normalise longitude into [-180, 180].
    let lon_deg = (lon.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    Position::new(lat.to_degrees(), lon_deg)
}
