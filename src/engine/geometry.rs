//! Point-radius geometry over decoded route polylines.

use tracing::warn;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Precision of the upstream encoded polylines (standard Google encoding).
pub const POLYLINE_PRECISION: u32 = 5;

/// A decoded point of a route's reference polyline, used as a geofence
/// anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Decodes an encoded route polyline into its ordered checkpoints.
///
/// A malformed polyline decodes to no checkpoints rather than failing the
/// trip: geometry-based classification then simply reports "No Complete",
/// which is the degraded behavior the report expects.
pub fn decode_checkpoints(encoded: &str) -> Vec<Checkpoint> {
    match polyline::decode_polyline(encoded, POLYLINE_PRECISION) {
        Ok(line) => line
            .coords()
            .map(|coord| Checkpoint {
                latitude: coord.y,
                longitude: coord.x,
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "failed to decode route polyline");
            Vec::new()
        }
    }
}

/// Great-circle distance in meters between two WGS84 coordinates.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Whether the point lies within `radius_m` meters of the anchor.
pub fn within_radius(lat: f64, lon: f64, anchor_lat: f64, anchor_lon: f64, radius_m: f64) -> bool {
    haversine_distance(lat, lon, anchor_lat, anchor_lon) <= radius_m
}
