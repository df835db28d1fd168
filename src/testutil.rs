//! Shared fixture builders for unit tests.

use chrono::{DateTime, Utc};
use geo_types::LineString;

use crate::engine::geometry::POLYLINE_PRECISION;
use crate::model::{Direction, GpsLogPoint, RouteStop, TimetableEntry, TripTransaction};

/// Encodes `(latitude, longitude)` pairs into a route polyline.
pub fn encode_line(points: &[(f64, f64)]) -> String {
    let line = LineString::from(
        points
            .iter()
            .map(|&(lat, lon)| (lon, lat))
            .collect::<Vec<_>>(),
    );
    polyline::encode_coordinates(line, POLYLINE_PRECISION).expect("fixture polyline encodes")
}

/// A telemetry ping `seconds` after an arbitrary fixed origin instant.
pub fn log_point(seconds: i64, latitude: f64, longitude: f64) -> GpsLogPoint {
    GpsLogPoint {
        timestamp_ms: 1_724_112_000_000 + seconds * 1_000,
        latitude,
        longitude,
        speed: 0.0,
        stop_name: None,
        stop_sequence: None,
        stop_id: None,
    }
}

pub fn stop(
    route_id: i64,
    direction: Direction,
    sequence: u32,
    name: &str,
    latitude: f64,
    longitude: f64,
) -> RouteStop {
    RouteStop {
        route_id,
        direction,
        sequence,
        name: name.to_string(),
        latitude,
        longitude,
    }
}

pub fn timetable_entry(
    route_id: i64,
    direction: Direction,
    day: &str,
    start: &str,
    end: &str,
) -> TimetableEntry {
    TimetableEntry {
        route_id,
        direction,
        day: day.to_string(),
        start_time: start.parse().expect("fixture start time parses"),
        end_time: end.parse().expect("fixture end time parses"),
    }
}

/// A minimal outbound transaction on route 10.
pub fn transaction(trip_id: &str) -> TripTransaction {
    TripTransaction {
        trip_id: trip_id.to_string(),
        journey_id: Some(format!("J-{trip_id}")),
        route_id: 10,
        route_short_name: "T590".to_string(),
        route_name: "Terminal - Sentral".to_string(),
        direction: Direction::Outbound,
        started_at: None,
        ended_at: None,
        scheduled_at: None,
        scheduled_end: None,
        adhoc: false,
        rider_account_id: None,
        vehicle_registration_number: Some("WXY 1234".to_string()),
        vehicle_year: None,
        driver_name: Some("Driver One".to_string()),
        staff_id: Some("D-100".to_string()),
        device_serial_number: Some("ETM-9".to_string()),
        amount: 0.0,
        adults: 0,
        children: 0,
        seniors: 0,
        oku: 0,
        foreign_adults: 0,
        foreign_children: 0,
        journey_created: None,
        journey_ended: None,
        km_outbound: None,
        km_inbound: None,
        km_loop: None,
        km_rate: None,
        trip_mileage: None,
        route_polyline: None,
        restricted_stop: false,
    }
}

/// Parses an RFC3339 instant, panicking on bad fixtures.
pub fn instant(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("fixture instant parses")
}
