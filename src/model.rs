//! Core data model for the claim report engine.
//!
//! Everything here is loaded once per report invocation, held in memory for
//! the duration of that invocation, and discarded after the report is
//! emitted. Reference data ([`RouteStop`], [`TimetableEntry`]) is read-only;
//! [`TripTransaction`] is immutable once loaded except for the schedule
//! fields the reconciler synthesizes for ad-hoc trips.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Service direction code used throughout the upstream data: 0 = loop,
/// 1 = outbound, 2 = inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    Loop = 0,
    Outbound = 1,
    Inbound = 2,
}

/// All directions in the fixed processing order.
pub const DIRECTIONS: [Direction; 3] = [Direction::Loop, Direction::Outbound, Direction::Inbound];

impl Direction {
    /// The label printed in the report's IB/OB column.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Loop => "LOOP",
            Direction::Outbound => "OB",
            Direction::Inbound => "IB",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Direction::Loop),
            1 => Ok(Direction::Outbound),
            2 => Ok(Direction::Inbound),
            other => Err(format!("unknown direction code {other}")),
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> u8 {
        direction.code()
    }
}

/// One fare-collection event on a physical trip. Several transactions can
/// share a `trip_id`; together they make up that trip's fare activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripTransaction {
    pub trip_id: String,
    #[serde(default)]
    pub journey_id: Option<String>,
    pub route_id: i64,
    pub route_short_name: String,
    pub route_name: String,
    pub direction: Direction,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Set by the schedule reconciler when the scheduled times above were
    /// synthesized rather than assigned at dispatch time.
    #[serde(default)]
    pub adhoc: bool,
    /// Rider account behind the payment; present for cashless fares only.
    #[serde(default)]
    pub rider_account_id: Option<i64>,
    #[serde(default)]
    pub vehicle_registration_number: Option<String>,
    /// Manufacture year of the vehicle, used for the bus-age column.
    #[serde(default)]
    pub vehicle_year: Option<i32>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub device_serial_number: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub seniors: u32,
    #[serde(default)]
    pub oku: u32,
    #[serde(default)]
    pub foreign_adults: u32,
    #[serde(default)]
    pub foreign_children: u32,
    #[serde(default)]
    pub journey_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub journey_ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub km_outbound: Option<f64>,
    #[serde(default)]
    pub km_inbound: Option<f64>,
    #[serde(default)]
    pub km_loop: Option<f64>,
    #[serde(default)]
    pub km_rate: Option<f64>,
    /// GPS-measured mileage for the trip, preferred over the planned
    /// distance when positive.
    #[serde(default)]
    pub trip_mileage: Option<f64>,
    /// Encoded polyline of the route's reference geometry.
    #[serde(default)]
    pub route_polyline: Option<String>,
    /// Services whose origin geofence is tightened to 100 m.
    #[serde(default)]
    pub restricted_stop: bool,
}

impl TripTransaction {
    /// Total passengers across every fare category on this event.
    pub fn total_pax(&self) -> u32 {
        self.adults
            + self.children
            + self.seniors
            + self.oku
            + self.foreign_adults
            + self.foreign_children
    }

    /// Payment channel is keyed by the presence of a rider account.
    pub fn is_cashless(&self) -> bool {
        self.rider_account_id.is_some()
    }

    /// Planned route distance for this transaction's direction.
    pub fn planned_km(&self) -> f64 {
        match self.direction {
            Direction::Loop => self.km_loop,
            Direction::Outbound => self.km_outbound,
            Direction::Inbound => self.km_inbound,
        }
        .unwrap_or(0.0)
    }

    /// GPS-derived distance: a positive recorded mileage wins, otherwise the
    /// planned per-direction distance stands in.
    pub fn gps_km(&self) -> f64 {
        match self.trip_mileage {
            Some(mileage) if mileage > 0.0 => mileage,
            _ => self.planned_km(),
        }
    }

    /// Calendar date the trip belongs to in the reporting timezone:
    /// scheduled start when present, observed start otherwise.
    pub fn service_date(&self, tz: Tz) -> Option<NaiveDate> {
        self.scheduled_at
            .or(self.started_at)
            .map(|instant| instant.with_timezone(&tz).date_naive())
    }
}

/// A stop on a route+direction, with its position in the stop sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub route_id: i64,
    pub direction: Direction,
    pub sequence: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A route as served by the upstream store, carrying its stop list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub agency_id: i64,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
}

/// One planned departure for a (route, direction, day-of-week).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub route_id: i64,
    pub direction: Direction,
    /// Day name as stored upstream ("monday" .. "sunday", any case).
    pub day: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Timetable entries grouped route -> direction -> weekday for lookup.
#[derive(Debug, Default)]
pub struct Timetable {
    by_route: HashMap<i64, HashMap<Direction, HashMap<Weekday, Vec<TimetableEntry>>>>,
}

impl Timetable {
    /// Groups a flat list of entries. Entries whose day name does not parse
    /// are dropped; entry order within a group is preserved, which makes the
    /// reconciler's first-entry tie-break stable.
    pub fn from_entries(entries: Vec<TimetableEntry>) -> Self {
        let mut by_route: HashMap<i64, HashMap<Direction, HashMap<Weekday, Vec<TimetableEntry>>>> =
            HashMap::new();

        for entry in entries {
            let Some(day) = weekday_from_name(&entry.day) else {
                tracing::warn!(day = %entry.day, route_id = entry.route_id, "unparseable timetable day, dropping entry");
                continue;
            };
            by_route
                .entry(entry.route_id)
                .or_default()
                .entry(entry.direction)
                .or_default()
                .entry(day)
                .or_default()
                .push(entry);
        }

        Self { by_route }
    }

    /// Planned departures for (route, direction, weekday); empty when the
    /// timetable has no entries for that key.
    pub fn entries(&self, route_id: i64, direction: Direction, day: Weekday) -> &[TimetableEntry] {
        self.by_route
            .get(&route_id)
            .and_then(|directions| directions.get(&direction))
            .and_then(|days| days.get(&day))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_route.is_empty()
    }
}

/// Parses the timetable's day-name column, case-insensitively.
pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name.trim().to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// One GPS telemetry ping for a trip.
///
/// The upstream log files use a literal `"null"` sentinel for the
/// nearest-stop columns; the CSV parser normalizes those to `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpsLogPoint {
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<u32>,
    #[serde(default)]
    pub stop_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawGpsRecord {
    timestamp: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<String>,
    #[serde(default, rename = "stopName")]
    stop_name: Option<String>,
    #[serde(default)]
    sequence: Option<String>,
    #[serde(default, rename = "stopId")]
    stop_id: Option<String>,
}

fn desentinel(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let v = v.trim();
        !v.is_empty() && !v.eq_ignore_ascii_case("null")
    })
}

impl GpsLogPoint {
    /// Parses a raw trip log file (CSV with header) into ordered points.
    /// Rows that fail to parse are skipped so one bad ping never loses the
    /// whole log.
    pub fn parse_log_csv(bytes: &[u8]) -> Result<Vec<GpsLogPoint>> {
        let mut reader = csv::Reader::from_reader(bytes);
        let mut points = Vec::new();

        for row in reader.deserialize() {
            let raw: RawGpsRecord = match row {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparseable trip log row");
                    continue;
                }
            };

            let Ok(timestamp_ms) = raw.timestamp.trim().parse::<i64>() else {
                tracing::debug!(timestamp = %raw.timestamp, "skipping trip log row with bad timestamp");
                continue;
            };

            points.push(GpsLogPoint {
                timestamp_ms,
                latitude: raw.latitude,
                longitude: raw.longitude,
                speed: desentinel(raw.speed)
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0),
                stop_name: desentinel(raw.stop_name),
                stop_sequence: desentinel(raw.sequence).and_then(|s| s.parse::<u32>().ok()),
                stop_id: desentinel(raw.stop_id).and_then(|s| s.parse::<i64>().ok()),
            });
        }

        Ok(points)
    }
}

/// Agency configuration relevant to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agency {
    pub id: i64,
    pub name: String,
    /// Schedule-led agencies: trips are driven by the timetable rather than
    /// the ticketing devices, so timetabled departures with no transaction
    /// are synthesized as missed trips.
    #[serde(default)]
    pub offline_trips: bool,
}

/// AM/PM half-day filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DayHalf {
    Am,
    Pm,
}

/// Weekday/weekend filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DayKind {
    Weekday,
    Weekend,
}

/// Payment channel filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PaymentChannel {
    Cash,
    Cashless,
}

/// Optional request filters applied after schedule reconciliation.
/// `None` means "All" for every field.
#[derive(Debug, Clone, Default)]
pub struct ReportFilters {
    pub am_pm: Option<DayHalf>,
    pub day_kind: Option<DayKind>,
    pub select_from: Option<NaiveDateTime>,
    pub select_to: Option<NaiveDateTime>,
    pub vehicle: Option<String>,
    pub driver: Option<String>,
    pub paid_by: Option<PaymentChannel>,
}

/// A full engine input captured as one JSON document, used by the `render`
/// subcommand and the test fixtures.
#[derive(Debug, Deserialize)]
pub struct ReportBundle {
    pub agency: Agency,
    pub transactions: Vec<TripTransaction>,
    pub timetable: Vec<TimetableEntry>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub trip_logs: HashMap<String, Vec<GpsLogPoint>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_codes_round_trip() {
        for direction in DIRECTIONS {
            assert_eq!(Direction::try_from(direction.code()), Ok(direction));
        }
        assert!(Direction::try_from(3).is_err());
    }

    #[test]
    fn test_gps_km_prefers_positive_trip_mileage() {
        let mut trx = sample_transaction();
        trx.direction = Direction::Outbound;
        trx.km_outbound = Some(74.0);

        trx.trip_mileage = Some(71.3);
        assert_eq!(trx.gps_km(), 71.3);

        trx.trip_mileage = Some(0.0);
        assert_eq!(trx.gps_km(), 74.0);

        trx.trip_mileage = None;
        assert_eq!(trx.gps_km(), 74.0);
    }

    #[test]
    fn test_parse_log_csv_normalizes_null_sentinels() {
        let csv = b"timestamp,latitude,longitude,speed,stopName,sequence,stopId\n\
            1724112000000,3.1,101.6,25.5,Main Terminal,1,55\n\
            1724112010000,3.2,101.7,null,null,null,null\n";
        let points = GpsLogPoint::parse_log_csv(csv).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].stop_name.as_deref(), Some("Main Terminal"));
        assert_eq!(points[0].stop_sequence, Some(1));
        assert_eq!(points[1].stop_name, None);
        assert_eq!(points[1].stop_sequence, None);
        assert_eq!(points[1].speed, 0.0);
    }

    #[test]
    fn test_parse_log_csv_skips_bad_rows() {
        let csv = b"timestamp,latitude,longitude,speed,stopName,sequence,stopId\n\
            not-a-timestamp,3.1,101.6,10,,,\n\
            1724112000000,3.1,101.6,10,,,\n";
        let points = GpsLogPoint::parse_log_csv(csv).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_timetable_lookup_groups_by_day() {
        let timetable = Timetable::from_entries(vec![
            entry(10, Direction::Outbound, "Tuesday", "08:00:00", "08:35:00"),
            entry(10, Direction::Outbound, "tuesday", "09:00:00", "09:35:00"),
            entry(10, Direction::Inbound, "tuesday", "10:00:00", "10:35:00"),
            entry(10, Direction::Outbound, "notaday", "11:00:00", "11:35:00"),
        ]);

        let tue = timetable.entries(10, Direction::Outbound, Weekday::Tue);
        assert_eq!(tue.len(), 2);
        assert_eq!(tue[0].start_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert!(timetable.entries(10, Direction::Outbound, Weekday::Wed).is_empty());
        assert!(timetable.entries(99, Direction::Outbound, Weekday::Tue).is_empty());
    }

    fn entry(route_id: i64, direction: Direction, day: &str, start: &str, end: &str) -> TimetableEntry {
        TimetableEntry {
            route_id,
            direction,
            day: day.to_string(),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
        }
    }

    fn sample_transaction() -> TripTransaction {
        TripTransaction {
            trip_id: "TRIP-1".to_string(),
            journey_id: Some("J-1".to_string()),
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
}
