//! Grouping and per-trip summarization.
//!
//! Transactions are folded into the route → service date → direction → trip
//! hierarchy as explicit ordered mappings; every level is a value computed
//! from the one below it, so no running totals leak across iterations. The
//! per-trip summary combines fare sums, the actual-start inference, geo-hit
//! classification and the mileage/claim columns.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::engine::actual_start::{filter_log, infer_actual_start};
use crate::engine::classify::{
    self, geometry_status, punctuality, status_detail, stop_coverage_status,
};
use crate::engine::geo_cache::GeoHitCache;
use crate::engine::util::{ceil_to_cent, fmt_local_date, fmt_local_hm, fmt_local_hms, fmt_millis_hms};
use crate::model::{Direction, GpsLogPoint, RouteStop, TripTransaction};

/// Everything the report knows about one physical trip.
#[derive(Debug, Clone, Serialize)]
pub struct TripSummary {
    pub route_id: i64,
    pub route_short_name: String,
    pub route_name: String,
    pub trip_id: String,
    pub direction: &'static str,
    /// Sequence label within its direction block ("T1", "T2", ...); empty
    /// for trips without a full schedule.
    pub trip_label: String,
    /// Service date formatted DD/MM/YYYY.
    pub service_date: String,
    pub start_point: String,
    pub bus_plate: String,
    pub bus_age: Option<i32>,
    pub km_rate: Option<f64>,
    pub driver_id: String,
    pub duty_id: String,
    /// Distinct stops approached within radius.
    pub bus_stops: usize,
    pub km_planned: f64,
    pub km_gps: f64,
    /// BOP mileage column; mirrors the planned distance.
    pub km_bop: f64,
    pub km_rate_bop: Option<f64>,
    // Claim amounts have no computation path upstream and are reproduced as
    // zero-valued stubs.
    pub total_claim: f64,
    pub total_claim_gps: f64,
    pub monthly_pass: f64,
    pub jkm: f64,
    pub maim: f64,
    pub passenger: u32,
    pub status: String,
    pub status_detail: String,
    pub status_j: String,
    pub punctuality: String,
    pub remark: String,
    pub service_start: String,
    pub service_end: String,
    pub observed_start: String,
    pub actual_start: String,
    pub actual_end: String,
    pub sales_start: String,
    pub sales_end: String,
    pub adults: u32,
    pub children: u32,
    pub seniors: u32,
    pub oku: u32,
    pub students: u32,
    pub total_on: u32,
    pub transfer_count: u32,
    pub total_pax: u32,
    pub total_amount: f64,
    pub cash_amount: f64,
    pub cash_pax: u32,
    pub cashless_amount: f64,
    pub cashless_pax: u32,
    pub cash_adults: u32,
    pub cash_children: u32,
    pub cash_seniors: u32,
    pub cash_oku: u32,
    pub cash_foreign_adults: u32,
    pub cash_foreign_children: u32,
    pub cashless_adults: u32,
    pub cashless_children: u32,
    pub cashless_seniors: u32,
    pub cashless_oku: u32,
    pub cashless_foreign_adults: u32,
    pub cashless_foreign_children: u32,
}

/// Rollup counters for one (service date, route, direction) group. Unique
/// counts are set cardinalities, never arithmetic sums.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupRollup {
    pub trip_count: usize,
    pub driver_count: usize,
    pub vehicle_count: usize,
    pub transaction_count: usize,
    pub adults: u32,
    pub children: u32,
    pub seniors: u32,
    pub oku: u32,
    pub foreign_adults: u32,
    pub foreign_children: u32,
    pub total_ridership: u32,
    pub total_amount: f64,
    pub cash_amount: f64,
    pub cash_ridership: u32,
    pub cashless_amount: f64,
    pub cashless_ridership: u32,
}

impl GroupRollup {
    pub fn from_events<'a>(events: impl Iterator<Item = &'a TripTransaction>) -> Self {
        let mut rollup = GroupRollup::default();
        let mut trips = BTreeSet::new();
        let mut drivers = BTreeSet::new();
        let mut vehicles = BTreeSet::new();
        let mut journeys = BTreeSet::new();

        for event in events {
            trips.insert(event.trip_id.clone());
            if let Some(driver) = &event.driver_name {
                drivers.insert(driver.clone());
            }
            if let Some(vehicle) = &event.vehicle_registration_number {
                vehicles.insert(vehicle.clone());
            }
            if let Some(journey) = &event.journey_id {
                journeys.insert(journey.clone());
            }

            let pax = event.total_pax();
            rollup.adults += event.adults;
            rollup.children += event.children;
            rollup.seniors += event.seniors;
            rollup.oku += event.oku;
            rollup.foreign_adults += event.foreign_adults;
            rollup.foreign_children += event.foreign_children;
            rollup.total_ridership += pax;
            rollup.total_amount += event.amount;
            if event.is_cashless() {
                rollup.cashless_amount += event.amount;
                rollup.cashless_ridership += pax;
            } else {
                rollup.cash_amount += event.amount;
                rollup.cash_ridership += pax;
            }
        }

        rollup.trip_count = trips.len();
        rollup.driver_count = drivers.len();
        rollup.vehicle_count = vehicles.len();
        rollup.transaction_count = journeys.len();
        rollup
    }
}

/// The (service date, route, direction) aggregation node.
#[derive(Debug, Clone, Serialize)]
pub struct DateRouteDirectionGroup {
    pub route_id: i64,
    pub service_date: NaiveDate,
    pub direction: Direction,
    pub summaries: Vec<TripSummary>,
    pub rollup: GroupRollup,
}

/// All direction groups of one route on one service date.
#[derive(Debug, Clone, Serialize)]
pub struct DateBlock {
    pub service_date: NaiveDate,
    pub directions: Vec<DateRouteDirectionGroup>,
}

/// All date blocks of one route, in ascending date order.
#[derive(Debug, Clone, Serialize)]
pub struct RouteBlock {
    pub route_id: i64,
    pub route_short_name: String,
    pub route_name: String,
    pub dates: Vec<DateBlock>,
}

/// The engine's result: the flat per-trip list for programmatic consumers,
/// the ordered hierarchy, and the rendered legacy report.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReport {
    pub summaries: Vec<TripSummary>,
    pub routes: Vec<RouteBlock>,
    pub rendered: String,
}

/// route → service date → direction → transactions, every level ordered.
pub type GroupedTransactions =
    BTreeMap<i64, BTreeMap<NaiveDate, BTreeMap<Direction, Vec<TripTransaction>>>>;

/// Partitions transactions into the grouping hierarchy. The service date is
/// the scheduled start when present, the observed start otherwise;
/// transactions with neither cannot be placed and are dropped with a
/// warning.
pub fn group_transactions(transactions: Vec<TripTransaction>, tz: Tz) -> GroupedTransactions {
    let mut groups: GroupedTransactions = BTreeMap::new();

    for trx in transactions {
        let Some(service_date) = trx.service_date(tz) else {
            tracing::warn!(trip_id = %trx.trip_id, "transaction has neither scheduled nor observed start, dropping");
            continue;
        };
        groups
            .entry(trx.route_id)
            .or_default()
            .entry(service_date)
            .or_default()
            .entry(trx.direction)
            .or_default()
            .push(trx);
    }

    groups
}

/// Builds the ordered hierarchy and the flat summary list from grouped
/// transactions.
pub fn build_blocks(
    groups: GroupedTransactions,
    route_stops: &HashMap<i64, Vec<RouteStop>>,
    trip_logs: &HashMap<String, Vec<GpsLogPoint>>,
    tz: Tz,
) -> (Vec<RouteBlock>, Vec<TripSummary>) {
    let mut geo_cache = GeoHitCache::new();
    let mut routes = Vec::new();
    let mut flat = Vec::new();

    for (route_id, dates) in groups {
        let mut route_short_name = String::new();
        let mut route_name = String::new();
        let mut date_blocks = Vec::new();

        for (service_date, directions) in dates {
            let mut direction_groups = Vec::new();

            for (direction, transactions) in directions {
                if transactions.is_empty() {
                    continue;
                }
                route_short_name = transactions[0].route_short_name.clone();
                route_name = transactions[0].route_name.clone();

                let stops = direction_stops(route_stops, route_id, direction);
                let rollup = GroupRollup::from_events(transactions.iter());
                let trips = split_into_trips(transactions);

                let mut summaries = Vec::new();
                let mut label_index = 0usize;
                let mut previous_schedule: Option<Option<DateTime<Utc>>> = None;

                for trip_events in &trips {
                    let head = &trip_events[0];
                    if previous_schedule != Some(head.scheduled_at) {
                        label_index += 1;
                    }
                    previous_schedule = Some(head.scheduled_at);

                    let trip_label =
                        if head.scheduled_at.is_some() && head.scheduled_end.is_some() {
                            format!("T{label_index}")
                        } else {
                            String::new()
                        };

                    let log = trip_logs
                        .get(&head.trip_id)
                        .map(Vec::as_slice)
                        .filter(|log| !log.is_empty());

                    let summary =
                        summarize_trip(trip_events, trip_label, &stops, log, &mut geo_cache, tz);
                    flat.push(summary.clone());
                    summaries.push(summary);
                }

                direction_groups.push(DateRouteDirectionGroup {
                    route_id,
                    service_date,
                    direction,
                    summaries,
                    rollup,
                });
            }

            if !direction_groups.is_empty() {
                date_blocks.push(DateBlock {
                    service_date,
                    directions: direction_groups,
                });
            }
        }

        if !date_blocks.is_empty() {
            routes.push(RouteBlock {
                route_id,
                route_short_name,
                route_name,
                dates: date_blocks,
            });
        }
    }

    (routes, flat)
}

fn direction_stops(
    route_stops: &HashMap<i64, Vec<RouteStop>>,
    route_id: i64,
    direction: Direction,
) -> Vec<RouteStop> {
    route_stops
        .get(&route_id)
        .map(|stops| {
            stops
                .iter()
                .filter(|stop| stop.direction == direction)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Splits a direction group into physical trips (one per distinct trip id,
/// keeping each trip's fare events in arrival order) and orders the trips by
/// scheduled start, unscheduled first.
fn split_into_trips(transactions: Vec<TripTransaction>) -> Vec<Vec<TripTransaction>> {
    let mut order = Vec::new();
    let mut by_trip: HashMap<String, Vec<TripTransaction>> = HashMap::new();

    for trx in transactions {
        if !by_trip.contains_key(&trx.trip_id) {
            order.push(trx.trip_id.clone());
        }
        by_trip.entry(trx.trip_id.clone()).or_default().push(trx);
    }

    let mut trips: Vec<Vec<TripTransaction>> = order
        .into_iter()
        .filter_map(|trip_id| by_trip.remove(&trip_id))
        .collect();
    trips.sort_by_key(|events| events[0].scheduled_at);
    trips
}

/// Folds one physical trip's fare events into its summary.
pub fn summarize_trip(
    events: &[TripTransaction],
    trip_label: String,
    direction_stops: &[RouteStop],
    log: Option<&[GpsLogPoint]>,
    geo_cache: &mut GeoHitCache,
    tz: Tz,
) -> TripSummary {
    let head = &events[0];

    let start_stop = direction_stops.iter().min_by_key(|stop| stop.sequence);
    let start_point = start_stop.map(|stop| stop.name.clone()).unwrap_or_default();

    // Fare fold across every event of the trip.
    let mut adults = 0u32;
    let mut children = 0u32;
    let mut seniors = 0u32;
    let mut oku = 0u32;
    let mut total_pax = 0u32;
    let mut total_amount = 0f64;
    let mut cash_amount = 0f64;
    let mut cash_pax = 0u32;
    let mut cashless_amount = 0f64;
    let mut cashless_pax = 0u32;
    let mut cash_split = [0u32; 6];
    let mut cashless_split = [0u32; 6];
    let mut sales_instants: Vec<DateTime<Utc>> = Vec::new();

    for event in events {
        let pax = event.total_pax();
        adults += event.adults + event.foreign_adults;
        children += event.children + event.foreign_children;
        seniors += event.seniors;
        oku += event.oku;
        total_pax += pax;
        total_amount += event.amount;

        let categories = [
            event.adults,
            event.children,
            event.seniors,
            event.oku,
            event.foreign_adults,
            event.foreign_children,
        ];
        if event.is_cashless() {
            cashless_amount += event.amount;
            cashless_pax += pax;
            for (slot, count) in cashless_split.iter_mut().zip(categories) {
                *slot += count;
            }
        } else {
            cash_amount += event.amount;
            cash_pax += pax;
            for (slot, count) in cash_split.iter_mut().zip(categories) {
                *slot += count;
            }
        }

        // Cashless fares stamp the journey creation, cash fares its close.
        let sales_instant = if event.is_cashless() {
            event.journey_created
        } else {
            event.journey_ended
        };
        if let Some(instant) = sales_instant {
            sales_instants.push(instant);
        }
    }

    let sales_start = fmt_local_hm(sales_instants.iter().min().copied(), tz);
    let sales_end = fmt_local_hm(sales_instants.iter().max().copied(), tz);

    // Departure inference and punctuality.
    let (actual_start, punctuality_verdict) = match log {
        Some(points) => {
            let filtered = filter_log(points, head.scheduled_at);
            let inference = infer_actual_start(head, &filtered, start_stop, tz);
            match inference.timestamp_ms() {
                Some(timestamp_ms) => (
                    fmt_millis_hms(Some(timestamp_ms), tz),
                    punctuality(head.scheduled_at, head.started_at, Some(timestamp_ms)).to_string(),
                ),
                None => (
                    fmt_local_hms(head.started_at, tz),
                    classify::NOT_PUNCTUAL.to_string(),
                ),
            }
        }
        None => (
            fmt_local_hms(head.started_at, tz),
            classify::NOT_PUNCTUAL.to_string(),
        ),
    };

    // Geo-hit classification.
    let counts = geo_cache
        .counts(head, direction_stops, log.unwrap_or(&[]))
        .clone();
    let has_geometry = head
        .route_polyline
        .as_deref()
        .is_some_and(|polyline| !polyline.is_empty());
    let status = geometry_status(has_geometry, &counts).to_string();
    let status_j =
        stop_coverage_status(head.ended_at.is_some(), counts.stop_hits.len(), direction_stops.len())
            .to_string();
    let detail = status_detail(log.is_some(), head.scheduled_at).to_string();

    let service_date_instant = head.scheduled_at.or(head.started_at);
    let service_date = fmt_local_date(service_date_instant, tz);
    let bus_age = match (head.vehicle_year, service_date_instant) {
        (Some(year), Some(instant)) => Some(instant.with_timezone(&tz).year() - year),
        _ => None,
    };

    let remark = if events.iter().any(|event| event.adhoc) {
        "Ad-hoc".to_string()
    } else {
        String::new()
    };

    TripSummary {
        route_id: head.route_id,
        route_short_name: head.route_short_name.clone(),
        route_name: head.route_name.clone(),
        trip_id: head.trip_id.clone(),
        direction: head.direction.label(),
        trip_label,
        service_date,
        start_point,
        bus_plate: head
            .vehicle_registration_number
            .clone()
            .unwrap_or_default(),
        bus_age,
        km_rate: head.km_rate,
        driver_id: head.staff_id.clone().unwrap_or_default(),
        duty_id: head.device_serial_number.clone().unwrap_or_default(),
        bus_stops: counts.stop_hits.len(),
        km_planned: head.planned_km(),
        km_gps: head.gps_km(),
        km_bop: head.planned_km(),
        km_rate_bop: head.km_rate,
        total_claim: 0.0,
        total_claim_gps: 0.0,
        monthly_pass: 0.0,
        jkm: 0.0,
        maim: 0.0,
        passenger: 0,
        status,
        status_detail: detail,
        status_j,
        punctuality: punctuality_verdict,
        remark,
        service_start: fmt_local_hm(head.scheduled_at, tz),
        service_end: fmt_local_hm(head.scheduled_end, tz),
        observed_start: fmt_local_hm(head.started_at, tz),
        actual_start,
        actual_end: fmt_local_hms(head.ended_at, tz),
        sales_start,
        sales_end,
        adults,
        children,
        seniors,
        oku,
        students: 0,
        total_on: adults + children + seniors + oku,
        transfer_count: 0,
        total_pax,
        total_amount: ceil_to_cent(total_amount),
        cash_amount,
        cash_pax,
        cashless_amount,
        cashless_pax,
        cash_adults: cash_split[0],
        cash_children: cash_split[1],
        cash_seniors: cash_split[2],
        cash_oku: cash_split[3],
        cash_foreign_adults: cash_split[4],
        cash_foreign_children: cash_split[5],
        cashless_adults: cashless_split[0],
        cashless_children: cashless_split[1],
        cashless_seniors: cashless_split[2],
        cashless_oku: cashless_split[3],
        cashless_foreign_adults: cashless_split[4],
        cashless_foreign_children: cashless_split[5],
    }
}
