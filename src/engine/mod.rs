//! The trip actuals inference and claim aggregation engine.
//!
//! Pure, synchronous computation over in-memory collections: transactions
//! plus reference data in, a [`ClaimReport`] out. All I/O (upstream fetches,
//! bounded-concurrency log retrieval, report upload) lives in the `fetch`
//! and `output` modules; by the time [`generate_report`] runs, every trip
//! log has been resolved into the input map.

pub mod actual_start;
pub mod aggregate;
pub mod classify;
pub mod geo_cache;
pub mod geometry;
pub mod missing;
pub mod report;
pub mod schedule;
pub mod util;

pub use aggregate::{
    ClaimReport, DateBlock, DateRouteDirectionGroup, GroupRollup, RouteBlock, TripSummary,
};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashMap;
use tracing::info;

use crate::model::{
    Agency, DayHalf, DayKind, GpsLogPoint, PaymentChannel, ReportFilters, RouteStop, Timetable,
    TripTransaction,
};

/// The fixed reporting timezone; all calendar dates, times of day and
/// weekday decisions are taken here.
pub const REPORT_TZ: Tz = chrono_tz::Asia::Singapore;

/// Minimum observed duration for a transaction to count as a real trip.
pub const MIN_TRIP_MINUTES: i64 = 10;

/// Transactions before this local instant predate the claim scheme and are
/// excluded outright.
pub fn service_epoch() -> DateTime<Utc> {
    use chrono::TimeZone;
    REPORT_TZ
        .with_ymd_and_hms(2022, 9, 17, 0, 0, 0)
        .single()
        .expect("service epoch is a valid local instant")
        .with_timezone(&Utc)
}

/// Everything one report invocation needs, fully resolved.
#[derive(Debug)]
pub struct EngineInput {
    pub agency: Agency,
    pub transactions: Vec<TripTransaction>,
    pub timetable: Timetable,
    /// Stop lists keyed by route id; a route that failed to load simply has
    /// no entry and degrades to "no stops".
    pub route_stops: HashMap<i64, Vec<RouteStop>>,
    /// GPS logs keyed by trip id; a trip that failed to load has no entry
    /// and degrades to "no GPS log".
    pub trip_logs: HashMap<String, Vec<GpsLogPoint>>,
    pub filters: ReportFilters,
}

/// Runs the full pipeline: pre-filters, schedule reconciliation, request
/// filters, grouping, missed-trip synthesis for offline agencies, per-trip
/// summarization and report rendering.
pub fn generate_report(input: EngineInput) -> ClaimReport {
    let tz = REPORT_TZ;
    let EngineInput {
        agency,
        transactions,
        timetable,
        route_stops,
        trip_logs,
        filters,
    } = input;

    info!(
        agency_id = agency.id,
        transactions = transactions.len(),
        offline_trips = agency.offline_trips,
        "generating claim report"
    );

    let epoch = service_epoch();
    let mut transactions: Vec<TripTransaction> = transactions
        .into_iter()
        .filter(|trx| in_service_window(trx, epoch))
        .collect();

    if agency.offline_trips {
        transactions.retain(|trx| trx.started_at.is_some());
    }

    let transactions = schedule::reconcile(transactions, &timetable, tz);
    let transactions: Vec<TripTransaction> = transactions
        .into_iter()
        .filter(|trx| matches_filters(trx, &filters, tz))
        .collect();

    let mut groups = aggregate::group_transactions(transactions, tz);
    if agency.offline_trips {
        missing::synthesize_missing_trips(&mut groups, &timetable, tz);
    }

    let (routes, summaries) = aggregate::build_blocks(groups, &route_stops, &trip_logs, tz);
    let rendered = report::render(&routes);

    info!(
        trips = summaries.len(),
        routes = routes.len(),
        "claim report generated"
    );

    ClaimReport {
        summaries,
        routes,
        rendered,
    }
}

/// The service-epoch pre-filter: a transaction participates when it ran for
/// at least [`MIN_TRIP_MINUTES`] and started after the epoch, or when its
/// schedule falls after the epoch.
fn in_service_window(trx: &TripTransaction, epoch: DateTime<Utc>) -> bool {
    let long_enough = matches!(
        (trx.started_at, trx.ended_at),
        (Some(started), Some(ended)) if ended - started >= Duration::minutes(MIN_TRIP_MINUTES)
    );
    let started_after = trx.started_at.is_some_and(|started| started >= epoch);
    let scheduled_after = trx.scheduled_at.is_some_and(|scheduled| scheduled >= epoch);

    (long_enough && started_after) || scheduled_after
}

fn matches_filters(trx: &TripTransaction, filters: &ReportFilters, tz: Tz) -> bool {
    if let Some(half) = filters.am_pm {
        let Some(started) = trx.started_at else {
            return false;
        };
        let is_am = started.with_timezone(&tz).hour() < 12;
        if (half == DayHalf::Am) != is_am {
            return false;
        }
    }

    if let Some(kind) = filters.day_kind {
        let Some(started) = trx.started_at else {
            return false;
        };
        let weekday = started.with_timezone(&tz).weekday();
        let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        if (kind == DayKind::Weekend) != is_weekend {
            return false;
        }
    }

    if filters.select_from.is_some() || filters.select_to.is_some() {
        let Some(local) = trx
            .started_at
            .or(trx.scheduled_at)
            .map(|instant| instant.with_timezone(&tz).naive_local())
        else {
            return false;
        };
        if filters.select_from.is_some_and(|from| local < from) {
            return false;
        }
        if filters.select_to.is_some_and(|to| local > to) {
            return false;
        }
    }

    if let Some(vehicle) = &filters.vehicle {
        if trx.vehicle_registration_number.as_deref() != Some(vehicle.as_str()) {
            return false;
        }
    }

    if let Some(driver) = &filters.driver {
        if trx.driver_name.as_deref() != Some(driver.as_str()) {
            return false;
        }
    }

    if let Some(channel) = filters.paid_by {
        if (channel == PaymentChannel::Cashless) != trx.is_cashless() {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{instant, transaction};

    fn recent_trip() -> TripTransaction {
        let mut trx = transaction("T1");
        trx.started_at = Some(instant("2024-08-20T08:03:00+08:00"));
        trx.ended_at = Some(instant("2024-08-20T08:40:00+08:00"));
        trx
    }

    #[test]
    fn test_service_window_requires_duration_or_schedule() {
        let epoch = service_epoch();

        assert!(in_service_window(&recent_trip(), epoch));

        // Nine minutes of observed duration and no schedule: out.
        let mut short = recent_trip();
        short.ended_at = Some(instant("2024-08-20T08:12:00+08:00"));
        assert!(!in_service_window(&short, epoch));

        // Short but scheduled after the epoch: in.
        short.scheduled_at = Some(instant("2024-08-20T08:00:00+08:00"));
        assert!(in_service_window(&short, epoch));

        // Ran before the epoch entirely: out.
        let mut ancient = recent_trip();
        ancient.started_at = Some(instant("2022-01-10T08:00:00+08:00"));
        ancient.ended_at = Some(instant("2022-01-10T09:00:00+08:00"));
        assert!(!in_service_window(&ancient, epoch));
    }

    #[test]
    fn test_am_pm_filter() {
        let filters = ReportFilters {
            am_pm: Some(DayHalf::Am),
            ..ReportFilters::default()
        };
        assert!(matches_filters(&recent_trip(), &filters, REPORT_TZ));

        let mut afternoon = recent_trip();
        afternoon.started_at = Some(instant("2024-08-20T14:03:00+08:00"));
        assert!(!matches_filters(&afternoon, &filters, REPORT_TZ));

        // Unstarted trips never match a half-day filter.
        let unstarted = transaction("T1");
        assert!(!matches_filters(&unstarted, &filters, REPORT_TZ));
    }

    #[test]
    fn test_weekend_filter_uses_local_weekday() {
        let filters = ReportFilters {
            day_kind: Some(DayKind::Weekend),
            ..ReportFilters::default()
        };
        // 2024-08-20 is a Tuesday.
        assert!(!matches_filters(&recent_trip(), &filters, REPORT_TZ));

        // Friday 23:30 UTC is Saturday 07:30 in the reporting timezone.
        let mut trx = recent_trip();
        trx.started_at = Some(instant("2024-08-23T23:30:00Z"));
        assert!(matches_filters(&trx, &filters, REPORT_TZ));
    }

    #[test]
    fn test_payment_channel_filter() {
        let cash_only = ReportFilters {
            paid_by: Some(PaymentChannel::Cash),
            ..ReportFilters::default()
        };
        let mut cashless = recent_trip();
        cashless.rider_account_id = Some(7);

        assert!(matches_filters(&recent_trip(), &cash_only, REPORT_TZ));
        assert!(!matches_filters(&cashless, &cash_only, REPORT_TZ));
    }

    #[test]
    fn test_date_range_filter_prefers_observed_start() {
        let filters = ReportFilters {
            select_from: Some("2024-08-20T00:00:00".parse().unwrap()),
            select_to: Some("2024-08-20T23:59:59".parse().unwrap()),
            ..ReportFilters::default()
        };
        assert!(matches_filters(&recent_trip(), &filters, REPORT_TZ));

        let mut day_before = recent_trip();
        day_before.started_at = Some(instant("2024-08-19T08:03:00+08:00"));
        assert!(!matches_filters(&day_before, &filters, REPORT_TZ));
    }
}
