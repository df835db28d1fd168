//! Missed-trip synthesis for schedule-led agencies.
//!
//! When an agency runs offline (timetable-led) trips, a timetabled departure
//! with no matching transaction means the service never ran; the claim
//! report still has to show it. For every uncovered timetable slot a
//! zero-valued placeholder trip is appended to its (date, route, direction)
//! group. A fault while processing one group skips only that group.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::engine::aggregate::GroupedTransactions;
use crate::model::{Direction, Timetable, TripTransaction};

/// Prefix of synthetic trip ids; the suffix is a run-wide sequence number.
pub const SYNTHETIC_TRIP_PREFIX: &str = "M1000";

/// Fills every group with placeholders for its uncovered timetable slots.
pub fn synthesize_missing_trips(groups: &mut GroupedTransactions, timetable: &Timetable, tz: Tz) {
    let mut sequence = 1usize;

    for (route_id, dates) in groups.iter_mut() {
        for (service_date, directions) in dates.iter_mut() {
            for (direction, transactions) in directions.iter_mut() {
                if let Err(err) = fill_group(
                    *route_id,
                    *service_date,
                    *direction,
                    transactions,
                    timetable,
                    tz,
                    &mut sequence,
                ) {
                    warn!(
                        route_id = *route_id,
                        service_date = %service_date,
                        direction = ?direction,
                        error = %err,
                        "skipping missed-trip synthesis for group"
                    );
                }
            }
        }
    }
}

fn fill_group(
    route_id: i64,
    service_date: NaiveDate,
    direction: Direction,
    transactions: &mut Vec<TripTransaction>,
    timetable: &Timetable,
    tz: Tz,
    sequence: &mut usize,
) -> Result<()> {
    let entries = timetable.entries(route_id, direction, service_date.weekday());
    if entries.is_empty() {
        debug!(route_id, %service_date, "no timetable for group, nothing to synthesize");
        return Ok(());
    }

    // Scheduled departures already covered by real (non-ad-hoc) trips,
    // compared as reporting-timezone times of day.
    let covered: Vec<NaiveTime> = transactions
        .iter()
        .filter(|trx| !trx.adhoc)
        .filter_map(|trx| trx.scheduled_at)
        .map(|scheduled| scheduled.with_timezone(&tz).time())
        .collect();

    // Geometry and mileage for placeholders are borrowed from the route via
    // any real transaction in the group.
    let Some(template) = transactions.first().cloned() else {
        return Ok(());
    };

    let mut placeholders = Vec::new();
    for entry in entries {
        if covered.contains(&entry.start_time) {
            continue;
        }

        let scheduled_at = local_instant(tz, service_date, entry.start_time)
            .context("timetable start does not map to a local instant")?;
        let scheduled_end = local_instant(tz, service_date, entry.end_time)
            .context("timetable end does not map to a local instant")?;

        placeholders.push(placeholder(
            &template,
            format!("{SYNTHETIC_TRIP_PREFIX}{sequence}"),
            scheduled_at,
            scheduled_end,
        ));
        *sequence += 1;
    }

    transactions.extend(placeholders);
    Ok(())
}

fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|instant| instant.with_timezone(&Utc))
}

/// A zero-passenger, zero-revenue stand-in for a trip that never ran.
fn placeholder(
    template: &TripTransaction,
    trip_id: String,
    scheduled_at: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
) -> TripTransaction {
    TripTransaction {
        trip_id,
        journey_id: None,
        route_id: template.route_id,
        route_short_name: template.route_short_name.clone(),
        route_name: template.route_name.clone(),
        direction: template.direction,
        started_at: None,
        ended_at: None,
        scheduled_at: Some(scheduled_at),
        scheduled_end: Some(scheduled_end),
        adhoc: false,
        rider_account_id: None,
        vehicle_registration_number: None,
        vehicle_year: None,
        driver_name: None,
        staff_id: None,
        device_serial_number: None,
        amount: 0.0,
        adults: 0,
        children: 0,
        seniors: 0,
        oku: 0,
        foreign_adults: 0,
        foreign_children: 0,
        journey_created: None,
        journey_ended: None,
        km_outbound: template.km_outbound,
        km_inbound: template.km_inbound,
        km_loop: template.km_loop,
        km_rate: template.km_rate,
        trip_mileage: None,
        route_polyline: template.route_polyline.clone(),
        restricted_stop: template.restricted_stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::group_transactions;
    use crate::engine::REPORT_TZ;
    use crate::testutil::{instant, timetable_entry, transaction};

    fn covered_transaction() -> TripTransaction {
        let mut trx = transaction("REAL-1");
        trx.started_at = Some(instant("2024-08-20T08:03:00+08:00"));
        trx.ended_at = Some(instant("2024-08-20T08:40:00+08:00"));
        trx.scheduled_at = Some(instant("2024-08-20T08:00:00+08:00"));
        trx.scheduled_end = Some(instant("2024-08-20T08:35:00+08:00"));
        trx.km_outbound = Some(74.0);
        trx
    }

    fn weekday_timetable() -> Timetable {
        Timetable::from_entries(vec![
            timetable_entry(10, Direction::Outbound, "tuesday", "07:15:00", "07:50:00"),
            timetable_entry(10, Direction::Outbound, "tuesday", "08:00:00", "08:35:00"),
        ])
    }

    #[test]
    fn test_uncovered_slot_yields_one_placeholder() {
        let mut groups = group_transactions(vec![covered_transaction()], REPORT_TZ);
        synthesize_missing_trips(&mut groups, &weekday_timetable(), REPORT_TZ);

        let group = &groups[&10][&NaiveDate::from_ymd_opt(2024, 8, 20).unwrap()]
            [&Direction::Outbound];
        assert_eq!(group.len(), 2);

        let placeholder = &group[1];
        assert_eq!(placeholder.trip_id, "M10001");
        assert_eq!(placeholder.amount, 0.0);
        assert_eq!(placeholder.total_pax(), 0);
        assert_eq!(placeholder.started_at, None);
        assert_eq!(placeholder.ended_at, None);
        assert_eq!(
            placeholder.scheduled_at,
            Some(instant("2024-08-20T07:15:00+08:00"))
        );
        assert_eq!(
            placeholder.scheduled_end,
            Some(instant("2024-08-20T07:50:00+08:00"))
        );
        // Route mileage borrowed from the group's route.
        assert_eq!(placeholder.km_outbound, Some(74.0));
    }

    #[test]
    fn test_covered_slot_is_never_duplicated() {
        let mut groups = group_transactions(vec![covered_transaction()], REPORT_TZ);
        synthesize_missing_trips(&mut groups, &weekday_timetable(), REPORT_TZ);

        let group = &groups[&10][&NaiveDate::from_ymd_opt(2024, 8, 20).unwrap()]
            [&Direction::Outbound];
        let eight_oclock = group
            .iter()
            .filter(|trx| {
                trx.scheduled_at == Some(instant("2024-08-20T08:00:00+08:00"))
            })
            .count();
        assert_eq!(eight_oclock, 1);
    }

    #[test]
    fn test_adhoc_trips_do_not_cover_slots() {
        let mut adhoc = covered_transaction();
        adhoc.adhoc = true;

        let mut groups = group_transactions(vec![adhoc], REPORT_TZ);
        synthesize_missing_trips(&mut groups, &weekday_timetable(), REPORT_TZ);

        let group = &groups[&10][&NaiveDate::from_ymd_opt(2024, 8, 20).unwrap()]
            [&Direction::Outbound];
        // Both timetable slots get placeholders: the ad-hoc trip covers
        // nothing even though its synthesized time matches a slot.
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_sequence_spans_groups() {
        let tuesday = covered_transaction();
        let mut wednesday = covered_transaction();
        wednesday.trip_id = "REAL-2".to_string();
        wednesday.started_at = Some(instant("2024-08-21T08:03:00+08:00"));
        wednesday.scheduled_at = Some(instant("2024-08-21T08:00:00+08:00"));

        let timetable = Timetable::from_entries(vec![
            timetable_entry(10, Direction::Outbound, "tuesday", "07:15:00", "07:50:00"),
            timetable_entry(10, Direction::Outbound, "tuesday", "08:00:00", "08:35:00"),
            timetable_entry(10, Direction::Outbound, "wednesday", "07:15:00", "07:50:00"),
            timetable_entry(10, Direction::Outbound, "wednesday", "08:00:00", "08:35:00"),
        ]);

        let mut groups = group_transactions(vec![tuesday, wednesday], REPORT_TZ);
        synthesize_missing_trips(&mut groups, &timetable, REPORT_TZ);

        let dates = &groups[&10];
        let tue = &dates[&NaiveDate::from_ymd_opt(2024, 8, 20).unwrap()][&Direction::Outbound];
        let wed = &dates[&NaiveDate::from_ymd_opt(2024, 8, 21).unwrap()][&Direction::Outbound];

        assert_eq!(tue[1].trip_id, "M10001");
        assert_eq!(wed[1].trip_id, "M10002");
    }

    #[test]
    fn test_no_timetable_for_weekday_adds_nothing() {
        // Wednesday transaction against a Tuesday-only timetable.
        let mut wednesday = covered_transaction();
        wednesday.started_at = Some(instant("2024-08-21T08:03:00+08:00"));
        wednesday.scheduled_at = Some(instant("2024-08-21T08:00:00+08:00"));

        let mut groups = group_transactions(vec![wednesday], REPORT_TZ);
        synthesize_missing_trips(&mut groups, &weekday_timetable(), REPORT_TZ);

        let group = &groups[&10][&NaiveDate::from_ymd_opt(2024, 8, 21).unwrap()]
            [&Direction::Outbound];
        assert_eq!(group.len(), 1);
    }
}
